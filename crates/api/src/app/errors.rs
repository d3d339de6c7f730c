use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use orderflow_infra::PipelineError;
use orderflow_inventory::LedgerError;

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn pipeline_error_to_response(err: PipelineError) -> Response {
    let message = err.to_string();
    match err {
        PipelineError::Validation(_) => json_error(StatusCode::BAD_REQUEST, "validation_error", message),
        PipelineError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", message),
        PipelineError::Conflict(_) => json_error(StatusCode::CONFLICT, "conflict", message),
        PipelineError::Transient(_) | PipelineError::TimedOut(_) => {
            json_error(StatusCode::BAD_GATEWAY, "upstream_unavailable", message)
        }
        PipelineError::Fatal(_) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message),
    }
}

/// Ledger errors keep the conflict numbers so inventory clients can read them.
pub fn ledger_error_to_response(err: LedgerError) -> Response {
    match err {
        LedgerError::Conflict { available, requested } => (
            StatusCode::CONFLICT,
            axum::Json(json!({
                "error": "insufficient_stock",
                "message": err.to_string(),
                "available": available,
                "requested": requested,
            })),
        )
            .into_response(),
        other => pipeline_error_to_response(other.into()),
    }
}

/// Run blocking pipeline calls off the async workers.
pub async fn blocking<T, F>(f: F) -> Result<T, Response>
where
    F: FnOnce() -> Result<T, Response> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "blocking handler task failed");
            Err(json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "handler task failed"))
        }
    }
}
