use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tracing::info;

use orderflow_core::OrderId;
use orderflow_infra::{PipelineError, Pipeline};

use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/orders/csv", post(submit_csv))
        .route("/orders", get(list_orders))
        .route("/orders/:id", get(get_order))
}

/// Validate an uploaded CSV and enqueue it for ingestion.
pub async fn submit_csv(
    Extension(pipeline): Extension<Arc<Pipeline>>,
    Json(body): Json<dto::SubmitCsvRequest>,
) -> Response {
    let result = errors::blocking(move || {
        pipeline
            .intake()
            .submit(&body.path)
            .map_err(errors::pipeline_error_to_response)
    })
    .await;

    match result {
        Ok(receipt) => {
            info!(message_id = %receipt.message_id, key = %receipt.key, "ingestion task accepted");
            (StatusCode::ACCEPTED, Json(receipt)).into_response()
        }
        Err(resp) => resp,
    }
}

pub async fn get_order(Extension(pipeline): Extension<Arc<Pipeline>>, Path(id): Path<String>) -> Response {
    let id: OrderId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid order id"),
    };

    let result = errors::blocking(move || {
        pipeline
            .orders()
            .get(id)
            .map_err(|e| errors::pipeline_error_to_response(PipelineError::from(e)))
    })
    .await;

    match result {
        Ok(order) => (StatusCode::OK, Json(order)).into_response(),
        Err(resp) => resp,
    }
}

pub async fn list_orders(
    Extension(pipeline): Extension<Arc<Pipeline>>,
    Query(query): Query<dto::TenantQuery>,
) -> Response {
    let result = errors::blocking(move || {
        pipeline
            .orders()
            .list_by_tenant(&query.tenant_id)
            .map_err(|e| errors::pipeline_error_to_response(PipelineError::from(e)))
    })
    .await;

    match result {
        Ok(orders) => (StatusCode::OK, Json(orders)).into_response(),
        Err(resp) => resp,
    }
}
