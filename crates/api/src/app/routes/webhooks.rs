use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use tracing::info;

use orderflow_core::{SubscriptionId, TenantId};
use orderflow_infra::{Pipeline, PipelineError};
use orderflow_orders::NewSubscription;

use crate::app::errors;

pub fn router() -> Router {
    Router::new()
        .route("/webhooks", post(register))
        .route("/webhooks/:tenant_id", get(list))
        .route("/webhooks/:tenant_id/:id", delete(deactivate))
}

fn tenant(raw: &str) -> Result<TenantId, Response> {
    TenantId::new(raw).map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()))
}

pub async fn register(
    Extension(pipeline): Extension<Arc<Pipeline>>,
    Json(body): Json<NewSubscription>,
) -> Response {
    let result = errors::blocking(move || {
        pipeline
            .registry()
            .register(body)
            .map_err(|e| errors::pipeline_error_to_response(PipelineError::from(e)))
    })
    .await;

    match result {
        Ok(subscription) => {
            info!(
                subscription_id = %subscription.id,
                tenant_id = %subscription.tenant_id,
                "webhook subscription registered"
            );
            (StatusCode::CREATED, Json(subscription)).into_response()
        }
        Err(resp) => resp,
    }
}

pub async fn list(Extension(pipeline): Extension<Arc<Pipeline>>, Path(tenant_id): Path<String>) -> Response {
    let tenant_id = match tenant(&tenant_id) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    let result = errors::blocking(move || {
        pipeline
            .registry()
            .list(&tenant_id)
            .map_err(|e| errors::pipeline_error_to_response(PipelineError::from(e)))
    })
    .await;

    match result {
        Ok(subscriptions) => (StatusCode::OK, Json(subscriptions)).into_response(),
        Err(resp) => resp,
    }
}

/// Deactivate one of the tenant's subscriptions; other tenants' IDs are 404.
pub async fn deactivate(
    Extension(pipeline): Extension<Arc<Pipeline>>,
    Path((tenant_id, id)): Path<(String, String)>,
) -> Response {
    let tenant_id = match tenant(&tenant_id) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let id: SubscriptionId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid subscription id"),
    };

    let result = errors::blocking(move || {
        let registry = pipeline.registry();
        let owned = registry
            .list(&tenant_id)
            .map_err(|e| errors::pipeline_error_to_response(PipelineError::from(e)))?
            .iter()
            .any(|s| s.id == id);
        if !owned {
            return Err(errors::json_error(StatusCode::NOT_FOUND, "not_found", "subscription not found"));
        }
        registry
            .deactivate(id)
            .map_err(|e| errors::pipeline_error_to_response(PipelineError::from(e)))
    })
    .await;

    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(resp) => resp,
    }
}
