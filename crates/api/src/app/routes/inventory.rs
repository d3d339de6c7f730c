use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};

use orderflow_infra::Pipeline;
use orderflow_inventory::{ConsumeRequest, InventoryKey};

use crate::app::{dto, errors};

/// The same surface the pipeline's inventory client speaks, so one process
/// can serve as another's inventory service.
pub fn router() -> Router {
    Router::new()
        .route("/inventory", put(set_stock))
        .route("/inventory/query", get(query))
        .route("/inventory/consume", post(consume))
}

pub async fn query(Extension(pipeline): Extension<Arc<Pipeline>>, Query(key): Query<InventoryKey>) -> Response {
    let result = errors::blocking(move || pipeline.ledger().get(&key).map_err(errors::ledger_error_to_response)).await;

    match result {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(resp) => resp,
    }
}

/// Conditional decrement: 200 `{remaining}`, 409 `{available, requested}`, 404.
pub async fn consume(
    Extension(pipeline): Extension<Arc<Pipeline>>,
    Json(body): Json<ConsumeRequest>,
) -> Response {
    let result =
        errors::blocking(move || pipeline.ledger().consume(&body).map_err(errors::ledger_error_to_response)).await;

    match result {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(resp) => resp,
    }
}

pub async fn set_stock(
    Extension(pipeline): Extension<Arc<Pipeline>>,
    Json(body): Json<dto::SetStockRequest>,
) -> Response {
    let result = errors::blocking(move || {
        pipeline
            .ledger()
            .upsert(body.key, body.quantity)
            .map_err(errors::ledger_error_to_response)
    })
    .await;

    match result {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(resp) => resp,
    }
}
