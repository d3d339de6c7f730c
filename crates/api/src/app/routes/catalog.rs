use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;

use orderflow_core::{HubCode, SkuCode};
use orderflow_infra::{Pipeline, PipelineError};
use orderflow_inventory::CatalogError;

use crate::app::errors;

pub fn router() -> Router {
    Router::new()
        .route("/skus/code/:code", get(sku_by_code))
        .route("/hubs/code/:code", get(hub_by_code))
}

fn known(code: String, found: Result<bool, CatalogError>) -> Response {
    match found {
        Ok(true) => (StatusCode::OK, Json(json!({ "code": code }))).into_response(),
        Ok(false) => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("unknown code {code}")),
        Err(e) => errors::pipeline_error_to_response(PipelineError::from(e)),
    }
}

pub async fn sku_by_code(Extension(pipeline): Extension<Arc<Pipeline>>, Path(code): Path<String>) -> Response {
    let sku = match SkuCode::new(code) {
        Ok(v) => v,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()),
    };
    let result = errors::blocking(move || {
        let found = pipeline.catalog().sku_exists(&sku);
        Ok(known(sku.to_string(), found))
    })
    .await;
    result.unwrap_or_else(|resp| resp)
}

pub async fn hub_by_code(Extension(pipeline): Extension<Arc<Pipeline>>, Path(code): Path<String>) -> Response {
    let hub = match HubCode::new(code) {
        Ok(v) => v,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()),
    };
    let result = errors::blocking(move || {
        let found = pipeline.catalog().hub_exists(&hub);
        Ok(known(hub.to_string(), found))
    })
    .await;
    result.unwrap_or_else(|resp| resp)
}
