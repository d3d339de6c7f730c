//! Axum application wiring.
//!
//! - `routes/`: handlers, one file per area
//! - `dto.rs`: request DTOs
//! - `errors.rs`: JSON error responses and the blocking bridge

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use orderflow_infra::Pipeline;

pub mod dto;
pub mod errors;
pub mod routes;

/// Build the full HTTP router around an assembled pipeline.
///
/// The pipeline's stores are blocking; handlers reach them through
/// [`errors::blocking`].
pub fn build_app(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(ServiceBuilder::new().layer(Extension(pipeline)))
}
