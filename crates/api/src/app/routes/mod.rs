use axum::Router;

pub mod catalog;
pub mod inventory;
pub mod orders;
pub mod system;
pub mod webhooks;

/// Router for every pipeline endpoint.
pub fn router() -> Router {
    Router::new()
        .merge(orders::router())
        .merge(webhooks::router())
        .merge(inventory::router())
        .merge(catalog::router())
}
