use axum::Router;

pub mod boms;
pub mod common;
pub mod items;
pub mod production_orders;
pub mod system;

/// Router for every resource endpoint.
pub fn router() -> Router {
    Router::new()
        .nest("/items", items::router())
        .nest("/boms", boms::router())
        .nest("/production-orders", production_orders::router())
}
