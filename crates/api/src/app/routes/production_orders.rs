use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post},
};

use stockforge_infra::production::NewProductionOrder;
use stockforge_production::OrderNumber;

use crate::app::dto;
use crate::app::routes::common::{blocking, respond};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_orders).post(create_order))
        .route("/:number", get(get_order))
        .route("/:number/start", post(start_order))
        .route("/:number/suspend", post(suspend_order))
        .route("/:number/resume", post(resume_order))
        .route("/:number/cancel", post(cancel_order))
        .route("/:number/reschedule", post(reschedule_order))
        .route("/:number/complete", post(complete_order))
}

pub async fn list_orders(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let result = blocking(&services, |s| Ok(s.orders.list())).await;
    respond(StatusCode::OK, result)
}

pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateProductionOrderRequest>,
) -> axum::response::Response {
    let result = blocking(&services, move |s| {
        let (_, finished_good) = s.catalog.resolve(&body.finished_good)?;
        s.orders.create(NewProductionOrder {
            number: body.number,
            finished_good,
            requested_quantity: body.requested_quantity,
            bom: body.bom,
            planned_start: body.planned_start,
            estimated_end: body.estimated_end,
        })
    })
    .await;
    respond(StatusCode::CREATED, result)
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(number): Path<String>,
) -> axum::response::Response {
    let result = blocking(&services, move |s| s.orders.get(&OrderNumber::parse(&number)?)).await;
    respond(StatusCode::OK, result)
}

pub async fn start_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(number): Path<String>,
) -> axum::response::Response {
    let result = blocking(&services, move |s| s.orders.start(&OrderNumber::parse(&number)?)).await;
    respond(StatusCode::OK, result)
}

pub async fn suspend_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(number): Path<String>,
    body: Option<Json<dto::TransitionRequest>>,
) -> axum::response::Response {
    let reason = body.and_then(|Json(b)| b.reason);
    let result = blocking(&services, move |s| s.orders.suspend(&OrderNumber::parse(&number)?, reason)).await;
    respond(StatusCode::OK, result)
}

pub async fn resume_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(number): Path<String>,
) -> axum::response::Response {
    let result = blocking(&services, move |s| s.orders.resume(&OrderNumber::parse(&number)?)).await;
    respond(StatusCode::OK, result)
}

pub async fn cancel_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(number): Path<String>,
    body: Option<Json<dto::TransitionRequest>>,
) -> axum::response::Response {
    let reason = body.and_then(|Json(b)| b.reason);
    let result = blocking(&services, move |s| s.orders.cancel(&OrderNumber::parse(&number)?, reason)).await;
    respond(StatusCode::OK, result)
}

pub async fn reschedule_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(number): Path<String>,
    Json(body): Json<dto::RescheduleRequest>,
) -> axum::response::Response {
    let result = blocking(&services, move |s| {
        s.orders
            .reschedule(&OrderNumber::parse(&number)?, body.planned_start, body.estimated_end)
    })
    .await;
    respond(StatusCode::OK, result)
}

pub async fn complete_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(number): Path<String>,
) -> axum::response::Response {
    let result = blocking(&services, move |s| s.orders.complete(&OrderNumber::parse(&number)?)).await;
    respond(StatusCode::OK, result)
}
