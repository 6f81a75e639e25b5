use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    routing::get,
};

use stockforge_infra::catalog::NewItem;
use stockforge_inventory::ItemPatch;

use crate::app::dto;
use crate::app::routes::common::{blocking, respond};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_items).post(create_item))
        .route("/next-code", get(next_code))
        .route("/:code", get(get_item).patch(update_item).delete(delete_item))
        .route("/:code/movements", get(list_movements).post(append_movement))
        .route("/:code/reservation", get(get_reservation))
}

pub async fn list_items(
    Extension(services): Extension<Arc<AppServices>>,
    query: Option<Query<dto::ListItemsQuery>>,
) -> axum::response::Response {
    let include_deleted = query.map(|Query(q)| q.include_deleted).unwrap_or(false);
    let result = blocking(&services, move |s| s.catalog.list(include_deleted)).await;
    respond(StatusCode::OK, result)
}

pub async fn create_item(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<NewItem>,
) -> axum::response::Response {
    let result = blocking(&services, move |s| s.catalog.create(body)).await;
    respond(StatusCode::CREATED, result)
}

pub async fn next_code(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::NextCodeQuery>,
) -> axum::response::Response {
    let result = blocking(&services, move |s| {
        s.catalog
            .next_code(&query.prefix)
            .map(|code| dto::NextCodeResponse { code })
    })
    .await;
    respond(StatusCode::OK, result)
}

pub async fn get_item(
    Extension(services): Extension<Arc<AppServices>>,
    Path(code): Path<String>,
) -> axum::response::Response {
    let result = blocking(&services, move |s| {
        let (code, _) = s.catalog.resolve(&code)?;
        s.catalog.read(&code)
    })
    .await;
    respond(StatusCode::OK, result)
}

pub async fn update_item(
    Extension(services): Extension<Arc<AppServices>>,
    Path(code): Path<String>,
    Json(patch): Json<ItemPatch>,
) -> axum::response::Response {
    let result = blocking(&services, move |s| {
        let (code, _) = s.catalog.resolve(&code)?;
        s.catalog.update(&code, patch)
    })
    .await;
    respond(StatusCode::OK, result)
}

pub async fn delete_item(
    Extension(services): Extension<Arc<AppServices>>,
    Path(code): Path<String>,
) -> axum::response::Response {
    let result = blocking(&services, move |s| {
        let (code, _) = s.catalog.resolve(&code)?;
        s.catalog.delete(&code)
    })
    .await;
    respond(StatusCode::OK, result)
}

pub async fn list_movements(
    Extension(services): Extension<Arc<AppServices>>,
    Path(code): Path<String>,
) -> axum::response::Response {
    let result = blocking(&services, move |s| {
        let (_, item_id) = s.catalog.resolve(&code)?;
        s.ledger.movements(item_id)
    })
    .await;
    respond(StatusCode::OK, result)
}

pub async fn append_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Path(code): Path<String>,
    Json(body): Json<dto::AppendMovementRequest>,
) -> axum::response::Response {
    let result = blocking(&services, move |s| {
        let (_, item_id) = s.catalog.resolve(&code)?;
        s.ledger
            .append_with_retry(item_id, body.kind, body.quantity, body.cause, body.note)
    })
    .await;
    respond(StatusCode::CREATED, result)
}

pub async fn get_reservation(
    Extension(services): Extension<Arc<AppServices>>,
    Path(code): Path<String>,
) -> axum::response::Response {
    let result = blocking(&services, move |s| {
        let (code, _) = s.catalog.resolve(&code)?;
        s.reservations.reservation_for(&code)
    })
    .await;
    respond(StatusCode::OK, result)
}
