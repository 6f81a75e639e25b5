use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use stockforge_core::{BomId, DomainResult};
use stockforge_production::{BillOfMaterials, BomComponent};

use crate::app::dto;
use crate::app::routes::common::{blocking, respond};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_boms).post(register_bom))
        .route("/:id", get(get_bom).delete(withdraw_bom))
}

fn view(s: &AppServices, bom: &BillOfMaterials) -> dto::BomView {
    let active = s.boms.active_bom_for(bom.finished_good()) == Some(bom.id());
    dto::BomView::from_bom(bom, active, s.catalog.as_ref())
}

pub async fn list_boms(
    Extension(services): Extension<Arc<AppServices>>,
    query: Option<Query<dto::ListBomsQuery>>,
) -> axum::response::Response {
    let finished_good = query.and_then(|Query(q)| q.finished_good);
    let result = blocking(&services, move |s| {
        let finished_good = match finished_good {
            Some(code) => Some(s.catalog.resolve(&code)?.1),
            None => None,
        };
        Ok(s.boms.list(finished_good).iter().map(|b| view(s, b)).collect::<Vec<_>>())
    })
    .await;
    respond(StatusCode::OK, result)
}

pub async fn register_bom(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::RegisterBomRequest>,
) -> axum::response::Response {
    let result = blocking(&services, move |s| {
        let (_, finished_good) = s.catalog.resolve(&body.finished_good)?;
        let components = body
            .components
            .iter()
            .map(|c| {
                s.catalog.resolve(&c.component).map(|(_, component)| BomComponent {
                    component,
                    quantity_per_unit: c.quantity_per_unit,
                })
            })
            .collect::<DomainResult<Vec<_>>>()?;
        let bom = s.boms.register(finished_good, &body.name, components)?;
        Ok(view(s, &bom))
    })
    .await;
    respond(StatusCode::CREATED, result)
}

pub async fn get_bom(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let result = blocking(&services, move |s| {
        let bom = s.boms.get(BomId::from_str(&id)?)?;
        Ok(view(s, &bom))
    })
    .await;
    respond(StatusCode::OK, result)
}

pub async fn withdraw_bom(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let result = blocking(&services, move |s| s.boms.withdraw(BomId::from_str(&id)?)).await;
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(resp) => resp,
    }
}
