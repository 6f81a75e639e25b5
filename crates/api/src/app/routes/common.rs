use std::sync::Arc;

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use stockforge_core::DomainResult;

use crate::app::errors;
use crate::app::services::AppServices;

/// Run a service call on the blocking pool.
///
/// Ledger and order locks wait with a bounded timeout and retries sleep
/// between attempts, so service calls never run on the async workers.
pub async fn blocking<T, F>(services: &Arc<AppServices>, f: F) -> Result<T, axum::response::Response>
where
    F: FnOnce(&AppServices) -> DomainResult<T> + Send + 'static,
    T: Send + 'static,
{
    let services = services.clone();
    match tokio::task::spawn_blocking(move || f(&services)).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(errors::domain_error_to_response(e)),
        Err(e) => {
            tracing::warn!(error = %e, "service task failed");
            Err(errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "service task failed",
            ))
        }
    }
}

/// Serialize `result` with `status`, or pass the error response through.
pub fn respond<T: Serialize>(status: StatusCode, result: Result<T, axum::response::Response>) -> axum::response::Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(resp) => resp,
    }
}
