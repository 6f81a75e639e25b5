use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use stockforge_core::DomainError;

pub fn status_for(err: &DomainError) -> StatusCode {
    match err {
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::DuplicateCode(_) | DomainError::Conflict(_) => StatusCode::CONFLICT,
        DomainError::InvalidState(_)
        | DomainError::InvalidOperation(_)
        | DomainError::InsufficientStock { .. }
        | DomainError::CyclicBom(_)
        | DomainError::InvariantViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DomainError::Validation(_) | DomainError::InvalidId(_) => StatusCode::BAD_REQUEST,
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let status = status_for(&err);
    if status == StatusCode::CONFLICT || matches!(err, DomainError::InvariantViolation(_)) {
        tracing::warn!(error = %err, code = err.code(), "request failed");
    }
    json_error(status, err.code(), err.to_string())
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
