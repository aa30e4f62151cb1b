use std::str::FromStr;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use uninexus_auth::AuthzError;
use uninexus_core::DomainError;

pub fn domain_error_status(err: &DomainError) -> StatusCode {
    match err {
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::DuplicateName(_)
        | DomainError::AlreadyMember
        | DomainError::InvalidState(_)
        | DomainError::AlreadyProcessed
        | DomainError::PendingInvitationExists(_)
        | DomainError::PendingJoinRequestExists => StatusCode::CONFLICT,
        DomainError::CrossTenantReference(_) | DomainError::BatchRejected(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        DomainError::Expired => StatusCode::GONE,
        DomainError::Validation(_) | DomainError::InvalidId(_) => StatusCode::BAD_REQUEST,
        DomainError::Forbidden(_) => StatusCode::FORBIDDEN,
        DomainError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let status = domain_error_status(&err);
    match err {
        DomainError::BatchRejected(failed_ids) => (
            status,
            axum::Json(json!({
                "error": "batch_rejected",
                "message": "no member was changed; some ids are not members of this organization",
                "failed_ids": failed_ids,
            })),
        )
            .into_response(),
        DomainError::Internal(detail) => {
            tracing::error!(error = %detail, "request failed with internal error");
            json_error(status, "internal_error", "internal error")
        }
        other => json_error(status, other.code(), other.to_string()),
    }
}

pub fn authz_error_to_response(err: AuthzError) -> axum::response::Response {
    json_error(StatusCode::FORBIDDEN, "forbidden", err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path or query identifier, mapping failures to a 400 response.
pub fn parse_id<T>(raw: &str) -> Result<T, axum::response::Response>
where
    T: FromStr<Err = DomainError>,
{
    raw.parse::<T>().map_err(domain_error_to_response)
}
