use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;

pub mod invitations;
pub mod join_requests;
pub mod members;
pub mod organizations;
pub mod permissions;
pub mod roles;
pub mod system;

/// Handler outcome: the error side is an already-rendered error response.
pub type ApiResult = Result<Response, Response>;

/// Routes reachable without a bearer token.
pub fn public_router() -> Router {
    Router::new().route("/invitations/verify/:token", get(invitations::verify_invitation))
}

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/accept-invitation/:token", post(invitations::accept_invitation))
        .route("/invitations/:token/reject", post(invitations::reject_invitation))
        .nest("/organizations", organizations::router())
}

pub(crate) fn ok<T: Serialize>(value: T) -> ApiResult {
    Ok((StatusCode::OK, Json(value)).into_response())
}

pub(crate) fn created<T: Serialize>(value: T) -> ApiResult {
    Ok((StatusCode::CREATED, Json(value)).into_response())
}

pub(crate) fn items<T: Serialize>(items: Vec<T>) -> ApiResult {
    Ok((StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response())
}

pub(crate) fn no_content() -> ApiResult {
    Ok(StatusCode::NO_CONTENT.into_response())
}
