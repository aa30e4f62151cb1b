use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::context::PrincipalContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(principal): Extension<PrincipalContext>) -> impl IntoResponse {
    let user = principal.user();
    Json(serde_json::json!({
        "user_id": user.user_id.to_string(),
        "email": user.email,
        "name": user.name,
    }))
}
