//! HTTP API application wiring (axum router + service wiring).
//!
//! - `routes/`: HTTP routes + handlers, one file per resource
//! - `dto.rs`: request DTOs and extraction helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use uninexus_auth::{Hs256JwtValidator, JwtValidator};
use uninexus_core::SystemClock;
use uninexus_infra::{DirectoryServices, InMemoryDirectoryStore, InvitationSettings};

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;

/// Build the router over an in-memory store and the wall clock.
pub fn build_app(jwt_secret: String) -> Router {
    let services = DirectoryServices::new(
        Arc::new(InMemoryDirectoryStore::new()),
        Arc::new(SystemClock),
        InvitationSettings::default(),
    );
    let jwt = Arc::new(Hs256JwtValidator::new(jwt_secret.into_bytes()));
    build_app_with(services, jwt)
}

/// Build the full HTTP router over the given services.
pub fn build_app_with(services: DirectoryServices, jwt: Arc<dyn JwtValidator>) -> Router {
    let auth_state = middleware::AuthState {
        jwt,
        services: services.clone(),
    };

    // Protected routes: require a valid bearer token.
    let protected = routes::router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::public_router())
        .merge(protected)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
