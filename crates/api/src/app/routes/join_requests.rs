use axum::{
    Router,
    extract::{Extension, Json, Path, Query, rejection::QueryRejection},
    routing::{delete, get, post},
};

use uninexus_auth::builtin;
use uninexus_core::{JoinRequestId, OrganizationId};
use uninexus_directory::JoinRequestStatus;
use uninexus_infra::DirectoryServices;

use super::{ApiResult, created, items, no_content, ok};
use crate::app::{dto, errors};
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_join_requests).post(create_join_request))
        .route("/:id", delete(withdraw_join_request))
        .route("/:id/approve", post(approve_join_request))
        .route("/:id/reject", post(reject_join_request))
}

fn ids(org_id: &str, id: &str) -> Result<(OrganizationId, JoinRequestId), axum::response::Response> {
    Ok((errors::parse_id(org_id)?, errors::parse_id(id)?))
}

/// GET /organizations/:org_id/join-requests?status=pending
pub async fn list_join_requests(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org_id): Path<String>,
    params: Result<Query<dto::JoinRequestListQuery>, QueryRejection>,
) -> ApiResult {
    let org_id: OrganizationId = errors::parse_id(&org_id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::VIEW_JOIN_REQUESTS).await?;
    let params = dto::query(params)?;
    let status = dto::parse_opt::<JoinRequestStatus>(params.status.as_deref())?;

    let requests = services
        .join_requests
        .list(org_id, status)
        .await
        .map_err(errors::domain_error_to_response)?;
    items(requests)
}

/// Any authenticated non-member may ask to join.
pub async fn create_join_request(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org_id): Path<String>,
) -> ApiResult {
    let org_id: OrganizationId = errors::parse_id(&org_id)?;
    let request = services
        .join_requests
        .create(org_id, principal.user_id())
        .await
        .map_err(errors::domain_error_to_response)?;
    created(request)
}

/// Body is optional; without roles the Member role is assigned.
pub async fn approve_join_request(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path((org_id, id)): Path<(String, String)>,
    payload: Option<Json<dto::ApproveJoinRequestRequest>>,
) -> ApiResult {
    let (org_id, id) = ids(&org_id, &id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::MANAGE_JOIN_REQUESTS).await?;
    let req = payload.map(|Json(req)| req).unwrap_or_default();
    let membership = services
        .join_requests
        .approve(org_id, id, req.role_ids)
        .await
        .map_err(errors::domain_error_to_response)?;
    ok(membership)
}

pub async fn reject_join_request(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path((org_id, id)): Path<(String, String)>,
) -> ApiResult {
    let (org_id, id) = ids(&org_id, &id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::MANAGE_JOIN_REQUESTS).await?;
    let request = services
        .join_requests
        .reject(org_id, id)
        .await
        .map_err(errors::domain_error_to_response)?;
    ok(request)
}

/// The requester may withdraw their own request; anyone else needs
/// `manage_join_requests`.
pub async fn withdraw_join_request(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path((org_id, id)): Path<(String, String)>,
) -> ApiResult {
    let (org_id, id) = ids(&org_id, &id)?;
    let may_manage =
        authz::require_permission(&services, &principal, org_id, &builtin::MANAGE_JOIN_REQUESTS)
            .await
            .is_ok();
    services
        .join_requests
        .withdraw(org_id, id, principal.user_id(), may_manage)
        .await
        .map_err(errors::domain_error_to_response)?;
    no_content()
}
