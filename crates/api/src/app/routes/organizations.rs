use axum::{
    Router,
    extract::{Extension, Json, Path, rejection::JsonRejection},
    routing::get,
};

use uninexus_auth::builtin;
use uninexus_core::OrganizationId;
use uninexus_directory::OrganizationPatch;
use uninexus_infra::DirectoryServices;

use super::{ApiResult, created, items, no_content, ok};
use crate::app::{dto, errors};
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_organizations).post(create_organization))
        .route(
            "/:org_id",
            get(get_organization)
                .put(update_organization)
                .delete(delete_organization),
        )
        .route("/:org_id/stats", get(organization_stats))
        .route("/:org_id/access", get(my_access))
        .nest("/:org_id/permissions", super::permissions::router())
        .nest("/:org_id/roles", super::roles::router())
        .nest("/:org_id/members", super::members::router())
        .nest("/:org_id/invitations", super::invitations::router())
        .nest("/:org_id/join-requests", super::join_requests::router())
}

/// Organizations the caller belongs to.
pub async fn list_organizations(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    let organizations = services
        .organizations
        .list_for_user(principal.user_id())
        .await
        .map_err(errors::domain_error_to_response)?;
    items(organizations)
}

/// The caller becomes the owner (Admin role).
pub async fn create_organization(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<dto::CreateOrganizationRequest>, JsonRejection>,
) -> ApiResult {
    let req = dto::body(payload)?;
    let organization = services
        .organizations
        .create(&req.name, req.description, req.industry, principal.user_id())
        .await
        .map_err(errors::domain_error_to_response)?;
    created(organization)
}

pub async fn get_organization(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org_id): Path<String>,
) -> ApiResult {
    let org_id: OrganizationId = errors::parse_id(&org_id)?;
    authz::require_member(&services, &principal, org_id).await?;
    let organization = services
        .organizations
        .get(org_id)
        .await
        .map_err(errors::domain_error_to_response)?;
    ok(organization)
}

pub async fn update_organization(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org_id): Path<String>,
    payload: Result<Json<OrganizationPatch>, JsonRejection>,
) -> ApiResult {
    let org_id: OrganizationId = errors::parse_id(&org_id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::MANAGE_ORGANIZATION).await?;
    let patch = dto::body(payload)?;
    let organization = services
        .organizations
        .update(org_id, patch)
        .await
        .map_err(errors::domain_error_to_response)?;
    ok(organization)
}

pub async fn delete_organization(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org_id): Path<String>,
) -> ApiResult {
    let org_id: OrganizationId = errors::parse_id(&org_id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::MANAGE_ORGANIZATION).await?;
    services
        .organizations
        .delete(org_id)
        .await
        .map_err(errors::domain_error_to_response)?;
    no_content()
}

pub async fn organization_stats(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org_id): Path<String>,
) -> ApiResult {
    let org_id: OrganizationId = errors::parse_id(&org_id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::VIEW_MEMBERS).await?;
    let stats = services
        .organizations
        .stats(org_id)
        .await
        .map_err(errors::domain_error_to_response)?;
    ok(stats)
}

/// The caller's effective permissions in the organization.
pub async fn my_access(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org_id): Path<String>,
) -> ApiResult {
    let org_id: OrganizationId = errors::parse_id(&org_id)?;
    let context = authz::require_member(&services, &principal, org_id).await?;
    ok(serde_json::json!({
        "organization_id": context.organization_id(),
        "membership_id": context.membership_id(),
        "permissions": context.permissions(),
    }))
}
