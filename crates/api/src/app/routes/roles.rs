use axum::{
    Router,
    extract::{Extension, Json, Path, rejection::JsonRejection},
    routing::get,
};

use uninexus_auth::builtin;
use uninexus_core::{OrganizationId, RoleId};
use uninexus_directory::RolePatch;
use uninexus_infra::DirectoryServices;

use super::{ApiResult, created, items, no_content, ok};
use crate::app::{dto, errors};
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_roles).post(create_role))
        .route("/:id", get(get_role).put(update_role).delete(delete_role))
}

fn ids(org_id: &str, id: &str) -> Result<(OrganizationId, RoleId), axum::response::Response> {
    Ok((errors::parse_id(org_id)?, errors::parse_id(id)?))
}

/// Roles with their permissions and member counts, by name.
pub async fn list_roles(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org_id): Path<String>,
) -> ApiResult {
    let org_id: OrganizationId = errors::parse_id(&org_id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::VIEW_ROLES).await?;
    let roles = services
        .roles
        .list(org_id)
        .await
        .map_err(errors::domain_error_to_response)?;
    items(roles)
}

pub async fn create_role(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org_id): Path<String>,
    payload: Result<Json<dto::CreateRoleRequest>, JsonRejection>,
) -> ApiResult {
    let org_id: OrganizationId = errors::parse_id(&org_id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::MANAGE_ROLES).await?;
    let req = dto::body(payload)?;
    let role = services
        .roles
        .create(org_id, &req.name, req.description, req.permission_ids)
        .await
        .map_err(errors::domain_error_to_response)?;
    created(role)
}

pub async fn get_role(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path((org_id, id)): Path<(String, String)>,
) -> ApiResult {
    let (org_id, id) = ids(&org_id, &id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::VIEW_ROLES).await?;
    let role = services
        .roles
        .get(org_id, id)
        .await
        .map_err(errors::domain_error_to_response)?;
    ok(role)
}

/// `permission_ids`, when present, replaces the whole set.
pub async fn update_role(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path((org_id, id)): Path<(String, String)>,
    payload: Result<Json<RolePatch>, JsonRejection>,
) -> ApiResult {
    let (org_id, id) = ids(&org_id, &id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::MANAGE_ROLES).await?;
    let patch = dto::body(payload)?;
    let role = services
        .roles
        .update(org_id, id, patch)
        .await
        .map_err(errors::domain_error_to_response)?;
    ok(role)
}

pub async fn delete_role(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path((org_id, id)): Path<(String, String)>,
) -> ApiResult {
    let (org_id, id) = ids(&org_id, &id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::MANAGE_ROLES).await?;
    services
        .roles
        .delete(org_id, id)
        .await
        .map_err(errors::domain_error_to_response)?;
    no_content()
}
