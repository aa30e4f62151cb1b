use axum::{
    Router,
    extract::{
        Extension, Json, Path, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    routing::get,
};

use uninexus_auth::builtin;
use uninexus_core::{OrganizationId, PermissionId};
use uninexus_directory::{PermissionCategory, PermissionPatch};
use uninexus_infra::DirectoryServices;

use super::{ApiResult, created, items, no_content, ok};
use crate::app::{dto, errors};
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_permissions).post(create_permission))
        .route(
            "/:id",
            get(get_permission)
                .put(update_permission)
                .delete(delete_permission),
        )
}

fn ids(org_id: &str, id: &str) -> Result<(OrganizationId, PermissionId), axum::response::Response> {
    Ok((errors::parse_id(org_id)?, errors::parse_id(id)?))
}

/// GET /organizations/:org_id/permissions?category=members
pub async fn list_permissions(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org_id): Path<String>,
    params: Result<Query<dto::PermissionListQuery>, QueryRejection>,
) -> ApiResult {
    let org_id: OrganizationId = errors::parse_id(&org_id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::VIEW_ROLES).await?;
    let params = dto::query(params)?;
    let category = dto::parse_opt::<PermissionCategory>(params.category.as_deref())?;

    let permissions = services
        .permissions
        .list(org_id, category)
        .await
        .map_err(errors::domain_error_to_response)?;
    items(permissions)
}

pub async fn create_permission(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org_id): Path<String>,
    payload: Result<Json<dto::CreatePermissionRequest>, JsonRejection>,
) -> ApiResult {
    let org_id: OrganizationId = errors::parse_id(&org_id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::MANAGE_PERMISSIONS).await?;
    let req = dto::body(payload)?;
    let category = dto::parse_opt::<PermissionCategory>(req.category.as_deref())?.unwrap_or_default();

    let permission = services
        .permissions
        .create(org_id, &req.name, req.description, category)
        .await
        .map_err(errors::domain_error_to_response)?;
    created(permission)
}

pub async fn get_permission(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path((org_id, id)): Path<(String, String)>,
) -> ApiResult {
    let (org_id, id) = ids(&org_id, &id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::VIEW_ROLES).await?;
    let permission = services
        .permissions
        .get(org_id, id)
        .await
        .map_err(errors::domain_error_to_response)?;
    ok(permission)
}

pub async fn update_permission(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path((org_id, id)): Path<(String, String)>,
    payload: Result<Json<dto::UpdatePermissionRequest>, JsonRejection>,
) -> ApiResult {
    let (org_id, id) = ids(&org_id, &id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::MANAGE_PERMISSIONS).await?;
    let req = dto::body(payload)?;
    let patch = PermissionPatch {
        name: req.name,
        description: req.description,
        category: dto::parse_opt::<PermissionCategory>(req.category.as_deref())?,
    };

    let permission = services
        .permissions
        .update(org_id, id, patch)
        .await
        .map_err(errors::domain_error_to_response)?;
    ok(permission)
}

/// Refused with 409 while any role references the permission.
pub async fn delete_permission(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path((org_id, id)): Path<(String, String)>,
) -> ApiResult {
    let (org_id, id) = ids(&org_id, &id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::MANAGE_PERMISSIONS).await?;
    services
        .permissions
        .delete(org_id, id)
        .await
        .map_err(errors::domain_error_to_response)?;
    no_content()
}
