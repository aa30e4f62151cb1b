use axum::{
    Router,
    extract::{
        Extension, Json, Path, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    routing::{delete, get, post, put},
};

use uninexus_auth::builtin;
use uninexus_core::{MembershipId, OrganizationId, RoleId};
use uninexus_directory::{MemberFilter, MemberStatus};
use uninexus_infra::DirectoryServices;

use super::{ApiResult, created, items, no_content, ok};
use crate::app::{dto, errors};
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_members).post(add_member))
        .route("/bulk", post(bulk_members))
        .route("/:id", delete(remove_member))
        .route("/:id/roles", put(update_member_roles))
        .route("/:id/status", put(set_member_status))
}

fn ids(org_id: &str, id: &str) -> Result<(OrganizationId, MembershipId), axum::response::Response> {
    Ok((errors::parse_id(org_id)?, errors::parse_id(id)?))
}

/// GET /organizations/:org_id/members?status=active&search=dana&role_id=...
pub async fn list_members(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org_id): Path<String>,
    params: Result<Query<dto::MemberListQuery>, QueryRejection>,
) -> ApiResult {
    let org_id: OrganizationId = errors::parse_id(&org_id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::VIEW_MEMBERS).await?;
    let params = dto::query(params)?;
    let filter = MemberFilter {
        status: dto::parse_opt::<MemberStatus>(params.status.as_deref())?,
        search: params.search,
        role_id: dto::parse_opt::<RoleId>(params.role_id.as_deref())?,
    };

    let members = services
        .members
        .list(org_id, &filter)
        .await
        .map_err(errors::domain_error_to_response)?;
    items(members)
}

pub async fn add_member(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org_id): Path<String>,
    payload: Result<Json<dto::AddMemberRequest>, JsonRejection>,
) -> ApiResult {
    let org_id: OrganizationId = errors::parse_id(&org_id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::MANAGE_MEMBERS).await?;
    let req = dto::body(payload)?;
    let member = services
        .members
        .add(org_id, req.user_id, req.role_ids)
        .await
        .map_err(errors::domain_error_to_response)?;
    created(member)
}

/// All-or-nothing; unknown ids reject the batch with `failed_ids`.
pub async fn bulk_members(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org_id): Path<String>,
    payload: Result<Json<dto::BulkMembersRequest>, JsonRejection>,
) -> ApiResult {
    let org_id: OrganizationId = errors::parse_id(&org_id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::MANAGE_MEMBERS).await?;
    let req = dto::body(payload)?;
    let outcome = services
        .members
        .bulk(org_id, &req.member_ids, req.action)
        .await
        .map_err(errors::domain_error_to_response)?;
    ok(outcome)
}

pub async fn remove_member(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path((org_id, id)): Path<(String, String)>,
) -> ApiResult {
    let (org_id, id) = ids(&org_id, &id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::MANAGE_MEMBERS).await?;
    services
        .members
        .remove(org_id, id)
        .await
        .map_err(errors::domain_error_to_response)?;
    no_content()
}

pub async fn update_member_roles(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path((org_id, id)): Path<(String, String)>,
    payload: Result<Json<dto::UpdateMemberRolesRequest>, JsonRejection>,
) -> ApiResult {
    let (org_id, id) = ids(&org_id, &id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::MANAGE_MEMBERS).await?;
    let req = dto::body(payload)?;
    let member = services
        .members
        .update_roles(org_id, id, req.role_ids)
        .await
        .map_err(errors::domain_error_to_response)?;
    ok(member)
}

pub async fn set_member_status(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path((org_id, id)): Path<(String, String)>,
    payload: Result<Json<dto::SetMemberStatusRequest>, JsonRejection>,
) -> ApiResult {
    let (org_id, id) = ids(&org_id, &id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::MANAGE_MEMBERS).await?;
    let req = dto::body(payload)?;
    let member = services
        .members
        .set_active(org_id, id, req.status == MemberStatus::Active)
        .await
        .map_err(errors::domain_error_to_response)?;
    ok(member)
}
