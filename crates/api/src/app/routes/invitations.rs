use axum::{
    Router,
    extract::{Extension, Json, Path, rejection::JsonRejection},
    routing::{delete, get, post},
};

use uninexus_auth::builtin;
use uninexus_core::{InvitationId, OrganizationId};
use uninexus_directory::invitation_ttl;
use uninexus_infra::DirectoryServices;

use super::{ApiResult, created, items, ok};
use crate::app::{dto, errors};
use crate::authz;
use crate::context::PrincipalContext;

/// Organization-scoped invitation management.
pub fn router() -> Router {
    Router::new()
        .route("/", get(list_invitations).post(create_invitation))
        .route("/:id", delete(cancel_invitation))
        .route("/:id/resend", post(resend_invitation))
}

fn ids(org_id: &str, id: &str) -> Result<(OrganizationId, InvitationId), axum::response::Response> {
    Ok((errors::parse_id(org_id)?, errors::parse_id(id)?))
}

pub async fn list_invitations(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org_id): Path<String>,
) -> ApiResult {
    let org_id: OrganizationId = errors::parse_id(&org_id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::INVITE_MEMBERS).await?;
    let invitations = services
        .invitations
        .list(org_id)
        .await
        .map_err(errors::domain_error_to_response)?;
    items(invitations)
}

/// Issues the invitation and returns it with its accept link. Delivery is
/// left to the caller.
pub async fn create_invitation(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org_id): Path<String>,
    payload: Result<Json<dto::CreateInvitationRequest>, JsonRejection>,
) -> ApiResult {
    let org_id: OrganizationId = errors::parse_id(&org_id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::INVITE_MEMBERS).await?;
    let req = dto::body(payload)?;
    let ttl = req
        .expires_in_hours
        .map(invitation_ttl)
        .transpose()
        .map_err(errors::domain_error_to_response)?;
    let issued = services
        .invitations
        .create(
            org_id,
            &req.email,
            req.role_id,
            principal.user_id(),
            ttl,
        )
        .await
        .map_err(errors::domain_error_to_response)?;
    created(issued)
}

pub async fn cancel_invitation(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path((org_id, id)): Path<(String, String)>,
) -> ApiResult {
    let (org_id, id) = ids(&org_id, &id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::INVITE_MEMBERS).await?;
    let invitation = services
        .invitations
        .cancel(org_id, id)
        .await
        .map_err(errors::domain_error_to_response)?;
    ok(invitation)
}

pub async fn resend_invitation(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path((org_id, id)): Path<(String, String)>,
) -> ApiResult {
    let (org_id, id) = ids(&org_id, &id)?;
    authz::require_permission(&services, &principal, org_id, &builtin::INVITE_MEMBERS).await?;
    let issued = services
        .invitations
        .resend(org_id, id)
        .await
        .map_err(errors::domain_error_to_response)?;
    ok(issued)
}

/// GET /invitations/verify/:token (public)
pub async fn verify_invitation(
    Extension(services): Extension<DirectoryServices>,
    Path(token): Path<String>,
) -> ApiResult {
    let details = services
        .invitations
        .resolve(&token)
        .await
        .map_err(errors::domain_error_to_response)?;
    ok(details)
}

/// POST /accept-invitation/:token
pub async fn accept_invitation(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(token): Path<String>,
) -> ApiResult {
    let membership = services
        .invitations
        .accept(&token, principal.user())
        .await
        .map_err(errors::domain_error_to_response)?;
    ok(membership)
}

/// POST /invitations/:token/reject
pub async fn reject_invitation(
    Extension(services): Extension<DirectoryServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(token): Path<String>,
) -> ApiResult {
    let invitation = services
        .invitations
        .reject(&token, principal.user())
        .await
        .map_err(errors::domain_error_to_response)?;
    ok(invitation)
}
