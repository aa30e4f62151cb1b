//! API-side authorization guard for organization-scoped routes.
//!
//! Resolves the caller's membership grant from the directory and checks it
//! with the pure [`uninexus_auth::authorize`] before the handler runs.

use axum::{http::StatusCode, response::Response};

use uninexus_auth::{AuthzError, OrganizationGrant, Permission, Principal, authorize};
use uninexus_core::OrganizationId;
use uninexus_infra::DirectoryServices;
use uninexus_infra::store::MemberAccess;

use crate::app::errors;
use crate::context::{OrganizationContext, PrincipalContext};

/// Require `required` in `organization_id`. Non-members are forbidden.
pub async fn require_permission(
    services: &DirectoryServices,
    principal: &PrincipalContext,
    organization_id: OrganizationId,
    required: &Permission,
) -> Result<OrganizationContext, Response> {
    guard(services, principal, organization_id, Some(required)).await
}

/// Require an active membership in `organization_id`, any permissions.
pub async fn require_member(
    services: &DirectoryServices,
    principal: &PrincipalContext,
    organization_id: OrganizationId,
) -> Result<OrganizationContext, Response> {
    guard(services, principal, organization_id, None).await
}

async fn guard(
    services: &DirectoryServices,
    principal: &PrincipalContext,
    organization_id: OrganizationId,
    required: Option<&Permission>,
) -> Result<OrganizationContext, Response> {
    let access = services
        .members
        .access(organization_id, principal.user_id())
        .await
        .map_err(errors::domain_error_to_response)?
        .ok_or_else(|| {
            errors::json_error(
                StatusCode::FORBIDDEN,
                "forbidden",
                "not a member of this organization",
            )
        })?;

    let principal_grant = to_principal(principal, organization_id, &access);
    let check = match required {
        Some(permission) => authorize(&principal_grant, permission),
        None if !access.membership.is_active() => Err(AuthzError::Inactive),
        None => Ok(()),
    };
    if let Err(e) = check {
        tracing::debug!(
            organization_id = %organization_id,
            user_id = %principal.user_id(),
            error = %e,
            "authorization denied"
        );
        return Err(errors::authz_error_to_response(e));
    }

    if let Err(e) = services
        .members
        .touch_last_active(access.membership.id)
        .await
    {
        tracing::warn!(membership_id = %access.membership.id, error = %e, "failed to record member activity");
    }

    Ok(OrganizationContext::new(
        organization_id,
        access.membership.id,
        access.permissions,
    ))
}

fn to_principal(
    principal: &PrincipalContext,
    organization_id: OrganizationId,
    access: &MemberAccess,
) -> Principal {
    Principal {
        user_id: principal.user_id(),
        active_organization_id: organization_id,
        grant: OrganizationGrant {
            organization_id: access.membership.organization_id,
            membership_id: access.membership.id,
            active: access.membership.is_active(),
            roles: access.roles.clone(),
            permissions: access
                .permissions
                .iter()
                .map(|p| Permission::new(p.clone()))
                .collect(),
        },
    }
}
