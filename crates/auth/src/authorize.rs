use std::collections::HashSet;

use thiserror::Error;

use uninexus_core::{OrganizationId, UserId};

use crate::{OrganizationGrant, Permission};

/// A fully resolved principal for authorization decisions.
///
/// Built per request from the authenticated identity and the caller's
/// membership in the organization named by the route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub active_organization_id: OrganizationId,
    pub grant: OrganizationGrant,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("organization mismatch")]
    TenantMismatch,

    #[error("membership is inactive")]
    Inactive,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Authorize a principal within its active organization.
///
/// - No IO
/// - No panics
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.active_organization_id != principal.grant.organization_id {
        return Err(AuthzError::TenantMismatch);
    }
    if !principal.grant.active {
        return Err(AuthzError::Inactive);
    }

    let perms: HashSet<&str> = principal
        .grant
        .permissions
        .iter()
        .map(|p| p.as_str())
        .collect();

    if perms.contains("*") || perms.contains(required.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}
