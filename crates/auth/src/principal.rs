use serde::{Deserialize, Serialize};

use uninexus_core::{MembershipId, OrganizationId, UserId};

use crate::{JwtClaims, Permission};

/// Identity of the calling user, as asserted by the authentication service.
///
/// The directory trusts this identity and never re-verifies credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub email: String,
    pub name: Option<String>,
}

impl From<&JwtClaims> for AuthenticatedUser {
    fn from(claims: &JwtClaims) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email.trim().to_lowercase(),
            name: claims.name.clone(),
        }
    }
}

/// A principal's membership grant within one organization.
///
/// This is an authorization boundary object: it states *which organization*
/// the grant applies to and which roles/permissions it carries there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationGrant {
    pub organization_id: OrganizationId,
    pub membership_id: MembershipId,
    pub active: bool,
    pub roles: Vec<String>,
    pub permissions: Vec<Permission>,
}
