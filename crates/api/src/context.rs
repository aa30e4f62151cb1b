use uninexus_auth::AuthenticatedUser;
use uninexus_core::{MembershipId, OrganizationId, UserId};

/// Principal context for a request (the authenticated caller).
///
/// Inserted by the auth middleware; present on every protected route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    user: AuthenticatedUser,
}

impl PrincipalContext {
    pub fn new(user: AuthenticatedUser) -> Self {
        Self { user }
    }

    pub fn user_id(&self) -> UserId {
        self.user.user_id
    }

    pub fn email(&self) -> &str {
        &self.user.email
    }

    pub fn user(&self) -> &AuthenticatedUser {
        &self.user
    }
}

/// Organization context for a request, established once the caller's
/// membership has been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationContext {
    organization_id: OrganizationId,
    membership_id: MembershipId,
    permissions: Vec<String>,
}

impl OrganizationContext {
    pub fn new(
        organization_id: OrganizationId,
        membership_id: MembershipId,
        permissions: Vec<String>,
    ) -> Self {
        Self {
            organization_id,
            membership_id,
            permissions,
        }
    }

    pub fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    pub fn membership_id(&self) -> MembershipId {
        self.membership_id
    }

    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }
}
