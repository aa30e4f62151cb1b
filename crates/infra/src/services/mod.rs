//! Directory services: the operations the API exposes, one manager per
//! aggregate. Each manager validates input, checks references, and delegates
//! the write to the store; the store re-checks every constraint.

use std::sync::Arc;

use chrono::Duration;

use uninexus_core::{Clock, DomainError, DomainResult, OrganizationId, TenantScoped};
use uninexus_directory::{DEFAULT_INVITATION_TTL_HOURS, Organization};

use crate::store::{DirectoryStore, StoreError};

pub mod invitations;
pub mod join_requests;
pub mod members;
pub mod organizations;
pub mod permissions;
pub mod roles;
pub mod users;

pub use invitations::{InvitationManager, IssuedInvitation};
pub use join_requests::JoinRequestService;
pub use members::MembershipManager;
pub use organizations::OrganizationService;
pub use permissions::PermissionRegistry;
pub use roles::RoleManager;
pub use users::UserDirectory;

/// Invitation tuning knobs.
#[derive(Debug, Clone)]
pub struct InvitationSettings {
    pub ttl: Duration,
    /// Base URL of the web client; accept links point at `{frontend_url}/join`.
    pub frontend_url: String,
}

impl Default for InvitationSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(DEFAULT_INVITATION_TTL_HOURS),
            frontend_url: "http://localhost:3000".to_string(),
        }
    }
}

/// All directory services over one store and one clock.
#[derive(Clone)]
pub struct DirectoryServices {
    pub users: UserDirectory,
    pub organizations: OrganizationService,
    pub permissions: PermissionRegistry,
    pub roles: RoleManager,
    pub members: MembershipManager,
    pub invitations: InvitationManager,
    pub join_requests: JoinRequestService,
}

impl DirectoryServices {
    pub fn new(
        store: Arc<dyn DirectoryStore>,
        clock: Arc<dyn Clock>,
        settings: InvitationSettings,
    ) -> Self {
        Self {
            users: UserDirectory::new(store.clone(), clock.clone()),
            organizations: OrganizationService::new(store.clone(), clock.clone()),
            permissions: PermissionRegistry::new(store.clone(), clock.clone()),
            roles: RoleManager::new(store.clone(), clock.clone()),
            members: MembershipManager::new(store.clone(), clock.clone()),
            invitations: InvitationManager::new(store.clone(), clock.clone(), settings),
            join_requests: JoinRequestService::new(store, clock),
        }
    }
}

/// Convert a store failure, logging backend errors before they go opaque.
pub(crate) fn store_error(err: StoreError) -> DomainError {
    if let StoreError::Backend(msg) = &err {
        tracing::error!(error = %msg, "directory store failure");
    }
    err.into()
}

/// Entity looked up by id through an organization-scoped path: absent and
/// foreign ids are both `NotFound`.
pub(crate) fn scoped<T: TenantScoped>(
    entity: Option<T>,
    organization_id: OrganizationId,
    kind: &'static str,
) -> DomainResult<T> {
    match entity {
        Some(entity) if entity.organization_id() == organization_id => Ok(entity),
        _ => Err(DomainError::not_found(kind)),
    }
}

pub(crate) async fn require_organization(
    store: &dyn DirectoryStore,
    id: OrganizationId,
) -> DomainResult<Organization> {
    store
        .get_organization(id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| DomainError::not_found("organization"))
}
