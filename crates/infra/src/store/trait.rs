use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use thiserror::Error;

use uninexus_core::{
    DomainError, InvitationId, JoinRequestId, MembershipId, OrganizationId, PermissionId, RoleId,
    UserId,
};
use uninexus_directory::{
    BulkAction, Invitation, InvitationStatus, InvitationToken, JoinRequest, JoinRequestStatus,
    JoinRequestView, MemberFilter, Membership, Organization, OrganizationSeed, OrganizationStats,
    Permission, PermissionCategory, Role, UserProfile,
};

/// Storage-level constraints. Each maps onto a database constraint in the
/// Postgres schema and is checked explicitly by the in-memory store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constraint {
    /// `organizations.name` is unique.
    OrganizationName,
    /// `users.email` is unique.
    UserEmail,
    /// `(organization_id, name)` is unique for permissions.
    PermissionName,
    /// `(organization_id, name)` is unique for roles.
    RoleName,
    /// One membership per `(organization_id, user_id)`.
    MembershipUser,
    /// Invitation tokens are globally unique.
    InvitationToken,
    /// One pending invitation per `(organization_id, email)`.
    PendingInvitation,
    /// One pending join request per `(organization_id, user_id)`.
    PendingJoinRequest,
    /// A role references a permission of another organization (or none).
    RolePermissionScope,
    /// A membership references a role of another organization (or none).
    MembershipRoleScope,
    /// An invitation references a role of another organization (or none).
    InvitationRoleScope,
    /// A permission is still referenced by a role.
    PermissionInUse,
    /// A role is still referenced by a membership or a pending invitation.
    RoleInUse,
}

/// Store error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("constraint violated: {0:?}")]
    Violation(Constraint),

    /// A bulk operation named memberships that are not in the organization.
    #[error("{} membership(s) not found in organization", .0.len())]
    MissingMembers(Vec<MembershipId>),

    /// A compare-and-set on a status column lost against another writer.
    #[error("{0} was modified concurrently")]
    Conflict(&'static str),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for DomainError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => DomainError::not_found(what),
            StoreError::Violation(constraint) => match constraint {
                Constraint::OrganizationName => DomainError::duplicate("organization name"),
                Constraint::PermissionName => DomainError::duplicate("permission name"),
                Constraint::RoleName => DomainError::duplicate("role name"),
                Constraint::UserEmail => {
                    DomainError::invalid_state("email is registered to another user")
                }
                Constraint::MembershipUser => DomainError::AlreadyMember,
                Constraint::PendingInvitation => {
                    DomainError::PendingInvitationExists("this email".to_string())
                }
                Constraint::PendingJoinRequest => DomainError::PendingJoinRequestExists,
                Constraint::RolePermissionScope => {
                    DomainError::cross_tenant("role references a foreign permission")
                }
                Constraint::MembershipRoleScope => {
                    DomainError::cross_tenant("membership references a foreign role")
                }
                Constraint::InvitationRoleScope => {
                    DomainError::cross_tenant("invitation references a foreign role")
                }
                Constraint::PermissionInUse => {
                    DomainError::invalid_state("permission is referenced by one or more roles")
                }
                Constraint::RoleInUse => DomainError::invalid_state("role is in use"),
                Constraint::InvitationToken => DomainError::internal("invitation token collision"),
            },
            StoreError::MissingMembers(ids) => {
                DomainError::BatchRejected(ids.iter().map(ToString::to_string).collect())
            }
            StoreError::Conflict(what) => {
                DomainError::invalid_state(format!("{what} was modified concurrently"))
            }
            StoreError::Backend(msg) => DomainError::internal(msg),
        }
    }
}

/// A member's resolved grant inside one organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberAccess {
    pub membership: Membership,
    /// Role names, sorted.
    pub roles: Vec<String>,
    /// Permission names across all roles, sorted and de-duplicated.
    pub permissions: Vec<String>,
}

/// Persistence boundary for the directory.
///
/// Implementations enforce every [`Constraint`] themselves so that
/// concurrent callers cannot slip past a check-then-write race in the
/// services. Methods that take a whole entity write every column.
#[async_trait::async_trait]
pub trait DirectoryStore: Send + Sync {
    // Users

    /// Insert or refresh a profile keyed by id. `created_at` of an existing
    /// profile is kept.
    async fn upsert_user(&self, profile: &UserProfile) -> StoreResult<UserProfile>;
    async fn get_user(&self, id: UserId) -> StoreResult<Option<UserProfile>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserProfile>>;

    // Organizations

    /// Persist an organization with its catalogue, roles and owner atomically.
    async fn insert_organization(&self, seed: &OrganizationSeed) -> StoreResult<()>;
    async fn get_organization(&self, id: OrganizationId) -> StoreResult<Option<Organization>>;
    /// Organizations `user_id` holds a membership in, ordered by name.
    async fn list_organizations_for_user(&self, user_id: UserId) -> StoreResult<Vec<Organization>>;
    async fn update_organization(&self, organization: &Organization) -> StoreResult<()>;
    /// Delete an organization and everything it owns.
    async fn delete_organization(&self, id: OrganizationId) -> StoreResult<()>;
    async fn organization_stats(
        &self,
        id: OrganizationId,
        now: DateTime<Utc>,
    ) -> StoreResult<OrganizationStats>;

    // Permissions

    async fn insert_permission(&self, permission: &Permission) -> StoreResult<()>;
    async fn get_permission(&self, id: PermissionId) -> StoreResult<Option<Permission>>;
    /// Look up permissions by id regardless of organization.
    async fn find_permissions(&self, ids: &BTreeSet<PermissionId>) -> StoreResult<Vec<Permission>>;
    /// Ordered by name.
    async fn list_permissions(
        &self,
        organization_id: OrganizationId,
        category: Option<PermissionCategory>,
    ) -> StoreResult<Vec<Permission>>;
    async fn update_permission(&self, permission: &Permission) -> StoreResult<()>;
    /// Fails with [`Constraint::PermissionInUse`] while any role references it.
    async fn delete_permission(&self, id: PermissionId) -> StoreResult<()>;

    // Roles

    async fn insert_role(&self, role: &Role) -> StoreResult<()>;
    async fn get_role(&self, id: RoleId) -> StoreResult<Option<Role>>;
    /// Look up roles by id regardless of organization.
    async fn find_roles(&self, ids: &BTreeSet<RoleId>) -> StoreResult<Vec<Role>>;
    /// Ordered by name.
    async fn list_roles(&self, organization_id: OrganizationId) -> StoreResult<Vec<Role>>;
    async fn update_role(&self, role: &Role) -> StoreResult<()>;
    /// Fails with [`Constraint::RoleInUse`] while a membership or a pending
    /// invitation references it. Settled invitations for the role go with it.
    async fn delete_role(&self, id: RoleId) -> StoreResult<()>;
    /// Number of memberships holding each role of the organization.
    async fn role_member_counts(
        &self,
        organization_id: OrganizationId,
    ) -> StoreResult<HashMap<RoleId, u64>>;

    // Memberships

    async fn insert_membership(&self, membership: &Membership) -> StoreResult<()>;
    async fn get_membership(&self, id: MembershipId) -> StoreResult<Option<Membership>>;
    async fn find_membership(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> StoreResult<Option<Membership>>;
    /// Memberships matching `filter`, joined with their profiles, newest first.
    async fn list_members(
        &self,
        organization_id: OrganizationId,
        filter: &MemberFilter,
    ) -> StoreResult<Vec<(Membership, UserProfile)>>;
    async fn update_membership(&self, membership: &Membership) -> StoreResult<()>;
    async fn delete_membership(&self, id: MembershipId) -> StoreResult<()>;
    async fn touch_membership(&self, id: MembershipId, at: DateTime<Utc>) -> StoreResult<()>;
    /// Apply `action` to every listed membership, or to none of them.
    ///
    /// Fails with [`StoreError::MissingMembers`] naming every id that is not a
    /// membership of `organization_id`.
    async fn bulk_update_members(
        &self,
        organization_id: OrganizationId,
        ids: &[MembershipId],
        action: &BulkAction,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;
    async fn member_access(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> StoreResult<Option<MemberAccess>>;

    // Invitations

    async fn insert_invitation(&self, invitation: &Invitation) -> StoreResult<()>;
    async fn get_invitation(&self, id: InvitationId) -> StoreResult<Option<Invitation>>;
    async fn find_invitation_by_token(
        &self,
        token: &InvitationToken,
    ) -> StoreResult<Option<Invitation>>;
    /// The invitation in `pending` status for this address, if any.
    async fn find_pending_invitation(
        &self,
        organization_id: OrganizationId,
        email: &str,
    ) -> StoreResult<Option<Invitation>>;
    /// Newest first.
    async fn list_invitations(&self, organization_id: OrganizationId) -> StoreResult<Vec<Invitation>>;
    /// Write `invitation` if its stored status is still `expected`;
    /// [`StoreError::Conflict`] otherwise.
    async fn save_invitation(
        &self,
        invitation: &Invitation,
        expected: InvitationStatus,
    ) -> StoreResult<()>;
    /// In one transaction: move the invitation from `pending` to `accepted`
    /// and give `user_id` the invited role, creating the membership if needed.
    ///
    /// The loser of a concurrent double accept gets [`StoreError::Conflict`].
    async fn accept_invitation(
        &self,
        id: InvitationId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<Membership>;
    /// Transition every pending invitation past its expiry; returns how many.
    async fn expire_due_invitations(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    // Join requests

    async fn insert_join_request(&self, request: &JoinRequest) -> StoreResult<()>;
    async fn get_join_request(&self, id: JoinRequestId) -> StoreResult<Option<JoinRequest>>;
    /// Newest first.
    async fn list_join_requests(
        &self,
        organization_id: OrganizationId,
        status: Option<JoinRequestStatus>,
    ) -> StoreResult<Vec<JoinRequestView>>;
    /// Write `request` if its stored status is still `expected`.
    async fn save_join_request(
        &self,
        request: &JoinRequest,
        expected: JoinRequestStatus,
    ) -> StoreResult<()>;
    /// In one transaction: mark the pending request approved and insert
    /// `membership`.
    async fn approve_join_request(
        &self,
        id: JoinRequestId,
        membership: &Membership,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;
    async fn delete_join_request(&self, id: JoinRequestId) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violations_map_to_domain_kinds() {
        let cases = [
            (Constraint::RoleName, "duplicate_name"),
            (Constraint::MembershipUser, "already_member"),
            (Constraint::PendingInvitation, "invitation_already_sent"),
            (Constraint::PendingJoinRequest, "join_request_pending"),
            (Constraint::MembershipRoleScope, "cross_tenant_reference"),
            (Constraint::RoleInUse, "invalid_state"),
            (Constraint::PermissionInUse, "invalid_state"),
        ];
        for (constraint, code) in cases {
            let err: DomainError = StoreError::Violation(constraint).into();
            assert_eq!(err.code(), code, "{constraint:?}");
        }
    }

    #[test]
    fn missing_members_become_batch_rejection() {
        let id = MembershipId::new();
        let err: DomainError = StoreError::MissingMembers(vec![id]).into();
        assert_eq!(err, DomainError::BatchRejected(vec![id.to_string()]));
    }

    #[test]
    fn backend_errors_are_opaque() {
        let err: DomainError = StoreError::Backend("connection refused".into()).into();
        assert_eq!(err.code(), "internal_error");
        assert_eq!(err.to_string(), "internal error");
    }
}
