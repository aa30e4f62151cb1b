//! `uninexus-directory`: organizations, roles, permissions and onboarding.
//!
//! Implemented purely as deterministic domain logic (no IO, no HTTP, no storage).
//! Entities validate their own fields and lifecycle transitions; uniqueness
//! and cross-entity constraints are enforced by the store that persists them.

pub mod invitation;
pub mod join_request;
pub mod membership;
pub mod organization;
pub mod permission;
pub mod role;
pub mod scope;
pub mod user;
pub mod validation;

pub use invitation::{
    DEFAULT_INVITATION_TTL_HOURS, Invitation, InvitationDetails, InvitationStatus,
    InvitationToken, MAX_INVITATION_TTL_HOURS, invitation_ttl,
};
pub use join_request::{JoinRequest, JoinRequestStatus, JoinRequestView};
pub use membership::{
    BulkAction, BulkOutcome, MemberFilter, MemberStatus, MemberView, Membership,
};
pub use organization::{
    ADMIN_ROLE, MEMBER_ROLE, Organization, OrganizationPatch, OrganizationSeed, OrganizationStats,
};
pub use permission::{
    CatalogueEntry, Permission, PermissionCategory, PermissionPatch, builtin_catalogue,
};
pub use role::{Role, RolePatch, RoleSummary, RoleView};
pub use user::UserProfile;
