//! Entity trait: identity + continuity across state changes.

use crate::id::OrganizationId;

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

/// An entity owned by exactly one organization.
///
/// Cross-tenant checks compare `organization_id()` of both sides of a reference.
pub trait TenantScoped: Entity {
    fn organization_id(&self) -> OrganizationId;
}
