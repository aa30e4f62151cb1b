//! Tenant scoping of references between entities.

use std::collections::BTreeSet;
use std::fmt::Display;

use uninexus_core::{DomainError, DomainResult, OrganizationId, TenantScoped};

/// Check that every requested id resolves to an entity owned by `organization_id`.
///
/// `found` is the lookup result for `requested` across all organizations.
/// Unknown ids fail with `NotFound`; ids owned by another organization fail
/// with `CrossTenantReference`.
pub fn check_references<T>(
    organization_id: OrganizationId,
    kind: &str,
    requested: &BTreeSet<T::Id>,
    found: &[T],
) -> DomainResult<()>
where
    T: TenantScoped,
    T::Id: Display,
{
    for id in requested {
        match found.iter().find(|entity| entity.id() == id) {
            None => return Err(DomainError::not_found(format!("{kind} {id}"))),
            Some(entity) if entity.organization_id() != organization_id => {
                return Err(DomainError::cross_tenant(format!(
                    "{kind} {id} belongs to another organization"
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{Permission, PermissionCategory};
    use chrono::Utc;
    use uninexus_core::{DomainError, PermissionId};

    fn permission(org: OrganizationId, name: &str) -> Permission {
        Permission::new(org, name, None, PermissionCategory::Other, Utc::now()).unwrap()
    }

    #[test]
    fn unknown_and_foreign_ids_are_distinguished() {
        let (ours, theirs) = (OrganizationId::new(), OrganizationId::new());
        let local = permission(ours, "export");
        let foreign = permission(theirs, "export");
        let found = vec![local.clone(), foreign.clone()];

        assert!(check_references(ours, "permission", &BTreeSet::from([local.id]), &found).is_ok());

        let err =
            check_references(ours, "permission", &BTreeSet::from([foreign.id]), &found).unwrap_err();
        assert!(matches!(err, DomainError::CrossTenantReference(_)));

        let missing = PermissionId::new();
        let err =
            check_references(ours, "permission", &BTreeSet::from([missing]), &found).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }
}
