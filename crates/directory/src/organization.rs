use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use uninexus_core::{DomainError, DomainResult, Entity, OrganizationId, UserId};

use crate::membership::Membership;
use crate::permission::{builtin_catalogue, Permission};
use crate::role::Role;
use crate::validation::optional_text;

pub const ADMIN_ROLE: &str = "Admin";
pub const MEMBER_ROLE: &str = "Member";

const MAX_ORGANIZATION_NAME_LEN: usize = 255;

/// Tenant boundary. Everything else in the directory hangs off one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub description: Option<String>,
    pub industry: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update; `None` leaves a field untouched, a blank string clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub industry: Option<String>,
}

fn organization_name(raw: &str) -> DomainResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(DomainError::validation("organization name must not be empty"));
    }
    if name.chars().count() > MAX_ORGANIZATION_NAME_LEN {
        return Err(DomainError::validation(format!(
            "organization name must be at most {MAX_ORGANIZATION_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

impl Organization {
    pub fn new(
        name: &str,
        description: Option<String>,
        industry: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Ok(Self {
            id: OrganizationId::new(),
            name: organization_name(name)?,
            description: optional_text("description", description)?,
            industry: optional_text("industry", industry)?,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply(&mut self, patch: OrganizationPatch, now: DateTime<Utc>) -> DomainResult<()> {
        let name = patch.name.as_deref().map(organization_name).transpose()?;
        let description = match patch.description {
            Some(text) => Some(optional_text("description", Some(text))?),
            None => None,
        };
        let industry = match patch.industry {
            Some(text) => Some(optional_text("industry", Some(text))?),
            None => None,
        };

        if let Some(name) = name {
            self.name = name;
        }
        if let Some(description) = description {
            self.description = description;
        }
        if let Some(industry) = industry {
            self.industry = industry;
        }
        self.updated_at = now;
        Ok(())
    }
}

impl Entity for Organization {
    type Id = OrganizationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Everything created together with a new organization.
///
/// Stores persist a seed atomically: either the organization exists with its
/// catalogue, default roles and owner membership, or none of it does.
#[derive(Debug, Clone)]
pub struct OrganizationSeed {
    pub organization: Organization,
    pub permissions: Vec<Permission>,
    pub roles: Vec<Role>,
    pub owner: Membership,
}

impl OrganizationSeed {
    /// Built-in permissions, an `Admin` role holding all of them, a `Member`
    /// role with read access, and an active `Admin` membership for `owner`.
    pub fn bootstrap(organization: Organization, owner: UserId, now: DateTime<Utc>) -> Self {
        let org_id = organization.id;
        let permissions: Vec<Permission> = builtin_catalogue()
            .into_iter()
            .map(|entry| Permission::builtin(org_id, entry, now))
            .collect();

        let admin = Role::seeded(
            org_id,
            ADMIN_ROLE,
            "Full access to the organization",
            permissions.iter().map(|p| p.id),
            now,
        );
        let member = Role::seeded(
            org_id,
            MEMBER_ROLE,
            "Read access to members and roles",
            permissions
                .iter()
                .filter(|p| p.name == "view_members" || p.name == "view_roles")
                .map(|p| p.id),
            now,
        );
        let owner = Membership::new(org_id, owner, [admin.id], now);

        Self {
            organization,
            permissions,
            roles: vec![admin, member],
            owner,
        }
    }
}

/// Per-organization dashboard counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationStats {
    pub total_members: u64,
    pub active_members: u64,
    pub inactive_members: u64,
    pub roles: u64,
    pub permissions: u64,
    pub pending_invitations: u64,
    pub pending_join_requests: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::MemberStatus;

    #[test]
    fn blank_name_rejected() {
        let err = Organization::new("   ", None, None, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn patch_clears_blank_fields_and_keeps_missing_ones() {
        let now = Utc::now();
        let mut org = Organization::new(
            "Acme",
            Some("Widgets".into()),
            Some("Manufacturing".into()),
            now,
        )
        .unwrap();

        org.apply(
            OrganizationPatch {
                name: Some(" Acme Corp ".into()),
                description: Some("".into()),
                industry: None,
            },
            now,
        )
        .unwrap();

        assert_eq!(org.name, "Acme Corp");
        assert_eq!(org.description, None);
        assert_eq!(org.industry.as_deref(), Some("Manufacturing"));
    }

    #[test]
    fn invalid_patch_leaves_organization_untouched() {
        let now = Utc::now();
        let mut org = Organization::new("Acme", Some("Widgets".into()), None, now).unwrap();
        let before = org.clone();

        let err = org
            .apply(
                OrganizationPatch {
                    name: Some(" ".into()),
                    description: Some("changed".into()),
                    industry: None,
                },
                now,
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(org, before);
    }

    #[test]
    fn bootstrap_seeds_catalogue_roles_and_owner() {
        let now = Utc::now();
        let org = Organization::new("Acme", None, None, now).unwrap();
        let owner = UserId::new();
        let seed = OrganizationSeed::bootstrap(org.clone(), owner, now);

        assert_eq!(seed.permissions.len(), uninexus_auth::builtin::ALL.len());
        assert!(seed.permissions.iter().all(|p| p.organization_id == org.id));

        let admin = seed.roles.iter().find(|r| r.name == ADMIN_ROLE).unwrap();
        assert_eq!(admin.permission_ids.len(), seed.permissions.len());

        let member = seed.roles.iter().find(|r| r.name == MEMBER_ROLE).unwrap();
        assert_eq!(member.permission_ids.len(), 2);

        assert_eq!(seed.owner.user_id, owner);
        assert_eq!(seed.owner.status, MemberStatus::Active);
        assert!(seed.owner.role_ids.contains(&admin.id));
    }
}
