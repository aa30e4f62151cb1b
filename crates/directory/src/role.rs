use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use uninexus_core::{DomainResult, Entity, OrganizationId, PermissionId, RoleId, TenantScoped};

use crate::permission::Permission;
use crate::validation::{optional_text, required_name};

/// A named bundle of permissions; references permissions by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub description: Option<String>,
    pub permission_ids: BTreeSet<PermissionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `permission_ids`, when present, replaces the whole set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub permission_ids: Option<Vec<PermissionId>>,
}

impl Role {
    pub fn new(
        organization_id: OrganizationId,
        name: &str,
        description: Option<String>,
        permission_ids: impl IntoIterator<Item = PermissionId>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Ok(Self {
            id: RoleId::new(),
            organization_id,
            name: required_name("role name", name)?,
            description: optional_text("description", description)?,
            permission_ids: permission_ids.into_iter().collect(),
            created_at: now,
            updated_at: now,
        })
    }

    pub(crate) fn seeded(
        organization_id: OrganizationId,
        name: &'static str,
        description: &'static str,
        permission_ids: impl IntoIterator<Item = PermissionId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RoleId::new(),
            organization_id,
            name: name.to_string(),
            description: Some(description.to_string()),
            permission_ids: permission_ids.into_iter().collect(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, patch: RolePatch, now: DateTime<Utc>) -> DomainResult<()> {
        let name = patch
            .name
            .as_deref()
            .map(|n| required_name("role name", n))
            .transpose()?;
        let description = match patch.description {
            Some(text) => Some(optional_text("description", Some(text))?),
            None => None,
        };

        if let Some(name) = name {
            self.name = name;
        }
        if let Some(description) = description {
            self.description = description;
        }
        if let Some(ids) = patch.permission_ids {
            self.permission_ids = ids.into_iter().collect();
        }
        self.updated_at = now;
        Ok(())
    }
}

impl Entity for Role {
    type Id = RoleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantScoped for Role {
    fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }
}

/// Role with its permissions resolved, as returned by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleView {
    pub id: RoleId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub description: Option<String>,
    pub permissions: Vec<Permission>,
    pub member_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RoleView {
    /// `permissions` are sorted by name.
    pub fn new(role: Role, mut permissions: Vec<Permission>, member_count: u64) -> Self {
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            id: role.id,
            organization_id: role.organization_id,
            name: role.name,
            description: role.description,
            permissions,
            member_count,
            created_at: role.created_at,
            updated_at: role.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSummary {
    pub id: RoleId,
    pub name: String,
}

impl From<&Role> for RoleSummary {
    fn from(role: &Role) -> Self {
        Self {
            id: role.id,
            name: role.name.clone(),
        }
    }
}
