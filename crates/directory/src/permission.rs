use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use uninexus_auth::builtin;
use uninexus_core::{DomainError, DomainResult, Entity, OrganizationId, PermissionId, TenantScoped};

use crate::validation::{optional_text, MAX_NAME_LEN};

/// Grouping used by the admin UI; closed set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionCategory {
    Members,
    Roles,
    Analytics,
    Settings,
    Billing,
    #[default]
    Other,
}

impl PermissionCategory {
    pub const ALL: [PermissionCategory; 6] = [
        Self::Members,
        Self::Roles,
        Self::Analytics,
        Self::Settings,
        Self::Billing,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Members => "members",
            Self::Roles => "roles",
            Self::Analytics => "analytics",
            Self::Settings => "settings",
            Self::Billing => "billing",
            Self::Other => "other",
        }
    }
}

impl core::fmt::Display for PermissionCategory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionCategory {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| DomainError::validation(format!("invalid category: {s}")))
    }
}

/// A named capability defined inside one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub description: Option<String>,
    pub category: PermissionCategory,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<PermissionCategory>,
}

/// Permission names are keys: no whitespace, bounded length.
fn permission_name(raw: &str) -> DomainResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(DomainError::validation("permission name must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(DomainError::validation(format!(
            "permission name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(DomainError::validation(
            "permission name must not contain whitespace",
        ));
    }
    // `*` is the grant-everything key in authorization.
    if uninexus_auth::Permission::new(name.to_string()).is_wildcard() {
        return Err(DomainError::validation("permission name `*` is reserved"));
    }
    Ok(name.to_string())
}

impl Permission {
    pub fn new(
        organization_id: OrganizationId,
        name: &str,
        description: Option<String>,
        category: PermissionCategory,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Ok(Self {
            id: PermissionId::new(),
            organization_id,
            name: permission_name(name)?,
            description: optional_text("description", description)?,
            category,
            created_at: now,
            updated_at: now,
        })
    }

    pub(crate) fn builtin(
        organization_id: OrganizationId,
        entry: CatalogueEntry,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PermissionId::new(),
            organization_id,
            name: entry.key.as_str().to_string(),
            description: Some(entry.description.to_string()),
            category: entry.category,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, patch: PermissionPatch, now: DateTime<Utc>) -> DomainResult<()> {
        let name = patch.name.as_deref().map(permission_name).transpose()?;
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
        if let Some(category) = patch.category {
            self.category = category;
        }
        self.updated_at = now;
        Ok(())
    }
}

impl Entity for Permission {
    type Id = PermissionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantScoped for Permission {
    fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }
}

#[derive(Debug, Clone)]
pub struct CatalogueEntry {
    pub key: uninexus_auth::Permission,
    pub category: PermissionCategory,
    pub description: &'static str,
}

/// Permissions every new organization starts with. These are the keys the
/// API guards on.
pub fn builtin_catalogue() -> Vec<CatalogueEntry> {
    use PermissionCategory::*;

    let entry = |key, category, description| CatalogueEntry {
        key,
        category,
        description,
    };
    vec![
        entry(builtin::VIEW_MEMBERS, Members, "View the member list"),
        entry(builtin::MANAGE_MEMBERS, Members, "Add, remove and update members"),
        entry(builtin::INVITE_MEMBERS, Members, "Invite new members"),
        entry(builtin::VIEW_JOIN_REQUESTS, Members, "View join requests"),
        entry(builtin::MANAGE_JOIN_REQUESTS, Members, "Approve or reject join requests"),
        entry(builtin::VIEW_ROLES, Roles, "View roles and permissions"),
        entry(builtin::MANAGE_ROLES, Roles, "Create, update and delete roles"),
        entry(builtin::MANAGE_PERMISSIONS, Roles, "Create, update and delete permissions"),
        entry(builtin::VIEW_ANALYTICS, Analytics, "View organization statistics"),
        entry(builtin::MANAGE_ORGANIZATION, Settings, "Edit or delete the organization"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn category_parses_case_insensitively() {
        assert_eq!(
            "Billing".parse::<PermissionCategory>().unwrap(),
            PermissionCategory::Billing
        );
        let err = "payroll".parse::<PermissionCategory>().unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn category_serializes_lowercase() {
        let json = serde_json::to_string(&PermissionCategory::Analytics).unwrap();
        assert_eq!(json, "\"analytics\"");
    }

    #[test]
    fn names_with_whitespace_rejected() {
        let err = Permission::new(
            OrganizationId::new(),
            "view members",
            None,
            PermissionCategory::Members,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn wildcard_name_is_reserved() {
        let now = Utc::now();
        let err = Permission::new(
            OrganizationId::new(),
            " * ",
            None,
            PermissionCategory::Other,
            now,
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let mut permission = Permission::new(
            OrganizationId::new(),
            "export_reports",
            None,
            PermissionCategory::Analytics,
            now,
        )
        .unwrap();
        let err = permission
            .apply(
                PermissionPatch {
                    name: Some("*".to_string()),
                    ..PermissionPatch::default()
                },
                now,
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(permission.name, "export_reports");
    }

    #[test]
    fn catalogue_covers_every_guarded_key() {
        let catalogue = builtin_catalogue();
        for key in builtin::ALL {
            assert!(catalogue.iter().any(|e| e.key == key), "{key} missing");
        }
    }

    proptest! {
        #[test]
        fn only_known_categories_parse(raw in "[a-z]{1,12}") {
            let known = PermissionCategory::ALL.iter().any(|c| c.as_str() == raw);
            prop_assert_eq!(raw.parse::<PermissionCategory>().is_ok(), known);
        }
    }
}
