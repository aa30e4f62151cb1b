use core::str::FromStr;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use uninexus_core::{
    DomainError, DomainResult, Entity, MembershipId, OrganizationId, RoleId, TenantScoped, UserId,
};

use crate::role::RoleSummary;
use crate::user::UserProfile;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    #[default]
    Active,
    Inactive,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl FromStr for MemberStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            other => Err(DomainError::validation(format!("invalid member status: {other}"))),
        }
    }
}

/// A user's seat in an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub id: MembershipId,
    pub organization_id: OrganizationId,
    pub user_id: UserId,
    pub role_ids: BTreeSet<RoleId>,
    pub status: MemberStatus,
    pub last_active: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Membership {
    pub fn new(
        organization_id: OrganizationId,
        user_id: UserId,
        role_ids: impl IntoIterator<Item = RoleId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MembershipId::new(),
            organization_id,
            user_id,
            role_ids: role_ids.into_iter().collect(),
            status: MemberStatus::Active,
            last_active: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }

    pub fn set_roles(&mut self, role_ids: impl IntoIterator<Item = RoleId>, now: DateTime<Utc>) {
        self.role_ids = role_ids.into_iter().collect();
        self.updated_at = now;
    }

    /// Adds `role_id`; returns whether the set changed.
    pub fn grant_role(&mut self, role_id: RoleId, now: DateTime<Utc>) -> bool {
        let added = self.role_ids.insert(role_id);
        if added {
            self.updated_at = now;
        }
        added
    }

    pub fn set_active(&mut self, active: bool, now: DateTime<Utc>) {
        self.status = if active {
            MemberStatus::Active
        } else {
            MemberStatus::Inactive
        };
        self.updated_at = now;
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_active = Some(now);
    }

    /// Applies a non-destructive bulk action. `Remove` is handled by the store.
    pub fn apply_bulk(&mut self, action: &BulkAction, now: DateTime<Utc>) {
        match action {
            BulkAction::Remove => {}
            BulkAction::Activate => self.set_active(true, now),
            BulkAction::Deactivate => self.set_active(false, now),
            BulkAction::SetRoles { role_ids } => self.set_roles(role_ids.iter().copied(), now),
        }
    }
}

impl Entity for Membership {
    type Id = MembershipId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantScoped for Membership {
    fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }
}

/// Filters for member listings. All present criteria must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberFilter {
    pub status: Option<MemberStatus>,
    pub search: Option<String>,
    pub role_id: Option<RoleId>,
}

impl MemberFilter {
    /// Lower-cased, trimmed search term; blank counts as absent.
    pub fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }

    pub fn matches(&self, membership: &Membership, user: &UserProfile) -> bool {
        if self.status.is_some_and(|s| s != membership.status) {
            return false;
        }
        if self.role_id.is_some_and(|r| !membership.role_ids.contains(&r)) {
            return false;
        }
        match self.search_term() {
            None => true,
            Some(term) => {
                user.email.contains(&term)
                    || user
                        .full_name
                        .as_deref()
                        .is_some_and(|name| name.to_lowercase().contains(&term))
            }
        }
    }
}

/// Member listing row: membership joined with profile and role names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberView {
    pub id: MembershipId,
    pub organization_id: OrganizationId,
    pub user: UserProfile,
    pub roles: Vec<RoleSummary>,
    pub status: MemberStatus,
    pub last_active: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemberView {
    pub fn new(membership: Membership, user: UserProfile, mut roles: Vec<RoleSummary>) -> Self {
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            id: membership.id,
            organization_id: membership.organization_id,
            user,
            roles,
            status: membership.status,
            last_active: membership.last_active,
            created_at: membership.created_at,
            updated_at: membership.updated_at,
        }
    }
}

/// Action applied to a set of memberships at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BulkAction {
    Remove,
    Activate,
    Deactivate,
    SetRoles { role_ids: Vec<RoleId> },
}

impl BulkAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Remove => "remove",
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::SetRoles { .. } => "set_roles",
        }
    }
}

/// Outcome of a successful bulk action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub affected: u64,
}
