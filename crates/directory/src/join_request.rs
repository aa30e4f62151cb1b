use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use uninexus_core::{
    DomainError, DomainResult, Entity, JoinRequestId, OrganizationId, TenantScoped, UserId,
};

use crate::user::UserProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinRequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl JoinRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl FromStr for JoinRequestStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(DomainError::validation(format!(
                "invalid join request status: {other}"
            ))),
        }
    }
}

/// A user asking to be let into an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub id: JoinRequestId,
    pub organization_id: OrganizationId,
    pub user_id: UserId,
    pub status: JoinRequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JoinRequest {
    pub fn new(organization_id: OrganizationId, user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: JoinRequestId::new(),
            organization_id,
            user_id,
            status: JoinRequestStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn approve(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.decide(JoinRequestStatus::Approved, now)
    }

    pub fn reject(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.decide(JoinRequestStatus::Rejected, now)
    }

    fn decide(&mut self, outcome: JoinRequestStatus, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != JoinRequestStatus::Pending {
            return Err(DomainError::invalid_state(format!(
                "join request already {}",
                self.status.as_str()
            )));
        }
        self.status = outcome;
        self.updated_at = now;
        Ok(())
    }
}

impl Entity for JoinRequest {
    type Id = JoinRequestId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantScoped for JoinRequest {
    fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequestView {
    #[serde(flatten)]
    pub request: JoinRequest,
    pub user: Option<UserProfile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decisions_are_final() {
        let now = Utc::now();
        let mut request = JoinRequest::new(OrganizationId::new(), UserId::new(), now);
        request.approve(now).unwrap();
        assert_eq!(request.status, JoinRequestStatus::Approved);
        assert!(matches!(request.reject(now), Err(DomainError::InvalidState(_))));
        assert!(matches!(request.approve(now), Err(DomainError::InvalidState(_))));
    }
}
