//! Invitation lifecycle.
//!
//! ```text
//! pending ──accept──▶ accepted
//!    ├────reject────▶ rejected
//!    ├────cancel────▶ cancelled
//!    └──(time)──────▶ expired
//! ```
//!
//! All four outcomes are terminal. Expiry is a function of the clock: a
//! pending invitation whose `expires_at` has passed behaves as expired
//! whether or not the stored status has been transitioned yet.

use core::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use uninexus_core::{
    DomainError, DomainResult, Entity, InvitationId, OrganizationId, RoleId, TenantScoped, UserId,
};

use crate::validation::normalize_email;

pub const DEFAULT_INVITATION_TTL_HOURS: i64 = 24 * 7;
pub const MAX_INVITATION_TTL_HOURS: i64 = 24 * 365;

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
    Cancelled,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl core::fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvitationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(DomainError::validation(format!(
                "invalid invitation status: {other}"
            ))),
        }
    }
}

/// Invitation lifetime from a whole number of hours in
/// `1..=MAX_INVITATION_TTL_HOURS`.
pub fn invitation_ttl(hours: i64) -> DomainResult<Duration> {
    if !(1..=MAX_INVITATION_TTL_HOURS).contains(&hours) {
        return Err(DomainError::validation(format!(
            "invitation lifetime must be between 1 and {MAX_INVITATION_TTL_HOURS} hours"
        )));
    }
    Duration::try_hours(hours)
        .ok_or_else(|| DomainError::validation("invitation lifetime out of range"))
}

fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DomainResult<DateTime<Utc>> {
    if ttl <= Duration::zero() {
        return Err(DomainError::validation("invitation ttl must be positive"));
    }
    now.checked_add_signed(ttl)
        .ok_or_else(|| DomainError::validation("invitation ttl out of range"))
}

/// Opaque bearer secret carried in the accept link.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvitationToken(String);

impl InvitationToken {
    /// 256 random bits, URL-safe base64 without padding.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn from_string(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens are credentials; keep them out of logs.
impl core::fmt::Debug for InvitationToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "InvitationToken({prefix}…)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    pub id: InvitationId,
    pub organization_id: OrganizationId,
    pub email: String,
    pub role_id: RoleId,
    pub token: InvitationToken,
    pub status: InvitationStatus,
    pub invited_by: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invitation {
    pub fn issue(
        organization_id: OrganizationId,
        email: &str,
        role_id: RoleId,
        invited_by: UserId,
        token: InvitationToken,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> DomainResult<Self> {
        let expires_at = expiry_after(now, ttl)?;
        Ok(Self {
            id: InvitationId::new(),
            organization_id,
            email: normalize_email(email)?,
            role_id,
            token,
            status: InvitationStatus::Pending,
            invited_by,
            created_at: now,
            expires_at,
            updated_at: now,
        })
    }

    /// Acceptable up to and including `expires_at`.
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Stored status with time-based expiry applied.
    pub fn effective_status(&self, now: DateTime<Utc>) -> InvitationStatus {
        match self.status {
            InvitationStatus::Pending if self.is_past_expiry(now) => InvitationStatus::Expired,
            status => status,
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == InvitationStatus::Pending
    }

    pub fn addressed_to(&self, email: &str) -> bool {
        self.email == email.trim().to_lowercase()
    }

    /// Checks shared by accept and reject.
    pub fn ensure_answerable(&self, now: DateTime<Utc>) -> DomainResult<()> {
        match self.effective_status(now) {
            InvitationStatus::Pending => Ok(()),
            InvitationStatus::Expired => Err(DomainError::Expired),
            _ => Err(DomainError::AlreadyProcessed),
        }
    }

    pub fn accept(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_answerable(now)?;
        self.transition(InvitationStatus::Accepted, now);
        Ok(())
    }

    pub fn reject(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_answerable(now)?;
        self.transition(InvitationStatus::Rejected, now);
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        let status = self.effective_status(now);
        if status != InvitationStatus::Pending {
            return Err(DomainError::invalid_state(format!(
                "cannot cancel: invitation is {status}"
            )));
        }
        self.transition(InvitationStatus::Cancelled, now);
        Ok(())
    }

    /// Marks a pending invitation past its expiry as expired; returns whether
    /// anything changed.
    pub fn expire(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == InvitationStatus::Pending && self.is_past_expiry(now) {
            self.transition(InvitationStatus::Expired, now);
            return true;
        }
        false
    }

    /// Rotates the token and restarts the expiry window.
    pub fn renew(
        &mut self,
        token: InvitationToken,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> DomainResult<()> {
        let expires_at = expiry_after(now, ttl)?;
        let status = self.effective_status(now);
        if status != InvitationStatus::Pending {
            return Err(DomainError::invalid_state(format!(
                "cannot resend: invitation is {status}"
            )));
        }
        self.token = token;
        self.expires_at = expires_at;
        self.updated_at = now;
        Ok(())
    }

    fn transition(&mut self, status: InvitationStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }
}

impl Entity for Invitation {
    type Id = InvitationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantScoped for Invitation {
    fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }
}

/// What an invitee sees before accepting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationDetails {
    pub invitation_id: InvitationId,
    pub email: String,
    pub organization_id: OrganizationId,
    pub organization_name: String,
    pub role_id: RoleId,
    pub role_name: String,
    pub inviter_name: Option<String>,
    pub expires_at: DateTime<Utc>,
}
