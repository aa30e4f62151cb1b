use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use uninexus_auth::AuthenticatedUser;
use uninexus_core::{Clock, DomainError, DomainResult, InvitationId, OrganizationId, RoleId, UserId};
use uninexus_directory::scope::check_references;
use uninexus_directory::validation::normalize_email;
use uninexus_directory::{
    Invitation, InvitationDetails, InvitationStatus, InvitationToken, Membership,
};

use super::{InvitationSettings, require_organization, scoped, store_error};
use crate::store::{Constraint, DirectoryStore, StoreError};

/// An invitation together with the link the invitee follows.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedInvitation {
    pub invitation: Invitation,
    pub accept_link: String,
}

/// Invitation lifecycle: issue, resolve, answer, cancel, resend, expire.
#[derive(Clone)]
pub struct InvitationManager {
    store: Arc<dyn DirectoryStore>,
    clock: Arc<dyn Clock>,
    settings: InvitationSettings,
}

impl InvitationManager {
    pub fn new(
        store: Arc<dyn DirectoryStore>,
        clock: Arc<dyn Clock>,
        settings: InvitationSettings,
    ) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    pub fn accept_link(&self, token: &InvitationToken) -> String {
        format!(
            "{}/join?token={}",
            self.settings.frontend_url.trim_end_matches('/'),
            token.as_str()
        )
    }

    fn issued(&self, invitation: Invitation) -> IssuedInvitation {
        IssuedInvitation {
            accept_link: self.accept_link(&invitation.token),
            invitation,
        }
    }

    /// Persist the `expired` transition for an invitation found past its
    /// expiry. Losing the race to another writer is fine.
    async fn expire_on_read(&self, invitation: &Invitation, now: DateTime<Utc>) -> DomainResult<()> {
        let mut expired = invitation.clone();
        if !expired.expire(now) {
            return Ok(());
        }
        match self
            .store
            .save_invitation(&expired, InvitationStatus::Pending)
            .await
        {
            Ok(()) => {
                debug!(invitation_id = %invitation.id, "invitation expired on read");
                Ok(())
            }
            Err(StoreError::Conflict(_)) => Ok(()),
            Err(err) => Err(store_error(err)),
        }
    }

    async fn by_token(&self, token: &str) -> DomainResult<Invitation> {
        self.store
            .find_invitation_by_token(&InvitationToken::from_string(token))
            .await
            .map_err(store_error)?
            .ok_or_else(|| DomainError::not_found("invitation"))
    }

    async fn load(&self, organization_id: OrganizationId, id: InvitationId) -> DomainResult<Invitation> {
        let invitation = self.store.get_invitation(id).await.map_err(store_error)?;
        scoped(invitation, organization_id, "invitation")
    }

    /// Issue an invitation for `email` to join with `role_id`.
    ///
    /// `ttl` defaults to the configured invitation lifetime.
    pub async fn create(
        &self,
        organization_id: OrganizationId,
        email: &str,
        role_id: RoleId,
        invited_by: UserId,
        ttl: Option<Duration>,
    ) -> DomainResult<IssuedInvitation> {
        let now = self.clock.now();
        let email = normalize_email(email)?;
        require_organization(self.store.as_ref(), organization_id).await?;

        let requested = BTreeSet::from([role_id]);
        let found = self.store.find_roles(&requested).await.map_err(store_error)?;
        check_references(organization_id, "role", &requested, &found)?;

        if let Some(user) = self
            .store
            .find_user_by_email(&email)
            .await
            .map_err(store_error)?
        {
            let member = self
                .store
                .find_membership(organization_id, user.id)
                .await
                .map_err(store_error)?;
            if member.is_some() {
                return Err(DomainError::AlreadyMember);
            }
        }

        if let Some(existing) = self
            .store
            .find_pending_invitation(organization_id, &email)
            .await
            .map_err(store_error)?
        {
            if existing.is_live(now) {
                return Err(DomainError::PendingInvitationExists(email));
            }
            self.expire_on_read(&existing, now).await?;
        }

        let invitation = Invitation::issue(
            organization_id,
            &email,
            role_id,
            invited_by,
            InvitationToken::generate(),
            now,
            ttl.unwrap_or(self.settings.ttl),
        )?;
        self.store
            .insert_invitation(&invitation)
            .await
            .map_err(|err| match err {
                StoreError::Violation(Constraint::PendingInvitation) => {
                    DomainError::PendingInvitationExists(email.clone())
                }
                other => store_error(other),
            })?;

        info!(
            organization_id = %organization_id,
            invitation_id = %invitation.id,
            role_id = %role_id,
            expires_at = %invitation.expires_at,
            "invitation issued"
        );
        Ok(self.issued(invitation))
    }

    /// What the invitee sees before answering. Unknown, settled and expired
    /// tokens are all `NotFound`.
    pub async fn resolve(&self, token: &str) -> DomainResult<InvitationDetails> {
        let now = self.clock.now();
        let invitation = self.by_token(token).await?;
        match invitation.effective_status(now) {
            InvitationStatus::Pending => {}
            InvitationStatus::Expired => {
                self.expire_on_read(&invitation, now).await?;
                return Err(DomainError::not_found("invitation"));
            }
            _ => return Err(DomainError::not_found("invitation")),
        }

        let organization = require_organization(self.store.as_ref(), invitation.organization_id).await?;
        let role = self
            .store
            .get_role(invitation.role_id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| DomainError::not_found("role"))?;
        let inviter = self
            .store
            .get_user(invitation.invited_by)
            .await
            .map_err(store_error)?;

        Ok(InvitationDetails {
            invitation_id: invitation.id,
            email: invitation.email,
            organization_id: organization.id,
            organization_name: organization.name,
            role_id: role.id,
            role_name: role.name,
            inviter_name: inviter.map(|u| u.display_name().to_string()),
            expires_at: invitation.expires_at,
        })
    }

    /// Pre-checks shared by accept and reject. Expired invitations are
    /// transitioned before the error is returned.
    async fn answerable(
        &self,
        token: &str,
        principal: &AuthenticatedUser,
        now: DateTime<Utc>,
    ) -> DomainResult<Invitation> {
        let invitation = self.by_token(token).await?;
        if let Err(err) = invitation.ensure_answerable(now) {
            if err == DomainError::Expired {
                self.expire_on_read(&invitation, now).await?;
            }
            return Err(err);
        }
        if !invitation.addressed_to(&principal.email) {
            warn!(
                invitation_id = %invitation.id,
                user_id = %principal.user_id,
                "invitation answered by a different address"
            );
            return Err(DomainError::forbidden(
                "invitation was sent to a different email address",
            ));
        }
        Ok(invitation)
    }

    /// Accept as `principal`: the membership is created (or the role added to
    /// an existing one) in the same transaction that settles the invitation.
    pub async fn accept(&self, token: &str, principal: &AuthenticatedUser) -> DomainResult<Membership> {
        let now = self.clock.now();
        let invitation = self.answerable(token, principal, now).await?;

        let membership = self
            .store
            .accept_invitation(invitation.id, principal.user_id, now)
            .await
            .map_err(|err| match err {
                StoreError::Conflict(_) => DomainError::AlreadyProcessed,
                other => store_error(other),
            })?;

        info!(
            organization_id = %invitation.organization_id,
            invitation_id = %invitation.id,
            membership_id = %membership.id,
            "invitation accepted"
        );
        Ok(membership)
    }

    pub async fn reject(&self, token: &str, principal: &AuthenticatedUser) -> DomainResult<Invitation> {
        let now = self.clock.now();
        let mut invitation = self.answerable(token, principal, now).await?;
        invitation.reject(now)?;
        self.store
            .save_invitation(&invitation, InvitationStatus::Pending)
            .await
            .map_err(|err| match err {
                StoreError::Conflict(_) => DomainError::AlreadyProcessed,
                other => store_error(other),
            })?;

        info!(
            organization_id = %invitation.organization_id,
            invitation_id = %invitation.id,
            "invitation rejected"
        );
        Ok(invitation)
    }

    pub async fn cancel(&self, organization_id: OrganizationId, id: InvitationId) -> DomainResult<Invitation> {
        let now = self.clock.now();
        let mut invitation = self.load(organization_id, id).await?;
        invitation.cancel(now)?;
        self.store
            .save_invitation(&invitation, InvitationStatus::Pending)
            .await
            .map_err(store_error)?;

        info!(organization_id = %organization_id, invitation_id = %id, "invitation cancelled");
        Ok(invitation)
    }

    /// Rotate the token and restart the expiry window. The old link stops
    /// working immediately.
    pub async fn resend(
        &self,
        organization_id: OrganizationId,
        id: InvitationId,
    ) -> DomainResult<IssuedInvitation> {
        let now = self.clock.now();
        let mut invitation = self.load(organization_id, id).await?;
        if invitation.effective_status(now) == InvitationStatus::Expired {
            self.expire_on_read(&invitation, now).await?;
        }
        invitation.renew(InvitationToken::generate(), now, self.settings.ttl)?;
        self.store
            .save_invitation(&invitation, InvitationStatus::Pending)
            .await
            .map_err(store_error)?;

        info!(
            organization_id = %organization_id,
            invitation_id = %id,
            expires_at = %invitation.expires_at,
            "invitation resent"
        );
        Ok(self.issued(invitation))
    }

    /// Newest first, with time-based expiry reflected in `status`.
    pub async fn list(&self, organization_id: OrganizationId) -> DomainResult<Vec<Invitation>> {
        let now = self.clock.now();
        let invitations = self
            .store
            .list_invitations(organization_id)
            .await
            .map_err(store_error)?;
        Ok(invitations
            .into_iter()
            .map(|mut invitation| {
                invitation.status = invitation.effective_status(now);
                invitation
            })
            .collect())
    }

    /// Transition every pending invitation past its expiry. Idempotent.
    pub async fn expire_due(&self) -> DomainResult<u64> {
        let expired = self
            .store
            .expire_due_invitations(self.clock.now())
            .await
            .map_err(store_error)?;
        if expired > 0 {
            info!(expired, "expired pending invitations");
        }
        Ok(expired)
    }
}
