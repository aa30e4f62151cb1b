use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::info;

use uninexus_core::{
    Clock, DomainError, DomainResult, JoinRequestId, OrganizationId, RoleId, UserId,
};
use uninexus_directory::scope::check_references;
use uninexus_directory::{
    JoinRequest, JoinRequestStatus, JoinRequestView, MEMBER_ROLE, Membership,
};

use super::{require_organization, scoped, store_error};
use crate::store::{Constraint, DirectoryStore, StoreError};

/// User-initiated requests to join an organization.
#[derive(Clone)]
pub struct JoinRequestService {
    store: Arc<dyn DirectoryStore>,
    clock: Arc<dyn Clock>,
}

impl JoinRequestService {
    pub fn new(store: Arc<dyn DirectoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    async fn load(&self, organization_id: OrganizationId, id: JoinRequestId) -> DomainResult<JoinRequest> {
        let request = self.store.get_join_request(id).await.map_err(store_error)?;
        scoped(request, organization_id, "join request")
    }

    pub async fn create(&self, organization_id: OrganizationId, user_id: UserId) -> DomainResult<JoinRequest> {
        require_organization(self.store.as_ref(), organization_id).await?;
        if self
            .store
            .find_membership(organization_id, user_id)
            .await
            .map_err(store_error)?
            .is_some()
        {
            return Err(DomainError::AlreadyMember);
        }

        let request = JoinRequest::new(organization_id, user_id, self.clock.now());
        self.store
            .insert_join_request(&request)
            .await
            .map_err(store_error)?;

        info!(
            organization_id = %organization_id,
            join_request_id = %request.id,
            user_id = %user_id,
            "join request created"
        );
        Ok(request)
    }

    /// Newest first.
    pub async fn list(
        &self,
        organization_id: OrganizationId,
        status: Option<JoinRequestStatus>,
    ) -> DomainResult<Vec<JoinRequestView>> {
        self.store
            .list_join_requests(organization_id, status)
            .await
            .map_err(store_error)
    }

    /// Approve and create the membership in one step. With no roles given the
    /// new member gets the organization's `Member` role, if it still exists.
    pub async fn approve(
        &self,
        organization_id: OrganizationId,
        id: JoinRequestId,
        role_ids: Vec<RoleId>,
    ) -> DomainResult<Membership> {
        let now = self.clock.now();
        let mut request = self.load(organization_id, id).await?;
        request.approve(now)?;

        let mut roles: BTreeSet<RoleId> = role_ids.into_iter().collect();
        if roles.is_empty() {
            let default_role = self
                .store
                .list_roles(organization_id)
                .await
                .map_err(store_error)?
                .into_iter()
                .find(|r| r.name == MEMBER_ROLE);
            roles.extend(default_role.map(|r| r.id));
        } else {
            let found = self.store.find_roles(&roles).await.map_err(store_error)?;
            check_references(organization_id, "role", &roles, &found)?;
        }

        if self
            .store
            .find_membership(organization_id, request.user_id)
            .await
            .map_err(store_error)?
            .is_some()
        {
            return Err(DomainError::AlreadyMember);
        }

        let membership = Membership::new(organization_id, request.user_id, roles, now);
        self.store
            .approve_join_request(id, &membership, now)
            .await
            .map_err(|err| match err {
                StoreError::Conflict(_) => {
                    DomainError::invalid_state("join request already decided")
                }
                StoreError::Violation(Constraint::MembershipUser) => DomainError::AlreadyMember,
                other => store_error(other),
            })?;

        info!(
            organization_id = %organization_id,
            join_request_id = %id,
            membership_id = %membership.id,
            "join request approved"
        );
        Ok(membership)
    }

    pub async fn reject(&self, organization_id: OrganizationId, id: JoinRequestId) -> DomainResult<JoinRequest> {
        let mut request = self.load(organization_id, id).await?;
        request.reject(self.clock.now())?;
        self.store
            .save_join_request(&request, JoinRequestStatus::Pending)
            .await
            .map_err(|err| match err {
                StoreError::Conflict(_) => {
                    DomainError::invalid_state("join request already decided")
                }
                other => store_error(other),
            })?;

        info!(organization_id = %organization_id, join_request_id = %id, "join request rejected");
        Ok(request)
    }

    /// Deletes the request. The requester may always withdraw their own;
    /// anyone else needs `may_manage`.
    pub async fn withdraw(
        &self,
        organization_id: OrganizationId,
        id: JoinRequestId,
        actor: UserId,
        may_manage: bool,
    ) -> DomainResult<()> {
        let request = self.load(organization_id, id).await?;
        if request.user_id != actor && !may_manage {
            return Err(DomainError::forbidden(
                "only the requester or a join request manager may withdraw it",
            ));
        }
        self.store
            .delete_join_request(id)
            .await
            .map_err(store_error)?;

        info!(organization_id = %organization_id, join_request_id = %id, "join request withdrawn");
        Ok(())
    }
}
