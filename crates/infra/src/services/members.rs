use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, info};

use uninexus_core::{
    Clock, DomainError, DomainResult, MembershipId, OrganizationId, RoleId, UserId,
};
use uninexus_directory::scope::check_references;
use uninexus_directory::{
    BulkAction, BulkOutcome, MemberFilter, MemberView, Membership, Role, RoleSummary,
};

use super::{require_organization, scoped, store_error};
use crate::store::{DirectoryStore, MemberAccess};

#[derive(Clone)]
pub struct MembershipManager {
    store: Arc<dyn DirectoryStore>,
    clock: Arc<dyn Clock>,
}

impl MembershipManager {
    pub fn new(store: Arc<dyn DirectoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    async fn check_roles(
        &self,
        organization_id: OrganizationId,
        ids: &BTreeSet<RoleId>,
    ) -> DomainResult<Vec<Role>> {
        let found = self.store.find_roles(ids).await.map_err(store_error)?;
        check_references(organization_id, "role", ids, &found)?;
        Ok(found)
    }

    async fn load(
        &self,
        organization_id: OrganizationId,
        id: MembershipId,
    ) -> DomainResult<Membership> {
        let membership = self.store.get_membership(id).await.map_err(store_error)?;
        scoped(membership, organization_id, "membership")
    }

    async fn view(&self, membership: Membership) -> DomainResult<MemberView> {
        let user = self
            .store
            .get_user(membership.user_id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| DomainError::not_found("user"))?;
        let roles = self
            .store
            .find_roles(&membership.role_ids)
            .await
            .map_err(store_error)?;
        let summaries = roles.iter().map(RoleSummary::from).collect();
        Ok(MemberView::new(membership, user, summaries))
    }

    pub async fn add(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
        role_ids: Vec<RoleId>,
    ) -> DomainResult<MemberView> {
        require_organization(self.store.as_ref(), organization_id).await?;
        if self.store.get_user(user_id).await.map_err(store_error)?.is_none() {
            return Err(DomainError::not_found("user"));
        }
        let membership = Membership::new(organization_id, user_id, role_ids, self.clock.now());
        self.check_roles(organization_id, &membership.role_ids)
            .await?;
        if self
            .store
            .find_membership(organization_id, user_id)
            .await
            .map_err(store_error)?
            .is_some()
        {
            return Err(DomainError::AlreadyMember);
        }
        self.store
            .insert_membership(&membership)
            .await
            .map_err(store_error)?;

        info!(
            organization_id = %organization_id,
            membership_id = %membership.id,
            user_id = %user_id,
            "member added"
        );
        self.view(membership).await
    }

    /// Full replace of the member's role set.
    pub async fn update_roles(
        &self,
        organization_id: OrganizationId,
        id: MembershipId,
        role_ids: Vec<RoleId>,
    ) -> DomainResult<MemberView> {
        let mut membership = self.load(organization_id, id).await?;
        membership.set_roles(role_ids, self.clock.now());
        self.check_roles(organization_id, &membership.role_ids)
            .await?;
        self.store
            .update_membership(&membership)
            .await
            .map_err(store_error)?;

        info!(organization_id = %organization_id, membership_id = %id, "member roles updated");
        self.view(membership).await
    }

    /// Hard delete; the user's profile is kept.
    pub async fn remove(&self, organization_id: OrganizationId, id: MembershipId) -> DomainResult<()> {
        self.load(organization_id, id).await?;
        self.store
            .delete_membership(id)
            .await
            .map_err(store_error)?;

        info!(organization_id = %organization_id, membership_id = %id, "member removed");
        Ok(())
    }

    pub async fn set_active(
        &self,
        organization_id: OrganizationId,
        id: MembershipId,
        active: bool,
    ) -> DomainResult<MemberView> {
        let mut membership = self.load(organization_id, id).await?;
        membership.set_active(active, self.clock.now());
        self.store
            .update_membership(&membership)
            .await
            .map_err(store_error)?;

        info!(
            organization_id = %organization_id,
            membership_id = %id,
            status = membership.status.as_str(),
            "member status changed"
        );
        self.view(membership).await
    }

    pub async fn touch_last_active(&self, id: MembershipId) -> DomainResult<()> {
        self.store
            .touch_membership(id, self.clock.now())
            .await
            .map_err(store_error)?;
        debug!(membership_id = %id, "member activity recorded");
        Ok(())
    }

    /// Members with profile and role names, newest first.
    pub async fn list(
        &self,
        organization_id: OrganizationId,
        filter: &MemberFilter,
    ) -> DomainResult<Vec<MemberView>> {
        let rows = self
            .store
            .list_members(organization_id, filter)
            .await
            .map_err(store_error)?;
        let roles: HashMap<RoleId, RoleSummary> = self
            .store
            .list_roles(organization_id)
            .await
            .map_err(store_error)?
            .iter()
            .map(|r| (r.id, RoleSummary::from(r)))
            .collect();

        Ok(rows
            .into_iter()
            .map(|(membership, user)| {
                let summaries = membership
                    .role_ids
                    .iter()
                    .filter_map(|id| roles.get(id).cloned())
                    .collect();
                MemberView::new(membership, user, summaries)
            })
            .collect())
    }

    /// Apply `action` to every listed member or to none.
    pub async fn bulk(
        &self,
        organization_id: OrganizationId,
        ids: &[MembershipId],
        action: BulkAction,
    ) -> DomainResult<BulkOutcome> {
        if ids.is_empty() {
            return Err(DomainError::validation("member_ids must not be empty"));
        }
        if let BulkAction::SetRoles { role_ids } = &action {
            let role_ids: BTreeSet<RoleId> = role_ids.iter().copied().collect();
            self.check_roles(organization_id, &role_ids).await?;
        }

        let affected = self
            .store
            .bulk_update_members(organization_id, ids, &action, self.clock.now())
            .await
            .map_err(store_error)?;

        info!(
            organization_id = %organization_id,
            action = action.name(),
            affected,
            "bulk member action applied"
        );
        Ok(BulkOutcome { affected })
    }

    /// The caller's grant in `organization_id`, if they are a member.
    pub async fn access(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> DomainResult<Option<MemberAccess>> {
        self.store
            .member_access(organization_id, user_id)
            .await
            .map_err(store_error)
    }
}

