use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::info;

use uninexus_core::{Clock, DomainResult, OrganizationId, PermissionId, RoleId};
use uninexus_directory::scope::check_references;
use uninexus_directory::{Permission, Role, RolePatch, RoleView};

use super::{require_organization, scoped, store_error};
use crate::store::DirectoryStore;

/// Role CRUD with permission resolution.
#[derive(Clone)]
pub struct RoleManager {
    store: Arc<dyn DirectoryStore>,
    clock: Arc<dyn Clock>,
}

impl RoleManager {
    pub fn new(store: Arc<dyn DirectoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Unknown ids fail `NotFound`, ids of another organization fail
    /// `CrossTenantReference`.
    async fn check_permissions(
        &self,
        organization_id: OrganizationId,
        ids: &BTreeSet<PermissionId>,
    ) -> DomainResult<Vec<Permission>> {
        let found = self.store.find_permissions(ids).await.map_err(store_error)?;
        check_references(organization_id, "permission", ids, &found)?;
        Ok(found)
    }

    pub async fn create(
        &self,
        organization_id: OrganizationId,
        name: &str,
        description: Option<String>,
        permission_ids: Vec<PermissionId>,
    ) -> DomainResult<RoleView> {
        require_organization(self.store.as_ref(), organization_id).await?;
        let role = Role::new(
            organization_id,
            name,
            description,
            permission_ids,
            self.clock.now(),
        )?;
        let permissions = self
            .check_permissions(organization_id, &role.permission_ids)
            .await?;
        self.store.insert_role(&role).await.map_err(store_error)?;

        info!(
            organization_id = %organization_id,
            role_id = %role.id,
            name = %role.name,
            permission_count = role.permission_ids.len(),
            "role created"
        );
        Ok(RoleView::new(role, permissions, 0))
    }

    async fn load(&self, organization_id: OrganizationId, id: RoleId) -> DomainResult<Role> {
        let role = self.store.get_role(id).await.map_err(store_error)?;
        scoped(role, organization_id, "role")
    }

    async fn view(&self, role: Role) -> DomainResult<RoleView> {
        let permissions = self
            .store
            .find_permissions(&role.permission_ids)
            .await
            .map_err(store_error)?;
        let counts = self
            .store
            .role_member_counts(role.organization_id)
            .await
            .map_err(store_error)?;
        let member_count = counts.get(&role.id).copied().unwrap_or(0);
        Ok(RoleView::new(role, permissions, member_count))
    }

    pub async fn get(&self, organization_id: OrganizationId, id: RoleId) -> DomainResult<RoleView> {
        let role = self.load(organization_id, id).await?;
        self.view(role).await
    }

    /// `patch.permission_ids`, when present, replaces the whole set.
    pub async fn update(
        &self,
        organization_id: OrganizationId,
        id: RoleId,
        patch: RolePatch,
    ) -> DomainResult<RoleView> {
        let mut role = self.load(organization_id, id).await?;
        role.apply(patch, self.clock.now())?;
        self.check_permissions(organization_id, &role.permission_ids)
            .await?;
        self.store.update_role(&role).await.map_err(store_error)?;

        info!(organization_id = %organization_id, role_id = %id, "role updated");
        self.view(role).await
    }

    /// Refused while a membership or a pending invitation references the role.
    pub async fn delete(&self, organization_id: OrganizationId, id: RoleId) -> DomainResult<()> {
        self.load(organization_id, id).await?;
        self.store.delete_role(id).await.map_err(store_error)?;

        info!(organization_id = %organization_id, role_id = %id, "role deleted");
        Ok(())
    }

    /// Roles ordered by name, each with its permissions and member count.
    pub async fn list(&self, organization_id: OrganizationId) -> DomainResult<Vec<RoleView>> {
        let roles = self
            .store
            .list_roles(organization_id)
            .await
            .map_err(store_error)?;
        let permissions: HashMap<PermissionId, Permission> = self
            .store
            .list_permissions(organization_id, None)
            .await
            .map_err(store_error)?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();
        let counts = self
            .store
            .role_member_counts(organization_id)
            .await
            .map_err(store_error)?;

        Ok(roles
            .into_iter()
            .map(|role| {
                let resolved = role
                    .permission_ids
                    .iter()
                    .filter_map(|id| permissions.get(id).cloned())
                    .collect();
                let member_count = counts.get(&role.id).copied().unwrap_or(0);
                RoleView::new(role, resolved, member_count)
            })
            .collect())
    }
}
