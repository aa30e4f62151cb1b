use std::sync::Arc;

use tracing::info;

use uninexus_core::{Clock, DomainResult, OrganizationId, PermissionId};
use uninexus_directory::{Permission, PermissionCategory, PermissionPatch};

use super::{require_organization, scoped, store_error};
use crate::store::DirectoryStore;

/// Organization-scoped permission catalogue.
#[derive(Clone)]
pub struct PermissionRegistry {
    store: Arc<dyn DirectoryStore>,
    clock: Arc<dyn Clock>,
}

impl PermissionRegistry {
    pub fn new(store: Arc<dyn DirectoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn create(
        &self,
        organization_id: OrganizationId,
        name: &str,
        description: Option<String>,
        category: PermissionCategory,
    ) -> DomainResult<Permission> {
        require_organization(self.store.as_ref(), organization_id).await?;
        let permission = Permission::new(
            organization_id,
            name,
            description,
            category,
            self.clock.now(),
        )?;
        self.store
            .insert_permission(&permission)
            .await
            .map_err(store_error)?;

        info!(
            organization_id = %organization_id,
            permission_id = %permission.id,
            name = %permission.name,
            "permission created"
        );
        Ok(permission)
    }

    pub async fn get(
        &self,
        organization_id: OrganizationId,
        id: PermissionId,
    ) -> DomainResult<Permission> {
        let permission = self.store.get_permission(id).await.map_err(store_error)?;
        scoped(permission, organization_id, "permission")
    }

    pub async fn update(
        &self,
        organization_id: OrganizationId,
        id: PermissionId,
        patch: PermissionPatch,
    ) -> DomainResult<Permission> {
        let mut permission = self.get(organization_id, id).await?;
        permission.apply(patch, self.clock.now())?;
        self.store
            .update_permission(&permission)
            .await
            .map_err(store_error)?;

        info!(organization_id = %organization_id, permission_id = %id, "permission updated");
        Ok(permission)
    }

    /// Refused while any role still references the permission.
    pub async fn delete(&self, organization_id: OrganizationId, id: PermissionId) -> DomainResult<()> {
        self.get(organization_id, id).await?;
        self.store
            .delete_permission(id)
            .await
            .map_err(store_error)?;

        info!(organization_id = %organization_id, permission_id = %id, "permission deleted");
        Ok(())
    }

    /// Ordered by name.
    pub async fn list(
        &self,
        organization_id: OrganizationId,
        category: Option<PermissionCategory>,
    ) -> DomainResult<Vec<Permission>> {
        self.store
            .list_permissions(organization_id, category)
            .await
            .map_err(store_error)
    }
}
