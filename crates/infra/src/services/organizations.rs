use std::sync::Arc;

use tracing::info;

use uninexus_core::{Clock, DomainResult, OrganizationId, UserId};
use uninexus_directory::{Organization, OrganizationPatch, OrganizationSeed, OrganizationStats};

use super::{require_organization, store_error};
use crate::store::DirectoryStore;

#[derive(Clone)]
pub struct OrganizationService {
    store: Arc<dyn DirectoryStore>,
    clock: Arc<dyn Clock>,
}

impl OrganizationService {
    pub fn new(store: Arc<dyn DirectoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Create an organization owned by `creator`, seeded with the built-in
    /// permissions and the default roles.
    pub async fn create(
        &self,
        name: &str,
        description: Option<String>,
        industry: Option<String>,
        creator: UserId,
    ) -> DomainResult<Organization> {
        let now = self.clock.now();
        let organization = Organization::new(name, description, industry, now)?;
        let seed = OrganizationSeed::bootstrap(organization, creator, now);
        self.store
            .insert_organization(&seed)
            .await
            .map_err(store_error)?;

        info!(
            organization_id = %seed.organization.id,
            owner = %creator,
            "organization created"
        );
        Ok(seed.organization)
    }

    pub async fn get(&self, id: OrganizationId) -> DomainResult<Organization> {
        require_organization(self.store.as_ref(), id).await
    }

    pub async fn list_for_user(&self, user_id: UserId) -> DomainResult<Vec<Organization>> {
        self.store
            .list_organizations_for_user(user_id)
            .await
            .map_err(store_error)
    }

    pub async fn update(
        &self,
        id: OrganizationId,
        patch: OrganizationPatch,
    ) -> DomainResult<Organization> {
        let mut organization = require_organization(self.store.as_ref(), id).await?;
        organization.apply(patch, self.clock.now())?;
        self.store
            .update_organization(&organization)
            .await
            .map_err(store_error)?;

        info!(organization_id = %id, "organization updated");
        Ok(organization)
    }

    /// Delete the organization and everything it owns.
    pub async fn delete(&self, id: OrganizationId) -> DomainResult<()> {
        self.store
            .delete_organization(id)
            .await
            .map_err(store_error)?;
        info!(organization_id = %id, "organization deleted");
        Ok(())
    }

    pub async fn stats(&self, id: OrganizationId) -> DomainResult<OrganizationStats> {
        self.store
            .organization_stats(id, self.clock.now())
            .await
            .map_err(store_error)
    }
}
