use std::sync::Arc;

use uninexus_auth::AuthenticatedUser;
use uninexus_core::{Clock, DomainError, DomainResult, UserId};
use uninexus_directory::UserProfile;

use super::store_error;
use crate::store::DirectoryStore;

/// Keeps the profile table in step with the identities callers present.
#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<dyn DirectoryStore>,
    clock: Arc<dyn Clock>,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn DirectoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Upsert the caller's profile from the bearer identity.
    pub async fn sync(&self, identity: &AuthenticatedUser) -> DomainResult<UserProfile> {
        let profile = UserProfile::new(
            identity.user_id,
            &identity.email,
            identity.name.clone(),
            self.clock.now(),
        )?;
        self.store.upsert_user(&profile).await.map_err(store_error)
    }

    pub async fn get(&self, id: UserId) -> DomainResult<UserProfile> {
        self.store
            .get_user(id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| DomainError::not_found("user"))
    }
}
