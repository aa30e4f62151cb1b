use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use uninexus_core::{DomainResult, Entity, UserId};

use crate::validation::{normalize_email, optional_text};

/// Directory entry for an authenticated user.
///
/// Profiles are upserted from the bearer identity; the directory never owns
/// credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    pub full_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(
        id: UserId,
        email: &str,
        full_name: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Ok(Self {
            id,
            email: normalize_email(email)?,
            full_name: optional_text("full_name", full_name)?,
            created_at: now,
        })
    }

    /// Name shown to other users; falls back to the email address.
    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(&self.email)
    }
}

impl Entity for UserProfile {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_falls_back_to_email() {
        let now = Utc::now();
        let anonymous = UserProfile::new(UserId::new(), "Ann@Example.com", None, now).unwrap();
        assert_eq!(anonymous.email, "ann@example.com");
        assert_eq!(anonymous.display_name(), "ann@example.com");

        let named =
            UserProfile::new(UserId::new(), "ann@example.com", Some(" Ann ".into()), now).unwrap();
        assert_eq!(named.display_name(), "Ann");
    }
}
