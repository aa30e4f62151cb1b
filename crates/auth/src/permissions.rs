use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission key checked by the authorization guard (e.g. "view_members").
///
/// Keys are opaque strings at this layer. Organizations define their own
/// permissions; the keys in [`builtin`] are the ones the API guards on.
/// The wildcard `"*"` grants everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Permission keys required by the API surface.
pub mod builtin {
    use super::Permission;

    pub const VIEW_MEMBERS: Permission = Permission::from_static("view_members");
    pub const MANAGE_MEMBERS: Permission = Permission::from_static("manage_members");
    pub const INVITE_MEMBERS: Permission = Permission::from_static("invite_members");
    pub const VIEW_JOIN_REQUESTS: Permission = Permission::from_static("view_join_requests");
    pub const MANAGE_JOIN_REQUESTS: Permission = Permission::from_static("manage_join_requests");
    pub const VIEW_ROLES: Permission = Permission::from_static("view_roles");
    pub const MANAGE_ROLES: Permission = Permission::from_static("manage_roles");
    pub const MANAGE_PERMISSIONS: Permission = Permission::from_static("manage_permissions");
    pub const VIEW_ANALYTICS: Permission = Permission::from_static("view_analytics");
    pub const MANAGE_ORGANIZATION: Permission = Permission::from_static("manage_organization");

    pub const ALL: [Permission; 10] = [
        VIEW_MEMBERS,
        MANAGE_MEMBERS,
        INVITE_MEMBERS,
        VIEW_JOIN_REQUESTS,
        MANAGE_JOIN_REQUESTS,
        VIEW_ROLES,
        MANAGE_ROLES,
        MANAGE_PERMISSIONS,
        VIEW_ANALYTICS,
        MANAGE_ORGANIZATION,
    ];
}
