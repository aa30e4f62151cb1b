//! `uninexus-auth`: authentication/authorization boundary.
//!
//! Decoupled from HTTP and storage: token claims in, allow/deny decisions out.

pub mod authorize;
pub mod claims;
pub mod permissions;
pub mod principal;

pub use authorize::{authorize, AuthzError, Principal};
pub use claims::{
    validate_claims, Hs256JwtValidator, JwtClaims, JwtValidator, TokenValidationError,
};
pub use permissions::{builtin, Permission};
pub use principal::{AuthenticatedUser, OrganizationGrant};
