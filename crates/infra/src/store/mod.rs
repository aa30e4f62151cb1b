//! Directory persistence boundary.
//!
//! The services never talk to a database directly; they go through
//! [`DirectoryStore`], which owns uniqueness, tenant scoping and the atomic
//! multi-row transitions.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryDirectoryStore;
pub use postgres::PostgresDirectoryStore;
pub use r#trait::{Constraint, DirectoryStore, MemberAccess, StoreError, StoreResult};
