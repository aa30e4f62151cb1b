//! Infrastructure layer: persistence, directory services, background workers.

pub mod services;
pub mod store;
pub mod workers;

mod integration_tests;

pub use services::{DirectoryServices, InvitationSettings};
pub use store::{DirectoryStore, InMemoryDirectoryStore, PostgresDirectoryStore};
