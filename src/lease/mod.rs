//! The Lease Manager: exclusive, TTL-bound holds on file paths, used to keep
//! two agents from editing the same file concurrently.

pub mod model;
pub mod store;

pub use model::Lease;
pub use store::{LeaseManager, SqliteLeaseManager};
