//! poolgate database: SurrealDB connection management, schema and the
//! repository implementations of the `poolgate-core` traits.
//!
//! This crate provides:
//! - Connection management ([`DbManager`], [`DbConfig`])
//! - Schema initialization and migrations ([`run_migrations`])
//! - Owner repositories for grants, pool resources, leases and audit
//! - [`repository::SurrealAllocationStore`], which runs the
//!   cross-owner units of work as single transactions

mod connection;
mod error;
pub mod repository;
mod schema;
mod txn;

pub use connection::{DbConfig, DbManager};
pub use error::DbError;
pub use repository::lease_key;
pub use schema::{run_migrations, schema_v1};
pub use txn::Abort;
