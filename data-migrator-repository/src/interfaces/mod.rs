//! This module defines and re-exports the capability traits the migration
//! engine consumes. Implementations are injected at start-up so the engine
//! runs unchanged against MySQL or the in-memory backend.
mod cache_store;
mod database;
mod query_executor;
mod schema_catalog;

pub use cache_store::CacheStore;
pub use database::{Database, InsertMode, WriteSession};
pub use query_executor::QueryExecutor;
pub use schema_catalog::SchemaCatalog;
