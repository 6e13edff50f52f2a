//! # Data Migrator Repository
//! This crate provides the database capabilities the migration engine
//! consumes. It includes the error type, the capability traits, a MySQL
//! implementation on top of `sqlx`, an in-memory implementation used by tests
//! (behind the `test-support` feature), a tag-aware TTL cache and a lazy page reader.
pub mod cache;
pub mod errors;
pub mod interfaces;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod mysql;
pub mod pager;

pub use cache::MemoryCache;
pub use errors::RepositoryError;
pub use interfaces::{CacheStore, Database, InsertMode, QueryExecutor, SchemaCatalog, WriteSession};
#[cfg(any(test, feature = "test-support"))]
pub use memory::{MemoryDatabase, SessionEvent, StatementCounters};
pub use mysql::MySqlDatabase;
pub use pager::Pager;
