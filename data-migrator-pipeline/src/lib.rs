//! # Data Migrator Pipeline
//! The migration engine. Rows are read from an old schema in pages, mapped to
//! the new schema, linked to rows already migrated and written back in
//! batches sized to the target's statement limit.
//! The `manager` registers migrations and run-wide constraints and values,
//! the `orchestrator` runs a selection of them.
pub mod context;
pub mod errors;
pub mod failed;
pub mod guard;
pub mod hooks;
pub mod identity;
pub mod manager;
pub mod mapping;
pub mod migration;
pub mod orchestrator;
pub mod progress;
pub mod relations;
pub mod review;
pub mod writer;

pub use context::MigrationContext;
pub use errors::{MigrationError, RunError};
pub use hooks::{DefaultHooks, GlobalValues, HookContext, MigrationHooks};
pub use identity::{content_hash, ContentHashing};
pub use manager::{MigrationEntry, MigrationManager, MigrationNode};
pub use migration::{Migration, MigrationSummary};
pub use orchestrator::{MigrationRunner, RunOptions, RunReport};
pub use progress::{LogProgress, ProgressReporting};
