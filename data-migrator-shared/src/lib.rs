//! # Data Migrator Shared
//! This crate defines the data structures shared across the data migrator
//! workspace: dynamic row values, migration definitions, relation and
//! constraint descriptors, query and schema descriptors, and the records the
//! engine persists on the side (failed rows, review entries).
pub mod types;

pub use types::*;
