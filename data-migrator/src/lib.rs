//! # Data Migrator
//!
//! Moves rows from a legacy MySQL schema into a new one, one declared
//! migration at a time.
//!
//! ## Modules
//!
//! - [`cli`]: Command line flags
//! - [`config`]: Environment settings, the migrations file and dependency wiring
//! - [`errors`]: Error types for the binary

pub mod cli;
pub mod config;
pub mod errors;

pub use cli::Args;
pub use config::{Dependencies, MigrationsFile, Settings};
pub use errors::AppError;
