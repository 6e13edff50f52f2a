//! Error types for the data migrator repository.
//! Consolidates and re-exports error types related to database operations.
mod repository;

pub use repository::RepositoryError;
