mod migration;
mod run;

pub use migration::MigrationError;
pub use run::RunError;
