//! Command line flags.
use std::path::PathBuf;

use clap::Parser;
use data_migrator_pipeline::RunOptions;

#[derive(Debug, Parser)]
#[command(name = "data-migrator")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Migrates rows from a legacy schema into a new one", long_about = None)]
#[command(after_help = "EXAMPLES:
    data-migrator                         # Run every migration
    data-migrator -m customers -m sales   # Run a migration and a group
    data-migrator tenant=acme --dry-run   # Set a global value, write nothing")]
pub struct Args {
    /// Migration or group to run. Repeat for several; runs everything when omitted
    #[arg(short = 'm', long = "migration", value_name = "NAME")]
    pub migrations: Vec<String>,

    /// Run parameters as key=value, readable by migrations as global values
    #[arg(value_name = "KEY=VALUE")]
    pub parameters: Vec<String>,

    /// Do not log progress
    #[arg(long)]
    pub no_progress: bool,

    /// Delete and migrate again rows that were already migrated
    #[arg(short = 't', long = "test")]
    pub test: bool,

    /// Write NULL for relations that cannot be resolved
    #[arg(long)]
    pub force: bool,

    /// Skip rows with unresolved relations instead of stopping
    #[arg(long)]
    pub non_strict: bool,

    /// Build and log records without inserting them
    #[arg(long)]
    pub dry_run: bool,

    /// Migrations file, overrides MIGRATIONS_CONFIG
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

impl Args {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            migrations: self.migrations.clone(),
            parameters: self.parameters.clone(),
            progress: !self.no_progress,
            test_mode: self.test,
            force: self.force,
            strict: self.non_strict.then_some(false),
            dry_run: self.dry_run,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = Args::try_parse_from(["data-migrator"]).unwrap().run_options();
        assert!(options.migrations.is_empty());
        assert!(options.parameters.is_empty());
        assert!(options.progress);
        assert!(!options.test_mode && !options.force && !options.dry_run);
        assert_eq!(options.strict, None);
    }

    #[test]
    fn test_flags_and_parameters() {
        let args = Args::try_parse_from([
            "data-migrator",
            "-m",
            "customers",
            "--migration",
            "sales",
            "tenant=acme",
            "year=2020",
            "-t",
            "--force",
            "--non-strict",
            "--no-progress",
            "--dry-run",
            "--config",
            "shop.toml",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("shop.toml")));

        let options = args.run_options();
        assert_eq!(options.migrations, vec!["customers", "sales"]);
        assert_eq!(options.parameters, vec!["tenant=acme", "year=2020"]);
        assert!(!options.progress);
        assert!(options.test_mode && options.force && options.dry_run);
        assert_eq!(options.strict, Some(false));
    }
}
