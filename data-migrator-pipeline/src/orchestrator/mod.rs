//! Runs the selected migrations one after another.
//!
//! A run starts from a clean migration cache, stores the run parameters as
//! global values and stops at the first migration that fails.
use std::sync::Arc;

use data_migrator_shared::Value;
use tracing::{info, instrument, warn};

use crate::context::MigrationContext;
use crate::errors::RunError;
use crate::manager::MigrationManager;
use crate::migration::{Migration, MigrationSummary, CACHE_TAG};
use crate::progress::ProgressReporting;

/// Flags of one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Migration or group names to run. Empty runs everything.
    pub migrations: Vec<String>,
    /// `key=value` tokens stored as global values.
    pub parameters: Vec<String>,
    pub progress: bool,
    pub test_mode: bool,
    pub force: bool,
    /// Overrides each definition's own strictness when set.
    pub strict: Option<bool>,
    pub dry_run: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            migrations: Vec::new(),
            parameters: Vec::new(),
            progress: true,
            test_mode: false,
            force: false,
            strict: None,
            dry_run: false,
        }
    }
}

/// Summaries of the migrations a run completed, in run order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub migrations: Vec<(String, MigrationSummary)>,
}

impl RunReport {
    pub fn written(&self) -> u64 {
        self.migrations.iter().map(|(_, summary)| summary.written).sum()
    }

    pub fn failed(&self) -> u64 {
        self.migrations.iter().map(|(_, summary)| summary.failed).sum()
    }
}

/// Splits a `key=value` run parameter. Tokens without `=` or with an empty
/// key are not parameters.
pub fn parse_parameter(token: &str) -> Option<(String, Value)> {
    let (key, value) = token.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), Value::from(value)))
}

pub struct MigrationRunner {
    manager: MigrationManager,
    context: MigrationContext,
    progress: Arc<dyn ProgressReporting>,
}

impl MigrationRunner {
    /// Creates a new `MigrationRunner`.
    ///
    /// # Arguments
    ///
    /// * `manager` - Registry holding the migrations, constraints and values
    /// * `context` - Source and target connections plus the cache
    /// * `progress` - Reporter attached to every migration when progress is on
    pub fn new(
        manager: MigrationManager,
        context: MigrationContext,
        progress: Arc<dyn ProgressReporting>,
    ) -> Self {
        Self {
            manager,
            context,
            progress,
        }
    }

    pub fn manager(&self) -> &MigrationManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut MigrationManager {
        &mut self.manager
    }

    /// Runs the migrations selected by `options`.
    ///
    /// # Returns
    ///
    /// The summaries of every migration run, or a `RunError` naming the
    /// migration that failed. Migrations after a failing one are not started.
    #[instrument(skip(self, options), fields(dry_run = options.dry_run, test_mode = options.test_mode))]
    pub async fn run(&mut self, options: &RunOptions) -> Result<RunReport, RunError> {
        let flushed = self.context.cache.invalidate_tag(CACHE_TAG).await?;
        if flushed > 0 {
            info!(entries = flushed, "Flushed migration cache");
        }

        for token in &options.parameters {
            match parse_parameter(token) {
                Some((key, value)) => self.manager.add_global_value(key, value),
                None => warn!(parameter = %token, "Ignoring run parameter without key"),
            }
        }

        let selected = if options.migrations.is_empty() {
            self.manager.get_migrations()
        } else {
            self.manager.find_migration_by_name(&options.migrations)
        };
        if selected.is_empty() {
            warn!("No migrations to run");
            return Ok(RunReport::default());
        }

        let globals = Arc::new(self.manager.get_global_values().clone());
        let constraints = self.manager.get_global_constraints().to_vec();
        let mut report = RunReport::default();

        info!(migrations = selected.len(), "Starting migration run");
        for (name, entry) in selected {
            let mut migration = Migration::new(
                entry,
                self.context.clone(),
                Arc::clone(&globals),
                constraints.clone(),
            )
            .map_err(|e| RunError::migration(name, e))?;
            migration.set_test_mode(options.test_mode);
            migration.set_force(options.force);
            migration.set_dry_run(options.dry_run);
            if let Some(strict) = options.strict {
                migration.set_strict(strict);
            }

            if options.progress {
                let total = migration
                    .get_records_count()
                    .await
                    .map_err(|e| RunError::migration(name, e))?;
                self.progress.start(name, total);
                migration.set_progress(Arc::clone(&self.progress));
            }

            info!(migration = %name, "Running migration");
            let summary = migration
                .migrate()
                .await
                .map_err(|e| RunError::migration(name, e))?;
            report.migrations.push((name.to_string(), summary));
        }

        info!(
            migrations = report.migrations.len(),
            written = report.written(),
            failed = report.failed(),
            "Migration run finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_parameter() {
        assert_eq!(
            parse_parameter("tenant=acme"),
            Some(("tenant".to_string(), Value::from("acme")))
        );
        assert_eq!(
            parse_parameter("filter=a=b"),
            Some(("filter".to_string(), Value::from("a=b")))
        );
        assert_eq!(
            parse_parameter("empty="),
            Some(("empty".to_string(), Value::from("")))
        );
        assert_eq!(parse_parameter("verbose"), None);
        assert_eq!(parse_parameter("=value"), None);
    }

    #[test]
    fn test_report_totals() {
        let report = RunReport {
            migrations: vec![
                (
                    "a".to_string(),
                    MigrationSummary {
                        written: 3,
                        failed: 1,
                        ..MigrationSummary::default()
                    },
                ),
                (
                    "b".to_string(),
                    MigrationSummary {
                        written: 4,
                        ..MigrationSummary::default()
                    },
                ),
            ],
        };
        assert_eq!(report.written(), 7);
        assert_eq!(report.failed(), 1);
    }
}
