//! Progress reporting for a running migration.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use tracing::info;

/// Receives progress updates from a migration. Optional: migrations run
/// without one when the caller does not ask for progress.
pub trait ProgressReporting: Send + Sync {
    /// Called once before the first chunk with the expected row count.
    fn start(&self, migration: &str, total: u64);

    /// Rows written since the previous call.
    fn advance(&self, rows: u64);

    fn finish(&self);
}

/// Logs progress every time another tenth of the expected rows is written.
#[derive(Debug, Default)]
pub struct LogProgress {
    migration: Mutex<String>,
    total: AtomicU64,
    advanced: AtomicU64,
    logged_step: AtomicU64,
    started: Mutex<Option<Instant>>,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advanced(&self) -> u64 {
        self.advanced.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    fn migration(&self) -> String {
        self.migration
            .lock()
            .map(|name| name.clone())
            .unwrap_or_default()
    }

    fn rows_per_sec(&self, rows: u64) -> String {
        let elapsed = self
            .started
            .lock()
            .ok()
            .and_then(|started| started.map(|s| s.elapsed().as_secs_f64()))
            .unwrap_or_default();
        let rate = if elapsed > 0.0 {
            rows as f64 / elapsed
        } else {
            0.0
        };
        format!("{:.2}", rate)
    }
}

impl ProgressReporting for LogProgress {
    fn start(&self, migration: &str, total: u64) {
        if let Ok(mut name) = self.migration.lock() {
            *name = migration.to_string();
        }
        if let Ok(mut started) = self.started.lock() {
            *started = Some(Instant::now());
        }
        self.total.store(total, Ordering::Relaxed);
        self.advanced.store(0, Ordering::Relaxed);
        self.logged_step.store(0, Ordering::Relaxed);
        info!(migration = %migration, total, "Migration started");
    }

    fn advance(&self, rows: u64) {
        let advanced = self.advanced.fetch_add(rows, Ordering::Relaxed) + rows;
        let total = self.total();
        if total == 0 {
            return;
        }
        let step = (advanced.min(total) * 10) / total;
        if step > self.logged_step.swap(step, Ordering::Relaxed) {
            info!(
                migration = %self.migration(),
                advanced,
                total,
                percent = step * 10,
                rows_per_sec = self.rows_per_sec(advanced),
                "Migration progress"
            );
        }
    }

    fn finish(&self) {
        let advanced = self.advanced();
        info!(
            migration = %self.migration(),
            advanced,
            total = self.total(),
            rows_per_sec = self.rows_per_sec(advanced),
            "Migration finished"
        );
    }
}
