//! Data Migrator Main Entry Point
//!
//! Runs the migrations declared in the migrations file against the source
//! and target databases configured in the environment.

use clap::Parser;
use data_migrator::{AppError, Args, Dependencies, Settings};
use dotenv::dotenv;
use std::env;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("data_migrator=info,data_migrator_pipeline=info"));

    let json = env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .init();

        info!(
            service_name = "data-migrator",
            service_version = env!("CARGO_PKG_VERSION"),
            "Tracing initialized with JSON format"
        );
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true).pretty())
            .init();

        info!(
            service_name = "data-migrator",
            service_version = env!("CARGO_PKG_VERSION"),
            "Tracing initialized with console output"
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenv().ok();
    let args = Args::parse();

    init_tracing();

    let settings = Settings::from_env(args.config.clone())?;
    let mut deps = match Dependencies::new(&settings).await {
        Ok(deps) => {
            info!("Dependencies initialized successfully");
            deps
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize dependencies");
            return Err(e);
        }
    };

    match deps.runner.run(&args.run_options()).await {
        Ok(report) => {
            info!(
                migrations = report.migrations.len(),
                written = report.written(),
                failed = report.failed(),
                "Data migration completed successfully"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Data migration failed");
            Err(e.into())
        }
    }
}
