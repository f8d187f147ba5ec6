//! Run command implementation.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::lock::LockGuard;
use crate::pipeline::{Clients, Pipeline, RunOptions, RunSettings};
use crate::report::ReportFormat;
use crate::signal::{ShutdownGuard, ShutdownToken};

/// Run the run command
pub async fn run(
    at: Option<DateTime<Utc>>,
    dry_run: bool,
    format: ReportFormat,
    verbose: bool,
    config_path: &Path,
) -> Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    let settings = RunSettings::from_config(&config)?;

    // A dry run never mutates the firewall, so it may overlap a real run
    let _lock = if dry_run {
        None
    } else {
        Some(LockGuard::acquire(&config.lock_file)?)
    };

    let clients = Clients::from_config(&config).context("Failed to create firewall client")?;
    let shutdown = ShutdownToken::new();
    let _guard = ShutdownGuard::new(shutdown.clone());

    let pipeline = Pipeline::new(settings, clients).with_shutdown(shutdown);
    let report = pipeline.evaluate(RunOptions { at, dry_run }).await?;

    info!(
        "Window {} done: {} banned",
        report.partition_key,
        report.banned.len()
    );
    println!("{}", report.render(format, verbose)?);

    Ok(())
}
