//! Window command implementation.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;

use crate::config::Config;

/// Print the window containing `at` (default now) and its partition key
pub async fn run(at: Option<DateTime<Utc>>, config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    let reference = at.unwrap_or_else(Utc::now);
    let (window, key) = config.layout().resolve(reference, config.granularity()?)?;

    println!("Reference:   {}", window.reference.to_rfc3339());
    println!("Floor:       {}", window.floor.to_rfc3339());
    println!("Granularity: {}", config.window.granularity);
    println!("Bucket:      {}", config.archive.bucket);
    println!("Partition:   {}", key);

    Ok(())
}
