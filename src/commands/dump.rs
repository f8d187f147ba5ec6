//! Dump command implementation.
//!
//! Prints decoded lines to stdout; archive headers and errors go to the log.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::archive::{ArchiveLines, ArchiveStore, LocalArchiveStore};
use crate::config::Config;
use crate::utils::format_bytes;

/// Run the dump command
pub async fn run(file: Option<PathBuf>, at: Option<DateTime<Utc>>, config_path: &Path) -> Result<()> {
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    if let Some(path) = file {
        let lines = ArchiveLines::open_file(&path)
            .with_context(|| format!("Failed to open archive {:?}", path))?;
        let count = write_lines(lines, &mut out)?;
        out.flush()?;
        info!("{}: {} lines", path.display(), count);
        return Ok(());
    }

    let config = Config::load(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    let (window, key) = config
        .layout()
        .resolve(at.unwrap_or_else(Utc::now), config.granularity()?)?;
    info!("Window {} ({})", window.floor, key);

    let store = LocalArchiveStore::new(&config.storage.root);
    let objects = store
        .list_objects(&config.archive.bucket, key.as_str())
        .with_context(|| format!("Failed to list archives under {}", key))?;
    if objects.is_empty() {
        println!("[INFO] No archives under {}", key);
        return Ok(());
    }

    let mut failed = 0;
    for object in &objects {
        info!(
            "{} ({})",
            object.key,
            object.size.map(format_bytes).unwrap_or_else(|| "?".to_string())
        );
        let raw = match store.open_stream(object) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to open {}: {}", object.key, e);
                failed += 1;
                continue;
            }
        };
        if let Err(e) = write_lines(ArchiveLines::new(object.key.clone(), raw), &mut out) {
            warn!("{}", e);
            failed += 1;
        }
    }
    out.flush()?;

    if failed > 0 {
        anyhow::bail!("{} of {} archive(s) could not be read", failed, objects.len());
    }
    Ok(())
}

fn write_lines<W: Write>(lines: ArchiveLines, out: &mut W) -> Result<u64> {
    let mut count = 0;
    for line in lines {
        writeln!(out, "{}", line?)?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn archive(text: &str) -> ArchiveLines {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(text.as_bytes()).unwrap();
        let bytes = enc.finish().unwrap();
        ArchiveLines::new("test.gz", Box::new(io::Cursor::new(bytes)))
    }

    #[test]
    fn test_write_lines_copies_every_line() {
        let mut out = Vec::new();
        let count = write_lines(archive("a\nb\r\nc"), &mut out).unwrap();
        assert_eq!(count, 3);
        assert_eq!(String::from_utf8(out).unwrap(), "a\nb\nc\n");
    }

    #[test]
    fn test_write_lines_reports_corruption() {
        let mut out = Vec::new();
        let lines = ArchiveLines::new("bad.gz", Box::new(io::Cursor::new(b"not gzip".to_vec())));
        assert!(write_lines(lines, &mut out).is_err());
    }
}
