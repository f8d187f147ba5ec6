//! Config command implementation.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::cli::ConfigAction;
use crate::config::Config;
use crate::validation::validate_resource_name;

/// Run the config command
pub async fn run(action: ConfigAction, config_path: &Path) -> Result<()> {
    match action {
        ConfigAction::Init { force } => init(force, config_path),
        ConfigAction::Show => show(config_path),
        ConfigAction::SetBanSet { name } => set_ban_set(&name, config_path),
    }
}

fn init(force: bool, config_path: &Path) -> Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file {:?} already exists (use --force to overwrite)",
            config_path
        );
    }
    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
    }
    fs::write(config_path, Config::generate_default_yaml())
        .with_context(|| format!("Failed to write config file {:?}", config_path))?;

    println!("[OK] Wrote default configuration to {}", config_path.display());
    println!("Edit the archive section before the first run.");
    Ok(())
}

fn show(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    print!("{}", serde_yaml::to_string(&config.redacted())?);
    Ok(())
}

fn set_ban_set(name: &str, config_path: &Path) -> Result<()> {
    validate_resource_name(name)?;

    // Environment overrides must not end up in the file
    let mut config = Config::read_file(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    let previous = std::mem::replace(&mut config.ban.ip_set, name.to_string());
    config.validate()?;
    config.save(config_path)?;

    println!("[OK] Ban IP set changed: {} -> {}", previous, name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_then_set_ban_set() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("etc/config.yaml");

        run(ConfigAction::Init { force: false }, &path).await.unwrap();
        assert!(path.exists());

        run(
            ConfigAction::SetBanSet {
                name: "ban-v2".to_string(),
            },
            &path,
        )
        .await
        .unwrap();
        assert_eq!(Config::read_file(&path).unwrap().ban.ip_set, "ban-v2");
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "ban:\n  threshold: 7\n").unwrap();

        assert!(run(ConfigAction::Init { force: false }, &path).await.is_err());
        run(ConfigAction::Init { force: true }, &path).await.unwrap();
        assert_eq!(Config::read_file(&path).unwrap().ban.threshold, 50);
    }

    #[tokio::test]
    async fn test_set_ban_set_rejects_bad_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        run(ConfigAction::Init { force: false }, &path).await.unwrap();

        let result = run(
            ConfigAction::SetBanSet {
                name: " padded ".to_string(),
            },
            &path,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(
            Config::read_file(&path).unwrap().ban.ip_set,
            "ddosban-blacklist"
        );
    }
}
