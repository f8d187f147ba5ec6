//! Configuration management for ddosban.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::ConfigError;
use crate::filter::Allowlist;
use crate::validation::{parse_interval, validate_hostname, validate_ip_or_cidr, validate_resource_name};
use crate::waf::{entries_needed, WafApi, MAX_ENTRIES_PER_NETWORK};
use crate::window::ArchiveLayout;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ddosban/config.yaml";

/// Environment variable read for the firewall API token when `waf.token_env` is unset
pub const DEFAULT_TOKEN_ENV: &str = "DDOSBAN_WAF_TOKEN";

/// Secure string type that zeroizes memory on drop
/// Used for sensitive data like tokens and passwords
#[derive(Clone, Default, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SecureString(String);

impl SecureString {
    pub fn new(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SecureString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for SecureString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where archives are read from
    pub storage: StorageConfig,

    /// Archive bucket and partition key components
    pub archive: ArchiveConfig,

    /// Window length and execution deadline
    pub window: WindowConfig,

    /// Ban threshold and the IP set holding banned clients
    pub ban: BanConfig,

    /// Allowlisted networks and trusted hosts
    pub allow: AllowConfig,

    /// User agents left out of the count
    pub filter: FilterConfig,

    /// Firewall API access
    pub waf: WafConfig,

    /// Advisory lock preventing overlapping runs
    pub lock_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            archive: ArchiveConfig::default(),
            window: WindowConfig::default(),
            ban: BanConfig::default(),
            allow: AllowConfig::default(),
            filter: FilterConfig::default(),
            waf: WafConfig::default(),
            lock_file: PathBuf::from("/var/run/ddosban.lock"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory laid out as `<root>/<bucket>/<key>`
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/lib/ddosban/archives"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub bucket: String,
    pub account_id: String,
    pub service: String,
    pub region: String,
    pub load_balancer: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            account_id: String::new(),
            service: "elasticloadbalancing".to_string(),
            region: String::new(),
            load_balancer: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window length ("5m")
    pub granularity: String,
    /// Execution budget for one run ("4m")
    pub deadline: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            granularity: "5m".to_string(),
            deadline: "4m".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BanConfig {
    /// Requests per window at which a client is banned (inclusive)
    pub threshold: u64,
    pub ip_set: String,
    pub rule: String,
}

impl Default for BanConfig {
    fn default() -> Self {
        Self {
            threshold: 50,
            ip_set: "ddosban-blacklist".to_string(),
            rule: "ddosban-blacklist-rule".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllowConfig {
    /// Allow IP set name; empty disables allow-list reconciliation
    pub ip_set: String,
    pub rule: String,
    /// Static networks that are never counted (IPs or CIDRs)
    pub addresses: Vec<String>,
    /// Partner host names resolved at the start of every run
    pub trusted_hosts: Vec<String>,
}

impl Default for AllowConfig {
    fn default() -> Self {
        Self {
            ip_set: "ddosban-whitelist".to_string(),
            rule: "ddosban-whitelist-rule".to_string(),
            addresses: default_allowlist(),
            trusted_hosts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Regular expression matched against the user agent
    pub benign_user_agent: Option<String>,
    /// User agents excluded on exact match
    pub excluded_user_agents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WafConfig {
    /// API flavour, selects the `X-Amz-Target` prefix
    pub api: WafApi,
    /// Signing proxy in front of the WAF API
    pub endpoint: String,
    /// Token can be set directly or via DDOSBAN_WAF_TOKEN env var
    /// Memory is securely zeroed when dropped
    pub token: SecureString,
    /// Environment variable name to read token from (optional)
    pub token_env: Option<String>,
    pub timeout_secs: u64,
}

impl Default for WafConfig {
    fn default() -> Self {
        Self {
            api: WafApi::default(),
            endpoint: String::new(),
            token: SecureString::default(),
            token_env: None,
            timeout_secs: 30,
        }
    }
}

impl WafConfig {
    /// Get the effective token, checking env vars first
    /// Returns a SecureString that will be zeroed when dropped
    pub fn get_token<F>(&self, lookup: F) -> SecureString
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ref env_name) = self.token_env {
            if let Some(val) = lookup(env_name) {
                return SecureString::new(val);
            }
        }
        if let Some(val) = lookup(DEFAULT_TOKEN_ENV) {
            return SecureString::new(val);
        }
        self.token.clone()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from YAML file, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Same as [`Config::load`] with environment lookups going through `lookup`.
    pub fn load_with_env<P, F>(path: P, lookup: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::read_file(path)?;
        config.apply_env_overrides_from(lookup)?;
        config.validate()?;

        Ok(config)
    }

    /// Parse the file as written, without environment overrides or validation.
    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Override settings from `DDOSBAN_*` variables.
    ///
    /// `BLACKLIST_IPSET_NAME` is honoured for the ban set name;
    /// `DDOSBAN_BAN_IP_SET` takes precedence over it.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |target: &mut String, key: &str| {
            if let Some(val) = lookup(key) {
                *target = val;
            }
        };

        if let Some(root) = lookup("DDOSBAN_STORAGE_ROOT") {
            self.storage.root = PathBuf::from(root);
        }
        set(&mut self.archive.bucket, "DDOSBAN_ARCHIVE_BUCKET");
        set(&mut self.archive.account_id, "DDOSBAN_ACCOUNT_ID");
        set(&mut self.archive.region, "DDOSBAN_REGION");
        set(&mut self.archive.load_balancer, "DDOSBAN_LOAD_BALANCER");
        set(&mut self.window.granularity, "DDOSBAN_GRANULARITY");
        set(&mut self.window.deadline, "DDOSBAN_DEADLINE");
        set(&mut self.ban.ip_set, "BLACKLIST_IPSET_NAME");
        set(&mut self.ban.ip_set, "DDOSBAN_BAN_IP_SET");
        set(&mut self.ban.rule, "DDOSBAN_BAN_RULE");
        set(&mut self.allow.ip_set, "DDOSBAN_ALLOW_IP_SET");
        set(&mut self.allow.rule, "DDOSBAN_ALLOW_RULE");
        set(&mut self.waf.endpoint, "DDOSBAN_WAF_ENDPOINT");
        if let Some(api) = lookup("DDOSBAN_WAF_API") {
            self.waf.api = match api.trim().to_ascii_lowercase().as_str() {
                "global" => WafApi::Global,
                "regional" => WafApi::Regional,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "waf.api",
                        reason: format!("DDOSBAN_WAF_API '{}' is not global or regional", api),
                    })
                }
            };
        }

        if let Some(threshold) = lookup("DDOSBAN_THRESHOLD") {
            self.ban.threshold = threshold.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "ban.threshold",
                reason: format!("DDOSBAN_THRESHOLD '{}' is not a number", threshold),
            })?;
        }
        if let Some(pattern) = lookup("DDOSBAN_BENIGN_USER_AGENT") {
            self.filter.benign_user_agent = Some(pattern).filter(|p| !p.is_empty());
        }
        if let Some(hosts) = lookup("DDOSBAN_TRUSTED_HOSTS") {
            self.allow.trusted_hosts = hosts
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(String::from)
                .collect();
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        require(&self.archive.bucket, "archive.bucket")?;
        require(&self.archive.account_id, "archive.account_id")?;
        require(&self.archive.service, "archive.service")?;
        require(&self.archive.region, "archive.region")?;
        require(&self.archive.load_balancer, "archive.load_balancer")?;

        self.granularity()?;
        self.deadline()?;

        if self.ban.threshold == 0 {
            return Err(ConfigError::Invalid {
                key: "ban.threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        resource_name(&self.ban.ip_set, "ban.ip_set")?;
        resource_name(&self.ban.rule, "ban.rule")?;

        if !self.allow.ip_set.is_empty() {
            resource_name(&self.allow.ip_set, "allow.ip_set")?;
            resource_name(&self.allow.rule, "allow.rule")?;
            if self.allow.ip_set == self.ban.ip_set {
                return Err(ConfigError::Invalid {
                    key: "allow.ip_set",
                    reason: "must differ from ban.ip_set".to_string(),
                });
            }
        }
        let allowlist = self.static_allowlist()?;
        if !self.allow.ip_set.is_empty() {
            if let Some(net) = allowlist
                .members()
                .iter()
                .find(|net| entries_needed(net) > MAX_ENTRIES_PER_NETWORK)
            {
                return Err(ConfigError::Invalid {
                    key: "allow.addresses",
                    reason: format!(
                        "{} needs {} IP set entries, at most {} allowed",
                        net,
                        entries_needed(net),
                        MAX_ENTRIES_PER_NETWORK
                    ),
                });
            }
        }
        for host in &self.allow.trusted_hosts {
            validate_hostname(host).map_err(|e| ConfigError::Invalid {
                key: "allow.trusted_hosts",
                reason: e.to_string(),
            })?;
        }

        self.benign_agent_regex()?;

        require(&self.waf.endpoint, "waf.endpoint")?;
        if !self.waf.endpoint.starts_with("https://")
            && !self.waf.endpoint.starts_with("http://")
        {
            return Err(ConfigError::Invalid {
                key: "waf.endpoint",
                reason: format!("'{}' is not an http(s) URL", self.waf.endpoint),
            });
        }
        if self.waf.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "waf.timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Save configuration to YAML file atomically
    ///
    /// Uses tempfile + rename pattern to prevent corruption on crash.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        use anyhow::Context;
        use std::io::Write;
        use tempfile::NamedTempFile;

        let path = path.as_ref();
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        // Create temporary file in the same directory for atomic rename
        let parent_dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut temp_file = NamedTempFile::new_in(parent_dir)
            .context("Failed to create temporary file for config")?;

        temp_file.write_all(content.as_bytes())?;
        temp_file.as_file().sync_all()?;

        temp_file
            .persist(path)
            .with_context(|| format!("Failed to persist config file: {:?}", path))?;

        Ok(())
    }

    /// Copy with secrets blanked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.waf.token.is_empty() {
            copy.waf.token = SecureString::from("[REDACTED]");
        }
        copy
    }

    /// Generate default config with comments
    pub fn generate_default_yaml() -> String {
        include_str!("../templates/config.yaml").to_string()
    }

    pub fn granularity(&self) -> Result<Duration, ConfigError> {
        parse_interval(&self.window.granularity).map_err(|e| ConfigError::Invalid {
            key: "window.granularity",
            reason: e.to_string(),
        })
    }

    pub fn deadline(&self) -> Result<Duration, ConfigError> {
        parse_interval(&self.window.deadline).map_err(|e| ConfigError::Invalid {
            key: "window.deadline",
            reason: e.to_string(),
        })
    }

    pub fn layout(&self) -> ArchiveLayout {
        ArchiveLayout {
            account_id: self.archive.account_id.clone(),
            service: self.archive.service.clone(),
            region: self.archive.region.clone(),
            load_balancer: self.archive.load_balancer.clone(),
        }
    }

    /// Compiled benign user agent pattern, if one is configured.
    pub fn benign_agent_regex(&self) -> Result<Option<Regex>, ConfigError> {
        match self.filter.benign_user_agent.as_deref() {
            None | Some("") => Ok(None),
            Some(pattern) => Regex::new(pattern)
                .map(Some)
                .map_err(|e| ConfigError::Invalid {
                    key: "filter.benign_user_agent",
                    reason: e.to_string(),
                }),
        }
    }

    /// Static part of the allow-list.
    pub fn static_allowlist(&self) -> Result<Allowlist, ConfigError> {
        self.allow
            .addresses
            .iter()
            .map(|entry| {
                validate_ip_or_cidr(entry.trim()).map_err(|e| ConfigError::Invalid {
                    key: "allow.addresses",
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

fn require(value: &str, key: &'static str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::Missing(key))
    } else {
        Ok(())
    }
}

fn resource_name(value: &str, key: &'static str) -> Result<(), ConfigError> {
    validate_resource_name(value).map_err(|e| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })
}

fn default_allowlist() -> Vec<String> {
    vec![
        "192.168.0.0/16".to_string(), // RFC1918
        "10.0.0.0/8".to_string(),     // RFC1918
        "172.16.0.0/12".to_string(),  // RFC1918
        "127.0.0.0/8".to_string(),    // Loopback
    ]
}
