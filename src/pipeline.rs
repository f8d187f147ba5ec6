//! One evaluation run: resolve the window, scan its archives, count clients,
//! then reconcile the ban and allow IP sets.
//!
//! The scan is synchronous and runs on the blocking pool. It stops as soon as
//! the deadline passes or a shutdown is requested, and whatever was counted
//! up to that point is dropped.

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::aggregator::{to_host_nets, HitCounter};
use crate::archive::{ArchiveReader, ArchiveStore, LocalArchiveStore};
use crate::config::Config;
use crate::dns::{resolve_trusted_hosts, HostResolver, SystemResolver};
use crate::error::{ConfigError, RunError};
use crate::filter::{Allowlist, ClientFilter};
use crate::parser::parse_line;
use crate::reconciler::Reconciler;
use crate::report::{BannedClient, RunReport, ScanStats};
use crate::signal::ShutdownToken;
use crate::waf::{ip_set_entries, HttpWafClient, WafClient, WafError};
use crate::window::{ArchiveLayout, PartitionKey};

/// Lines between two deadline/shutdown checks
const CHECK_EVERY_LINES: u64 = 256;

/// Target IP set and the rule enforcing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetTarget {
    pub ip_set: String,
    pub rule: String,
}

/// Immutable settings of a run, derived once from [`Config`].
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub layout: ArchiveLayout,
    pub bucket: String,
    pub granularity: Duration,
    pub deadline: Duration,
    pub threshold: u64,
    pub ban: SetTarget,
    /// `None` skips allow-list reconciliation
    pub allow: Option<SetTarget>,
    pub benign_user_agent: Option<Regex>,
    pub excluded_user_agents: Vec<String>,
    pub static_allowlist: Allowlist,
    pub trusted_hosts: Vec<String>,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let allow = (!config.allow.ip_set.is_empty()).then(|| SetTarget {
            ip_set: config.allow.ip_set.clone(),
            rule: config.allow.rule.clone(),
        });
        Ok(Self {
            layout: config.layout(),
            bucket: config.archive.bucket.clone(),
            granularity: config.granularity()?,
            deadline: config.deadline()?,
            threshold: config.ban.threshold,
            ban: SetTarget {
                ip_set: config.ban.ip_set.clone(),
                rule: config.ban.rule.clone(),
            },
            allow,
            benign_user_agent: config.benign_agent_regex()?,
            excluded_user_agents: config.filter.excluded_user_agents.clone(),
            static_allowlist: config.static_allowlist()?,
            trusted_hosts: config.allow.trusted_hosts.clone(),
        })
    }
}

/// External services a run talks to.
#[derive(Clone)]
pub struct Clients {
    pub store: Arc<dyn ArchiveStore>,
    pub resolver: Arc<dyn HostResolver>,
    pub waf: Arc<dyn WafClient>,
}

impl Clients {
    /// Local archive mirror, system DNS and the HTTP firewall client.
    pub fn from_config(config: &Config) -> Result<Self, WafError> {
        let token = config.waf.get_token(|key| std::env::var(key).ok());
        let waf = HttpWafClient::new(
            &config.waf.endpoint,
            config.waf.api,
            token,
            config.waf.timeout(),
        )?;
        Ok(Self {
            store: Arc::new(LocalArchiveStore::new(&config.storage.root)),
            resolver: Arc::new(SystemResolver::default()),
            waf: Arc::new(waf),
        })
    }
}

/// Per-run evaluation options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Evaluate the window containing this instant instead of now
    pub at: Option<DateTime<Utc>>,
    /// Compute the decision sets without touching the firewall
    pub dry_run: bool,
}

/// Evaluates windows against one set of clients.
pub struct Pipeline {
    settings: RunSettings,
    clients: Clients,
    shutdown: ShutdownToken,
}

impl Pipeline {
    pub fn new(settings: RunSettings, clients: Clients) -> Self {
        Self {
            settings,
            clients,
            shutdown: ShutdownToken::new(),
        }
    }

    /// Use `shutdown` instead of a private token.
    pub fn with_shutdown(mut self, shutdown: ShutdownToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Run one evaluation.
    pub async fn evaluate(&self, options: RunOptions) -> Result<RunReport, RunError> {
        let started = Instant::now();
        let cutoff = started + self.settings.deadline;
        let reference = options.at.unwrap_or_else(Utc::now);

        let (window, key) = self
            .settings
            .layout
            .resolve(reference, self.settings.granularity)?;
        info!("Evaluating window {} ({})", window.floor, key);

        let mut allowlist = self.settings.static_allowlist.clone();
        let resolved =
            resolve_trusted_hosts(self.clients.resolver.as_ref(), &self.settings.trusted_hosts)
                .await;
        allowlist.extend(resolved.nets.iter().copied());
        self.check_budget(cutoff)?;

        let filter = ClientFilter::from_parts(
            self.settings.benign_user_agent.clone(),
            &self.settings.excluded_user_agents,
            allowlist.clone(),
        );
        let reader = ArchiveReader::new(Arc::clone(&self.clients.store), &self.settings.bucket);
        let scan = Scan {
            reader,
            key: key.clone(),
            filter,
            cutoff,
            deadline: self.settings.deadline,
            shutdown: self.shutdown.clone(),
        };
        let (counter, stats) = tokio::task::spawn_blocking(move || scan.run())
            .await
            .map_err(|e| RunError::ScanTask(e.to_string()))??;

        // Nothing is reconciled past the deadline
        self.check_budget(cutoff)?;

        let banned = banned_clients(&counter, self.settings.threshold);
        info!(
            "{} of {} distinct client(s) at or above {} requests",
            banned.len(),
            counter.distinct(),
            self.settings.threshold
        );

        let mut reconciled = Vec::new();
        if options.dry_run {
            info!("Dry-run mode: skipping firewall reconciliation");
        } else {
            let reconciler = Reconciler::new(self.clients.waf.as_ref());
            let ban_ips: BTreeSet<_> = banned.iter().map(|b| b.ip).collect();
            reconciled.push(
                reconciler
                    .reconcile(
                        &self.settings.ban.ip_set,
                        &self.settings.ban.rule,
                        &to_host_nets(&ban_ips),
                    )
                    .await?,
            );
            if let Some(allow) = &self.settings.allow {
                let entries = ip_set_entries(allowlist.members());
                reconciled.push(
                    reconciler
                        .reconcile(&allow.ip_set, &allow.rule, &entries)
                        .await?,
                );
            }
        }

        Ok(RunReport {
            reference,
            window_floor: window.floor,
            partition_key: key,
            threshold: self.settings.threshold,
            dry_run: options.dry_run,
            scan: stats,
            distinct_ips: counter.distinct(),
            banned,
            allowed: allowlist.members().iter().copied().collect::<Vec<IpNet>>(),
            unresolved_hosts: resolved.failed,
            reconciled,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    fn check_budget(&self, cutoff: Instant) -> Result<(), RunError> {
        if self.shutdown.is_cancelled() {
            return Err(RunError::Interrupted);
        }
        if Instant::now() >= cutoff {
            return Err(RunError::DeadlineExceeded(self.settings.deadline));
        }
        Ok(())
    }
}

/// Clients at or above `threshold`, highest count first.
fn banned_clients(counter: &HitCounter, threshold: u64) -> Vec<BannedClient> {
    let selected = counter.select_above_threshold(threshold);
    counter
        .top(usize::MAX)
        .into_iter()
        .filter(|(ip, _)| selected.contains(ip))
        .map(|(ip, requests)| BannedClient { ip, requests })
        .collect()
}

/// Blocking scan of one partition.
struct Scan {
    reader: ArchiveReader,
    key: PartitionKey,
    filter: ClientFilter,
    cutoff: Instant,
    deadline: Duration,
    shutdown: ShutdownToken,
}

impl Scan {
    fn run(self) -> Result<(HitCounter, ScanStats), RunError> {
        let mut counter = HitCounter::new();
        let mut stats = ScanStats::default();

        let archives = match self.reader.open_partition(&self.key) {
            Ok(archives) => archives,
            Err(e) => {
                warn!("{}; continuing with no archives", e);
                stats.archives_failed += 1;
                return Ok((counter, stats));
            }
        };
        if archives.remaining() == 0 {
            info!("No archives under {}", self.key);
        }

        for archive in archives {
            self.check()?;
            let lines = match archive {
                Ok(lines) => lines,
                Err(e) => {
                    warn!("{}; skipping", e);
                    stats.archives_failed += 1;
                    continue;
                }
            };
            let key = lines.key().to_string();
            let mut failed = false;

            for line in lines {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("{}; skipping the rest of the archive", e);
                        failed = true;
                        break;
                    }
                };
                stats.lines_read += 1;
                if stats.lines_read % CHECK_EVERY_LINES == 0 {
                    self.check()?;
                }

                match parse_line(&line) {
                    Ok(entry) if self.filter.should_count(&entry) => {
                        counter.record(entry.source_ip);
                        stats.counted += 1;
                    }
                    Ok(_) => stats.excluded += 1,
                    Err(e) => {
                        debug!("Malformed line in {}: {}", key, e);
                        stats.malformed += 1;
                    }
                }
            }

            if failed {
                stats.archives_failed += 1;
            } else {
                stats.archives_read += 1;
            }
        }

        self.check()?;
        Ok((counter, stats))
    }

    fn check(&self) -> Result<(), RunError> {
        if self.shutdown.is_cancelled() {
            return Err(RunError::Interrupted);
        }
        if Instant::now() >= self.cutoff {
            return Err(RunError::DeadlineExceeded(self.deadline));
        }
        Ok(())
    }
}
