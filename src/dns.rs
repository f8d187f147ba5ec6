//! DNS resolution of trusted partner host names.

use async_trait::async_trait;
use ipnet::IpNet;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ResolutionError;

#[cfg(test)]
use mockall::automock;

/// Default DNS resolution timeout in seconds
const DNS_TIMEOUT_SECS: u64 = 5;

/// Forward lookup of a host name.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve_hostname(&self, host: &str) -> Result<Vec<IpAddr>, ResolutionError>;
}

/// System resolver (getaddrinfo) run off the async executor with a timeout.
pub struct SystemResolver {
    timeout: Duration,
}

impl SystemResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new(Duration::from_secs(DNS_TIMEOUT_SECS))
    }
}

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve_hostname(&self, host: &str) -> Result<Vec<IpAddr>, ResolutionError> {
        let name = host.to_string();
        let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_host(&name));

        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(Ok(addrs))) => Ok(addrs),
            Ok(Ok(Err(source))) => Err(ResolutionError::Lookup {
                host: host.to_string(),
                source,
            }),
            Ok(Err(_)) => Err(ResolutionError::Task {
                host: host.to_string(),
            }),
            Err(_) => Err(ResolutionError::Timeout {
                host: host.to_string(),
            }),
        }
    }
}

/// Addresses of the trusted hosts that resolved, and the names that did not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedHosts {
    pub nets: Vec<IpNet>,
    pub failed: Vec<String>,
}

/// Resolve every host and return the addresses as host networks.
///
/// A host that fails to resolve is logged and skipped; the run goes on with
/// whatever the other hosts produced.
pub async fn resolve_trusted_hosts(resolver: &dyn HostResolver, hosts: &[String]) -> ResolvedHosts {
    let mut resolved = ResolvedHosts::default();
    for host in hosts {
        match resolver.resolve_hostname(host).await {
            Ok(addrs) => {
                debug!("{} resolved to {} address(es)", host, addrs.len());
                resolved.nets.extend(addrs.into_iter().map(IpNet::from));
            }
            Err(e) => {
                warn!("{}; host left out of the allow-list for this run", e);
                resolved.failed.push(host.clone());
            }
        }
    }
    resolved.nets.sort();
    resolved.nets.dedup();
    resolved
}
