//! Firewall (WAF) IP set service.
//!
//! The firewall owns the IP sets and the rules enforcing them; ddosban only
//! looks them up by name and mutates them. Every mutating call consumes a
//! fresh single-use [`ChangeToken`].

mod http;
mod memory;

use async_trait::async_trait;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

pub use http::HttpWafClient;
pub use memory::MemoryWaf;

#[cfg(test)]
use mockall::automock;

/// Most entries the service accepts in one `UpdateIPSet` call.
pub const MAX_UPDATES_PER_CALL: usize = 1000;

/// Most IP set entries one configured network may be split into.
pub const MAX_ENTRIES_PER_NETWORK: u64 = 256;

/// IPv6 prefix lengths an IP set accepts. IPv4 takes /8 and /16 to /32.
const IPV6_PREFIXES: [u8; 6] = [24, 32, 48, 56, 64, 128];

/// Flavour of the WAF Classic API behind the endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WafApi {
    /// CloudFront-scoped service
    Global,
    /// Per-region service used by load balancers
    #[default]
    Regional,
}

impl WafApi {
    /// Prefix of the `X-Amz-Target` header.
    pub fn target_prefix(self) -> &'static str {
        match self {
            WafApi::Global => "AWSWAF_20150824",
            WafApi::Regional => "AWSWAF_Regional_20161128",
        }
    }
}

impl fmt::Display for WafApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WafApi::Global => f.write_str("global"),
            WafApi::Regional => f.write_str("regional"),
        }
    }
}

/// Shortest prefix length at or above `net`'s that an IP set accepts.
fn accepted_prefix(net: &IpNet) -> u8 {
    let len = net.prefix_len();
    match net {
        IpNet::V4(_) => match len {
            0..=8 => 8,
            9..=16 => 16,
            _ => len,
        },
        IpNet::V6(_) => IPV6_PREFIXES
            .iter()
            .copied()
            .find(|p| *p >= len)
            .unwrap_or(128),
    }
}

/// `true` if an IP set stores `net` as a single entry.
pub fn is_accepted_entry(net: &IpNet) -> bool {
    accepted_prefix(net) == net.prefix_len()
}

/// Number of IP set entries `net` splits into.
pub fn entries_needed(net: &IpNet) -> u64 {
    1u64 << (accepted_prefix(net) - net.prefix_len())
}

/// Split networks into subnets of prefix lengths an IP set accepts.
///
/// `172.16.0.0/12` becomes sixteen /16 entries; accepted networks pass
/// through with host bits cleared.
pub fn ip_set_entries<'a, I>(nets: I) -> BTreeSet<IpNet>
where
    I: IntoIterator<Item = &'a IpNet>,
{
    let mut entries = BTreeSet::new();
    for net in nets {
        let net = net.trunc();
        match net.subnets(accepted_prefix(&net)) {
            Ok(subnets) => entries.extend(subnets),
            Err(_) => {
                entries.insert(net);
            }
        }
    }
    entries
}

/// Opaque IP set identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IpSetId(pub String);

/// Opaque rule identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub String);

impl fmt::Display for IpSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Single-use authorization for one mutating call.
///
/// Not `Clone`: handing a token to a call moves it, so a token cannot be
/// reused across calls.
#[derive(PartialEq, Eq)]
pub struct ChangeToken(String);

impl ChangeToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChangeToken(..)")
    }
}

/// Name and id of an existing IP set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpSetSummary {
    pub id: IpSetId,
    pub name: String,
}

/// Name and id of an existing rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSummary {
    pub id: RuleId,
    pub name: String,
}

/// Errors returned by the firewall service.
#[derive(Error, Debug)]
pub enum WafError {
    /// An entry being inserted is already in the set
    #[error("entry already present in the IP set")]
    DuplicateEntry,

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("change token is stale or was already used")]
    StaleToken,

    #[error("{code}: {message}")]
    Service { code: String, message: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

/// IP set and rule operations of the firewall service.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WafClient: Send + Sync {
    /// Every IP set, all pages.
    async fn list_ip_sets(&self) -> Result<Vec<IpSetSummary>, WafError>;

    /// Create an empty IP set.
    async fn create_ip_set(&self, name: &str, token: ChangeToken) -> Result<IpSetId, WafError>;

    /// Every rule, all pages.
    async fn list_rules(&self) -> Result<Vec<RuleSummary>, WafError>;

    /// IP sets referenced by the rule's match predicates.
    async fn rule_ip_sets(&self, rule_id: &RuleId) -> Result<Vec<IpSetId>, WafError>;

    /// Insert a match predicate referencing `set_id` into a rule.
    async fn attach_ip_set(
        &self,
        rule_id: &RuleId,
        set_id: &IpSetId,
        token: ChangeToken,
    ) -> Result<(), WafError>;

    /// Insert entries into a set. Never removes anything.
    async fn insert_ip_set_entries(
        &self,
        set_id: &IpSetId,
        entries: &[IpNet],
        token: ChangeToken,
    ) -> Result<(), WafError>;

    /// A fresh token for exactly one mutating call.
    async fn get_change_token(&self) -> Result<ChangeToken, WafError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_token_debug_hides_value() {
        let token = ChangeToken::new("abcd-1234");
        assert_eq!(format!("{:?}", token), "ChangeToken(..)");
        assert_eq!(token.into_inner(), "abcd-1234");
    }

    #[test]
    fn test_ids_display() {
        assert_eq!(IpSetId("set-1".to_string()).to_string(), "set-1");
        assert_eq!(RuleId("rule-1".to_string()).to_string(), "rule-1");
    }

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    #[test]
    fn test_target_prefix_per_api() {
        assert_eq!(WafApi::Regional.target_prefix(), "AWSWAF_Regional_20161128");
        assert_eq!(WafApi::Global.target_prefix(), "AWSWAF_20150824");
        assert_eq!(WafApi::default(), WafApi::Regional);
    }

    #[test]
    fn test_accepted_entries() {
        for ok in ["10.0.0.0/8", "192.168.0.0/16", "10.1.2.0/24", "1.2.3.4/32"] {
            assert!(is_accepted_entry(&net(ok)), "{}", ok);
        }
        for bad in ["172.16.0.0/12", "10.0.0.0/9", "0.0.0.0/0", "2001:db8::/40"] {
            assert!(!is_accepted_entry(&net(bad)), "{}", bad);
        }
        assert!(is_accepted_entry(&net("2001:db8::/48")));
        assert!(is_accepted_entry(&net("2001:db8::1/128")));
    }

    #[test]
    fn test_ip_set_entries_splits_to_accepted_prefixes() {
        let entries = ip_set_entries(&[net("172.16.0.0/12"), net("10.0.0.0/8")]);
        assert_eq!(entries.len(), 17);
        assert!(entries.contains(&net("172.16.0.0/16")));
        assert!(entries.contains(&net("172.31.0.0/16")));
        assert!(entries.iter().all(is_accepted_entry));
    }

    #[test]
    fn test_ip_set_entries_clears_host_bits() {
        let entries = ip_set_entries(&[net("10.1.2.3/8")]);
        assert_eq!(entries.into_iter().collect::<Vec<_>>(), vec![net("10.0.0.0/8")]);
    }

    #[test]
    fn test_entries_needed() {
        assert_eq!(entries_needed(&net("1.2.3.4/32")), 1);
        assert_eq!(entries_needed(&net("172.16.0.0/12")), 16);
        assert_eq!(entries_needed(&net("10.0.0.0/9")), 128);
        assert_eq!(entries_needed(&net("0.0.0.0/0")), 256);
        assert_eq!(entries_needed(&net("2001:db8::/33")), 1 << 15);
    }

    #[test]
    fn test_waf_error_messages() {
        let err = WafError::Service {
            code: "WAFLimitsExceededException".to_string(),
            message: "too many sets".to_string(),
        };
        assert_eq!(err.to_string(), "WAFLimitsExceededException: too many sets");
    }
}
