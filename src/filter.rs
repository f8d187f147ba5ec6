//! Classification of parsed entries.
//!
//! An entry is counted towards abuse unless one of the exclusions matches.
//! The allowlist is built once per run (static ranges plus resolved trusted
//! hosts) before the scan starts; classification itself does no I/O.

use ipnet::IpNet;
use regex::Regex;
use std::collections::BTreeSet;
use std::net::IpAddr;

use crate::parser::ParsedEntry;

/// Networks never counted or banned during one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allowlist {
    nets: BTreeSet<IpNet>,
}

impl Allowlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, net: IpNet) -> bool {
        self.nets.insert(net.trunc())
    }

    pub fn extend<I: IntoIterator<Item = IpNet>>(&mut self, nets: I) {
        for net in nets {
            self.insert(net);
        }
    }

    /// Whether any allowlisted network contains `ip`.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.nets.iter().any(|net| net.contains(ip))
    }

    pub fn len(&self) -> usize {
        self.nets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nets.is_empty()
    }

    /// Members in the form the firewall IP set stores them.
    pub fn members(&self) -> &BTreeSet<IpNet> {
        &self.nets
    }
}

impl FromIterator<IpNet> for Allowlist {
    fn from_iter<I: IntoIterator<Item = IpNet>>(iter: I) -> Self {
        let mut list = Allowlist::new();
        list.extend(iter);
        list
    }
}

/// One reason to leave an entry out of the abuse count.
#[derive(Debug, Clone)]
pub enum Exclusion {
    /// User agent matches a known benign client pattern
    AgentPattern(Regex),
    /// User agent equals one of these strings
    AgentExact(BTreeSet<String>),
    /// Client address is allowlisted
    Addresses(Allowlist),
}

impl Exclusion {
    pub fn matches(&self, entry: &ParsedEntry) -> bool {
        match self {
            Exclusion::AgentPattern(re) => re.is_match(&entry.user_agent),
            Exclusion::AgentExact(agents) => agents.contains(&entry.user_agent),
            Exclusion::Addresses(allowlist) => allowlist.contains(&entry.source_ip),
        }
    }
}

/// Predicate set deciding which entries count towards the ban threshold.
#[derive(Debug, Clone, Default)]
pub struct ClientFilter {
    exclusions: Vec<Exclusion>,
}

impl ClientFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, exclusion: Exclusion) -> Self {
        self.exclusions.push(exclusion);
        self
    }

    /// Build the filter for one run from configuration values.
    pub fn from_parts(
        benign_agent: Option<Regex>,
        exact_agents: &[String],
        allowlist: Allowlist,
    ) -> Self {
        let mut filter = ClientFilter::new();
        if let Some(re) = benign_agent {
            filter = filter.with(Exclusion::AgentPattern(re));
        }
        if !exact_agents.is_empty() {
            filter = filter.with(Exclusion::AgentExact(exact_agents.iter().cloned().collect()));
        }
        if !allowlist.is_empty() {
            filter = filter.with(Exclusion::Addresses(allowlist));
        }
        filter
    }

    /// `false` if any exclusion matches.
    pub fn should_count(&self, entry: &ParsedEntry) -> bool {
        !self.exclusions.iter().any(|e| e.matches(entry))
    }

    pub fn len(&self) -> usize {
        self.exclusions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exclusions.is_empty()
    }
}
