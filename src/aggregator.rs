//! Per-client hit counting and ban selection.

use ipnet::IpNet;
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;

use crate::parser::ParsedEntry;

/// Request counts per client address for one window.
///
/// Lives for a single run: filled by the scan, read once to derive the ban
/// set, then dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HitCounter {
    hits: HashMap<IpAddr, u64>,
}

impl HitCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, ip: IpAddr) {
        *self.hits.entry(ip).or_insert(0) += 1;
    }

    pub fn get(&self, ip: &IpAddr) -> u64 {
        self.hits.get(ip).copied().unwrap_or(0)
    }

    /// Number of distinct addresses seen.
    pub fn distinct(&self) -> usize {
        self.hits.len()
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.hits.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Addresses with `count >= threshold`.
    pub fn select_above_threshold(&self, threshold: u64) -> BTreeSet<IpAddr> {
        self.hits
            .iter()
            .filter(|(_, count)| **count >= threshold)
            .map(|(ip, _)| *ip)
            .collect()
    }

    /// The `n` busiest addresses, highest count first, ties by address.
    pub fn top(&self, n: usize) -> Vec<(IpAddr, u64)> {
        let mut ranked: Vec<(IpAddr, u64)> = self.hits.iter().map(|(ip, c)| (*ip, *c)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }
}

/// Count every entry in one pass.
pub fn aggregate<I>(entries: I) -> HitCounter
where
    I: IntoIterator<Item = ParsedEntry>,
{
    let mut counter = HitCounter::new();
    for entry in entries {
        counter.record(entry.source_ip);
    }
    counter
}

/// Free-function form of [`HitCounter::select_above_threshold`].
pub fn select_above_threshold(counter: &HitCounter, threshold: u64) -> BTreeSet<IpAddr> {
    counter.select_above_threshold(threshold)
}

/// Single-address networks (/32 or /128) for IP set entries.
pub fn to_host_nets(ips: &BTreeSet<IpAddr>) -> BTreeSet<IpNet> {
    ips.iter().map(|ip| IpNet::from(*ip)).collect()
}
