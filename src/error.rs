//! Error types for ddosban.
//!
//! Each stage of a run has its own error type. Stream, parse and resolution
//! errors are absorbed where they happen; configuration and reconciliation
//! errors end the run.

use thiserror::Error;

use crate::waf::WafError;

/// Missing or invalid configuration. Always fatal, raised before any I/O.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("Missing required setting '{0}'")]
    Missing(&'static str),

    #[error("Invalid value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Failure while listing, opening or decoding one archive.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Failed to list archives under '{prefix}': {source}")]
    List {
        prefix: String,
        source: std::io::Error,
    },

    #[error("Failed to open archive '{key}': {source}")]
    Open {
        key: String,
        source: std::io::Error,
    },

    #[error("Failed to decompress archive '{key}' after {lines} lines: {source}")]
    Decode {
        key: String,
        lines: u64,
        source: std::io::Error,
    },
}

/// A log line that does not carry the expected fields.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("no client address:port in the fourth field")]
    MissingClient,

    #[error("client address '{0}' is not an IP address")]
    InvalidAddress(String),

    #[error("no quoted user-agent field")]
    MissingUserAgent,
}

/// DNS failure for a trusted host name.
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("DNS lookup for '{host}' failed: {source}")]
    Lookup {
        host: String,
        source: std::io::Error,
    },

    #[error("DNS lookup for '{host}' timed out")]
    Timeout { host: String },

    #[error("DNS lookup task for '{host}' failed")]
    Task { host: String },
}

/// Firewall call that failed while converging a named IP set.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("IP set '{set}': {call} failed: {source}")]
    Call {
        set: String,
        call: &'static str,
        source: WafError,
    },

    #[error("IP set '{set}': rule '{rule}' does not exist")]
    RuleNotFound { set: String, rule: String },

    #[error("IP set '{set}' was created as {set_id} but attaching it to rule '{rule}' failed: {source}")]
    Unenforced {
        set: String,
        set_id: String,
        rule: String,
        source: WafError,
    },
}

/// Terminal failure of one evaluation run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Execution deadline of {0:?} exceeded, discarding partial aggregation")]
    DeadlineExceeded(std::time::Duration),

    #[error("Interrupted, discarding partial aggregation")]
    Interrupted,

    #[error("Archive scan task failed: {0}")]
    ScanTask(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}
