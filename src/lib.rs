//! # ddosban - abusive client detection from load balancer access logs
//!
//! Every few minutes the load balancer drops gzip access logs into object
//! storage. ddosban reads the archives of the latest window, counts requests
//! per client address, and inserts every client at or above the threshold
//! into a firewall (WAF) IP set. Trusted clients never count: private ranges,
//! partner hosts resolved through DNS, and known benign user agents.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ddosban                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CLI (clap)                                                 │
//! │    └── Commands: run, window, dump, config, version         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Config (serde_yaml) + DDOSBAN_* environment overrides      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Pipeline                                                   │
//! │    ├── Window: floor instant, partition key                 │
//! │    ├── Archive: prefix listing, streaming gzip (flate2)     │
//! │    ├── Parser: client address + user agent (regex)          │
//! │    ├── Filter: benign agents, allow-list (ipnet)            │
//! │    └── Aggregator: per-client counts, threshold             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Reconciler (WafClient trait)                               │
//! │    ├── HttpWafClient (reqwest + rustls)                     │
//! │    └── MemoryWaf (in-process)                               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use ddosban::config::Config;
//! use ddosban::pipeline::{Clients, Pipeline, RunOptions, RunSettings};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("/etc/ddosban/config.yaml")?;
//!     let pipeline = Pipeline::new(
//!         RunSettings::from_config(&config)?,
//!         Clients::from_config(&config)?,
//!     );
//!
//!     let report = pipeline.evaluate(RunOptions::default()).await?;
//!     println!("banned: {:?}", report.ban_set());
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`aggregator`] - Per-client hit counting and threshold selection
//! - [`archive`] - Object store access and streaming gzip decoding
//! - [`cli`] - Command-line interface definitions
//! - [`commands`] - CLI command implementations
//! - [`config`] - Configuration parsing and validation
//! - [`dns`] - Trusted host resolution with timeout
//! - [`error`] - Error types of each run stage
//! - [`filter`] - Allow-list and user agent exclusions
//! - [`lock`] - File locking for concurrent execution prevention
//! - [`parser`] - Access log line parsing
//! - [`pipeline`] - One evaluation run end to end
//! - [`reconciler`] - Idempotent IP set reconciliation
//! - [`report`] - Run summary (text, JSON)
//! - [`signal`] - Graceful shutdown signal handling
//! - [`utils`] - Formatting helpers
//! - [`validation`] - Input validation (CIDRs, intervals, names)
//! - [`waf`] - Firewall IP set service clients
//! - [`window`] - Time window and partition key resolution

pub mod aggregator;
pub mod archive;
pub mod cli;
pub mod commands;
pub mod config;
pub mod dns;
pub mod error;
pub mod filter;
pub mod lock;
pub mod parser;
pub mod pipeline;
pub mod reconciler;
pub mod report;
pub mod signal;
pub mod utils;
pub mod validation;
pub mod waf;
pub mod window;

pub use cli::{Cli, Commands, ConfigAction};
pub use config::Config;
