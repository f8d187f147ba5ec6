//! CLI command implementations.

pub mod config;
pub mod dump;
pub mod run;
pub mod window;
