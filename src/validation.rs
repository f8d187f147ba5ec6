//! Centralized validation functions for ddosban.
//!
//! This module provides unified validation for:
//! - IP addresses and CIDR ranges
//! - Interval strings ("30s", "5m", "4h", "1d")
//! - Firewall resource names and trusted host names

use anyhow::{bail, Result};
use ipnet::IpNet;
use std::net::IpAddr;
use std::time::Duration;

/// Longest IP set / rule name the firewall service accepts.
const MAX_RESOURCE_NAME_LEN: usize = 128;

/// Validate an IP address or CIDR string and return the parsed IpNet.
///
/// If the input is a plain IP address (without /prefix), it will be converted
/// to a /32 (IPv4) or /128 (IPv6) network.
///
/// # Examples
/// ```
/// use ddosban::validation::validate_ip_or_cidr;
/// assert!(validate_ip_or_cidr("192.168.1.1").is_ok());
/// assert!(validate_ip_or_cidr("192.168.0.0/24").is_ok());
/// assert!(validate_ip_or_cidr("invalid").is_err());
/// ```
pub fn validate_ip_or_cidr(ip_str: &str) -> Result<IpNet> {
    if ip_str.contains('/') {
        ip_str
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid CIDR: {}", ip_str))
    } else {
        let ip: IpAddr = ip_str
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid IP address: {}", ip_str))?;
        Ok(IpNet::from(ip))
    }
}

/// Parse an interval string into a `Duration`.
///
/// Accepts formats like: 30s, 5m, 4h, 1d. Zero is rejected.
/// Requires ASCII-only input to prevent Unicode-related edge cases.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use ddosban::validation::parse_interval;
/// assert_eq!(parse_interval("5m").unwrap(), Duration::from_secs(300));
/// assert!(parse_interval("0m").is_err());
/// assert!(parse_interval("5w").is_err());
/// ```
pub fn parse_interval(interval: &str) -> Result<Duration> {
    if interval.is_empty() {
        bail!("Interval cannot be empty");
    }

    // Reject non-ASCII so byte slicing below stays on char boundaries
    if !interval.is_ascii() {
        bail!("Invalid interval '{}'. Only ASCII characters allowed", interval);
    }

    if interval.len() < 2 {
        bail!(
            "Invalid interval '{}'. Use format like '30s', '5m', '4h', '1d'",
            interval
        );
    }

    let (num_part, suffix) = interval.split_at(interval.len() - 1);
    let unit_secs: u64 = match suffix {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        _ => bail!(
            "Invalid interval '{}'. Suffix must be s, m, h, or d",
            interval
        ),
    };

    let value: u32 = num_part.parse().map_err(|_| {
        anyhow::anyhow!(
            "Invalid interval '{}'. Number part must be a positive integer",
            interval
        )
    })?;

    if value == 0 {
        bail!("Invalid interval '{}'. Must be greater than zero", interval);
    }

    Ok(Duration::from_secs(u64::from(value) * unit_secs))
}

/// Validate an IP set or rule name.
///
/// Names are matched exactly against the firewall's listing, so surrounding
/// whitespace and control characters are rejected rather than trimmed.
pub fn validate_resource_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("Name cannot be empty");
    }
    if name.len() > MAX_RESOURCE_NAME_LEN {
        bail!(
            "Name '{}' is longer than {} characters",
            name,
            MAX_RESOURCE_NAME_LEN
        );
    }
    if name.trim() != name {
        bail!("Name '{}' has leading or trailing whitespace", name);
    }
    if name.chars().any(|c| c.is_control()) {
        bail!("Name {:?} contains control characters", name);
    }
    Ok(())
}

/// Validate a DNS host name (RFC 1123 labels).
pub fn validate_hostname(host: &str) -> Result<()> {
    let trimmed = host.strip_suffix('.').unwrap_or(host);
    if trimmed.is_empty() || trimmed.len() > 253 {
        bail!("Invalid host name '{}'", host);
    }
    for label in trimmed.split('.') {
        let valid = !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            bail!("Invalid host name '{}'", host);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // IP/CIDR validation tests
    #[test]
    fn test_validate_ip_or_cidr_v4() {
        let net = validate_ip_or_cidr("192.168.1.1").unwrap();
        assert_eq!(net.to_string(), "192.168.1.1/32");
    }

    #[test]
    fn test_validate_ip_or_cidr_v6() {
        let net = validate_ip_or_cidr("::1").unwrap();
        assert_eq!(net.to_string(), "::1/128");
    }

    #[test]
    fn test_validate_ip_or_cidr_cidr_v4() {
        let net = validate_ip_or_cidr("192.168.0.0/24").unwrap();
        assert_eq!(net.to_string(), "192.168.0.0/24");
    }

    #[test]
    fn test_validate_ip_or_cidr_invalid_ip() {
        let err = validate_ip_or_cidr("not.an.ip").unwrap_err().to_string();
        assert!(err.contains("Invalid IP"));
    }

    #[test]
    fn test_validate_ip_or_cidr_invalid_cidr() {
        let err = validate_ip_or_cidr("192.168.1.0/99").unwrap_err().to_string();
        assert!(err.contains("Invalid CIDR"));
    }

    #[test]
    fn test_validate_ip_or_cidr_empty() {
        assert!(validate_ip_or_cidr("").is_err());
    }

    // parse_interval tests
    #[test]
    fn test_parse_interval_units() {
        assert_eq!(parse_interval("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_interval("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_interval("4h").unwrap(), Duration::from_secs(14_400));
        assert_eq!(parse_interval("1d").unwrap(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_parse_interval_invalid_suffix() {
        assert!(parse_interval("30x").is_err());
        assert!(parse_interval("5w").is_err());
    }

    #[test]
    fn test_parse_interval_invalid_number() {
        assert!(parse_interval("abcm").is_err());
        assert!(parse_interval("-5m").is_err());
        assert!(parse_interval("2.5m").is_err());
    }

    #[test]
    fn test_parse_interval_zero_rejected() {
        let err = parse_interval("0s").unwrap_err().to_string();
        assert!(err.contains("greater than zero"));
    }

    #[test]
    fn test_parse_interval_too_short() {
        assert!(parse_interval("").is_err());
        assert!(parse_interval("m").is_err());
        assert!(parse_interval("5").is_err());
    }

    #[test]
    fn test_parse_interval_unicode() {
        assert!(parse_interval("５m").is_err());
        assert!(parse_interval("4ℎ").is_err());
    }

    // resource names
    #[test]
    fn test_validate_resource_name() {
        assert!(validate_resource_name("ddos-ban-abuse-blacklist").is_ok());
        assert!(validate_resource_name("").is_err());
        assert!(validate_resource_name(" padded").is_err());
        assert!(validate_resource_name("tab\there").is_err());
        assert!(validate_resource_name(&"x".repeat(129)).is_err());
    }

    // host names
    #[test]
    fn test_validate_hostname() {
        assert!(validate_hostname("partner.example.com").is_ok());
        assert!(validate_hostname("partner.example.com.").is_ok());
        assert!(validate_hostname("localhost").is_ok());
        assert!(validate_hostname("").is_err());
        assert!(validate_hostname("-bad.example.com").is_err());
        assert!(validate_hostname("bad..example.com").is_err());
        assert!(validate_hostname("under_score.example.com").is_err());
    }
}
