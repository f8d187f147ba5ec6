//! Access log line parsing.
//!
//! Load balancer entries are space-delimited with quoted sub-fields:
//!
//! ```text
//! http 2024-03-07T09:05:12.1Z app/front-lb/50dc6c 203.0.113.9:46532 10.0.0.1:80 0.000 0.001 0.000 200 200 34 366 "GET http://example.com:80/ HTTP/1.1" "curl/8.4.0" - -
//! ```
//!
//! The client is the fourth space-delimited token (`address:port`), the user
//! agent is the content of the fourth `"`-delimited field.

use regex::Regex;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::LazyLock;

use crate::error::ParseError;

/// Fourth token, split at the last colon so IPv6 clients keep their address.
static CLIENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\S+ ){3}(\S+):\d+(?: |$)").expect("client pattern is valid")
});

/// Fourth field when splitting on double quotes.
static USER_AGENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[^"]*"[^"]*"[^"]*"([^"]*)""#).expect("user agent pattern is valid")
});

/// Fields of one log entry that classification works on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedEntry {
    pub source_ip: IpAddr,
    pub user_agent: String,
}

/// Extract the client address and user agent from one raw line.
pub fn parse_line(line: &str) -> Result<ParsedEntry, ParseError> {
    let client = CLIENT_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .ok_or(ParseError::MissingClient)?
        .as_str();

    // Bracketed IPv6 ("[2001:db8::1]:443") is accepted as well
    let addr = client.trim_start_matches('[').trim_end_matches(']');
    let source_ip: IpAddr = addr
        .parse()
        .map_err(|_| ParseError::InvalidAddress(client.to_string()))?;

    let user_agent = USER_AGENT_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .ok_or(ParseError::MissingUserAgent)?
        .as_str()
        .to_string();

    Ok(ParsedEntry {
        source_ip,
        user_agent,
    })
}

#[cfg(test)]
pub(crate) fn sample_line(ip: &str, user_agent: &str) -> String {
    format!(
        "https 2024-03-07T09:05:12.123456Z app/front-lb/50dc6c495c0c9188 {ip}:46532 10.0.1.17:8080 \
         0.000 0.012 0.000 200 200 312 1680 \"GET https://shop.example.com:443/api/cart HTTP/1.1\" \
         \"{user_agent}\" ECDHE-RSA-AES128-GCM-SHA256 TLSv1.2 \
         arn:aws:elasticloadbalancing:eu-central-1:123456789012:targetgroup/web/73e2d6bc24d8a067 \
         \"Root=1-58337262-36d228ad5d99923122bbe354\" \"shop.example.com\" \"-\" 0 \
         2024-03-07T09:05:12.111000Z \"forward\" \"-\" \"-\""
    )
}
