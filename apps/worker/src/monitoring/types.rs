use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Protocol a monitored target is checked with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Http,
    Https,
    Ftp,
    Ssh,
}

impl Protocol {
    pub const ALL: [Protocol; 4] = [Protocol::Http, Protocol::Https, Protocol::Ftp, Protocol::Ssh];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "HTTP",
            Protocol::Https => "HTTPS",
            Protocol::Ftp => "FTP",
            Protocol::Ssh => "SSH",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown protocol {0:?} (expected one of HTTP, HTTPS, FTP, SSH)")]
pub struct UnknownProtocol(pub String);

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Protocol::ALL
            .into_iter()
            .find(|protocol| protocol.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownProtocol(s.to_string()))
    }
}

/// What a single probe observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub success: bool,

    /// Wall-clock time until the success/failure point, in milliseconds
    pub latency_ms: u64,

    /// Protocol status code (HTTP status), if the protocol has one
    pub status_code: Option<u16>,

    /// Short classification of what went wrong
    pub error: Option<String>,
}

impl CheckOutcome {
    /// A check that reached its success point
    pub fn succeeded(latency_ms: u64, status_code: Option<u16>) -> Self {
        Self { success: true, latency_ms, status_code, error: None }
    }

    /// A check that failed with a classified error
    pub fn failed(latency_ms: u64, error: impl Into<String>) -> Self {
        Self { success: false, latency_ms, status_code: None, error: Some(error.into()) }
    }

    /// A malformed target; no network I/O was attempted
    pub fn misconfigured(error: impl fmt::Display) -> Self {
        Self::failed(0, format!("configuration error: {error}"))
    }

    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }
}

/// A completed check, ready to be appended to a target's history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub target_id: i64,
    pub checked_at: DateTime<Utc>,
    pub outcome: CheckOutcome,
}

impl CheckResult {
    /// Stamp an outcome with the current time
    pub fn new(target_id: i64, outcome: CheckOutcome) -> Self {
        Self { target_id, checked_at: Utc::now(), outcome }
    }

    #[cfg(test)]
    pub fn at(target_id: i64, checked_at: DateTime<Utc>, outcome: CheckOutcome) -> Self {
        Self { target_id, checked_at, outcome }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_parse_is_case_insensitive() {
        assert_eq!("https".parse::<Protocol>().unwrap(), Protocol::Https);
        assert_eq!(" Ssh ".parse::<Protocol>().unwrap(), Protocol::Ssh);
        assert!("TELNET".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_protocol_display_round_trips() {
        for protocol in Protocol::ALL {
            assert_eq!(protocol.to_string().parse::<Protocol>().unwrap(), protocol);
        }
    }

    #[test]
    fn test_misconfigured_outcome_has_no_latency() {
        let outcome = CheckOutcome::misconfigured("missing host");
        assert!(!outcome.success);
        assert_eq!(outcome.latency_ms, 0);
        assert_eq!(outcome.error.as_deref(), Some("configuration error: missing host"));
    }
}
