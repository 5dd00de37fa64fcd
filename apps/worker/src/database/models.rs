use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::monitoring::health::HealthStatus;
use crate::monitoring::types::Protocol;

/// Monitored target - a registered endpoint under observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredTarget {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub protocol: Protocol,
    /// Cached classification, rewritten by every sweep
    pub health_status: HealthStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for registering a new target
#[derive(Debug, Clone)]
pub struct NewTarget {
    pub name: String,
    pub address: String,
    pub protocol: Protocol,
}

/// Partial edit of a target's registry fields
#[derive(Debug, Clone, Default)]
pub struct TargetUpdate {
    pub name: Option<String>,
    pub address: Option<String>,
    pub protocol: Option<Protocol>,
}

impl TargetUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.address.is_none() && self.protocol.is_none()
    }
}

/// A persisted check result (one row of a target's history)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub id: i64,
    pub target_id: i64,
    pub checked_at: DateTime<Utc>,
    pub is_success: bool,
    pub latency_ms: u64,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

/// What one atomic record-and-classify cycle produced
#[derive(Debug, Clone)]
pub struct CycleRecord {
    /// Newest-first window the classification was computed from
    pub history: Vec<CheckRecord>,
    pub status: HealthStatus,
}

/// Convert a UTC timestamp to unix milliseconds
pub fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Convert unix milliseconds to a UTC timestamp
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_round_trip_keeps_millisecond_precision() {
        let now = Utc::now();
        let back = from_millis(to_millis(now));
        assert_eq!(back.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn test_empty_update() {
        assert!(TargetUpdate::default().is_empty());
        assert!(!TargetUpdate { name: Some("x".into()), ..Default::default() }.is_empty());
    }
}
