//! Health classification derived from a target's check history.
//!
//! The classification is a pure function of the newest-first history: only
//! the run of identical outcomes starting at the most recent check counts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::database::models::CheckRecord;

/// Consecutive successes (from the newest check) needed for `Healthy`
pub const HEALTHY_RUN: usize = 5;

/// Consecutive failures (from the newest check) needed for `Unhealthy`
pub const UNHEALTHY_RUN: usize = 3;

/// Number of newest records the classification can ever look at
pub const HISTORY_WINDOW: usize = if HEALTHY_RUN > UNHEALTHY_RUN { HEALTHY_RUN } else { UNHEALTHY_RUN };

/// Derived health of a monitored target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "UNKNOWN",
            HealthStatus::Healthy => "HEALTHY",
            HealthStatus::Unhealthy => "UNHEALTHY",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNKNOWN" => Ok(HealthStatus::Unknown),
            "HEALTHY" => Ok(HealthStatus::Healthy),
            "UNHEALTHY" => Ok(HealthStatus::Unhealthy),
            other => Err(anyhow::anyhow!("invalid health status {other:?}")),
        }
    }
}

/// Classify a newest-first history window
pub fn classify(history: &[CheckRecord]) -> HealthStatus {
    classify_outcomes(history.iter().map(|record| record.is_success))
}

/// Classify a newest-first sequence of success flags
pub fn classify_outcomes<I>(outcomes: I) -> HealthStatus
where
    I: IntoIterator<Item = bool>,
{
    let mut outcomes = outcomes.into_iter().peekable();

    let newest = match outcomes.peek() {
        Some(&newest) => newest,
        None => return HealthStatus::Unknown,
    };

    // Length of the prefix run sharing the newest outcome. Both thresholds
    // are measured from the same record, so only one run can be non-empty.
    let run = outcomes.take_while(|&outcome| outcome == newest).take(HISTORY_WINDOW).count();

    match newest {
        true if run >= HEALTHY_RUN => HealthStatus::Healthy,
        false if run >= UNHEALTHY_RUN => HealthStatus::Unhealthy,
        _ => HealthStatus::Unknown,
    }
}
