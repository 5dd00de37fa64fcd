//! Protocol probes.
//!
//! One probe per protocol family, all behind the [`Probe`] capability. The
//! executor picks a probe by the target's protocol and bounds it with the
//! per-check timeout, so probes only need to report what they observed.

pub mod ftp;
pub mod http;
pub mod ssh;

pub use ftp::FtpProbe;
pub use http::HttpProbe;
pub use ssh::SshProbe;

use std::time::Instant;

use super::address::ProbeTarget;
use super::types::CheckOutcome;

/// Checker trait for the supported protocols
#[async_trait::async_trait]
pub trait Probe: Send + Sync {
    /// Perform the check against an already-parsed target
    async fn check(&self, target: &ProbeTarget) -> CheckOutcome;
}

/// Milliseconds elapsed since `start`
pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
