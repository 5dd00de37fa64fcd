use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use super::address::ProbeTarget;
use super::checker::{FtpProbe, HttpProbe, Probe, SshProbe, elapsed_ms};
use super::types::{CheckOutcome, Protocol};
use crate::database::models::MonitoredTarget;

/// Slack given to a probe's own deadline before the executor cuts it off
const BACKSTOP_GRACE: Duration = Duration::from_millis(250);

/// Monitoring executor - runs one bounded check per target
///
/// Probes are looked up by protocol in a fixed table; HTTP and HTTPS share
/// the same probe.
pub struct MonitoringExecutor {
    probes: HashMap<Protocol, Arc<dyn Probe>>,
    timeout: Duration,
}

impl MonitoringExecutor {
    /// Create an executor with the built-in probe for every protocol
    pub fn new(timeout: Duration) -> Result<Self> {
        let http: Arc<dyn Probe> = Arc::new(HttpProbe::new(timeout)?);

        Ok(Self::empty(timeout)
            .with_probe(Protocol::Http, http.clone())
            .with_probe(Protocol::Https, http)
            .with_probe(Protocol::Ftp, Arc::new(FtpProbe::new(timeout)))
            .with_probe(Protocol::Ssh, Arc::new(SshProbe::new(timeout))))
    }

    /// An executor with no probes registered
    pub fn empty(timeout: Duration) -> Self {
        Self { probes: HashMap::new(), timeout }
    }

    /// Register (or replace) the probe used for `protocol`
    pub fn with_probe(mut self, protocol: Protocol, probe: Arc<dyn Probe>) -> Self {
        self.probes.insert(protocol, probe);
        self
    }

    /// Execute a monitoring check
    ///
    /// Never fails: malformed addresses, missing probes and timeouts all come
    /// back as failed outcomes. Probes enforce the timeout per stage; the
    /// executor only steps in when a probe overruns it.
    pub async fn execute_check(&self, target: &MonitoredTarget) -> CheckOutcome {
        let probe_target = match ProbeTarget::parse(&target.address, target.protocol) {
            Ok(probe_target) => probe_target,
            Err(e) => return CheckOutcome::misconfigured(e),
        };

        let Some(probe) = self.probes.get(&target.protocol) else {
            return CheckOutcome::misconfigured(format!("no probe for protocol {}", target.protocol));
        };

        let start = Instant::now();
        match timeout(self.timeout + BACKSTOP_GRACE, probe.check(&probe_target)).await {
            Ok(outcome) => outcome,
            Err(_) => CheckOutcome::failed(elapsed_ms(start), "timeout"),
        }
    }
}
