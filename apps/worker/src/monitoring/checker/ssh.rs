use std::sync::Arc;
use std::time::{Duration, Instant};

use russh::client;
use tokio::time::timeout_at;

use super::{Probe, elapsed_ms};
use crate::monitoring::address::ProbeTarget;
use crate::monitoring::types::CheckOutcome;

/// SSH checker: a full password-authentication handshake
pub struct SshProbe {
    config: Arc<client::Config>,
    timeout: Duration,
}

impl SshProbe {
    pub fn new(timeout: Duration) -> Self {
        let config = client::Config {
            inactivity_timeout: Some(timeout),
            ..Default::default()
        };
        Self { config: Arc::new(config), timeout }
    }
}

/// Accepts any host key; the probe only checks that the service lets us in.
struct AcceptAnyHostKey;

impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

#[async_trait::async_trait]
impl Probe for SshProbe {
    async fn check(&self, target: &ProbeTarget) -> CheckOutcome {
        let ProbeTarget::Ssh { host, port, credentials } = target else {
            return CheckOutcome::misconfigured(format!("{target} is not an SSH target"));
        };

        let start = Instant::now();
        let deadline = tokio::time::Instant::from_std(start + self.timeout);

        let connect = client::connect(self.config.clone(), (host.as_str(), *port), AcceptAnyHostKey);
        let mut session = match timeout_at(deadline, connect).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return CheckOutcome::failed(elapsed_ms(start), format!("connect: {e}")),
            Err(_) => return CheckOutcome::failed(elapsed_ms(start), "connect: timeout"),
        };

        let auth = session.authenticate_password(credentials.username.as_str(), credentials.password.as_str());
        let auth = timeout_at(deadline, auth).await;
        let latency = elapsed_ms(start);

        let outcome = match auth {
            Ok(Ok(result)) if result.success() => CheckOutcome::succeeded(latency, None),
            Ok(Ok(_)) => CheckOutcome::failed(latency, "authenticate: credentials rejected"),
            Ok(Err(e)) => CheckOutcome::failed(latency, format!("authenticate: {e}")),
            Err(_) => CheckOutcome::failed(latency, "authenticate: timeout"),
        };

        let disconnect = session.disconnect(russh::Disconnect::ByApplication, "", "en");
        match timeout_at(deadline, disconnect).await {
            Ok(Err(e)) => tracing::debug!("SSH disconnect from {target} failed: {e}"),
            Err(_) => tracing::debug!("SSH disconnect from {target} timed out"),
            Ok(Ok(())) => {}
        }

        outcome
    }
}
