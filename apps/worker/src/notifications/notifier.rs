use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{error, info};

use super::NotificationSink;
use crate::database::models::{CheckRecord, MonitoredTarget};
use crate::monitoring::health::HealthStatus;

/// Raises an alert when a target becomes unhealthy
pub struct TransitionNotifier {
    sink: Arc<dyn NotificationSink>,
    recipient: String,
}

impl TransitionNotifier {
    pub fn new(sink: Arc<dyn NotificationSink>, recipient: impl Into<String>) -> Self {
        Self { sink, recipient: recipient.into() }
    }

    /// Whether going from `previous` to `current` is an alerting edge
    pub fn is_alert_transition(previous: HealthStatus, current: HealthStatus) -> bool {
        previous != HealthStatus::Unhealthy && current == HealthStatus::Unhealthy
    }

    /// Notify on the edge into `Unhealthy`
    ///
    /// `previous` must be the status read at the start of the sweep, before
    /// this cycle's classification was stored. Returns true when the sink
    /// accepted the alert; delivery failures are logged, never raised.
    pub async fn maybe_notify(
        &self,
        target: &MonitoredTarget,
        previous: HealthStatus,
        current: HealthStatus,
        history: &[CheckRecord],
    ) -> bool {
        if !Self::is_alert_transition(previous, current) {
            return false;
        }

        let subject = format!("[ALERT] Server {} is UNHEALTHY", target.name);
        let body = alert_body(target, previous, history);

        match self.sink.send(&self.recipient, &subject, &body).await {
            Ok(()) => {
                info!(target_id = target.id, "alert sent for server '{}'", target.name);
                true
            }
            Err(e) => {
                error!(target_id = target.id, "failed to send alert for server '{}': {e}", target.name);
                false
            }
        }
    }
}

fn alert_body(target: &MonitoredTarget, previous: HealthStatus, history: &[CheckRecord]) -> String {
    let mut body = format!(
        "The server '{}' has become UNHEALTHY (was {previous}).\n\
         Address: {}\nProtocol: {}\n\nRecent checks (newest first):\n",
        target.name, target.address, target.protocol
    );

    for record in history {
        let outcome = if record.is_success { "ok" } else { "FAILED" };
        let _ = write!(body, "  {} {outcome} {}ms", record.checked_at.to_rfc3339(), record.latency_ms);
        if let Some(code) = record.status_code {
            let _ = write!(body, " status={code}");
        }
        if let Some(error) = &record.error {
            let _ = write!(body, " error={error}");
        }
        body.push('\n');
    }

    body.push_str("\nPlease check immediately.\n");
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::Protocol;
    use crate::notifications::SinkError;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), SinkError> {
            if self.fail {
                return Err(SinkError::SendFailed("relay down".into()));
            }
            self.sent.lock().unwrap().push((recipient.into(), subject.into(), body.into()));
            Ok(())
        }
    }

    fn target() -> MonitoredTarget {
        let now = Utc::now();
        MonitoredTarget {
            id: 7,
            name: "srv2".into(),
            address: "ssh://u:p@example.com:22".into(),
            protocol: Protocol::Ssh,
            health_status: HealthStatus::Healthy,
            created_at: now,
            updated_at: now,
        }
    }

    fn failure(error: &str) -> CheckRecord {
        CheckRecord {
            id: 1,
            target_id: 7,
            checked_at: Utc::now(),
            is_success: false,
            latency_ms: 20,
            status_code: None,
            error: Some(error.into()),
        }
    }

    #[test]
    fn test_only_the_edge_into_unhealthy_alerts() {
        use HealthStatus::*;
        assert!(TransitionNotifier::is_alert_transition(Healthy, Unhealthy));
        assert!(TransitionNotifier::is_alert_transition(Unknown, Unhealthy));
        assert!(!TransitionNotifier::is_alert_transition(Unhealthy, Unhealthy));
        assert!(!TransitionNotifier::is_alert_transition(Unhealthy, Healthy));
        assert!(!TransitionNotifier::is_alert_transition(Unknown, Healthy));
        assert!(!TransitionNotifier::is_alert_transition(Healthy, Unknown));
    }

    #[tokio::test]
    async fn test_healthy_to_unhealthy_sends_one_alert() {
        let sink = Arc::new(RecordingSink::default());
        let notifier = TransitionNotifier::new(sink.clone(), "ops@example.com");
        let history = vec![failure("boom"), failure("timeout"), failure("timeout")];

        let sent = notifier
            .maybe_notify(&target(), HealthStatus::Healthy, HealthStatus::Unhealthy, &history)
            .await;

        assert!(sent);
        let messages = sink.sent.lock().unwrap();
        assert_eq!(messages.len(), 1);
        let (recipient, subject, body) = &messages[0];
        assert_eq!(recipient, "ops@example.com");
        assert_eq!(subject, "[ALERT] Server srv2 is UNHEALTHY");
        assert!(body.contains("error=boom"));
        assert!(body.contains("was HEALTHY"));
        assert!(!body.contains("status="));
    }

    #[tokio::test]
    async fn test_repeated_unhealthy_does_not_alert() {
        let sink = Arc::new(RecordingSink::default());
        let notifier = TransitionNotifier::new(sink.clone(), "ops@example.com");

        let sent = notifier
            .maybe_notify(&target(), HealthStatus::Unhealthy, HealthStatus::Unhealthy, &[])
            .await;

        assert!(!sent);
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_failure_is_swallowed() {
        let sink = Arc::new(RecordingSink { fail: true, ..Default::default() });
        let notifier = TransitionNotifier::new(sink, "ops@example.com");

        let sent = notifier
            .maybe_notify(&target(), HealthStatus::Unknown, HealthStatus::Unhealthy, &[failure("x")])
            .await;

        assert!(!sent);
    }
}
