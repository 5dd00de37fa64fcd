//! Alert delivery.
//!
//! The worker only ever talks to a [`NotificationSink`]; which transport
//! sits behind it is decided once at startup from configuration.

pub mod notifier;
pub mod smtp;

pub use notifier::TransitionNotifier;
pub use smtp::SmtpSink;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Invalid configuration for sender: {0}")]
    InvalidConfiguration(String),
    #[error("Failed to build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("Invalid mail address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// An external notification channel
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one message to `recipient`
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), SinkError>;
}

/// Sink used when no mail transport is configured: the alert is logged
/// and dropped.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, recipient: &str, subject: &str, _body: &str) -> Result<(), SinkError> {
        warn!(recipient, subject, "missing email configuration, alert not delivered");
        Ok(())
    }
}
