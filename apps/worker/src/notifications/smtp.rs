use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{NotificationSink, SinkError};
use crate::config::Smtp;

/// Sends alerts as plain-text mail over an authenticated STARTTLS relay.
pub struct SmtpSink {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpSink {
    pub fn new(config: &Smtp) -> Result<Self, SinkError> {
        let host = config
            .host
            .as_deref()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| SinkError::InvalidConfiguration("smtp.host is not set".into()))?;
        let username = config
            .username
            .clone()
            .ok_or_else(|| SinkError::InvalidConfiguration("smtp.username is not set".into()))?;
        let password = config
            .password
            .clone()
            .ok_or_else(|| SinkError::InvalidConfiguration("smtp.password is not set".into()))?;

        // The sender defaults to the login, as most relays require.
        let from = config.from.as_deref().unwrap_or(&username).parse::<Mailbox>()?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?
            .port(config.port)
            .credentials(Credentials::new(username, password))
            .build();

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl NotificationSink for SmtpSink {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), SinkError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(recipient.parse::<Mailbox>()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())?;

        let response = self.transport.send(message).await?;
        if !response.is_positive() {
            return Err(SinkError::SendFailed(format!("relay answered {}", response.code())));
        }
        Ok(())
    }
}
