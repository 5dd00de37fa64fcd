use anyhow::Result;
use std::error::Error as _;
use std::time::{Duration, Instant};

use super::{Probe, elapsed_ms};
use crate::monitoring::address::ProbeTarget;
use crate::monitoring::types::CheckOutcome;

/// HTTP/HTTPS checker
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("vigil/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Probe for HttpProbe {
    async fn check(&self, target: &ProbeTarget) -> CheckOutcome {
        let ProbeTarget::Http { url } = target else {
            return CheckOutcome::misconfigured(format!("{target} is not an HTTP target"));
        };

        let start = Instant::now();

        // `send` resolves once the response headers are in.
        match self.client.get(url.clone()).send().await {
            Ok(response) => {
                let latency = elapsed_ms(start);
                let status = response.status();

                // Anything below 400 counts, redirects included
                if status.as_u16() < 400 {
                    CheckOutcome::succeeded(latency, Some(status.as_u16()))
                } else {
                    CheckOutcome::failed(latency, format!("unexpected status {}", status.as_u16()))
                        .with_status_code(status.as_u16())
                }
            }
            Err(e) => CheckOutcome::failed(elapsed_ms(start), classify_error(&e)),
        }
    }
}

/// Reduce a reqwest error to a short classification string
fn classify_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        return "timeout".to_string();
    }

    let chain = error_chain(error).to_ascii_lowercase();

    if chain.contains("certificate") || chain.contains("tls") || chain.contains("ssl") {
        "tls error".to_string()
    } else if chain.contains("dns") || chain.contains("failed to lookup") || chain.contains("name or service") {
        "dns error".to_string()
    } else if chain.contains("connection refused") {
        "connection refused".to_string()
    } else if error.is_connect() {
        "connection failed".to_string()
    } else {
        format!("request error: {error}")
    }
}

/// Messages of the underlying causes, joined
///
/// The top-level message embeds the URL, so it is left out.
fn error_chain(error: &reqwest::Error) -> String {
    let mut messages = Vec::new();
    let mut source = error.source();
    while let Some(cause) = source {
        messages.push(cause.to_string());
        source = cause.source();
    }
    messages.join(": ")
}
