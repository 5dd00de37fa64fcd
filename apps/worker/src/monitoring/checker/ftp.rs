//! FTP control-connection probe.
//!
//! Speaks just enough of RFC 959 to prove the server is answering: read the
//! 220 greeting, optionally log in with USER/PASS, then QUIT.

use anyhow::{Result, anyhow, bail};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout_at;

use super::{Probe, elapsed_ms};
use crate::monitoring::address::{Credentials, ProbeTarget};
use crate::monitoring::types::CheckOutcome;

/// Longest reply line we are willing to buffer
const MAX_REPLY_LINE: usize = 4096;

/// FTP checker
#[derive(Debug)]
pub struct FtpProbe {
    timeout: Duration,
}

impl FtpProbe {
    /// `timeout` bounds the whole exchange; whichever stage is running when
    /// it expires is named in the error.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait::async_trait]
impl Probe for FtpProbe {
    async fn check(&self, target: &ProbeTarget) -> CheckOutcome {
        let ProbeTarget::Ftp { host, port, credentials } = target else {
            return CheckOutcome::misconfigured(format!("{target} is not an FTP target"));
        };

        let start = Instant::now();
        let deadline = tokio::time::Instant::from_std(start + self.timeout);

        let mut session = match timeout_at(deadline, FtpSession::connect(host, *port)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return CheckOutcome::failed(elapsed_ms(start), format!("connect: {e}")),
            Err(_) => return CheckOutcome::failed(elapsed_ms(start), "connect: timeout"),
        };

        if let Some(credentials) = credentials {
            match timeout_at(deadline, session.login(credentials)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return CheckOutcome::failed(elapsed_ms(start), format!("authenticate: {e}")),
                Err(_) => return CheckOutcome::failed(elapsed_ms(start), "authenticate: timeout"),
            }
        }

        let latency = elapsed_ms(start);
        if timeout_at(deadline, session.quit()).await.is_err() {
            tracing::debug!("FTP QUIT to {target} timed out");
        }
        CheckOutcome::succeeded(latency, None)
    }
}

struct FtpSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl FtpSession {
    /// Open the control connection and wait for the 220 greeting
    async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        let (read_half, writer) = stream.into_split();
        let mut session = Self { reader: BufReader::new(read_half), writer };

        let (code, text) = session.read_reply().await?;
        if code != 220 {
            bail!("unexpected greeting {code} {text}");
        }
        Ok(session)
    }

    async fn login(&mut self, credentials: &Credentials) -> Result<()> {
        let (code, text) = self.command(&format!("USER {}", credentials.username)).await?;
        match code {
            230 => return Ok(()),
            331 | 332 => {}
            _ => bail!("USER rejected: {code} {text}"),
        }

        let (code, text) = self.command(&format!("PASS {}", credentials.password)).await?;
        match code {
            230 | 202 => Ok(()),
            _ => Err(anyhow!("login rejected: {code} {text}")),
        }
    }

    /// Best-effort polite disconnect
    async fn quit(mut self) {
        if let Err(e) = self.command("QUIT").await {
            tracing::debug!("FTP QUIT failed: {e}");
        }
    }

    async fn command(&mut self, line: &str) -> Result<(u16, String)> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        self.read_reply().await
    }

    /// Read one (possibly multi-line) reply and return its code and text
    async fn read_reply(&mut self) -> Result<(u16, String)> {
        let first = self.read_line().await?;
        let (code, separator, text) = split_reply_line(&first)?;

        if separator != '-' {
            return Ok((code, text.to_string()));
        }

        // Multi-line reply: runs until a line starting with "<code> ".
        let terminator = format!("{code} ");
        let mut lines = vec![text.to_string()];
        loop {
            let line = self.read_line().await?;
            if let Some(rest) = line.strip_prefix(&terminator) {
                lines.push(rest.to_string());
                return Ok((code, lines.join("\n")));
            }
            lines.push(line);
        }
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let read = (&mut self.reader).take(MAX_REPLY_LINE as u64).read_line(&mut line).await?;
        if read == 0 {
            bail!("connection closed by server");
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Split `"220-Welcome"` into `(220, '-', "Welcome")`
fn split_reply_line(line: &str) -> Result<(u16, char, &str)> {
    let code = line
        .get(..3)
        .and_then(|digits| digits.parse::<u16>().ok())
        .ok_or_else(|| anyhow!("malformed reply {line:?}"))?;
    let separator = line[3..].chars().next().unwrap_or(' ');
    let text = line.get(4..).unwrap_or_default();
    Ok((code, separator, text))
}
