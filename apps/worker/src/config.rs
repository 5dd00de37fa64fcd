use std::{env, fmt, fs, io, path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: io::Error },
    #[error("failed to write config {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: io::Error },
    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config path available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: Database,
    pub worker: Worker,
    pub alerts: Alerts,
    pub smtp: Smtp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Database {
    /// Path of the local database file
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Worker {
    /// Pause between the end of one sweep and the start of the next
    pub interval_seconds: u64,
    /// Upper bound for a single check
    pub timeout_seconds: u64,
    /// Concurrent checks per sweep; 0 sizes the pool from the CPU count
    pub max_concurrency: usize,
    pub log_level: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Alerts {
    /// Mailbox that receives UNHEALTHY alerts
    pub recipient: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Smtp {
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
}

impl Default for Database {
    fn default() -> Self {
        Self { path: "vigil.db".into() }
    }
}

impl Default for Worker {
    fn default() -> Self {
        Self { interval_seconds: 60, timeout_seconds: 10, max_concurrency: 0, log_level: "info".into() }
    }
}

impl Default for Smtp {
    fn default() -> Self {
        Self { host: None, port: 587, username: None, password: None, from: None }
    }
}

impl Worker {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Smtp {
    /// Host and login are all present
    pub fn is_configured(&self) -> bool {
        [&self.host, &self.username, &self.password]
            .iter()
            .all(|value| value.as_deref().is_some_and(|v| !v.is_empty()))
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/vigil/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("vigil/config.toml"))
}

fn mask(secret: &Option<String>) -> &'static str {
    match secret {
        Some(value) if !value.is_empty() => "********",
        _ => "(unset)",
    }
}

fn or_unset(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("(unset)")
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path)?;
        write_title_1(f, "Worker")?;
        write_1(f, "Interval (s)", &self.worker.interval_seconds)?;
        write_1(f, "Check timeout (s)", &self.worker.timeout_seconds)?;
        write_1(f, "Max concurrency", &self.worker.max_concurrency)?;
        write_1(f, "Log level", &self.worker.log_level)?;
        write_title_1(f, "Alerts")?;
        write_1(f, "Recipient", &or_unset(&self.alerts.recipient))?;
        write_title_1(f, "SMTP")?;
        write_1(f, "Host", &or_unset(&self.smtp.host))?;
        write_1(f, "Port", &self.smtp.port)?;
        write_1(f, "Username", &or_unset(&self.smtp.username))?;
        write_1(f, "Password", &mask(&self.smtp.password))?;
        write_1(f, "From", &or_unset(&self.smtp.from))?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/vigil/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| Error::ReadFailed { path: config_path.clone(), source })?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })?;
        }

        fs::write(path, config_str).map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })
    }

    /// Overlay environment variables (after `.env` has been loaded)
    pub fn apply_env(&mut self) -> Result<(), Error> {
        self.apply_overrides(|name| env::var(name).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), Error> {
        if let Some(path) = lookup("VIGIL_DATABASE_PATH") {
            self.database.path = path;
        }
        if let Some(level) = lookup("VIGIL_LOG_LEVEL") {
            self.worker.log_level = level;
        }
        if let Some(recipient) = lookup("ALERT_EMAIL_TO") {
            self.alerts.recipient = Some(recipient);
        }
        if let Some(host) = lookup("SMTP_HOST") {
            self.smtp.host = Some(host);
        }
        if let Some(port) = lookup("SMTP_PORT") {
            self.smtp.port =
                port.parse().map_err(|_| Error::Invalid(format!("SMTP_PORT is not a port number: {port:?}")))?;
        }
        if let Some(username) = lookup("SMTP_USER") {
            self.smtp.username = Some(username);
        }
        if let Some(password) = lookup("SMTP_PASSWORD") {
            self.smtp.password = Some(password);
        }
        if let Some(from) = lookup("SMTP_FROM") {
            self.smtp.from = Some(from);
        }
        Ok(())
    }

    /// Reject settings the worker cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.database.path.trim().is_empty() {
            return Err(Error::Invalid("database.path must not be empty".into()));
        }
        if self.worker.interval_seconds == 0 {
            return Err(Error::Invalid("worker.interval_seconds must be positive".into()));
        }
        if self.worker.timeout_seconds == 0 {
            return Err(Error::Invalid("worker.timeout_seconds must be positive".into()));
        }
        if self.worker.timeout_seconds >= self.worker.interval_seconds {
            return Err(Error::Invalid(format!(
                "worker.timeout_seconds ({}) must be shorter than worker.interval_seconds ({})",
                self.worker.timeout_seconds, self.worker.interval_seconds
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.worker.interval_seconds, 60);
        assert_eq!(config.worker.timeout_seconds, 10);
        assert_eq!(config.smtp.port, 587);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_writes_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/vigil");

        let config = Config::from_config(Some(&path)).unwrap();

        assert_eq!(config.database.path, "vigil.db");
        assert!(dir.path().join("nested/vigil.toml").exists());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[worker]\ntimeout_seconds = 5\n").unwrap();

        let config = Config::from_config(Some(&path)).unwrap();

        assert_eq!(config.worker.timeout_seconds, 5);
        assert_eq!(config.worker.interval_seconds, 60);
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[worker\n").unwrap();

        assert!(matches!(Config::from_config(Some(&path)), Err(Error::ParseFailed(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("VIGIL_DATABASE_PATH", "/tmp/other.db"),
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_PORT", "2525"),
            ("SMTP_USER", "alerts@example.com"),
            ("SMTP_PASSWORD", "secret"),
            ("ALERT_EMAIL_TO", "ops@example.com"),
        ]);
        let mut config = Config::default();

        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string())).unwrap();

        assert_eq!(config.database.path, "/tmp/other.db");
        assert_eq!(config.smtp.port, 2525);
        assert_eq!(config.alerts.recipient.as_deref(), Some("ops@example.com"));
        assert!(config.smtp.is_configured());
    }

    #[test]
    fn test_bad_port_override_is_rejected() {
        let mut config = Config::default();
        let result = config.apply_overrides(|name| (name == "SMTP_PORT").then(|| "smtp".to_string()));
        assert!(matches!(result, Err(Error::Invalid(_))));
    }

    #[test]
    fn test_timeout_must_be_shorter_than_interval() {
        let mut config = Config::default();
        config.worker.timeout_seconds = 60;
        assert!(matches!(config.validate(), Err(Error::Invalid(_))));
    }

    #[test]
    fn test_display_masks_password() {
        let mut config = Config::default();
        config.smtp.password = Some("hunter2".into());
        let rendered = config.to_string();
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("********"));
    }
}
