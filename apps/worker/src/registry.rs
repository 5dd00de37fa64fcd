//! Target management on top of the persistence gateway.
//!
//! Everything entering the store through here is trimmed and validated so
//! the worker only ever sees well-formed rows; the worker still tolerates
//! bad rows written by other means.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::database::Database;
use crate::database::models::{CheckRecord, MonitoredTarget, NewTarget, TargetUpdate};
use crate::monitoring::address::ProbeTarget;
use crate::monitoring::health::{self, HISTORY_WINDOW, HealthStatus};
use crate::monitoring::types::Protocol;

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_ADDRESS_LEN: usize = 2048;
pub const RECENT_RESULTS: usize = 10;
pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const MAX_HISTORY_LIMIT: usize = 500;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("target {0} not found")]
    NotFound(i64),
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// A target together with its most recent checks
#[derive(Debug, Clone, Serialize)]
pub struct TargetDetail {
    #[serde(flatten)]
    pub target: MonitoredTarget,
    pub recent_results: Vec<CheckRecord>,
}

/// Answer to "was this target healthy at a given time"
#[derive(Debug, Clone, Serialize)]
pub struct HealthAt {
    pub target_id: i64,
    pub at: DateTime<Utc>,
    pub status: HealthStatus,
    pub healthy: bool,
}

pub struct Registry {
    database: Arc<dyn Database>,
}

impl Registry {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }

    /// Register a target; it starts out UNKNOWN
    pub async fn create_target(&self, name: &str, address: &str, protocol: Protocol) -> Result<MonitoredTarget> {
        let name = validate_name(name)?;
        let address = validate_address(address, protocol)?;

        let target = self.database.insert_target(&NewTarget { name, address, protocol }).await?;
        Ok(target)
    }

    pub async fn list_targets(&self) -> Result<Vec<MonitoredTarget>> {
        Ok(self.database.fetch_all_targets().await?)
    }

    pub async fn get_target(&self, id: i64) -> Result<TargetDetail> {
        let target = self.require(id).await?;
        let recent_results = self.database.fetch_recent_results(id, RECENT_RESULTS).await?;
        Ok(TargetDetail { target, recent_results })
    }

    /// Apply a partial edit; the resulting address/protocol pair must parse
    pub async fn update_target(&self, id: i64, update: TargetUpdate) -> Result<MonitoredTarget> {
        if update.is_empty() {
            return Err(RegistryError::Validation("nothing to update".into()));
        }
        let current = self.require(id).await?;

        let name = update.name.as_deref().map(validate_name).transpose()?;
        let protocol = update.protocol.unwrap_or(current.protocol);
        let address = update.address.as_deref().unwrap_or(&current.address);
        let address = validate_address(address, protocol)?;

        let update = TargetUpdate {
            name,
            address: update.address.as_ref().map(|_| address),
            protocol: update.protocol,
        };

        self.database.update_target(id, &update).await?.ok_or(RegistryError::NotFound(id))
    }

    /// Remove a target and all of its history
    pub async fn delete_target(&self, id: i64) -> Result<()> {
        validate_id(id)?;
        if self.database.delete_target(id).await? { Ok(()) } else { Err(RegistryError::NotFound(id)) }
    }

    /// Newest-first history; `limit` defaults to 50
    pub async fn history(&self, id: i64, limit: Option<usize>) -> Result<Vec<CheckRecord>> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        if !(1..=MAX_HISTORY_LIMIT).contains(&limit) {
            return Err(RegistryError::Validation(format!("limit must be between 1 and {MAX_HISTORY_LIMIT}")));
        }
        self.require(id).await?;
        Ok(self.database.fetch_recent_results(id, limit).await?)
    }

    /// Classify the target using only checks made at or before `at`
    pub async fn was_healthy(&self, id: i64, at: DateTime<Utc>) -> Result<HealthAt> {
        self.require(id).await?;
        let history = self.database.fetch_results_at_or_before(id, at, HISTORY_WINDOW).await?;
        let status = health::classify(&history);
        Ok(HealthAt { target_id: id, at, status, healthy: status == HealthStatus::Healthy })
    }

    async fn require(&self, id: i64) -> Result<MonitoredTarget> {
        validate_id(id)?;
        self.database.get_target(id).await?.ok_or(RegistryError::NotFound(id))
    }
}

fn validate_id(id: i64) -> Result<()> {
    if id <= 0 {
        return Err(RegistryError::Validation(format!("target id must be positive, got {id}")));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    match name.chars().count() {
        0 => Err(RegistryError::Validation("name cannot be empty".into())),
        n if n > MAX_NAME_LEN => {
            Err(RegistryError::Validation(format!("name is longer than {MAX_NAME_LEN} characters")))
        }
        _ => Ok(name.to_string()),
    }
}

fn validate_address(address: &str, protocol: Protocol) -> Result<String> {
    let address = address.trim();
    if address.is_empty() {
        return Err(RegistryError::Validation("address cannot be empty".into()));
    }
    if address.chars().count() > MAX_ADDRESS_LEN {
        return Err(RegistryError::Validation(format!("address is longer than {MAX_ADDRESS_LEN} characters")));
    }
    ProbeTarget::parse(address, protocol).map_err(|e| RegistryError::Validation(e.to_string()))?;
    Ok(address.to_string())
}
