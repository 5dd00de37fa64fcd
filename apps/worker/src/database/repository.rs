use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Row, Value, params};
use tracing::warn;

use super::models::{
    CheckRecord, CycleRecord, MonitoredTarget, NewTarget, TargetUpdate, from_millis, to_millis,
};
use crate::monitoring::health::{self, HealthStatus};
use crate::monitoring::types::CheckResult;
use crate::pool::{LibsqlManager, LibsqlPool};

const TARGET_COLUMNS: &str = "id, name, address, protocol, health_status, created_at, updated_at";
const RESULT_COLUMNS: &str = "id, target_id, checked_at, is_success, latency_ms, status_code, error";

/// Persistence gateway
///
/// Every method is one self-contained unit of work against the shared
/// store; no method hands out a connection or keeps a transaction open
/// across calls.
#[async_trait]
pub trait Database: Send + Sync {
    /// All registered targets, ordered by id
    async fn fetch_all_targets(&self) -> Result<Vec<MonitoredTarget>>;

    /// Append one check result to a target's history
    #[allow(dead_code)] // Public API method; sweeps go through `record_cycle`
    async fn insert_check_result(&self, result: &CheckResult) -> Result<i64>;

    /// Newest-first history for a target
    async fn fetch_recent_results(&self, target_id: i64, limit: usize) -> Result<Vec<CheckRecord>>;

    /// Newest-first history restricted to checks at or before `at`
    async fn fetch_results_at_or_before(
        &self,
        target_id: i64,
        at: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CheckRecord>>;

    /// Overwrite the cached classification; false if the target is gone
    #[allow(dead_code)] // Public API method; sweeps go through `record_cycle`
    async fn update_health_status(&self, target_id: i64, status: HealthStatus) -> Result<bool>;

    /// Insert, re-read the newest `window` results, classify and store the
    /// classification, all in one transaction
    async fn record_cycle(&self, result: &CheckResult, window: usize) -> Result<CycleRecord>;

    async fn insert_target(&self, target: &NewTarget) -> Result<MonitoredTarget>;

    async fn get_target(&self, target_id: i64) -> Result<Option<MonitoredTarget>>;

    /// Apply a partial edit; None if the target does not exist
    async fn update_target(&self, target_id: i64, update: &TargetUpdate) -> Result<Option<MonitoredTarget>>;

    /// Delete a target and its history; false if it did not exist
    async fn delete_target(&self, target_id: i64) -> Result<bool>;
}

/// LibSQL database implementation
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

impl DatabaseImpl {
    /// Create a new database instance from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Check out the shared connection, waiting for the current holder
    pub async fn connection(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        self.pool.get().await.map_err(|e| anyhow!("storage unavailable: {e}"))
    }
}

#[async_trait]
impl Database for DatabaseImpl {
    async fn fetch_all_targets(&self) -> Result<Vec<MonitoredTarget>> {
        let conn = self.connection().await?;
        let mut rows = conn
            .query(&format!("SELECT {TARGET_COLUMNS} FROM targets ORDER BY id"), ())
            .await
            .context("listing targets")?;

        let mut targets = Vec::new();
        while let Some(row) = rows.next().await? {
            targets.push(target_from_row(&row)?);
        }
        Ok(targets)
    }

    async fn insert_check_result(&self, result: &CheckResult) -> Result<i64> {
        let conn = self.connection().await?;
        insert_result(&conn, result).await
    }

    async fn fetch_recent_results(&self, target_id: i64, limit: usize) -> Result<Vec<CheckRecord>> {
        let conn = self.connection().await?;
        recent_results(&conn, target_id, limit, None).await
    }

    async fn fetch_results_at_or_before(
        &self,
        target_id: i64,
        at: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CheckRecord>> {
        let conn = self.connection().await?;
        recent_results(&conn, target_id, limit, Some(at)).await
    }

    async fn update_health_status(&self, target_id: i64, status: HealthStatus) -> Result<bool> {
        let conn = self.connection().await?;
        Ok(set_health_status(&conn, target_id, status).await? > 0)
    }

    async fn record_cycle(&self, result: &CheckResult, window: usize) -> Result<CycleRecord> {
        let conn = self.connection().await?;
        let tx = conn.transaction().await.context("opening cycle transaction")?;

        let recorded = record_cycle_in(&tx, result, window).await;
        match recorded {
            Ok(cycle) => {
                tx.commit().await.context("committing cycle")?;
                Ok(cycle)
            }
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(target_id = result.target_id, "rollback failed: {rollback_error}");
                }
                Err(e)
            }
        }
    }

    async fn insert_target(&self, target: &NewTarget) -> Result<MonitoredTarget> {
        let conn = self.connection().await?;
        let now = to_millis(Utc::now());

        conn.execute(
            "INSERT INTO targets (name, address, protocol, health_status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                target.name.clone(),
                target.address.clone(),
                target.protocol.as_str(),
                HealthStatus::Unknown.as_str(),
                now,
                now
            ],
        )
        .await
        .context("inserting target")?;

        let id = conn.last_insert_rowid();
        select_target(&conn, id).await?.ok_or_else(|| anyhow!("target {id} vanished after insert"))
    }

    async fn get_target(&self, target_id: i64) -> Result<Option<MonitoredTarget>> {
        let conn = self.connection().await?;
        select_target(&conn, target_id).await
    }

    async fn update_target(&self, target_id: i64, update: &TargetUpdate) -> Result<Option<MonitoredTarget>> {
        let mut assignments = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(name) = &update.name {
            assignments.push("name = ?");
            values.push(name.clone().into());
        }
        if let Some(address) = &update.address {
            assignments.push("address = ?");
            values.push(address.clone().into());
        }
        if let Some(protocol) = update.protocol {
            assignments.push("protocol = ?");
            values.push(protocol.as_str().into());
        }
        if assignments.is_empty() {
            return Err(anyhow!("no fields provided to update"));
        }

        assignments.push("updated_at = ?");
        values.push(to_millis(Utc::now()).into());
        values.push(target_id.into());

        let sql = format!("UPDATE targets SET {} WHERE id = ?", assignments.join(", "));

        let conn = self.connection().await?;
        let changed = conn.execute(&sql, values).await.context("updating target")?;
        if changed == 0 {
            return Ok(None);
        }
        select_target(&conn, target_id).await
    }

    async fn delete_target(&self, target_id: i64) -> Result<bool> {
        let conn = self.connection().await?;
        let tx = conn.transaction().await?;

        // The foreign key cascades too; deleting explicitly keeps the
        // history gone even on connections opened without the pragma.
        let deleted = async {
            tx.execute("DELETE FROM check_results WHERE target_id = ?", params![target_id]).await?;
            tx.execute("DELETE FROM targets WHERE id = ?", params![target_id]).await
        }
        .await;

        match deleted {
            Ok(rows) => {
                tx.commit().await?;
                Ok(rows > 0)
            }
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(target_id, "rollback failed: {rollback_error}");
                }
                Err(anyhow!(e).context("deleting target"))
            }
        }
    }
}

async fn record_cycle_in(conn: &Connection, result: &CheckResult, window: usize) -> Result<CycleRecord> {
    insert_result(conn, result).await?;
    let history = recent_results(conn, result.target_id, window, None).await?;
    let status = health::classify(&history);

    if set_health_status(conn, result.target_id, status).await? == 0 {
        return Err(anyhow!("target {} no longer exists", result.target_id));
    }

    Ok(CycleRecord { history, status })
}

async fn insert_result(conn: &Connection, result: &CheckResult) -> Result<i64> {
    let outcome = &result.outcome;
    let latency_ms = i64::try_from(outcome.latency_ms).unwrap_or(i64::MAX);

    conn.execute(
        "INSERT INTO check_results (target_id, checked_at, is_success, latency_ms, status_code, error) VALUES (?, ?, ?, ?, ?, ?)",
        params![
            result.target_id,
            to_millis(result.checked_at),
            if outcome.success { 1 } else { 0 },
            latency_ms,
            outcome.status_code.map(|v| v as i64),
            outcome.error.clone()
        ],
    )
    .await
    .with_context(|| format!("inserting check result for target {}", result.target_id))?;

    Ok(conn.last_insert_rowid())
}

async fn recent_results(
    conn: &Connection,
    target_id: i64,
    limit: usize,
    at_or_before: Option<DateTime<Utc>>,
) -> Result<Vec<CheckRecord>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let mut rows = match at_or_before {
        None => {
            conn.query(
                &format!(
                    "SELECT {RESULT_COLUMNS} FROM check_results WHERE target_id = ? ORDER BY checked_at DESC, id DESC LIMIT ?"
                ),
                params![target_id, limit],
            )
            .await
        }
        Some(at) => {
            conn.query(
                &format!(
                    "SELECT {RESULT_COLUMNS} FROM check_results WHERE target_id = ? AND checked_at <= ? ORDER BY checked_at DESC, id DESC LIMIT ?"
                ),
                params![target_id, to_millis(at), limit],
            )
            .await
        }
    }
    .with_context(|| format!("reading history of target {target_id}"))?;

    let mut records = Vec::new();
    while let Some(row) = rows.next().await? {
        records.push(record_from_row(&row)?);
    }
    Ok(records)
}

async fn set_health_status(conn: &Connection, target_id: i64, status: HealthStatus) -> Result<u64> {
    let changed = conn
        .execute(
            "UPDATE targets SET health_status = ?, updated_at = ? WHERE id = ?",
            params![status.as_str(), to_millis(Utc::now()), target_id],
        )
        .await
        .with_context(|| format!("updating health of target {target_id}"))?;
    Ok(changed)
}

async fn select_target(conn: &Connection, target_id: i64) -> Result<Option<MonitoredTarget>> {
    let mut rows = conn
        .query(&format!("SELECT {TARGET_COLUMNS} FROM targets WHERE id = ?"), params![target_id])
        .await?;

    match rows.next().await? {
        Some(row) => Ok(Some(target_from_row(&row)?)),
        None => Ok(None),
    }
}

fn target_from_row(row: &Row) -> Result<MonitoredTarget> {
    let protocol: String = row.get(3)?;
    let health_status: String = row.get(4)?;

    Ok(MonitoredTarget {
        id: row.get(0)?,
        name: row.get(1)?,
        address: row.get(2)?,
        protocol: protocol.parse()?,
        health_status: health_status.parse()?,
        created_at: from_millis(row.get(5)?),
        updated_at: from_millis(row.get(6)?),
    })
}

fn record_from_row(row: &Row) -> Result<CheckRecord> {
    Ok(CheckRecord {
        id: row.get(0)?,
        target_id: row.get(1)?,
        checked_at: from_millis(row.get(2)?),
        is_success: row.get::<i64>(3)? != 0,
        latency_ms: u64::try_from(row.get::<i64>(4)?).unwrap_or(0),
        status_code: row.get::<Option<i64>>(5)?.and_then(|v| u16::try_from(v).ok()),
        error: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::{create_test_database, seed_target};
    use crate::monitoring::types::{CheckOutcome, Protocol};
    use chrono::Duration;

    fn result_at(target_id: i64, checked_at: DateTime<Utc>, success: bool) -> CheckResult {
        let outcome = if success {
            CheckOutcome::succeeded(12, Some(200))
        } else {
            CheckOutcome::failed(34, "connection refused")
        };
        CheckResult::at(target_id, checked_at, outcome)
    }

    #[tokio::test]
    async fn test_insert_and_fetch_recent_newest_first() -> Result<()> {
        let (database, _dir) = create_test_database().await?;
        let target = seed_target(&database, "srv1", "https://example.com", Protocol::Https).await?;
        let base = Utc::now();

        for minute in 0..4 {
            database
                .insert_check_result(&result_at(target.id, base + Duration::minutes(minute), minute % 2 == 0))
                .await?;
        }

        let history = database.fetch_recent_results(target.id, 3).await?;
        assert_eq!(history.len(), 3);
        assert!(history.windows(2).all(|pair| pair[0].checked_at >= pair[1].checked_at));
        assert_eq!(history[0].checked_at.timestamp_millis(), (base + Duration::minutes(3)).timestamp_millis());
        assert!(!history[0].is_success);
        assert_eq!(history[0].error.as_deref(), Some("connection refused"));
        assert_eq!(history[1].status_code, Some(200));
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_results_at_or_before() -> Result<()> {
        let (database, _dir) = create_test_database().await?;
        let target = seed_target(&database, "srv1", "https://example.com", Protocol::Https).await?;
        let base = Utc::now();

        for minute in 0..5 {
            database.insert_check_result(&result_at(target.id, base + Duration::minutes(minute), true)).await?;
        }

        let cutoff = base + Duration::minutes(2);
        let history = database.fetch_results_at_or_before(target.id, cutoff, 10).await?;
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|record| record.checked_at <= cutoff));
        Ok(())
    }

    #[tokio::test]
    async fn test_record_cycle_classifies_and_updates_status() -> Result<()> {
        let (database, _dir) = create_test_database().await?;
        let target = seed_target(&database, "srv1", "https://example.com", Protocol::Https).await?;
        let base = Utc::now();

        let mut last = None;
        for minute in 0..3 {
            let result = result_at(target.id, base + Duration::minutes(minute), false);
            last = Some(database.record_cycle(&result, health::HISTORY_WINDOW).await?);
        }

        let cycle = last.unwrap();
        assert_eq!(cycle.status, HealthStatus::Unhealthy);
        assert_eq!(cycle.history.len(), 3);

        let stored = database.get_target(target.id).await?.unwrap();
        assert_eq!(stored.health_status, HealthStatus::Unhealthy);
        assert!(stored.updated_at >= target.updated_at);
        Ok(())
    }

    #[tokio::test]
    async fn test_record_cycle_for_missing_target_leaves_nothing_behind() -> Result<()> {
        let (database, _dir) = create_test_database().await?;

        let result = result_at(4242, Utc::now(), true);
        assert!(database.record_cycle(&result, health::HISTORY_WINDOW).await.is_err());

        assert!(database.fetch_recent_results(4242, 10).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_update_health_status_reports_missing_target() -> Result<()> {
        let (database, _dir) = create_test_database().await?;
        let target = seed_target(&database, "srv1", "ftp://example.com:21", Protocol::Ftp).await?;

        assert!(database.update_health_status(target.id, HealthStatus::Healthy).await?);
        assert!(!database.update_health_status(target.id + 1, HealthStatus::Healthy).await?);
        assert_eq!(database.get_target(target.id).await?.unwrap().health_status, HealthStatus::Healthy);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_target_partial() -> Result<()> {
        let (database, _dir) = create_test_database().await?;
        let target = seed_target(&database, "srv1", "http://example.com", Protocol::Http).await?;

        let update = TargetUpdate { name: Some("renamed".into()), ..Default::default() };
        let updated = database.update_target(target.id, &update).await?.unwrap();

        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.address, target.address);
        assert_eq!(updated.protocol, Protocol::Http);
        assert!(database.update_target(target.id + 100, &update).await?.is_none());
        assert!(database.update_target(target.id, &TargetUpdate::default()).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_target_cascades_history() -> Result<()> {
        let (database, _dir) = create_test_database().await?;
        let target = seed_target(&database, "srv1", "http://example.com", Protocol::Http).await?;
        database.insert_check_result(&result_at(target.id, Utc::now(), true)).await?;

        assert!(database.delete_target(target.id).await?);
        assert!(!database.delete_target(target.id).await?);
        assert!(database.get_target(target.id).await?.is_none());
        assert!(database.fetch_recent_results(target.id, 10).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_out_of_range_status_code_reads_as_none() -> Result<()> {
        let (database, _dir) = create_test_database().await?;
        let target = seed_target(&database, "srv1", "http://example.com", Protocol::Http).await?;

        {
            let conn = database.connection().await?;
            conn.execute(
                "INSERT INTO check_results (target_id, checked_at, is_success, latency_ms, status_code, error) VALUES (?, ?, 0, 5, ?, ?)",
                params![target.id, to_millis(Utc::now()), 70_000i64, "unexpected status"],
            )
            .await?;
        }

        let history = database.fetch_recent_results(target.id, 1).await?;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status_code, None);
        assert_eq!(history[0].latency_ms, 5);
        Ok(())
    }
}
