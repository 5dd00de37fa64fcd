//! Database abstraction layer
//!
//! The persistence gateway over a single shared LibSQL connection: schema
//! migrations, row models and the `Database` trait the worker and the
//! registry talk to.

pub mod migrations;
pub mod models;
pub mod repository;

pub use repository::{Database, DatabaseImpl};

use anyhow::Result;

use crate::pool::open_pool;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}

/// Open the store at `path`, migrate it, and return the gateway
pub async fn open(path: &str) -> Result<DatabaseImpl> {
    let pool = open_pool(path).await?;
    {
        let conn = pool.get().await.map_err(|e| anyhow::anyhow!("opening {path}: {e}"))?;
        initialize_database(&conn).await?;
    }
    Ok(DatabaseImpl::new_from_pool(pool))
}
