//! Connection pool setup and the startup migration phase.
//!
//! Stores are built from a [`ReadyPool`], which only [`migrate`] can produce, so
//! no query runs against a database whose schema was never provisioned.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, instrument};

use crate::config::Config;
use crate::error::{StoreError, map_sqlx_error};

const SCHEMA: &str = include_str!("../migrations/0001_procura_schema.sql");

/// Serializes concurrent provisioning runs (`pg_advisory_xact_lock` key).
const MIGRATION_LOCK_KEY: i64 = 0x7072_6f63_7572_61;

/// A pool whose schema has been provisioned.
#[derive(Debug, Clone)]
pub struct ReadyPool(PgPool);

impl ReadyPool {
    pub fn pool(&self) -> &PgPool {
        &self.0
    }

    pub fn into_inner(self) -> PgPool {
        self.0
    }
}

pub async fn connect(config: &Config) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(&config.database_url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))?;
    info!(max_connections = config.max_connections, "database pool connected");
    Ok(pool)
}

/// Run the idempotent schema migration and hand back a ready pool.
#[instrument(skip(pool), err)]
pub async fn migrate(pool: PgPool) -> Result<ReadyPool, StoreError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| map_sqlx_error("begin_transaction", e))?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("migration_lock", e))?;

    sqlx::raw_sql(SCHEMA)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("migrate", e))?;

    tx.commit()
        .await
        .map_err(|e| map_sqlx_error("commit_transaction", e))?;

    info!("schema provisioned");
    Ok(ReadyPool(pool))
}

/// `connect` followed by `migrate`.
pub async fn provision(config: &Config) -> Result<ReadyPool, StoreError> {
    let pool = connect(config).await?;
    migrate(pool).await
}
