//! Postgres backend.
//!
//! Mutations run in one transaction each and take `SELECT ... FOR UPDATE` row
//! locks on the contended row (stock level, request or recall), so a second
//! writer on the same row waits until the first commits or rolls back.
//!
//! Lock order is request, then catalog items in id order, then balance rows.

mod catalog;
mod fulfillment;
mod ledger;
mod recalls;
mod requests;
mod rows;

use std::sync::Arc;

use sqlx::{PgPool, Postgres, Transaction};

use crate::audit::AuditEntry;
use crate::db::ReadyPool;
use crate::error::{StoreError, map_sqlx_error};

/// Postgres-backed store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    /// Only a provisioned pool is accepted.
    pub fn new(pool: ReadyPool) -> Self {
        Self {
            pool: Arc::new(pool.into_inner()),
        }
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

async fn commit(tx: Transaction<'_, Postgres>) -> Result<(), StoreError> {
    tx.commit()
        .await
        .map_err(|e| map_sqlx_error("commit_transaction", e))
}

/// Roll back and return `err`.
async fn abort<T>(tx: Transaction<'_, Postgres>, err: impl Into<StoreError>) -> Result<T, StoreError> {
    tx.rollback()
        .await
        .map_err(|e| map_sqlx_error("rollback", e))?;
    Err(err.into())
}

async fn insert_audit(
    tx: &mut Transaction<'_, Postgres>,
    entry: &AuditEntry,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO audit_log (id, actor, request_id, action, message, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(entry.id.as_uuid())
    .bind(entry.actor.as_uuid())
    .bind(entry.request_id.map(|id| *id.as_uuid()))
    .bind(&entry.action)
    .bind(&entry.message)
    .bind(entry.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_audit", e))?;
    Ok(())
}

#[async_trait::async_trait]
impl super::AuditStore for PostgresStore {
    async fn audit_log(
        &self,
        request_id: Option<procura_core::RequestId>,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, actor, request_id, action, message, created_at
            FROM audit_log
            WHERE ($1::uuid IS NULL OR request_id = $1)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(request_id.map(|id| *id.as_uuid()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("audit_log", e))?;

        rows.iter().map(rows::audit_entry).collect()
    }
}
