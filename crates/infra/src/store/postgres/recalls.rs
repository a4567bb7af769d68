use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};
use tracing::instrument;

use procura_core::{DomainError, DomainResult, RecallId};
use procura_recalls::{ItemRecall, RecallFilter, RecallView};
use procura_warehouse::{lot_key, name_key};

use super::{PostgresStore, abort, commit, insert_audit, rows};
use crate::audit::AuditEntry;
use crate::error::{StoreError, map_sqlx_error};
use crate::store::RecallStore;

const RECALL_COLUMNS: &str = "r.id, r.stock_item_id, r.item_name, r.lot_number, r.quantity, r.reason, \
     r.recall_type, r.status, r.department_id, r.warehouse_id, r.initiated_by, r.escalated, \
     r.escalated_at, r.escalated_by, r.quarantine_active, r.quarantine_reason, \
     r.quarantine_started_at, r.notes, r.resolved_by, r.resolved_at, r.created_at, r.updated_at";

const VIEW_FROM: &str = "FROM item_recalls r \
     LEFT JOIN departments d ON d.id = r.department_id \
     LEFT JOIN warehouses w ON w.id = r.warehouse_id";

fn recall_view(row: &PgRow) -> Result<RecallView, StoreError> {
    Ok(RecallView {
        recall: rows::recall(row)?,
        department_name: row
            .try_get("department_name")
            .map_err(|e| StoreError::Corrupt(format!("column department_name: {e}")))?,
        warehouse_name: row
            .try_get("warehouse_name")
            .map_err(|e| StoreError::Corrupt(format!("column warehouse_name: {e}")))?,
    })
}

async fn write_recall(tx: &mut Transaction<'_, Postgres>, recall: &ItemRecall) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO item_recalls
            (id, stock_item_id, item_name, lot_number, quantity, reason, recall_type, status,
             department_id, warehouse_id, initiated_by, escalated, escalated_at, escalated_by,
             quarantine_active, quarantine_reason, quarantine_started_at, notes, resolved_by,
             resolved_at, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
                $19, $20, $21, $22)
        ON CONFLICT (id) DO UPDATE SET
            status = EXCLUDED.status,
            escalated = EXCLUDED.escalated,
            escalated_at = EXCLUDED.escalated_at,
            escalated_by = EXCLUDED.escalated_by,
            quarantine_active = EXCLUDED.quarantine_active,
            quarantine_reason = EXCLUDED.quarantine_reason,
            quarantine_started_at = EXCLUDED.quarantine_started_at,
            notes = EXCLUDED.notes,
            resolved_by = EXCLUDED.resolved_by,
            resolved_at = EXCLUDED.resolved_at,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(recall.id.as_uuid())
    .bind(recall.stock_item_id.map(|id| *id.as_uuid()))
    .bind(&recall.item_name)
    .bind(recall.lot_number.as_deref())
    .bind(recall.quantity)
    .bind(&recall.reason)
    .bind(recall.recall_type.as_str())
    .bind(recall.status.as_str())
    .bind(recall.department_id.map(|id| *id.as_uuid()))
    .bind(recall.warehouse_id.map(|id| *id.as_uuid()))
    .bind(recall.initiated_by.as_uuid())
    .bind(recall.escalated)
    .bind(recall.escalated_at)
    .bind(recall.escalated_by.map(|id| *id.as_uuid()))
    .bind(recall.quarantine_active)
    .bind(recall.quarantine_reason.as_deref())
    .bind(recall.quarantine_started_at)
    .bind(recall.notes.as_deref())
    .bind(recall.resolved_by.map(|id| *id.as_uuid()))
    .bind(recall.resolved_at)
    .bind(recall.created_at)
    .bind(recall.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("write_recall", e))?;
    Ok(())
}

#[async_trait]
impl RecallStore for PostgresStore {
    #[instrument(skip(self, recall, audit), fields(recall_id = %recall.id), err)]
    async fn insert_recall(&self, recall: &ItemRecall, audit: &AuditEntry) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        let exists = sqlx::query("SELECT 1 FROM item_recalls WHERE id = $1")
            .bind(recall.id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_recall", e))?;
        if exists.is_some() {
            return abort(tx, StoreError::Duplicate(format!("recall {}", recall.id))).await;
        }

        let written = async {
            write_recall(&mut tx, recall).await?;
            insert_audit(&mut tx, audit).await
        }
        .await;
        match written {
            Ok(()) => commit(tx).await,
            Err(err) => abort(tx, err).await,
        }
    }

    #[instrument(skip(self, f), err)]
    async fn update_recall<T, F>(&self, id: RecallId, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ItemRecall) -> DomainResult<(T, AuditEntry)> + Send + 'static,
    {
        let mut tx = self.begin().await?;
        let result = async {
            let row = sqlx::query(&format!(
                "SELECT {RECALL_COLUMNS} FROM item_recalls r WHERE r.id = $1 FOR UPDATE"
            ))
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_recall", e))?
            .ok_or_else(|| DomainError::not_found(format!("recall {id}")))?;
            let mut recall = rows::recall(&row)?;
            let (out, audit) = f(&mut recall)?;
            write_recall(&mut tx, &recall).await?;
            insert_audit(&mut tx, &audit).await?;
            Ok::<_, StoreError>(out)
        }
        .await;
        match result {
            Ok(out) => {
                commit(tx).await?;
                Ok(out)
            }
            Err(err) => abort(tx, err).await,
        }
    }

    async fn get_recall(&self, id: RecallId) -> Result<Option<RecallView>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RECALL_COLUMNS}, d.name AS department_name, w.name AS warehouse_name \
             {VIEW_FROM} WHERE r.id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_recall", e))?;
        row.as_ref().map(recall_view).transpose()
    }

    async fn list_recalls(&self, filter: &RecallFilter) -> Result<Vec<RecallView>, StoreError> {
        sqlx::query(&format!(
            "SELECT {RECALL_COLUMNS}, d.name AS department_name, w.name AS warehouse_name \
             {VIEW_FROM} \
             WHERE ($1::text IS NULL OR r.status = $1) \
               AND ($2::text IS NULL OR r.recall_type = $2) \
               AND ($3::uuid IS NULL OR r.department_id = $3) \
               AND (NOT $4 OR r.quarantine_active) \
             ORDER BY r.created_at DESC"
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.recall_type.map(|t| t.as_str()))
        .bind(filter.department_id.map(|id| *id.as_uuid()))
        .bind(filter.quarantined_only)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_recalls", e))?
        .iter()
        .map(recall_view)
        .collect()
    }

    async fn is_lot_quarantined(&self, item_name: &str, lot_number: &str) -> Result<bool, StoreError> {
        sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM item_recalls
                WHERE quarantine_active
                  AND LOWER(TRIM(item_name)) = $1
                  AND UPPER(TRIM(lot_number)) = $2
            ) AS quarantined
            "#,
        )
        .bind(name_key(item_name))
        .bind(lot_key(lot_number))
        .fetch_one(&*self.pool)
        .await
        .and_then(|r| r.try_get("quarantined"))
        .map_err(|e| map_sqlx_error("is_lot_quarantined", e))
    }
}
