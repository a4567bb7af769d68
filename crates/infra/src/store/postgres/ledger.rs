use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgExecutor, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use procura_core::{DomainError, Quantity, StockItemId, WarehouseId};
use procura_warehouse::{
    LedgerOutcome, MissingStockPolicy, Reconciliation, StockLevel, StockMovement, missing_level,
    signed_sum,
};

use super::{PostgresStore, abort, commit, rows};
use crate::error::{StoreError, map_sqlx_error};
use crate::store::{StockChange, StockLedgerStore};

const LEVEL_COLUMNS: &str = "warehouse_id, stock_item_id, item_name, quantity, updated_by, updated_at";
const MOVEMENT_COLUMNS: &str = "id, warehouse_id, stock_item_id, direction, quantity, request_id, \
                                department_id, section, notes, actor, created_at";

/// Lock catalog rows in id order and return their names. Missing ids are left out.
///
/// Ledger writers take locks as catalog item, then balance row. A supply run
/// locks its request first and every item it will touch before any balance.
pub(super) async fn lock_stock_items(
    tx: &mut Transaction<'_, Postgres>,
    ids: &[StockItemId],
) -> Result<HashMap<StockItemId, String>, StoreError> {
    let mut ids: Vec<StockItemId> = ids.to_vec();
    ids.sort();
    ids.dedup();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
    sqlx::query("SELECT id, name FROM stock_items WHERE id = ANY($1) ORDER BY id FOR UPDATE")
        .bind(&uuids)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_stock_items", e))?
        .iter()
        .map(|r| {
            let id: Uuid = r.try_get("id").map_err(|e| map_sqlx_error("lock_stock_items", e))?;
            let name: String = r.try_get("name").map_err(|e| map_sqlx_error("lock_stock_items", e))?;
            Ok((StockItemId::from(id), name))
        })
        .collect()
}

async fn select_level<'c>(
    executor: impl PgExecutor<'c>,
    warehouse_id: WarehouseId,
    stock_item_id: StockItemId,
) -> Result<Option<StockLevel>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {LEVEL_COLUMNS} FROM warehouse_stock_levels \
         WHERE warehouse_id = $1 AND stock_item_id = $2"
    ))
    .bind(warehouse_id.as_uuid())
    .bind(stock_item_id.as_uuid())
    .fetch_optional(executor)
    .await
    .map_err(|e| map_sqlx_error("balance", e))?;
    row.as_ref().map(rows::stock_level).transpose()
}

async fn select_movements<'c>(
    executor: impl PgExecutor<'c>,
    warehouse_id: WarehouseId,
    stock_item_id: StockItemId,
) -> Result<Vec<StockMovement>, StoreError> {
    let rows = sqlx::query(&format!(
        "SELECT {MOVEMENT_COLUMNS} FROM warehouse_stock_movements \
         WHERE warehouse_id = $1 AND stock_item_id = $2 \
         ORDER BY created_at ASC, id ASC"
    ))
    .bind(warehouse_id.as_uuid())
    .bind(stock_item_id.as_uuid())
    .fetch_all(executor)
    .await
    .map_err(|e| map_sqlx_error("movements", e))?;
    rows.iter().map(rows::stock_movement).collect()
}

/// Balance and movement sum read from one snapshot.
async fn read_reconciliation(
    tx: &mut Transaction<'_, Postgres>,
    warehouse_id: WarehouseId,
    stock_item_id: StockItemId,
) -> Result<Reconciliation, StoreError> {
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("reconcile", e))?;
    let balance = select_level(&mut **tx, warehouse_id, stock_item_id)
        .await?
        .map(|l| l.quantity)
        .unwrap_or(0);
    let movements = select_movements(&mut **tx, warehouse_id, stock_item_id).await?;
    Ok(Reconciliation {
        warehouse_id,
        stock_item_id,
        balance,
        movement_sum: signed_sum(&movements),
    })
}

/// Lock the balance row, if it exists.
async fn lock_level(
    tx: &mut Transaction<'_, Postgres>,
    warehouse_id: WarehouseId,
    stock_item_id: StockItemId,
) -> Result<Option<StockLevel>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {LEVEL_COLUMNS} FROM warehouse_stock_levels \
         WHERE warehouse_id = $1 AND stock_item_id = $2 FOR UPDATE"
    ))
    .bind(warehouse_id.as_uuid())
    .bind(stock_item_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_level", e))?;
    row.as_ref().map(rows::stock_level).transpose()
}

async fn write_level(tx: &mut Transaction<'_, Postgres>, level: &StockLevel) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE warehouse_stock_levels
        SET quantity = $3, updated_by = $4, updated_at = $5
        WHERE warehouse_id = $1 AND stock_item_id = $2
        "#,
    )
    .bind(level.warehouse_id.as_uuid())
    .bind(level.stock_item_id.as_uuid())
    .bind(level.quantity)
    .bind(level.updated_by.as_uuid())
    .bind(level.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("write_level", e))?;
    Ok(())
}

async fn insert_movement(
    tx: &mut Transaction<'_, Postgres>,
    movement: &StockMovement,
) -> Result<(), StoreError> {
    sqlx::query(&format!(
        "INSERT INTO warehouse_stock_movements ({MOVEMENT_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
    ))
    .bind(movement.id.as_uuid())
    .bind(movement.warehouse_id.as_uuid())
    .bind(movement.stock_item_id.as_uuid())
    .bind(movement.direction.as_str())
    .bind(movement.quantity)
    .bind(movement.reference.request_id.map(|id| *id.as_uuid()))
    .bind(movement.reference.department_id.map(|id| *id.as_uuid()))
    .bind(movement.reference.section.as_deref())
    .bind(movement.reference.notes.as_deref())
    .bind(movement.actor.as_uuid())
    .bind(movement.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_movement", e))?;
    Ok(())
}

/// Resum the item's balances over all warehouses into the catalog row.
/// Callers hold the catalog row lock, so concurrent writers resum in turn.
async fn refresh_available(
    tx: &mut Transaction<'_, Postgres>,
    stock_item_id: StockItemId,
) -> Result<i64, StoreError> {
    let row = sqlx::query(
        r#"
        UPDATE stock_items
        SET available_quantity = (
            SELECT COALESCE(SUM(quantity), 0)::BIGINT
            FROM warehouse_stock_levels
            WHERE stock_item_id = $1
        )
        WHERE id = $1
        RETURNING available_quantity
        "#,
    )
    .bind(stock_item_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("refresh_available", e))?;
    row.try_get("available_quantity")
        .map_err(|e| map_sqlx_error("refresh_available", e))
}

/// Increase inside an open transaction. Creates the balance row on first use.
pub(super) async fn apply_increase(
    tx: &mut Transaction<'_, Postgres>,
    change: StockChange,
) -> Result<LedgerOutcome, StoreError> {
    let quantity = Quantity::new(change.quantity)?;

    let item_name = lock_stock_items(tx, &[change.stock_item_id])
        .await?
        .remove(&change.stock_item_id)
        .ok_or_else(|| DomainError::not_found(format!("stock item {}", change.stock_item_id)))?;

    let warehouse_exists: bool = sqlx::query("SELECT EXISTS (SELECT 1 FROM warehouses WHERE id = $1) AS found")
        .bind(change.warehouse_id.as_uuid())
        .fetch_one(&mut **tx)
        .await
        .and_then(|r| r.try_get("found"))
        .map_err(|e| map_sqlx_error("increase", e))?;
    if !warehouse_exists {
        return Err(DomainError::not_found(format!("warehouse {}", change.warehouse_id)).into());
    }

    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO warehouse_stock_levels
            (warehouse_id, stock_item_id, item_name, quantity, updated_by, updated_at)
        VALUES ($1, $2, $3, 0, $4, $5)
        ON CONFLICT (warehouse_id, stock_item_id) DO NOTHING
        "#,
    )
    .bind(change.warehouse_id.as_uuid())
    .bind(change.stock_item_id.as_uuid())
    .bind(&item_name)
    .bind(change.actor.as_uuid())
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("open_level", e))?;

    let mut level = lock_level(tx, change.warehouse_id, change.stock_item_id)
        .await?
        .ok_or_else(|| StoreError::Storage("balance row vanished after insert".to_string()))?;

    let movement = level.increase(quantity, change.actor, change.reference, now)?;
    write_level(tx, &level).await?;
    insert_movement(tx, &movement).await?;
    let available_quantity = refresh_available(tx, change.stock_item_id).await?;

    Ok(LedgerOutcome::Moved {
        balance: level.quantity,
        available_quantity,
        movement,
    })
}

/// Decrease inside an open transaction.
pub(super) async fn apply_decrease(
    tx: &mut Transaction<'_, Postgres>,
    change: StockChange,
    policy: MissingStockPolicy,
) -> Result<LedgerOutcome, StoreError> {
    let quantity = Quantity::new(change.quantity)?;

    if lock_stock_items(tx, &[change.stock_item_id]).await?.is_empty() {
        let warning = missing_level(policy, change.warehouse_id, change.stock_item_id)?;
        return Ok(LedgerOutcome::Skipped { warning });
    }
    let Some(mut level) = lock_level(tx, change.warehouse_id, change.stock_item_id).await? else {
        let warning = missing_level(policy, change.warehouse_id, change.stock_item_id)?;
        return Ok(LedgerOutcome::Skipped { warning });
    };

    let movement = level.decrease(quantity, change.actor, change.reference, Utc::now())?;
    write_level(tx, &level).await?;
    insert_movement(tx, &movement).await?;
    let available_quantity = refresh_available(tx, change.stock_item_id).await?;

    Ok(LedgerOutcome::Moved {
        balance: level.quantity,
        available_quantity,
        movement,
    })
}

#[async_trait]
impl StockLedgerStore for PostgresStore {
    #[instrument(
        skip(self, change),
        fields(
            warehouse_id = %change.warehouse_id,
            stock_item_id = %change.stock_item_id,
            quantity = change.quantity
        ),
        err
    )]
    async fn increase(&self, change: StockChange) -> Result<LedgerOutcome, StoreError> {
        let mut tx = self.begin().await?;
        match apply_increase(&mut tx, change).await {
            Ok(outcome) => {
                commit(tx).await?;
                Ok(outcome)
            }
            Err(err) => abort(tx, err).await,
        }
    }

    #[instrument(
        skip(self, change),
        fields(
            warehouse_id = %change.warehouse_id,
            stock_item_id = %change.stock_item_id,
            quantity = change.quantity,
            policy = ?policy
        ),
        err
    )]
    async fn decrease(
        &self,
        change: StockChange,
        policy: MissingStockPolicy,
    ) -> Result<LedgerOutcome, StoreError> {
        let mut tx = self.begin().await?;
        match apply_decrease(&mut tx, change, policy).await {
            Ok(outcome) => {
                commit(tx).await?;
                Ok(outcome)
            }
            Err(err) => abort(tx, err).await,
        }
    }

    async fn balance(
        &self,
        warehouse_id: WarehouseId,
        stock_item_id: StockItemId,
    ) -> Result<Option<StockLevel>, StoreError> {
        select_level(&*self.pool, warehouse_id, stock_item_id).await
    }

    async fn warehouse_balances(&self, warehouse_id: WarehouseId) -> Result<Vec<StockLevel>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {LEVEL_COLUMNS} FROM warehouse_stock_levels \
             WHERE warehouse_id = $1 ORDER BY item_name ASC"
        ))
        .bind(warehouse_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("warehouse_balances", e))?;
        rows.iter().map(rows::stock_level).collect()
    }

    async fn movements(
        &self,
        warehouse_id: WarehouseId,
        stock_item_id: StockItemId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        select_movements(&*self.pool, warehouse_id, stock_item_id).await
    }

    async fn available_quantity(&self, stock_item_id: StockItemId) -> Result<i64, StoreError> {
        sqlx::query(
            r#"
            SELECT COALESCE(SUM(quantity), 0)::BIGINT AS total
            FROM warehouse_stock_levels
            WHERE stock_item_id = $1
            "#,
        )
        .bind(stock_item_id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .and_then(|r| r.try_get("total"))
        .map_err(|e| map_sqlx_error("available_quantity", e))
    }

    async fn reconcile(
        &self,
        warehouse_id: WarehouseId,
        stock_item_id: StockItemId,
    ) -> Result<Reconciliation, StoreError> {
        let mut tx = self.begin().await?;
        match read_reconciliation(&mut tx, warehouse_id, stock_item_id).await {
            Ok(reconciliation) => {
                commit(tx).await?;
                Ok(reconciliation)
            }
            Err(err) => abort(tx, err).await,
        }
    }
}
