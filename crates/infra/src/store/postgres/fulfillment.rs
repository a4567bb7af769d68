use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use procura_core::{DomainError, LineOutcome, RequestId, StockItemId};
use procura_requests::RequestStatus;
use procura_warehouse::{
    LedgerOutcome, LedgerWarning, MissingStockPolicy, MovementReference, SuppliedItem,
    SuppliedLine, SupplyReport, ensure_suppliable, is_fully_supplied, lot_key, name_key,
    plan_supply, supplied_totals,
};

use super::ledger::{apply_decrease, lock_stock_items};
use super::requests::{fetch_request, write_request};
use super::{PostgresStore, abort, commit, insert_audit, rows};
use crate::audit::{AuditEntry, actions};
use crate::error::{StoreError, map_sqlx_error};
use crate::store::{FulfillmentStore, StockChange, SupplyCommand};

const SUPPLIED_COLUMNS: &str = "id, request_id, line_item_id, quantity, supplied_by, lot_number, supplied_at";

async fn fetch_supplied(
    tx: &mut Transaction<'_, Postgres>,
    request_id: RequestId,
) -> Result<Vec<SuppliedItem>, StoreError> {
    sqlx::query(&format!(
        "SELECT {SUPPLIED_COLUMNS} FROM warehouse_supplied_items \
         WHERE request_id = $1 ORDER BY supplied_at ASC, id ASC"
    ))
    .bind(request_id.as_uuid())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("fetch_supplied", e))?
    .iter()
    .map(rows::supplied_item)
    .collect()
}

async fn insert_supplied(tx: &mut Transaction<'_, Postgres>, item: &SuppliedItem) -> Result<(), StoreError> {
    sqlx::query(&format!(
        "INSERT INTO warehouse_supplied_items ({SUPPLIED_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
    ))
    .bind(item.id.as_uuid())
    .bind(item.request_id.as_uuid())
    .bind(item.line_item_id.as_uuid())
    .bind(item.quantity)
    .bind(item.supplied_by.as_uuid())
    .bind(item.lot_number.as_deref())
    .bind(item.supplied_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_supplied", e))?;
    Ok(())
}

/// Catalog ids that exist, among `ids`.
async fn known_stock_items(
    tx: &mut Transaction<'_, Postgres>,
    ids: &[Uuid],
) -> Result<HashSet<StockItemId>, StoreError> {
    if ids.is_empty() {
        return Ok(HashSet::new());
    }
    sqlx::query("SELECT id FROM stock_items WHERE id = ANY($1)")
        .bind(ids)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("known_stock_items", e))?
        .iter()
        .map(|r| {
            r.try_get::<Uuid, _>("id")
                .map(StockItemId::from)
                .map_err(|e| map_sqlx_error("known_stock_items", e))
        })
        .collect()
}

async fn stock_item_ids_by_name(
    tx: &mut Transaction<'_, Postgres>,
    keys: &[String],
) -> Result<HashMap<String, StockItemId>, StoreError> {
    if keys.is_empty() {
        return Ok(HashMap::new());
    }
    sqlx::query("SELECT id, name_key FROM stock_items WHERE name_key = ANY($1)")
        .bind(keys)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("stock_item_ids_by_name", e))?
        .iter()
        .map(|r| {
            let id: Uuid = r.try_get("id").map_err(|e| map_sqlx_error("stock_item_ids_by_name", e))?;
            let key: String = r
                .try_get("name_key")
                .map_err(|e| map_sqlx_error("stock_item_ids_by_name", e))?;
            Ok((key, StockItemId::from(id)))
        })
        .collect()
}

/// Active lot quarantines as normalized (name, lot) pairs.
async fn quarantined_lots(tx: &mut Transaction<'_, Postgres>) -> Result<HashSet<(String, String)>, StoreError> {
    sqlx::query(
        r#"
        SELECT item_name, lot_number
        FROM item_recalls
        WHERE quarantine_active AND lot_number IS NOT NULL
        "#,
    )
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("quarantined_lots", e))?
    .iter()
    .map(|r| {
        let name: String = r.try_get("item_name").map_err(|e| map_sqlx_error("quarantined_lots", e))?;
        let lot: String = r.try_get("lot_number").map_err(|e| map_sqlx_error("quarantined_lots", e))?;
        Ok((name_key(&name), lot_key(&lot)))
    })
    .collect()
}

async fn name_of(
    tx: &mut Transaction<'_, Postgres>,
    table: &'static str,
    id: Uuid,
) -> Result<Option<String>, StoreError> {
    let row = sqlx::query(&format!("SELECT name FROM {table} WHERE id = $1"))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("name_of", e))?;
    row.map(|r| r.try_get("name").map_err(|e| map_sqlx_error("name_of", e)))
        .transpose()
}

async fn run_supply(
    tx: &mut Transaction<'_, Postgres>,
    command: SupplyCommand,
) -> Result<SupplyReport, StoreError> {
    let request_id = command.request_id;
    let mut request = fetch_request(tx, request_id, true)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("request {request_id}")))?;
    let warehouse_id = ensure_suppliable(&request, command.actor_warehouse)?;
    let department_id = request.header().department_id;

    let lines = request.warehouse_lines().to_vec();
    let mut records = fetch_supplied(tx, request_id).await?;
    let totals = supplied_totals(&records)?;

    let explicit: Vec<Uuid> = lines
        .iter()
        .filter_map(|l| l.stock_item_id.map(|id| *id.as_uuid()))
        .collect();
    let known = known_stock_items(tx, &explicit).await?;
    let keys: Vec<String> = lines
        .iter()
        .filter(|l| l.stock_item_id.is_none())
        .map(|l| name_key(&l.item_name))
        .collect();
    let by_name = stock_item_ids_by_name(tx, &keys).await?;
    let resolved: HashMap<_, _> = lines
        .iter()
        .filter(|l| l.stock_item_id.is_none())
        .filter_map(|l| by_name.get(&name_key(&l.item_name)).map(|id| (l.id, *id)))
        .collect();
    let quarantined = quarantined_lots(tx).await?;

    let planned = plan_supply(&lines, &totals, &resolved, &command.lines, |name, lot| {
        quarantined.contains(&(name_key(name), lot_key(lot)))
    })?;

    let matched: Vec<Option<StockItemId>> = planned
        .iter()
        .map(|plan| {
            plan.stock_item_id
                .filter(|id| known.contains(id) || resolved.get(&plan.line_item_id) == Some(id))
        })
        .collect();
    let touched: Vec<StockItemId> = matched.iter().flatten().copied().collect();
    lock_stock_items(tx, &touched).await?;

    // Decrement in item order so concurrent runs meet balance rows in the same order.
    let mut order: Vec<(StockItemId, usize)> = matched
        .iter()
        .enumerate()
        .filter_map(|(i, id)| id.map(|id| (id, i)))
        .collect();
    order.sort();
    let mut moved: Vec<Option<LedgerOutcome>> = planned.iter().map(|_| None).collect();
    for (stock_item_id, i) in order {
        let change = StockChange {
            warehouse_id,
            stock_item_id,
            quantity: planned[i].quantity.get(),
            actor: command.actor,
            reference: MovementReference::for_request(request_id, department_id),
        };
        moved[i] = Some(apply_decrease(tx, change, MissingStockPolicy::Skip).await?);
    }

    let now = Utc::now();
    let mut report_lines = Vec::with_capacity(planned.len());
    for (plan, outcome) in planned.iter().zip(moved) {
        let (outcome, balance_after) = match outcome {
            Some(LedgerOutcome::Moved { balance, .. }) => (LineOutcome::Applied, Some(balance)),
            Some(LedgerOutcome::Skipped { warning }) => (LineOutcome::skipped(warning), None),
            None => (
                LineOutcome::skipped(LedgerWarning::UnmatchedItem {
                    item_name: plan.item_name.clone(),
                }),
                None,
            ),
        };

        let record = plan.record(request_id, command.actor, now);
        insert_supplied(tx, &record).await?;
        records.push(record);
        report_lines.push(SuppliedLine {
            line_item_id: plan.line_item_id,
            item_name: plan.item_name.clone(),
            quantity: plan.quantity.get(),
            lot_number: plan.lot_number.clone(),
            outcome,
            balance_after,
        });
    }

    if is_fully_supplied(&lines, &supplied_totals(&records)?) {
        request.complete(now)?;
        write_request(tx, &request).await?;
    }
    let report = SupplyReport {
        request_id,
        warehouse_id,
        lines: report_lines,
        completed: request.status() == RequestStatus::Completed,
    };

    let warehouse_name = name_of(tx, "warehouses", *warehouse_id.as_uuid())
        .await?
        .unwrap_or_else(|| warehouse_id.to_string());
    let department_name = match department_id {
        Some(id) => name_of(tx, "departments", *id.as_uuid()).await?,
        None => None,
    };
    insert_audit(
        tx,
        &AuditEntry::new(
            command.actor,
            Some(request_id),
            actions::WAREHOUSE_SUPPLIED,
            report.audit_message(&warehouse_name, department_name.as_deref()),
            now,
        ),
    )
    .await?;

    Ok(report)
}

#[async_trait]
impl FulfillmentStore for PostgresStore {
    #[instrument(skip(self, command), fields(request_id = %command.request_id, lines = command.lines.len()), err)]
    async fn supply(&self, command: SupplyCommand) -> Result<SupplyReport, StoreError> {
        let mut tx = self.begin().await?;
        match run_supply(&mut tx, command).await {
            Ok(report) => {
                commit(tx).await?;
                Ok(report)
            }
            Err(err) => abort(tx, err).await,
        }
    }

    async fn supplied_items(&self, request_id: RequestId) -> Result<Vec<SuppliedItem>, StoreError> {
        let mut tx = self.begin().await?;
        match fetch_supplied(&mut tx, request_id).await {
            Ok(items) => {
                commit(tx).await?;
                Ok(items)
            }
            Err(err) => abort(tx, err).await,
        }
    }
}
