//! Row → domain mapping.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row};
use uuid::Uuid;

use procura_core::{
    ApprovalId, AuditEntryId, DepartmentId, LineItemId, MovementId, RecallId, RequestId,
    StockItemId, SuppliedItemId, UserId, WarehouseId,
};
use procura_recalls::ItemRecall;
use procura_requests::{Approval, RequestHeader, RequestedItem, WarehouseLine};
use procura_warehouse::{
    Direction, MovementReference, StockItem, StockLevel, StockMovement, SuppliedItem,
};

use crate::audit::AuditEntry;
use crate::error::StoreError;

fn col<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Corrupt(format!("column {name}: {e}")))
}

fn parsed<T>(row: &PgRow, name: &str) -> Result<T, StoreError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    let raw: String = col(row, name)?;
    raw.parse()
        .map_err(|e| StoreError::Corrupt(format!("column {name}: {e}")))
}

fn id<I: From<Uuid>>(row: &PgRow, name: &str) -> Result<I, StoreError> {
    Ok(I::from(col::<Uuid>(row, name)?))
}

fn opt_id<I: From<Uuid>>(row: &PgRow, name: &str) -> Result<Option<I>, StoreError> {
    Ok(col::<Option<Uuid>>(row, name)?.map(I::from))
}

fn level(row: &PgRow, name: &str) -> Result<u32, StoreError> {
    let raw: i32 = col(row, name)?;
    u32::try_from(raw).map_err(|_| StoreError::Corrupt(format!("column {name}: negative level {raw}")))
}

pub(super) fn stock_item(row: &PgRow) -> Result<StockItem, StoreError> {
    Ok(StockItem {
        id: id::<StockItemId>(row, "id")?,
        name: col(row, "name")?,
        available_quantity: col(row, "available_quantity")?,
    })
}

pub(super) fn stock_level(row: &PgRow) -> Result<StockLevel, StoreError> {
    Ok(StockLevel {
        warehouse_id: id::<WarehouseId>(row, "warehouse_id")?,
        stock_item_id: id::<StockItemId>(row, "stock_item_id")?,
        item_name: col(row, "item_name")?,
        quantity: col(row, "quantity")?,
        updated_by: id::<UserId>(row, "updated_by")?,
        updated_at: col(row, "updated_at")?,
    })
}

pub(super) fn stock_movement(row: &PgRow) -> Result<StockMovement, StoreError> {
    let direction: String = col(row, "direction")?;
    Ok(StockMovement {
        id: id::<MovementId>(row, "id")?,
        warehouse_id: id::<WarehouseId>(row, "warehouse_id")?,
        stock_item_id: id::<StockItemId>(row, "stock_item_id")?,
        direction: Direction::parse(&direction)
            .map_err(|e| StoreError::Corrupt(format!("column direction: {e}")))?,
        quantity: col(row, "quantity")?,
        reference: MovementReference {
            request_id: opt_id::<RequestId>(row, "request_id")?,
            department_id: opt_id::<DepartmentId>(row, "department_id")?,
            section: col(row, "section")?,
            notes: col(row, "notes")?,
        },
        actor: id::<UserId>(row, "actor")?,
        created_at: col(row, "created_at")?,
    })
}

pub(super) fn request_header(row: &PgRow) -> Result<RequestHeader, StoreError> {
    Ok(RequestHeader {
        id: id::<RequestId>(row, "id")?,
        request_type: parsed(row, "request_type")?,
        status: parsed(row, "status")?,
        title: col(row, "title")?,
        urgent: col(row, "urgent")?,
        requester_id: id::<UserId>(row, "requester_id")?,
        assigned_to: opt_id::<UserId>(row, "assigned_to")?,
        department_id: opt_id::<DepartmentId>(row, "department_id")?,
        warehouse_id: opt_id::<WarehouseId>(row, "warehouse_id")?,
        estimated_cost: col(row, "estimated_cost")?,
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

pub(super) fn approval(row: &PgRow) -> Result<Approval, StoreError> {
    Ok(Approval {
        id: id::<ApprovalId>(row, "id")?,
        request_id: id::<RequestId>(row, "request_id")?,
        approver_id: id::<UserId>(row, "approver_id")?,
        level: level(row, "level")?,
        status: parsed(row, "status")?,
        active: col(row, "active")?,
        urgent: col(row, "urgent")?,
        comments: col(row, "comments")?,
        decided_by: opt_id::<UserId>(row, "decided_by")?,
        decided_at: col::<Option<DateTime<Utc>>>(row, "decided_at")?,
    })
}

pub(super) fn requested_item(row: &PgRow) -> Result<RequestedItem, StoreError> {
    Ok(RequestedItem {
        id: id::<LineItemId>(row, "id")?,
        name: col(row, "name")?,
        brand: col(row, "brand")?,
        quantity: col(row, "quantity")?,
        purchased_quantity: col(row, "purchased_quantity")?,
        unit_cost: col(row, "unit_cost")?,
        total_cost: col(row, "total_cost")?,
        status: parsed(row, "status")?,
        comments: col(row, "comments")?,
        decided_by: opt_id::<UserId>(row, "decided_by")?,
        decided_at: col(row, "decided_at")?,
        received: col(row, "received")?,
    })
}

pub(super) fn warehouse_line(row: &PgRow) -> Result<WarehouseLine, StoreError> {
    Ok(WarehouseLine {
        id: id::<LineItemId>(row, "id")?,
        item_name: col(row, "item_name")?,
        stock_item_id: opt_id::<StockItemId>(row, "stock_item_id")?,
        quantity: col(row, "quantity")?,
    })
}

pub(super) fn supplied_item(row: &PgRow) -> Result<SuppliedItem, StoreError> {
    Ok(SuppliedItem {
        id: id::<SuppliedItemId>(row, "id")?,
        request_id: id::<RequestId>(row, "request_id")?,
        line_item_id: id::<LineItemId>(row, "line_item_id")?,
        quantity: col(row, "quantity")?,
        supplied_by: id::<UserId>(row, "supplied_by")?,
        lot_number: col(row, "lot_number")?,
        supplied_at: col(row, "supplied_at")?,
    })
}

pub(super) fn recall(row: &PgRow) -> Result<ItemRecall, StoreError> {
    Ok(ItemRecall {
        id: id::<RecallId>(row, "id")?,
        stock_item_id: opt_id::<StockItemId>(row, "stock_item_id")?,
        item_name: col(row, "item_name")?,
        lot_number: col(row, "lot_number")?,
        quantity: col(row, "quantity")?,
        reason: col(row, "reason")?,
        recall_type: parsed(row, "recall_type")?,
        status: parsed(row, "status")?,
        department_id: opt_id::<DepartmentId>(row, "department_id")?,
        warehouse_id: opt_id::<WarehouseId>(row, "warehouse_id")?,
        initiated_by: id::<UserId>(row, "initiated_by")?,
        escalated: col(row, "escalated")?,
        escalated_at: col(row, "escalated_at")?,
        escalated_by: opt_id::<UserId>(row, "escalated_by")?,
        quarantine_active: col(row, "quarantine_active")?,
        quarantine_reason: col(row, "quarantine_reason")?,
        quarantine_started_at: col(row, "quarantine_started_at")?,
        notes: col(row, "notes")?,
        resolved_by: opt_id::<UserId>(row, "resolved_by")?,
        resolved_at: col(row, "resolved_at")?,
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

pub(super) fn audit_entry(row: &PgRow) -> Result<AuditEntry, StoreError> {
    Ok(AuditEntry {
        id: id::<AuditEntryId>(row, "id")?,
        actor: id::<UserId>(row, "actor")?,
        request_id: opt_id::<RequestId>(row, "request_id")?,
        action: col(row, "action")?,
        message: col(row, "message")?,
        created_at: col(row, "created_at")?,
    })
}
