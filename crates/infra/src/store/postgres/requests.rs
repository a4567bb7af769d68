use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use tracing::instrument;
use uuid::Uuid;

use procura_core::{DomainError, DomainResult, RequestId};
use procura_requests::{
    Approval, Request, RequestHeader, RequestStatus, RequestSummary, RequestedItem, WarehouseLine,
};

use super::{PostgresStore, abort, commit, insert_audit, rows};
use crate::audit::AuditEntry;
use crate::error::{StoreError, map_sqlx_error};
use crate::store::RequestStore;

const HEADER_COLUMNS: &str = "id, request_type, status, title, urgent, requester_id, assigned_to, \
                              department_id, warehouse_id, estimated_cost, created_at, updated_at";
const APPROVAL_COLUMNS: &str = "id, request_id, approver_id, level, status, active, urgent, comments, \
                                decided_by, decided_at";
const ITEM_COLUMNS: &str = "id, name, brand, quantity, purchased_quantity, unit_cost, total_cost, \
                            status, comments, decided_by, decided_at, received";
const LINE_COLUMNS: &str = "id, item_name, stock_item_id, quantity";

/// Load a full request, locking the header row when `lock` is set.
pub(super) async fn fetch_request(
    tx: &mut Transaction<'_, Postgres>,
    id: RequestId,
    lock: bool,
) -> Result<Option<Request>, StoreError> {
    let suffix = if lock { " FOR UPDATE" } else { "" };
    let Some(row) = sqlx::query(&format!(
        "SELECT {HEADER_COLUMNS} FROM requests WHERE id = $1{suffix}"
    ))
    .bind(id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("fetch_request", e))?
    else {
        return Ok(None);
    };
    let header = rows::request_header(&row)?;

    let approvals = sqlx::query(&format!(
        "SELECT {APPROVAL_COLUMNS} FROM request_approvals WHERE request_id = $1 ORDER BY level ASC"
    ))
    .bind(id.as_uuid())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("fetch_approvals", e))?
    .iter()
    .map(rows::approval)
    .collect::<Result<Vec<_>, _>>()?;

    let items = sqlx::query(&format!(
        "SELECT {ITEM_COLUMNS} FROM requested_items WHERE request_id = $1 ORDER BY position ASC"
    ))
    .bind(id.as_uuid())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("fetch_items", e))?
    .iter()
    .map(rows::requested_item)
    .collect::<Result<Vec<_>, _>>()?;

    let lines = sqlx::query(&format!(
        "SELECT {LINE_COLUMNS} FROM warehouse_request_items WHERE request_id = $1 ORDER BY position ASC"
    ))
    .bind(id.as_uuid())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("fetch_lines", e))?
    .iter()
    .map(rows::warehouse_line)
    .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(Request::from_parts(header, approvals, items, lines)?))
}

async fn write_header(tx: &mut Transaction<'_, Postgres>, header: &RequestHeader) -> Result<(), StoreError> {
    sqlx::query(&format!(
        r#"
        INSERT INTO requests ({HEADER_COLUMNS})
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (id) DO UPDATE SET
            status = EXCLUDED.status,
            title = EXCLUDED.title,
            urgent = EXCLUDED.urgent,
            assigned_to = EXCLUDED.assigned_to,
            estimated_cost = EXCLUDED.estimated_cost,
            updated_at = EXCLUDED.updated_at
        "#
    ))
    .bind(header.id.as_uuid())
    .bind(header.request_type.as_str())
    .bind(header.status.as_str())
    .bind(&header.title)
    .bind(header.urgent)
    .bind(header.requester_id.as_uuid())
    .bind(header.assigned_to.map(|id| *id.as_uuid()))
    .bind(header.department_id.map(|id| *id.as_uuid()))
    .bind(header.warehouse_id.map(|id| *id.as_uuid()))
    .bind(header.estimated_cost)
    .bind(header.created_at)
    .bind(header.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("write_request_header", e))?;
    Ok(())
}

async fn write_approval(tx: &mut Transaction<'_, Postgres>, approval: &Approval) -> Result<(), StoreError> {
    let level = i32::try_from(approval.level)
        .map_err(|_| DomainError::invariant(format!("approval level {} out of range", approval.level)))?;
    sqlx::query(&format!(
        r#"
        INSERT INTO request_approvals ({APPROVAL_COLUMNS})
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (id) DO UPDATE SET
            status = EXCLUDED.status,
            active = EXCLUDED.active,
            urgent = EXCLUDED.urgent,
            comments = EXCLUDED.comments,
            decided_by = EXCLUDED.decided_by,
            decided_at = EXCLUDED.decided_at
        "#
    ))
    .bind(approval.id.as_uuid())
    .bind(approval.request_id.as_uuid())
    .bind(approval.approver_id.as_uuid())
    .bind(level)
    .bind(approval.status.as_str())
    .bind(approval.active)
    .bind(approval.urgent)
    .bind(approval.comments.as_deref())
    .bind(approval.decided_by.map(|id| *id.as_uuid()))
    .bind(approval.decided_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("write_approval", e))?;
    Ok(())
}

async fn write_item(
    tx: &mut Transaction<'_, Postgres>,
    request_id: RequestId,
    position: i32,
    item: &RequestedItem,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO requested_items
            (id, request_id, position, name, brand, quantity, purchased_quantity, unit_cost,
             total_cost, status, comments, decided_by, decided_at, received)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (id) DO UPDATE SET
            quantity = EXCLUDED.quantity,
            purchased_quantity = EXCLUDED.purchased_quantity,
            total_cost = EXCLUDED.total_cost,
            status = EXCLUDED.status,
            comments = EXCLUDED.comments,
            decided_by = EXCLUDED.decided_by,
            decided_at = EXCLUDED.decided_at,
            received = EXCLUDED.received
        "#,
    )
    .bind(item.id.as_uuid())
    .bind(request_id.as_uuid())
    .bind(position)
    .bind(&item.name)
    .bind(item.brand.as_deref())
    .bind(item.quantity)
    .bind(item.purchased_quantity)
    .bind(item.unit_cost)
    .bind(item.total_cost)
    .bind(item.status.as_str())
    .bind(item.comments.as_deref())
    .bind(item.decided_by.map(|id| *id.as_uuid()))
    .bind(item.decided_at)
    .bind(item.received)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("write_item", e))?;
    Ok(())
}

async fn write_line(
    tx: &mut Transaction<'_, Postgres>,
    request_id: RequestId,
    position: i32,
    line: &WarehouseLine,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO warehouse_request_items (id, request_id, position, item_name, stock_item_id, quantity)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(line.id.as_uuid())
    .bind(request_id.as_uuid())
    .bind(position)
    .bind(&line.item_name)
    .bind(line.stock_item_id.map(|id| *id.as_uuid()))
    .bind(line.quantity)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("write_line", e))?;
    Ok(())
}

/// Persist the whole aggregate. Deactivated steps are written before the
/// newly active one so the one-active-step index never sees two.
pub(super) async fn write_request(
    tx: &mut Transaction<'_, Postgres>,
    request: &Request,
) -> Result<(), StoreError> {
    let request_id = request.request_id();
    write_header(tx, request.header()).await?;

    let mut approvals: Vec<&Approval> = request.approvals().iter().collect();
    approvals.sort_by_key(|a| a.active);
    for approval in approvals {
        write_approval(tx, approval).await?;
    }
    for (position, item) in (0..).zip(request.items()) {
        write_item(tx, request_id, position, item).await?;
    }
    for (position, line) in (0..).zip(request.warehouse_lines()) {
        write_line(tx, request_id, position, line).await?;
    }
    Ok(())
}

#[async_trait]
impl RequestStore for PostgresStore {
    #[instrument(skip(self, request, audit), fields(request_id = %request.request_id()), err)]
    async fn insert_request(&self, request: &Request, audit: &AuditEntry) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        let exists = sqlx::query("SELECT 1 FROM requests WHERE id = $1")
            .bind(request.request_id().as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_request", e))?;
        if exists.is_some() {
            return abort(tx, StoreError::Duplicate(format!("request {}", request.request_id()))).await;
        }

        let written = async {
            write_request(&mut tx, request).await?;
            insert_audit(&mut tx, audit).await
        }
        .await;
        match written {
            Ok(()) => commit(tx).await,
            Err(err) => abort(tx, err).await,
        }
    }

    async fn load_request(&self, id: RequestId) -> Result<Option<Request>, StoreError> {
        let mut tx = self.begin().await?;
        let request = fetch_request(&mut tx, id, false).await;
        match request {
            Ok(request) => {
                commit(tx).await?;
                Ok(request)
            }
            Err(err) => abort(tx, err).await,
        }
    }

    #[instrument(skip(self, f), err)]
    async fn update_request<T, F>(&self, id: RequestId, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Request) -> DomainResult<(T, AuditEntry)> + Send + 'static,
    {
        let mut tx = self.begin().await?;
        let result = async {
            let mut request = fetch_request(&mut tx, id, true)
                .await?
                .ok_or_else(|| DomainError::not_found(format!("request {id}")))?;
            let (out, audit) = f(&mut request)?;
            write_request(&mut tx, &request).await?;
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

    async fn request_summaries(
        &self,
        status: Option<RequestStatus>,
    ) -> Result<Vec<RequestSummary>, StoreError> {
        let headers = sqlx::query(&format!(
            "SELECT {HEADER_COLUMNS} FROM requests \
             WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY created_at DESC"
        ))
        .bind(status.map(RequestStatus::as_str))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("request_summaries", e))?
        .iter()
        .map(rows::request_header)
        .collect::<Result<Vec<_>, _>>()?;
        if headers.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = headers.iter().map(|h| *h.id.as_uuid()).collect();

        let mut approvals: HashMap<RequestId, Vec<Approval>> = HashMap::new();
        let approval_rows = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM request_approvals WHERE request_id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("request_summaries", e))?;
        for row in &approval_rows {
            let approval = rows::approval(row)?;
            approvals.entry(approval.request_id).or_default().push(approval);
        }

        let mut items: HashMap<RequestId, Vec<RequestedItem>> = HashMap::new();
        let item_rows = sqlx::query(&format!(
            "SELECT request_id, {ITEM_COLUMNS} FROM requested_items \
             WHERE request_id = ANY($1) ORDER BY position ASC"
        ))
        .bind(&ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("request_summaries", e))?;
        for row in &item_rows {
            let request_id = RequestId::from(
                sqlx::Row::try_get::<Uuid, _>(row, "request_id")
                    .map_err(|e| StoreError::Corrupt(format!("column request_id: {e}")))?,
            );
            items.entry(request_id).or_default().push(rows::requested_item(row)?);
        }

        headers
            .into_iter()
            .map(|header| {
                let id = header.id;
                let request = Request::from_parts(
                    header,
                    approvals.remove(&id).unwrap_or_default(),
                    items.remove(&id).unwrap_or_default(),
                    Vec::new(),
                )?;
                Ok(request.summary()?)
            })
            .collect()
    }
}
