//! Store traits and their backends.
//!
//! Every mutating method is one unit of work: it locks the contended row(s),
//! runs the pure domain transition and persists the result together with its
//! audit entry, or changes nothing at all.

mod in_memory;
mod postgres;

use async_trait::async_trait;

use procura_core::{
    DepartmentId, DomainResult, RecallId, RequestId, StockItemId, UserId, WarehouseId,
};
use procura_recalls::{ItemRecall, RecallFilter, RecallView};
use procura_requests::{Request, RequestStatus, RequestSummary};
use procura_warehouse::{
    Department, LedgerOutcome, MissingStockPolicy, MovementReference, Reconciliation, StockItem,
    StockLevel, StockMovement, SuppliedItem, SupplyLine, SupplyReport, Warehouse,
};

use crate::audit::AuditEntry;
use crate::error::StoreError;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

/// One ledger mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockChange {
    pub warehouse_id: WarehouseId,
    pub stock_item_id: StockItemId,
    pub quantity: i64,
    pub actor: UserId,
    pub reference: MovementReference,
}

/// A supply run against a warehouse-supply request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplyCommand {
    pub request_id: RequestId,
    pub actor: UserId,
    /// Warehouse the actor is assigned to.
    pub actor_warehouse: Option<WarehouseId>,
    pub lines: Vec<SupplyLine>,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Fails with a `Duplicate` conflict when the name exists (case-insensitively).
    async fn register_stock_item(&self, name: &str) -> Result<StockItem, StoreError>;
    async fn register_warehouse(&self, name: &str) -> Result<Warehouse, StoreError>;
    async fn register_department(&self, name: &str) -> Result<Department, StoreError>;

    async fn stock_item(&self, id: StockItemId) -> Result<Option<StockItem>, StoreError>;
    async fn find_stock_item(&self, name: &str) -> Result<Option<StockItem>, StoreError>;
    async fn warehouse(&self, id: WarehouseId) -> Result<Option<Warehouse>, StoreError>;
    async fn department(&self, id: DepartmentId) -> Result<Option<Department>, StoreError>;
}

#[async_trait]
pub trait StockLedgerStore: Send + Sync {
    /// Creates the balance row on first use.
    async fn increase(&self, change: StockChange) -> Result<LedgerOutcome, StoreError>;

    async fn decrease(
        &self,
        change: StockChange,
        policy: MissingStockPolicy,
    ) -> Result<LedgerOutcome, StoreError>;

    async fn balance(
        &self,
        warehouse_id: WarehouseId,
        stock_item_id: StockItemId,
    ) -> Result<Option<StockLevel>, StoreError>;

    async fn warehouse_balances(&self, warehouse_id: WarehouseId) -> Result<Vec<StockLevel>, StoreError>;

    async fn movements(
        &self,
        warehouse_id: WarehouseId,
        stock_item_id: StockItemId,
    ) -> Result<Vec<StockMovement>, StoreError>;

    async fn available_quantity(&self, stock_item_id: StockItemId) -> Result<i64, StoreError>;

    async fn reconcile(
        &self,
        warehouse_id: WarehouseId,
        stock_item_id: StockItemId,
    ) -> Result<Reconciliation, StoreError>;
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Insert a request with its items and approval chain.
    async fn insert_request(&self, request: &Request, audit: &AuditEntry) -> Result<(), StoreError>;

    async fn load_request(&self, id: RequestId) -> Result<Option<Request>, StoreError>;

    /// Lock the request, apply `f` and persist the result with the returned audit entry.
    async fn update_request<T, F>(&self, id: RequestId, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Request) -> DomainResult<(T, AuditEntry)> + Send + 'static;

    async fn request_summaries(
        &self,
        status: Option<RequestStatus>,
    ) -> Result<Vec<RequestSummary>, StoreError>;
}

#[async_trait]
pub trait FulfillmentStore: Send + Sync {
    /// Validate and record a supply run, decrementing stock, in one transaction.
    async fn supply(&self, command: SupplyCommand) -> Result<SupplyReport, StoreError>;

    async fn supplied_items(&self, request_id: RequestId) -> Result<Vec<SuppliedItem>, StoreError>;
}

#[async_trait]
pub trait RecallStore: Send + Sync {
    async fn insert_recall(&self, recall: &ItemRecall, audit: &AuditEntry) -> Result<(), StoreError>;

    /// Lock the recall, apply `f` and persist the result with the returned audit entry.
    async fn update_recall<T, F>(&self, id: RecallId, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ItemRecall) -> DomainResult<(T, AuditEntry)> + Send + 'static;

    async fn get_recall(&self, id: RecallId) -> Result<Option<RecallView>, StoreError>;

    async fn list_recalls(&self, filter: &RecallFilter) -> Result<Vec<RecallView>, StoreError>;

    async fn is_lot_quarantined(&self, item_name: &str, lot_number: &str) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Entries oldest first; all entries when `request_id` is `None`.
    async fn audit_log(&self, request_id: Option<RequestId>) -> Result<Vec<AuditEntry>, StoreError>;
}

/// Everything the services need from a backend.
pub trait ProcuraStore:
    CatalogStore + StockLedgerStore + RequestStore + FulfillmentStore + RecallStore + AuditStore
{
}

impl<S> ProcuraStore for S where
    S: CatalogStore + StockLedgerStore + RequestStore + FulfillmentStore + RecallStore + AuditStore
{
}
