//! In-memory backend for tests and development.
//!
//! All state sits behind one mutex. Writers run every fallible step before
//! touching shared state: aggregates are updated on a private copy and ledger
//! changes are staged in a draft, then everything is written at once. A failed
//! or panicking call leaves nothing behind. The guard is never held across an
//! `.await`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use procura_core::{
    DepartmentId, DomainError, DomainResult, LineOutcome, RecallId, RequestId, StockItemId,
    WarehouseId,
};
use procura_recalls::{ItemRecall, RecallFilter, RecallView};
use procura_requests::{Request, RequestStatus, RequestSummary};
use procura_warehouse::{
    Department, LedgerChanges, LedgerOutcome, LedgerWarning, MissingStockPolicy, MovementReference,
    Reconciliation, StockBook, StockItem, StockLevel, StockMovement, SuppliedItem, SuppliedLine,
    SupplyReport, Warehouse, ensure_suppliable, is_fully_supplied, name_key, plan_supply,
    supplied_totals,
};

use super::{
    AuditStore, CatalogStore, FulfillmentStore, RecallStore, RequestStore, StockChange,
    StockLedgerStore, SupplyCommand,
};
use crate::audit::{AuditEntry, actions};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct State {
    stock_items: BTreeMap<StockItemId, StockItem>,
    warehouses: BTreeMap<WarehouseId, Warehouse>,
    departments: BTreeMap<DepartmentId, Department>,
    book: StockBook,
    requests: BTreeMap<RequestId, Request>,
    supplied: Vec<SuppliedItem>,
    recalls: BTreeMap<RecallId, ItemRecall>,
    audit: Vec<AuditEntry>,
}

impl State {
    fn find_stock_item(&self, name: &str) -> Option<&StockItem> {
        let key = name_key(name);
        self.stock_items.values().find(|i| name_key(&i.name) == key)
    }

    fn increase(&mut self, change: StockChange) -> DomainResult<LedgerOutcome> {
        if !self.warehouses.contains_key(&change.warehouse_id) {
            return Err(DomainError::not_found(format!("warehouse {}", change.warehouse_id)));
        }
        let item_name = self
            .stock_items
            .get(&change.stock_item_id)
            .map(|i| i.name.clone())
            .ok_or_else(|| DomainError::not_found(format!("stock item {}", change.stock_item_id)))?;

        let outcome = self.book.increase(
            change.warehouse_id,
            change.stock_item_id,
            &item_name,
            change.quantity,
            change.actor,
            change.reference,
            Utc::now(),
        )?;
        self.sync_available(&outcome, change.stock_item_id);
        Ok(outcome)
    }

    fn decrease(&mut self, change: StockChange, policy: MissingStockPolicy) -> DomainResult<LedgerOutcome> {
        if !self.stock_items.contains_key(&change.stock_item_id) {
            return Err(DomainError::not_found(format!("stock item {}", change.stock_item_id)));
        }
        let outcome = self.book.decrease(
            change.warehouse_id,
            change.stock_item_id,
            change.quantity,
            change.actor,
            change.reference,
            policy,
            Utc::now(),
        )?;
        self.sync_available(&outcome, change.stock_item_id);
        Ok(outcome)
    }

    fn apply_ledger(&mut self, changes: LedgerChanges) {
        let touched: Vec<StockItemId> = changes.stock_item_ids().collect();
        self.book.apply(changes);
        for id in touched {
            if let Some(item) = self.stock_items.get_mut(&id) {
                item.available_quantity = self.book.available_quantity(id);
            }
        }
    }

    fn sync_available(&mut self, outcome: &LedgerOutcome, stock_item_id: StockItemId) {
        if let LedgerOutcome::Moved {
            available_quantity, ..
        } = outcome
        {
            if let Some(item) = self.stock_items.get_mut(&stock_item_id) {
                item.available_quantity = *available_quantity;
            }
        }
    }

    fn recall_view(&self, recall: &ItemRecall) -> RecallView {
        RecallView {
            recall: recall.clone(),
            department_name: recall
                .department_id
                .and_then(|id| self.departments.get(&id))
                .map(|d| d.name.clone()),
            warehouse_name: recall
                .warehouse_id
                .and_then(|id| self.warehouses.get(&id))
                .map(|w| w.name.clone()),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Writers only mutate once nothing can fail, so state behind a poisoned
    /// lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write<T>(&self, f: impl FnOnce(&mut State) -> Result<T, StoreError>) -> Result<T, StoreError> {
        f(&mut self.lock())
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> T {
        f(&self.lock())
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn register_stock_item(&self, name: &str) -> Result<StockItem, StoreError> {
        let item = StockItem::new(StockItemId::new(), name)?;
        self.write(|state| {
            if state.find_stock_item(&item.name).is_some() {
                return Err(DomainError::from(procura_core::Conflict::Duplicate(format!(
                    "stock item '{}'",
                    item.name
                )))
                .into());
            }
            state.stock_items.insert(item.id, item.clone());
            Ok(item)
        })
    }

    async fn register_warehouse(&self, name: &str) -> Result<Warehouse, StoreError> {
        let warehouse = Warehouse::new(WarehouseId::new(), name)?;
        self.write(|state| {
            state.warehouses.insert(warehouse.id, warehouse.clone());
            Ok(warehouse)
        })
    }

    async fn register_department(&self, name: &str) -> Result<Department, StoreError> {
        let department = Department::new(DepartmentId::new(), name)?;
        self.write(|state| {
            state.departments.insert(department.id, department.clone());
            Ok(department)
        })
    }

    async fn stock_item(&self, id: StockItemId) -> Result<Option<StockItem>, StoreError> {
        Ok(self.read(|state| state.stock_items.get(&id).cloned()))
    }

    async fn find_stock_item(&self, name: &str) -> Result<Option<StockItem>, StoreError> {
        Ok(self.read(|state| state.find_stock_item(name).cloned()))
    }

    async fn warehouse(&self, id: WarehouseId) -> Result<Option<Warehouse>, StoreError> {
        Ok(self.read(|state| state.warehouses.get(&id).cloned()))
    }

    async fn department(&self, id: DepartmentId) -> Result<Option<Department>, StoreError> {
        Ok(self.read(|state| state.departments.get(&id).cloned()))
    }
}

#[async_trait]
impl StockLedgerStore for InMemoryStore {
    async fn increase(&self, change: StockChange) -> Result<LedgerOutcome, StoreError> {
        self.write(|state| Ok(state.increase(change)?))
    }

    async fn decrease(
        &self,
        change: StockChange,
        policy: MissingStockPolicy,
    ) -> Result<LedgerOutcome, StoreError> {
        self.write(|state| Ok(state.decrease(change, policy)?))
    }

    async fn balance(
        &self,
        warehouse_id: WarehouseId,
        stock_item_id: StockItemId,
    ) -> Result<Option<StockLevel>, StoreError> {
        Ok(self.read(|state| state.book.level(warehouse_id, stock_item_id).cloned()))
    }

    async fn warehouse_balances(&self, warehouse_id: WarehouseId) -> Result<Vec<StockLevel>, StoreError> {
        Ok(self.read(|state| {
            let mut levels = state.book.warehouse_levels(warehouse_id);
            levels.sort_by(|a, b| a.item_name.cmp(&b.item_name));
            levels
        }))
    }

    async fn movements(
        &self,
        warehouse_id: WarehouseId,
        stock_item_id: StockItemId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        Ok(self.read(|state| state.book.movements(warehouse_id, stock_item_id)))
    }

    async fn available_quantity(&self, stock_item_id: StockItemId) -> Result<i64, StoreError> {
        Ok(self.read(|state| state.book.available_quantity(stock_item_id)))
    }

    async fn reconcile(
        &self,
        warehouse_id: WarehouseId,
        stock_item_id: StockItemId,
    ) -> Result<Reconciliation, StoreError> {
        Ok(self.read(|state| state.book.reconcile(warehouse_id, stock_item_id)))
    }
}

#[async_trait]
impl RequestStore for InMemoryStore {
    async fn insert_request(&self, request: &Request, audit: &AuditEntry) -> Result<(), StoreError> {
        self.write(|state| {
            if state.requests.contains_key(&request.request_id()) {
                return Err(StoreError::Duplicate(format!("request {}", request.request_id())));
            }
            state.requests.insert(request.request_id(), request.clone());
            state.audit.push(audit.clone());
            Ok(())
        })
    }

    async fn load_request(&self, id: RequestId) -> Result<Option<Request>, StoreError> {
        Ok(self.read(|state| state.requests.get(&id).cloned()))
    }

    async fn update_request<T, F>(&self, id: RequestId, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Request) -> DomainResult<(T, AuditEntry)> + Send + 'static,
    {
        self.write(|state| {
            let mut request = state
                .requests
                .get(&id)
                .cloned()
                .ok_or_else(|| DomainError::not_found(format!("request {id}")))?;
            let (out, audit) = f(&mut request)?;
            state.requests.insert(id, request);
            state.audit.push(audit);
            Ok(out)
        })
    }

    async fn request_summaries(
        &self,
        status: Option<RequestStatus>,
    ) -> Result<Vec<RequestSummary>, StoreError> {
        let summaries = self.read(|state| {
            let mut requests: Vec<&Request> = state
                .requests
                .values()
                .filter(|r| status.is_none_or(|s| r.status() == s))
                .collect();
            requests.sort_by(|a, b| b.header().created_at.cmp(&a.header().created_at));
            requests
                .into_iter()
                .map(Request::summary)
                .collect::<DomainResult<Vec<_>>>()
        })?;
        Ok(summaries)
    }
}

#[async_trait]
impl FulfillmentStore for InMemoryStore {
    async fn supply(&self, command: SupplyCommand) -> Result<SupplyReport, StoreError> {
        self.write(|state| {
            let request_id = command.request_id;
            let mut request = state
                .requests
                .get(&request_id)
                .cloned()
                .ok_or_else(|| DomainError::not_found(format!("request {request_id}")))?;
            let warehouse_id = ensure_suppliable(&request, command.actor_warehouse)?;

            let lines = request.warehouse_lines().to_vec();
            let totals = supplied_totals(state.supplied.iter().filter(|s| s.request_id == request_id))?;
            let resolved: HashMap<_, _> = lines
                .iter()
                .filter(|l| l.stock_item_id.is_none())
                .filter_map(|l| state.find_stock_item(&l.item_name).map(|i| (l.id, i.id)))
                .collect();
            let planned = {
                let recalls = &state.recalls;
                plan_supply(&lines, &totals, &resolved, &command.lines, |name, lot| {
                    recalls.values().any(|r| r.blocks_issuance(name, lot))
                })?
            };

            let now = Utc::now();
            let mut draft = state.book.draft();
            let mut records = Vec::with_capacity(planned.len());
            let mut report_lines = Vec::with_capacity(planned.len());
            for plan in &planned {
                let (outcome, balance_after) = match plan.stock_item_id {
                    Some(stock_item_id) if state.stock_items.contains_key(&stock_item_id) => {
                        let outcome = draft.decrease(
                            warehouse_id,
                            stock_item_id,
                            plan.quantity.get(),
                            command.actor,
                            MovementReference::for_request(request_id, request.header().department_id),
                            MissingStockPolicy::Skip,
                            now,
                        )?;
                        match outcome {
                            LedgerOutcome::Moved { balance, .. } => (LineOutcome::Applied, Some(balance)),
                            LedgerOutcome::Skipped { warning } => (LineOutcome::skipped(warning), None),
                        }
                    }
                    _ => (
                        LineOutcome::skipped(LedgerWarning::UnmatchedItem {
                            item_name: plan.item_name.clone(),
                        }),
                        None,
                    ),
                };
                records.push(plan.record(request_id, command.actor, now));
                report_lines.push(SuppliedLine {
                    line_item_id: plan.line_item_id,
                    item_name: plan.item_name.clone(),
                    quantity: plan.quantity.get(),
                    lot_number: plan.lot_number.clone(),
                    outcome,
                    balance_after,
                });
            }

            let changes = draft.finish();
            let totals = supplied_totals(
                state
                    .supplied
                    .iter()
                    .filter(|s| s.request_id == request_id)
                    .chain(&records),
            )?;
            if is_fully_supplied(&lines, &totals) {
                request.complete(now)?;
            }
            let report = SupplyReport {
                request_id,
                warehouse_id,
                lines: report_lines,
                completed: request.status() == RequestStatus::Completed,
            };

            let warehouse_name = state
                .warehouses
                .get(&warehouse_id)
                .map(|w| w.name.clone())
                .unwrap_or_else(|| warehouse_id.to_string());
            let department_name = request
                .header()
                .department_id
                .and_then(|id| state.departments.get(&id))
                .map(|d| d.name.clone());
            let audit = AuditEntry::new(
                command.actor,
                Some(request_id),
                actions::WAREHOUSE_SUPPLIED,
                report.audit_message(&warehouse_name, department_name.as_deref()),
                now,
            );

            state.apply_ledger(changes);
            state.supplied.extend(records);
            state.audit.push(audit);
            state.requests.insert(request_id, request);
            Ok(report)
        })
    }

    async fn supplied_items(&self, request_id: RequestId) -> Result<Vec<SuppliedItem>, StoreError> {
        Ok(self.read(|state| {
            state
                .supplied
                .iter()
                .filter(|s| s.request_id == request_id)
                .cloned()
                .collect()
        }))
    }
}

#[async_trait]
impl RecallStore for InMemoryStore {
    async fn insert_recall(&self, recall: &ItemRecall, audit: &AuditEntry) -> Result<(), StoreError> {
        self.write(|state| {
            if state.recalls.contains_key(&recall.id) {
                return Err(StoreError::Duplicate(format!("recall {}", recall.id)));
            }
            state.recalls.insert(recall.id, recall.clone());
            state.audit.push(audit.clone());
            Ok(())
        })
    }

    async fn update_recall<T, F>(&self, id: RecallId, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ItemRecall) -> DomainResult<(T, AuditEntry)> + Send + 'static,
    {
        self.write(|state| {
            let mut recall = state
                .recalls
                .get(&id)
                .cloned()
                .ok_or_else(|| DomainError::not_found(format!("recall {id}")))?;
            let (out, audit) = f(&mut recall)?;
            state.recalls.insert(id, recall);
            state.audit.push(audit);
            Ok(out)
        })
    }

    async fn get_recall(&self, id: RecallId) -> Result<Option<RecallView>, StoreError> {
        Ok(self.read(|state| state.recalls.get(&id).map(|r| state.recall_view(r))))
    }

    async fn list_recalls(&self, filter: &RecallFilter) -> Result<Vec<RecallView>, StoreError> {
        Ok(self.read(|state| {
            let mut views: Vec<RecallView> = state
                .recalls
                .values()
                .filter(|r| filter.matches(r))
                .map(|r| state.recall_view(r))
                .collect();
            views.sort_by(|a, b| b.recall.created_at.cmp(&a.recall.created_at));
            views
        }))
    }

    async fn is_lot_quarantined(&self, item_name: &str, lot_number: &str) -> Result<bool, StoreError> {
        Ok(self.read(|state| {
            state
                .recalls
                .values()
                .any(|r| r.blocks_issuance(item_name, lot_number))
        }))
    }
}

#[async_trait]
impl AuditStore for InMemoryStore {
    async fn audit_log(&self, request_id: Option<RequestId>) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self.read(|state| {
            state
                .audit
                .iter()
                .filter(|e| request_id.is_none() || e.request_id == request_id)
                .cloned()
                .collect()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procura_core::{Conflict, UserId};

    async fn seeded(quantity: i64) -> (Arc<InMemoryStore>, WarehouseId, StockItemId) {
        let store = InMemoryStore::arc();
        let wh = store.register_warehouse("Central").await.unwrap();
        let item = store.register_stock_item("Gloves").await.unwrap();
        store
            .increase(StockChange {
                warehouse_id: wh.id,
                stock_item_id: item.id,
                quantity,
                actor: UserId::new(),
                reference: MovementReference::note("opening balance"),
            })
            .await
            .unwrap();
        (store, wh.id, item.id)
    }

    fn take(warehouse_id: WarehouseId, stock_item_id: StockItemId, quantity: i64) -> StockChange {
        StockChange {
            warehouse_id,
            stock_item_id,
            quantity,
            actor: UserId::new(),
            reference: MovementReference::default(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_decrements_never_oversell() {
        let (store, wh, item) = seeded(10).await;

        let a = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.decrease(take(wh, item, 7), MissingStockPolicy::Fail).await }
        });
        let b = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.decrease(take(wh, item, 7), MissingStockPolicy::Fail).await }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];

        let ok = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok, 1);
        let err = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(matches!(
            err,
            StoreError::Domain(DomainError::Conflict(Conflict::InsufficientStock { .. }))
        ));

        let level = store.balance(wh, item).await.unwrap().unwrap();
        assert_eq!(level.quantity, 3);
        let outs: Vec<_> = store
            .movements(wh, item)
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.direction == procura_warehouse::Direction::Out)
            .collect();
        assert_eq!(outs.len(), 1);
        assert_eq!(outs[0].quantity, 7);
        assert!(store.reconcile(wh, item).await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn available_quantity_tracks_every_warehouse() {
        let (store, wh, item) = seeded(10).await;
        let second = store.register_warehouse("Annex").await.unwrap();
        store.increase(take(second.id, item, 5)).await.unwrap();
        store.decrease(take(wh, item, 4), MissingStockPolicy::Fail).await.unwrap();

        assert_eq!(store.available_quantity(item).await.unwrap(), 11);
        let catalog = store.stock_item(item).await.unwrap().unwrap();
        assert_eq!(catalog.available_quantity, 11);
    }

    #[tokio::test]
    async fn catalog_names_are_unique_case_insensitively() {
        let store = InMemoryStore::new();
        store.register_stock_item("Saline 0.9%").await.unwrap();
        let err = store.register_stock_item("saline 0.9%").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Domain(DomainError::Conflict(Conflict::Duplicate(_)))
        ));
        assert!(store.find_stock_item("SALINE 0.9%").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_transaction_leaves_state_untouched() {
        let (store, wh, item) = seeded(5).await;
        let err = store
            .update_request(RequestId::new(), |_| -> DomainResult<((), AuditEntry)> {
                Err(DomainError::validation("never reached"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::NotFound(_))));

        let err = store.decrease(take(wh, item, 9), MissingStockPolicy::Fail).await.unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::Conflict(_))));
        assert_eq!(store.balance(wh, item).await.unwrap().unwrap().quantity, 5);
        assert_eq!(store.movements(wh, item).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn panicking_writer_leaves_the_store_usable() {
        let (store, wh, item) = seeded(5).await;
        let writer = Arc::clone(&store);
        let crashed = std::thread::spawn(move || {
            writer.write(|_| -> Result<(), StoreError> { panic!("writer crashed") })
        })
        .join();
        assert!(crashed.is_err());

        store.decrease(take(wh, item, 2), MissingStockPolicy::Fail).await.unwrap();
        assert_eq!(store.balance(wh, item).await.unwrap().unwrap().quantity, 3);
        assert_eq!(store.stock_item(item).await.unwrap().unwrap().available_quantity, 3);
    }

    #[tokio::test]
    async fn decrease_on_missing_level_respects_policy() {
        let store = InMemoryStore::new();
        let wh = store.register_warehouse("Central").await.unwrap();
        let item = store.register_stock_item("Masks").await.unwrap();

        let err = store
            .decrease(take(wh.id, item.id, 1), MissingStockPolicy::Fail)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Domain(DomainError::UninitializedInventory { .. })
        ));

        let out = store
            .decrease(take(wh.id, item.id, 1), MissingStockPolicy::Skip)
            .await
            .unwrap();
        assert!(matches!(out, LedgerOutcome::Skipped { .. }));
    }
}
