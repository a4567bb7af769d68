use tracing::{info, warn};

use procura_auth::{Actor, PermissionOracle, names, require};
use procura_core::{Quantity, StockItemId, WarehouseId};
use procura_warehouse::{
    Department, LedgerOutcome, MissingStockPolicy, MovementReference, Reconciliation, StockItem,
    StockLevel, StockMovement, Warehouse,
};

use super::{Procura, ServiceResult};
use crate::store::{ProcuraStore, StockChange};

impl<S: ProcuraStore> Procura<S> {
    pub async fn register_stock_item(
        &self,
        oracle: &dyn PermissionOracle,
        name: &str,
    ) -> ServiceResult<StockItem> {
        require(oracle, &names::CATALOG_MANAGE)?;
        let item = self.store.register_stock_item(name).await?;
        info!(stock_item_id = %item.id, name = %item.name, "stock item registered");
        Ok(item)
    }

    pub async fn register_warehouse(
        &self,
        oracle: &dyn PermissionOracle,
        name: &str,
    ) -> ServiceResult<Warehouse> {
        require(oracle, &names::CATALOG_MANAGE)?;
        Ok(self.store.register_warehouse(name).await?)
    }

    pub async fn register_department(
        &self,
        oracle: &dyn PermissionOracle,
        name: &str,
    ) -> ServiceResult<Department> {
        require(oracle, &names::CATALOG_MANAGE)?;
        Ok(self.store.register_department(name).await?)
    }

    /// Book goods into a warehouse. Opens the balance on first receipt.
    pub async fn receive_stock(
        &self,
        actor: &Actor,
        oracle: &dyn PermissionOracle,
        warehouse_id: WarehouseId,
        stock_item_id: StockItemId,
        quantity: i64,
        reference: MovementReference,
    ) -> ServiceResult<LedgerOutcome> {
        require(oracle, &names::STOCK_RECEIVE)?;
        Quantity::new(quantity)?;

        let outcome = self
            .store
            .increase(StockChange {
                warehouse_id,
                stock_item_id,
                quantity,
                actor: actor.user_id,
                reference,
            })
            .await?;
        info!(
            %warehouse_id,
            %stock_item_id,
            quantity,
            balance = ?outcome.balance(),
            "stock received"
        );
        Ok(outcome)
    }

    /// Take goods out of a warehouse. A missing balance is an error here;
    /// only fulfillment uses the skipping policy.
    pub async fn issue_stock(
        &self,
        actor: &Actor,
        oracle: &dyn PermissionOracle,
        warehouse_id: WarehouseId,
        stock_item_id: StockItemId,
        quantity: i64,
        reference: MovementReference,
    ) -> ServiceResult<LedgerOutcome> {
        require(oracle, &names::STOCK_ISSUE)?;
        Quantity::new(quantity)?;

        let outcome = self
            .store
            .decrease(
                StockChange {
                    warehouse_id,
                    stock_item_id,
                    quantity,
                    actor: actor.user_id,
                    reference,
                },
                MissingStockPolicy::Fail,
            )
            .await?;
        info!(
            %warehouse_id,
            %stock_item_id,
            quantity,
            balance = ?outcome.balance(),
            "stock issued"
        );
        Ok(outcome)
    }

    pub async fn balance(
        &self,
        oracle: &dyn PermissionOracle,
        warehouse_id: WarehouseId,
        stock_item_id: StockItemId,
    ) -> ServiceResult<Option<StockLevel>> {
        require(oracle, &names::STOCK_VIEW)?;
        Ok(self.store.balance(warehouse_id, stock_item_id).await?)
    }

    pub async fn warehouse_balances(
        &self,
        oracle: &dyn PermissionOracle,
        warehouse_id: WarehouseId,
    ) -> ServiceResult<Vec<StockLevel>> {
        require(oracle, &names::STOCK_VIEW)?;
        Ok(self.store.warehouse_balances(warehouse_id).await?)
    }

    pub async fn movements(
        &self,
        oracle: &dyn PermissionOracle,
        warehouse_id: WarehouseId,
        stock_item_id: StockItemId,
    ) -> ServiceResult<Vec<StockMovement>> {
        require(oracle, &names::STOCK_VIEW)?;
        Ok(self.store.movements(warehouse_id, stock_item_id).await?)
    }

    pub async fn available_quantity(
        &self,
        oracle: &dyn PermissionOracle,
        stock_item_id: StockItemId,
    ) -> ServiceResult<i64> {
        require(oracle, &names::STOCK_VIEW)?;
        Ok(self.store.available_quantity(stock_item_id).await?)
    }

    /// Compare the stored balance with the movement log.
    pub async fn reconcile(
        &self,
        oracle: &dyn PermissionOracle,
        warehouse_id: WarehouseId,
        stock_item_id: StockItemId,
    ) -> ServiceResult<Reconciliation> {
        require(oracle, &names::STOCK_VIEW)?;
        let report = self.store.reconcile(warehouse_id, stock_item_id).await?;
        if !report.is_consistent() {
            warn!(
                %warehouse_id,
                %stock_item_id,
                balance = report.balance,
                movement_sum = report.movement_sum,
                "ledger out of balance"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use procura_auth::StaticPermissions;
    use procura_core::Conflict;

    use super::*;
    use crate::error::ServiceError;
    use crate::notify::RecordingNotifier;
    use crate::services::fixtures::{grants, service, user};

    #[tokio::test]
    async fn receive_then_issue_reconciles() {
        let svc = service(Arc::new(RecordingNotifier::new()));
        let all = StaticPermissions::all();
        let keeper = user();
        let warehouse = svc.register_warehouse(&all, "Central").await.unwrap();
        let gauze = svc.register_stock_item(&all, "Gauze").await.unwrap();

        svc.receive_stock(&keeper, &all, warehouse.id, gauze.id, 40, MovementReference::note("delivery"))
            .await
            .unwrap();
        let out = svc
            .issue_stock(&keeper, &all, warehouse.id, gauze.id, 15, MovementReference::default())
            .await
            .unwrap();
        assert_eq!(out.balance(), Some(25));

        let check = svc.reconcile(&all, warehouse.id, gauze.id).await.unwrap();
        assert!(check.is_consistent());
        assert_eq!(check.movement_sum, 25);
        assert_eq!(svc.available_quantity(&all, gauze.id).await.unwrap(), 25);
        assert_eq!(svc.movements(&all, warehouse.id, gauze.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn overdraw_is_a_conflict_and_changes_nothing() {
        let svc = service(Arc::new(RecordingNotifier::new()));
        let all = StaticPermissions::all();
        let keeper = user();
        let warehouse = svc.register_warehouse(&all, "Central").await.unwrap();
        let gauze = svc.register_stock_item(&all, "Gauze").await.unwrap();
        svc.receive_stock(&keeper, &all, warehouse.id, gauze.id, 5, MovementReference::default())
            .await
            .unwrap();

        let err = svc
            .issue_stock(&keeper, &all, warehouse.id, gauze.id, 6, MovementReference::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err.conflict(),
            Some(Conflict::InsufficientStock { available: 5, requested: 6, .. })
        ));
        let level = svc.balance(&all, warehouse.id, gauze.id).await.unwrap().unwrap();
        assert_eq!(level.quantity, 5);
    }

    #[tokio::test]
    async fn issuing_from_an_unopened_balance_is_reported() {
        let svc = service(Arc::new(RecordingNotifier::new()));
        let all = StaticPermissions::all();
        let warehouse = svc.register_warehouse(&all, "Central").await.unwrap();
        let gauze = svc.register_stock_item(&all, "Gauze").await.unwrap();

        let err = svc
            .issue_stock(&user(), &all, warehouse.id, gauze.id, 1, MovementReference::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::UninitializedInventory { .. }));
    }

    #[tokio::test]
    async fn ledger_calls_check_capabilities_and_quantities_first() {
        let svc = service(Arc::new(RecordingNotifier::new()));
        let all = StaticPermissions::all();
        let warehouse = svc.register_warehouse(&all, "Central").await.unwrap();
        let gauze = svc.register_stock_item(&all, "Gauze").await.unwrap();

        let viewer = grants([names::STOCK_VIEW]);
        let err = svc
            .receive_stock(&user(), &viewer, warehouse.id, gauze.id, 3, MovementReference::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        let err = svc
            .receive_stock(&user(), &all, warehouse.id, gauze.id, 0, MovementReference::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert!(svc.balance(&viewer, warehouse.id, gauze.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_catalog_names_conflict() {
        let svc = service(Arc::new(RecordingNotifier::new()));
        let all = StaticPermissions::all();
        svc.register_stock_item(&all, "Syringe 5ml").await.unwrap();
        let err = svc.register_stock_item(&all, " syringe 5ML").await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(Conflict::Duplicate(_))));
    }
}
