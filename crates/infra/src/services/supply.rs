use tracing::{info, warn};

use procura_auth::{Actor, PermissionOracle, names, require, require_any};
use procura_core::{DomainError, Quantity, RequestId};
use procura_warehouse::{SuppliedItem, SupplyLine, SupplyProgress, SupplyReport, supplied_totals, supply_progress};

use super::{Procura, ServiceResult};
use crate::error::ServiceError;
use crate::store::{ProcuraStore, SupplyCommand};

impl<S: ProcuraStore> Procura<S> {
    /// Hand out goods against an approved warehouse-supply request.
    ///
    /// The whole run is validated before stock moves; any failure leaves the
    /// ledger and the supplied totals untouched. Lines whose catalog item or
    /// balance is missing are recorded with a warning.
    pub async fn supply(
        &self,
        actor: &Actor,
        oracle: &dyn PermissionOracle,
        request_id: RequestId,
        lines: Vec<SupplyLine>,
    ) -> ServiceResult<SupplyReport> {
        require(oracle, &names::WAREHOUSE_SUPPLY)?;
        if actor.warehouse_id.is_none() {
            return Err(ServiceError::Unauthorized(
                "actor is not assigned to a warehouse".to_string(),
            ));
        }
        if lines.is_empty() {
            return Err(ServiceError::Validation("supply run has no lines".to_string()));
        }
        for line in &lines {
            Quantity::new(line.quantity).map_err(|_| {
                DomainError::validation(format!(
                    "supplied quantity for line {} must be a positive integer (got {})",
                    line.line_item_id, line.quantity
                ))
            })?;
        }

        let report = self
            .store
            .supply(SupplyCommand {
                request_id,
                actor: actor.user_id,
                actor_warehouse: actor.warehouse_id,
                lines,
            })
            .await?;

        for warning in report.warnings() {
            warn!(%request_id, warehouse_id = %report.warehouse_id, %warning, "supply line skipped the ledger");
        }
        info!(
            %request_id,
            warehouse_id = %report.warehouse_id,
            lines = report.lines.len(),
            completed = report.completed,
            "supply recorded"
        );
        Ok(report)
    }

    pub async fn supply_progress(
        &self,
        oracle: &dyn PermissionOracle,
        request_id: RequestId,
    ) -> ServiceResult<SupplyProgress> {
        require_any(oracle, &[names::REQUESTS_VIEW, names::WAREHOUSE_SUPPLY])?;
        let request = self
            .store
            .load_request(request_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("request {request_id}")))?;
        let supplied = self.store.supplied_items(request_id).await?;
        Ok(supply_progress(&request, &supplied_totals(&supplied)?))
    }

    pub async fn supplied_items(
        &self,
        oracle: &dyn PermissionOracle,
        request_id: RequestId,
    ) -> ServiceResult<Vec<SuppliedItem>> {
        require_any(oracle, &[names::REQUESTS_VIEW, names::WAREHOUSE_SUPPLY])?;
        Ok(self.store.supplied_items(request_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use procura_auth::StaticPermissions;
    use procura_core::{Conflict, LineItemId, UserId, WarehouseId};
    use procura_recalls::NewRecall;
    use procura_requests::{
        Decision, NewRequest, NewWarehouseLine, Request, RequestStatus, RequestType, Verdict,
    };
    use procura_warehouse::{LedgerWarning, MovementReference};

    use super::*;
    use crate::notify::RecordingNotifier;
    use crate::services::fixtures::{grants, service, user};
    use crate::store::InMemoryStore;

    struct Setup {
        svc: Procura<InMemoryStore>,
        keeper: Actor,
        warehouse: WarehouseId,
        request: Request,
    }

    /// An approved supply request for `lines`, with `stock` received up front.
    async fn approved(lines: &[(&str, i64)], stock: &[(&str, i64)]) -> Setup {
        let svc = service(Arc::new(RecordingNotifier::new()));
        let all = StaticPermissions::all();
        let warehouse = svc.register_warehouse(&all, "Central Store").await.unwrap();
        let ward = svc.register_department(&all, "Ward 3").await.unwrap();
        let keeper = user().in_warehouse(warehouse.id);

        for (name, quantity) in stock {
            let item = svc.register_stock_item(&all, name).await.unwrap();
            svc.receive_stock(&keeper, &all, warehouse.id, item.id, *quantity, MovementReference::default())
                .await
                .unwrap();
        }

        let approver = user();
        let request = svc
            .submit_request(
                &user(),
                &all,
                NewRequest {
                    request_type: RequestType::WarehouseSupply,
                    title: "Ward restock".to_string(),
                    urgent: false,
                    requester_id: UserId::new(),
                    assigned_to: None,
                    department_id: Some(ward.id),
                    warehouse_id: Some(warehouse.id),
                    estimated_cost: None,
                    items: vec![],
                    warehouse_lines: lines
                        .iter()
                        .map(|(name, quantity)| NewWarehouseLine {
                            item_name: name.to_string(),
                            stock_item_id: None,
                            quantity: *quantity,
                        })
                        .collect(),
                    approvers: vec![approver.user_id],
                },
            )
            .await
            .unwrap();
        svc.decide(
            &approver,
            &StaticPermissions::default(),
            request.request_id(),
            Decision {
                approval_id: request.approvals()[0].id,
                verdict: Verdict::Approved,
                comments: None,
                urgent: None,
                cost_override: None,
            },
        )
        .await
        .unwrap();
        let request = svc.request(&all, request.request_id()).await.unwrap();

        Setup {
            svc,
            keeper,
            warehouse: warehouse.id,
            request,
        }
    }

    fn line(id: LineItemId, quantity: i64, lot: Option<&str>) -> SupplyLine {
        SupplyLine {
            line_item_id: id,
            quantity,
            lot_number: lot.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn oversupply_is_rejected_and_totals_stay() {
        let s = approved(&[("Gloves", 100)], &[("Gloves", 500)]).await;
        let perms = grants([names::WAREHOUSE_SUPPLY, names::REQUESTS_VIEW]);
        let gloves = s.request.warehouse_lines()[0].id;
        let id = s.request.request_id();

        let report = s.svc.supply(&s.keeper, &perms, id, vec![line(gloves, 60, None)]).await.unwrap();
        assert!(!report.completed);
        assert_eq!(report.lines[0].balance_after, Some(440));

        let err = s
            .svc
            .supply(&s.keeper, &perms, id, vec![line(gloves, 50, None)])
            .await
            .unwrap_err();
        assert!(matches!(
            err.conflict(),
            Some(Conflict::OverSupply { requested: 100, already_supplied: 60, attempted: 50, .. })
        ));

        let progress = s.svc.supply_progress(&perms, id).await.unwrap();
        assert_eq!(progress.lines[0].supplied, 60);
        assert_eq!(progress.lines[0].remaining, 40);
        assert!(!progress.complete);
        let stored = s.svc.request(&perms, id).await.unwrap();
        assert_eq!(stored.status(), RequestStatus::Approved);
    }

    #[tokio::test]
    async fn completing_every_line_completes_the_request() {
        let s = approved(&[("Gloves", 10), ("Masks", 5)], &[("Gloves", 10), ("Masks", 5)]).await;
        let perms = StaticPermissions::all();
        let lines = s.request.warehouse_lines().to_vec();
        let id = s.request.request_id();

        let report = s
            .svc
            .supply(&s.keeper, &perms, id, vec![line(lines[0].id, 10, None), line(lines[1].id, 5, None)])
            .await
            .unwrap();
        assert!(report.completed);
        assert_eq!(s.svc.request(&perms, id).await.unwrap().status(), RequestStatus::Completed);

        let audit = s.svc.audit_log(&perms, Some(id)).await.unwrap();
        let supplied = audit.last().unwrap();
        assert!(supplied.message.contains("Central Store"));
        assert!(supplied.message.contains("Ward 3"));
    }

    #[tokio::test]
    async fn unknown_items_are_recorded_with_a_warning() {
        let s = approved(&[("Hand sanitizer", 4)], &[]).await;
        let perms = StaticPermissions::all();
        let sanitizer = s.request.warehouse_lines()[0].id;
        let id = s.request.request_id();

        let report = s.svc.supply(&s.keeper, &perms, id, vec![line(sanitizer, 4, None)]).await.unwrap();
        assert_eq!(
            report.lines[0].outcome.reason(),
            Some(&LedgerWarning::UnmatchedItem {
                item_name: "Hand sanitizer".to_string()
            })
        );
        assert!(report.completed);
        assert_eq!(s.svc.supplied_items(&perms, id).await.unwrap().len(), 1);

        let json = serde_json::to_value(&report).unwrap();
        let outcome = &json["lines"][0]["outcome"];
        assert_eq!(outcome["outcome"], "skipped");
        assert_eq!(outcome["reason"]["kind"], "unmatched_item");
    }

    #[tokio::test]
    async fn insufficient_stock_rolls_back_the_whole_run() {
        let s = approved(&[("Gloves", 10), ("Masks", 10)], &[("Gloves", 10), ("Masks", 2)]).await;
        let perms = StaticPermissions::all();
        let lines = s.request.warehouse_lines().to_vec();
        let id = s.request.request_id();

        let err = s
            .svc
            .supply(&s.keeper, &perms, id, vec![line(lines[0].id, 10, None), line(lines[1].id, 5, None)])
            .await
            .unwrap_err();
        assert!(matches!(err.conflict(), Some(Conflict::InsufficientStock { .. })));
        assert!(s.svc.supplied_items(&perms, id).await.unwrap().is_empty());
        let levels = s.svc.warehouse_balances(&perms, s.warehouse).await.unwrap();
        assert!(levels.iter().any(|l| l.item_name == "Gloves" && l.quantity == 10));
    }

    #[tokio::test]
    async fn failed_run_leaves_movements_and_audit_untouched() {
        let s = approved(&[("Gloves", 10), ("Masks", 10)], &[("Gloves", 10), ("Masks", 2)]).await;
        let perms = StaticPermissions::all();
        let lines = s.request.warehouse_lines().to_vec();
        let id = s.request.request_id();
        let gloves = s
            .svc
            .warehouse_balances(&perms, s.warehouse)
            .await
            .unwrap()
            .into_iter()
            .find(|l| l.item_name == "Gloves")
            .unwrap();
        let audit_before = s.svc.audit_log(&perms, None).await.unwrap().len();

        s.svc
            .supply(&s.keeper, &perms, id, vec![line(lines[0].id, 4, None), line(lines[1].id, 5, None)])
            .await
            .unwrap_err();

        let movements = s.svc.movements(&perms, s.warehouse, gloves.stock_item_id).await.unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(s.svc.available_quantity(&perms, gloves.stock_item_id).await.unwrap(), 10);
        assert_eq!(s.svc.audit_log(&perms, None).await.unwrap().len(), audit_before);
        assert_eq!(s.svc.request(&perms, id).await.unwrap().status(), RequestStatus::Approved);
    }

    #[tokio::test]
    async fn huge_quantity_after_a_partial_run_is_over_supply() {
        let s = approved(&[("Gloves", 100)], &[("Gloves", 500)]).await;
        let perms = StaticPermissions::all();
        let gloves = s.request.warehouse_lines()[0].id;
        let id = s.request.request_id();

        s.svc.supply(&s.keeper, &perms, id, vec![line(gloves, 1, None)]).await.unwrap();
        let err = s
            .svc
            .supply(&s.keeper, &perms, id, vec![line(gloves, i64::MAX, None)])
            .await
            .unwrap_err();
        assert!(matches!(
            err.conflict(),
            Some(Conflict::OverSupply { requested: 100, already_supplied: 1, .. })
        ));

        let progress = s.svc.supply_progress(&perms, id).await.unwrap();
        assert_eq!(progress.lines[0].supplied, 1);
        assert_eq!(progress.lines[0].remaining, 99);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_runs_never_exceed_the_request() {
        let s = approved(&[("Gloves", 100)], &[("Gloves", 500)]).await;
        let perms = StaticPermissions::all();
        let gloves = s.request.warehouse_lines()[0].id;
        let id = s.request.request_id();

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let svc = s.svc.clone();
                let keeper = s.keeper.clone();
                tokio::spawn(async move {
                    svc.supply(&keeper, &StaticPermissions::all(), id, vec![line(gloves, 30, None)])
                        .await
                })
            })
            .collect();
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(matches!(err.conflict(), Some(Conflict::OverSupply { .. })));
        }
        let progress = s.svc.supply_progress(&perms, id).await.unwrap();
        assert_eq!(progress.lines[0].supplied, 90);
        let levels = s.svc.warehouse_balances(&perms, s.warehouse).await.unwrap();
        assert_eq!(levels[0].quantity, 410);
    }

    #[tokio::test]
    async fn quarantined_lots_cannot_be_issued() {
        let s = approved(&[("Syringe", 20)], &[("Syringe", 50)]).await;
        let perms = StaticPermissions::all();
        s.svc
            .create_warehouse_recall(
                &s.keeper,
                &perms,
                NewRecall {
                    stock_item_id: None,
                    item_name: "syringe".to_string(),
                    lot_number: Some("l100".to_string()),
                    quantity: 5,
                    reason: "Cracked barrels".to_string(),
                    department_id: None,
                    warehouse_id: None,
                    notes: None,
                },
            )
            .await
            .unwrap();

        let syringe = s.request.warehouse_lines()[0].id;
        let id = s.request.request_id();
        let err = s
            .svc
            .supply(&s.keeper, &perms, id, vec![line(syringe, 5, Some(" L100 "))])
            .await
            .unwrap_err();
        assert!(matches!(err.conflict(), Some(Conflict::QuarantinedLot { .. })));

        let report = s
            .svc
            .supply(&s.keeper, &perms, id, vec![line(syringe, 5, Some("L200"))])
            .await
            .unwrap();
        assert_eq!(report.lines[0].lot_number.as_deref(), Some("L200"));
    }

    #[tokio::test]
    async fn only_the_assigned_warehouse_may_supply() {
        let s = approved(&[("Gloves", 10)], &[("Gloves", 10)]).await;
        let perms = StaticPermissions::all();
        let gloves = s.request.warehouse_lines()[0].id;
        let id = s.request.request_id();

        let elsewhere = user().in_warehouse(WarehouseId::new());
        let err = s
            .svc
            .supply(&elsewhere, &perms, id, vec![line(gloves, 1, None)])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        let err = s.svc.supply(&user(), &perms, id, vec![line(gloves, 1, None)]).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        let err = s
            .svc
            .supply(&s.keeper, &perms, id, vec![line(gloves, -3, None)])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }
}
