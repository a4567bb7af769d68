//! Warehouse supply fulfillment: validating a supply run against a request's
//! lines and detecting completion.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procura_core::{
    Conflict, DomainError, DomainResult, LineItemId, LineOutcome, Quantity, RequestId,
    StockItemId, SuppliedItemId, UserId, WarehouseId,
};
use procura_requests::{Request, RequestStatus, RequestType, WarehouseLine};

use crate::ledger::LedgerWarning;

/// One line of a supply run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyLine {
    pub line_item_id: LineItemId,
    pub quantity: i64,
    pub lot_number: Option<String>,
}

/// Record of goods handed out against a request line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppliedItem {
    pub id: SuppliedItemId,
    pub request_id: RequestId,
    pub line_item_id: LineItemId,
    pub quantity: i64,
    pub supplied_by: UserId,
    pub lot_number: Option<String>,
    pub supplied_at: DateTime<Utc>,
}

/// A validated supply line, ready to hit the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSupply {
    pub line_item_id: LineItemId,
    pub item_name: String,
    /// Catalog match; `None` means the line is recorded without a stock movement.
    pub stock_item_id: Option<StockItemId>,
    pub quantity: Quantity,
    pub lot_number: Option<String>,
}

impl PlannedSupply {
    pub fn record(&self, request_id: RequestId, actor: UserId, now: DateTime<Utc>) -> SuppliedItem {
        SuppliedItem {
            id: SuppliedItemId::new(),
            request_id,
            line_item_id: self.line_item_id,
            quantity: self.quantity.get(),
            supplied_by: actor,
            lot_number: self.lot_number.clone(),
            supplied_at: now,
        }
    }
}

/// Check the request may be fulfilled by an actor assigned to `actor_warehouse`.
/// Returns the fulfillment warehouse.
pub fn ensure_suppliable(
    request: &Request,
    actor_warehouse: Option<WarehouseId>,
) -> DomainResult<WarehouseId> {
    let header = request.header();
    if header.request_type != RequestType::WarehouseSupply {
        return Err(DomainError::invalid_request_state(format!(
            "request {} is not a warehouse supply request",
            header.id
        )));
    }
    if !matches!(header.status, RequestStatus::Approved | RequestStatus::Completed) {
        return Err(DomainError::invalid_request_state(format!(
            "request {} is {}, only approved requests can be supplied",
            header.id, header.status
        )));
    }
    let Some(warehouse_id) = header.warehouse_id else {
        return Err(DomainError::validation(format!(
            "request {} has no fulfillment warehouse",
            header.id
        )));
    };
    if actor_warehouse != Some(warehouse_id) {
        return Err(DomainError::unauthorized(format!(
            "actor is not assigned to warehouse {warehouse_id}"
        )));
    }
    Ok(warehouse_id)
}

/// Validate a supply run against the request's lines and the running totals.
///
/// `resolved` maps lines to catalog items (lines with an explicit stock item
/// id don't need an entry). `is_quarantined(item_name, lot)` reports an active
/// lot quarantine. Any failure rejects the whole run.
pub fn plan_supply(
    lines: &[WarehouseLine],
    supplied: &HashMap<LineItemId, i64>,
    resolved: &HashMap<LineItemId, StockItemId>,
    batch: &[SupplyLine],
    is_quarantined: impl Fn(&str, &str) -> bool,
) -> DomainResult<Vec<PlannedSupply>> {
    if batch.is_empty() {
        return Err(DomainError::validation("supply run has no lines"));
    }

    for entry in batch {
        Quantity::new(entry.quantity).map_err(|_| {
            DomainError::validation(format!(
                "supplied quantity for line {} must be a positive integer (got {})",
                entry.line_item_id, entry.quantity
            ))
        })?;
    }

    let mut running = supplied.clone();
    let mut planned = Vec::with_capacity(batch.len());
    for entry in batch {
        let line = lines
            .iter()
            .find(|l| l.id == entry.line_item_id)
            .ok_or_else(|| DomainError::not_found(format!("request line {}", entry.line_item_id)))?;
        let quantity = Quantity::new(entry.quantity)?;

        let already = running.entry(line.id).or_insert(0);
        match already.checked_add(quantity.get()) {
            Some(total) if total <= line.quantity => *already = total,
            _ => {
                return Err(Conflict::OverSupply {
                    line_item_id: line.id,
                    requested: line.quantity,
                    already_supplied: *already,
                    attempted: quantity.get(),
                }
                .into());
            }
        }

        let lot_number = entry
            .lot_number
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string);
        if let Some(lot) = lot_number.as_deref() {
            if is_quarantined(&line.item_name, lot) {
                return Err(Conflict::QuarantinedLot {
                    item_name: line.item_name.clone(),
                    lot_number: lot.to_string(),
                }
                .into());
            }
        }

        planned.push(PlannedSupply {
            line_item_id: line.id,
            item_name: line.item_name.clone(),
            stock_item_id: line.stock_item_id.or_else(|| resolved.get(&line.id).copied()),
            quantity,
            lot_number,
        });
    }

    Ok(planned)
}

/// Every line has been supplied at least its requested quantity.
pub fn is_fully_supplied(lines: &[WarehouseLine], supplied: &HashMap<LineItemId, i64>) -> bool {
    !lines.is_empty()
        && lines
            .iter()
            .all(|l| supplied.get(&l.id).copied().unwrap_or(0) >= l.quantity)
}

/// Running supplied totals per line.
pub fn supplied_totals<'a>(
    records: impl IntoIterator<Item = &'a SuppliedItem>,
) -> DomainResult<HashMap<LineItemId, i64>> {
    let mut totals = HashMap::new();
    for record in records {
        let total = totals.entry(record.line_item_id).or_insert(0i64);
        *total = total.checked_add(record.quantity).ok_or_else(|| {
            DomainError::invariant(format!(
                "supplied total for line {} overflows",
                record.line_item_id
            ))
        })?;
    }
    Ok(totals)
}

/// Result for one line of a committed supply run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppliedLine {
    pub line_item_id: LineItemId,
    pub item_name: String,
    pub quantity: i64,
    pub lot_number: Option<String>,
    /// Applied when stock moved; skipped with a warning otherwise.
    pub outcome: LineOutcome<LedgerWarning>,
    /// Warehouse balance after the decrement.
    pub balance_after: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyReport {
    pub request_id: RequestId,
    pub warehouse_id: WarehouseId,
    pub lines: Vec<SuppliedLine>,
    /// The run completed the request.
    pub completed: bool,
}

impl SupplyReport {
    pub fn warnings(&self) -> impl Iterator<Item = &LedgerWarning> {
        self.lines.iter().filter_map(|l| l.outcome.reason())
    }

    /// Human-readable audit line.
    pub fn audit_message(&self, warehouse_name: &str, department_name: Option<&str>) -> String {
        let items = self
            .lines
            .iter()
            .map(|l| match &l.lot_number {
                Some(lot) => format!("{} x{} (lot {lot})", l.item_name, l.quantity),
                None => format!("{} x{}", l.item_name, l.quantity),
            })
            .collect::<Vec<_>>()
            .join(", ");
        let mut message = format!("Supplied {items} from {warehouse_name}");
        if let Some(department) = department_name {
            message.push_str(&format!(" to {department}"));
        }
        if self.completed {
            message.push_str("; request completed");
        }
        message
    }
}

/// Per-line fulfillment progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineProgress {
    pub line_item_id: LineItemId,
    pub item_name: String,
    pub requested: i64,
    pub supplied: i64,
    pub remaining: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyProgress {
    pub request_id: RequestId,
    pub lines: Vec<LineProgress>,
    pub complete: bool,
}

pub fn supply_progress(request: &Request, supplied: &HashMap<LineItemId, i64>) -> SupplyProgress {
    let lines = request
        .warehouse_lines()
        .iter()
        .map(|l| {
            let done = supplied.get(&l.id).copied().unwrap_or(0);
            LineProgress {
                line_item_id: l.id,
                item_name: l.item_name.clone(),
                requested: l.quantity,
                supplied: done,
                remaining: (l.quantity - done).max(0),
            }
        })
        .collect();
    SupplyProgress {
        request_id: request.request_id(),
        lines,
        complete: is_fully_supplied(request.warehouse_lines(), supplied),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procura_core::DepartmentId;
    use procura_requests::{Decision, DecisionRights, NewRequest, NewWarehouseLine, Verdict};
    use proptest::prelude::*;

    fn test_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-05-05T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn approved_supply_request(warehouse: WarehouseId, lines: &[(&str, i64)]) -> Request {
        let lines = lines
            .iter()
            .map(|(name, qty)| NewWarehouseLine {
                item_name: name.to_string(),
                stock_item_id: None,
                quantity: *qty,
            })
            .collect();
        approved_with_lines(warehouse, lines)
    }

    fn approved_with_lines(warehouse: WarehouseId, warehouse_lines: Vec<NewWarehouseLine>) -> Request {
        let approver = UserId::new();
        let new = NewRequest {
            request_type: RequestType::WarehouseSupply,
            title: "Ward restock".to_string(),
            urgent: false,
            requester_id: UserId::new(),
            assigned_to: None,
            department_id: Some(DepartmentId::new()),
            warehouse_id: Some(warehouse),
            estimated_cost: None,
            items: vec![],
            warehouse_lines,
            approvers: vec![approver],
        };
        let mut request = Request::submit(RequestId::new(), new, test_time()).unwrap();
        let approval_id = request.approvals()[0].id;
        request
            .decide(
                approver,
                Decision {
                    approval_id,
                    verdict: Verdict::Approved,
                    comments: None,
                    urgent: None,
                    cost_override: None,
                },
                &DecisionRights::default(),
                test_time(),
            )
            .unwrap();
        request
    }

    fn line(id: LineItemId, quantity: i64) -> SupplyLine {
        SupplyLine {
            line_item_id: id,
            quantity,
            lot_number: None,
        }
    }

    #[test]
    fn gloves_over_supply_is_rejected() {
        let wh = WarehouseId::new();
        let request = approved_supply_request(wh, &[("Gloves", 100)]);
        let gloves = request.warehouse_lines()[0].id;

        let first = plan_supply(
            request.warehouse_lines(),
            &HashMap::new(),
            &HashMap::new(),
            &[line(gloves, 60)],
            |_, _| false,
        )
        .unwrap();
        let records: Vec<SuppliedItem> = first
            .iter()
            .map(|p| p.record(request.request_id(), UserId::new(), test_time()))
            .collect();
        let totals = supplied_totals(&records).unwrap();
        assert_eq!(totals.get(&gloves), Some(&60));
        assert!(!is_fully_supplied(request.warehouse_lines(), &totals));

        let err = plan_supply(
            request.warehouse_lines(),
            &totals,
            &HashMap::new(),
            &[line(gloves, 50)],
            |_, _| false,
        )
        .unwrap_err();
        match err {
            DomainError::Conflict(Conflict::OverSupply {
                requested: 100,
                already_supplied: 60,
                attempted: 50,
                ..
            }) => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn duplicate_lines_in_one_run_count_together() {
        let request = approved_supply_request(WarehouseId::new(), &[("Masks", 10)]);
        let masks = request.warehouse_lines()[0].id;
        let err = plan_supply(
            request.warehouse_lines(),
            &HashMap::new(),
            &HashMap::new(),
            &[line(masks, 6), line(masks, 6)],
            |_, _| false,
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(Conflict::OverSupply { .. })));
    }

    #[test]
    fn quarantined_lot_blocks_the_run() {
        let request = approved_supply_request(WarehouseId::new(), &[("Syringe", 20)]);
        let syringe = request.warehouse_lines()[0].id;
        let entry = SupplyLine {
            line_item_id: syringe,
            quantity: 5,
            lot_number: Some(" L100 ".to_string()),
        };
        let err = plan_supply(
            request.warehouse_lines(),
            &HashMap::new(),
            &HashMap::new(),
            &[entry],
            |name, lot| name == "Syringe" && lot == "L100",
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(Conflict::QuarantinedLot { .. })));
    }

    #[test]
    fn zero_quantity_and_unknown_line_are_rejected() {
        let request = approved_supply_request(WarehouseId::new(), &[("Gauze", 5)]);
        let gauze = request.warehouse_lines()[0].id;

        let err = plan_supply(
            request.warehouse_lines(),
            &HashMap::new(),
            &HashMap::new(),
            &[line(gauze, 0)],
            |_, _| false,
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let err = plan_supply(
            request.warehouse_lines(),
            &HashMap::new(),
            &HashMap::new(),
            &[line(LineItemId::new(), 1)],
            |_, _| false,
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn unlinked_line_falls_back_to_name_resolution() {
        let request = approved_supply_request(WarehouseId::new(), &[("Gauze", 5)]);
        let gauze = request.warehouse_lines()[0].id;
        let by_name = StockItemId::new();
        let resolved = HashMap::from([(gauze, by_name)]);

        let planned = plan_supply(
            request.warehouse_lines(),
            &HashMap::new(),
            &resolved,
            &[line(gauze, 5)],
            |_, _| false,
        )
        .unwrap();
        assert_eq!(planned[0].stock_item_id, Some(by_name));
    }

    #[test]
    fn resolution_prefers_explicit_catalog_id() {
        let linked = StockItemId::new();
        let request = approved_with_lines(
            WarehouseId::new(),
            vec![NewWarehouseLine {
                item_name: "Gauze".to_string(),
                stock_item_id: Some(linked),
                quantity: 5,
            }],
        );
        let gauze = request.warehouse_lines()[0].id;
        let resolved = HashMap::from([(gauze, StockItemId::new())]);

        let planned = plan_supply(
            request.warehouse_lines(),
            &HashMap::new(),
            &resolved,
            &[line(gauze, 5)],
            |_, _| false,
        )
        .unwrap();
        assert_eq!(planned[0].stock_item_id, Some(linked));
    }

    #[test]
    fn huge_follow_up_quantity_is_over_supply() {
        let request = approved_supply_request(WarehouseId::new(), &[("Gloves", 100)]);
        let gloves = request.warehouse_lines()[0].id;
        let totals = HashMap::from([(gloves, 1)]);

        let err = plan_supply(
            request.warehouse_lines(),
            &totals,
            &HashMap::new(),
            &[line(gloves, i64::MAX)],
            |_, _| false,
        )
        .unwrap_err();
        match err {
            DomainError::Conflict(Conflict::OverSupply {
                requested: 100,
                already_supplied: 1,
                attempted: i64::MAX,
                ..
            }) => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn overflowing_supplied_totals_are_reported() {
        let request = approved_supply_request(WarehouseId::new(), &[("Gloves", 100)]);
        let gloves = request.warehouse_lines()[0].id;
        let record = |quantity| SuppliedItem {
            quantity,
            ..PlannedSupply {
                line_item_id: gloves,
                item_name: "Gloves".to_string(),
                stock_item_id: None,
                quantity: Quantity::new(1).unwrap(),
                lot_number: None,
            }
            .record(request.request_id(), UserId::new(), test_time())
        };

        let err = supplied_totals(&[record(i64::MAX), record(1)]).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn supply_preconditions() {
        let wh = WarehouseId::new();
        let request = approved_supply_request(wh, &[("Gloves", 100)]);

        assert_eq!(ensure_suppliable(&request, Some(wh)).unwrap(), wh);
        let err = ensure_suppliable(&request, Some(WarehouseId::new())).unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));
        let err = ensure_suppliable(&request, None).unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));
    }

    #[test]
    fn progress_reports_remaining() {
        let request = approved_supply_request(WarehouseId::new(), &[("Gloves", 100), ("Masks", 10)]);
        let gloves = request.warehouse_lines()[0].id;
        let masks = request.warehouse_lines()[1].id;
        let totals = HashMap::from([(gloves, 60), (masks, 10)]);

        let progress = supply_progress(&request, &totals);
        assert!(!progress.complete);
        assert_eq!(progress.lines[0].remaining, 40);
        assert_eq!(progress.lines[1].remaining, 0);

        let totals = HashMap::from([(gloves, 100), (masks, 10)]);
        assert!(supply_progress(&request, &totals).complete);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn supplied_never_exceeds_requested(requested in 1i64..200, runs in prop::collection::vec(1i64..80, 1..20)) {
            let request = approved_supply_request(WarehouseId::new(), &[("Saline", requested)]);
            let saline = request.warehouse_lines()[0].id;
            let mut records: Vec<SuppliedItem> = Vec::new();

            for qty in runs {
                let totals = supplied_totals(&records).unwrap();
                if let Ok(planned) = plan_supply(
                    request.warehouse_lines(),
                    &totals,
                    &HashMap::new(),
                    &[line(saline, qty)],
                    |_, _| false,
                ) {
                    records.extend(planned.iter().map(|p| p.record(request.request_id(), UserId::new(), test_time())));
                }
                let total = supplied_totals(&records).unwrap().get(&saline).copied().unwrap_or(0);
                prop_assert!(total <= requested);
            }
        }
    }
}
