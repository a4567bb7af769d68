use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procura_core::{
    DomainError, DomainResult, LineItemId, LineOutcome, Quantity, StockItemId, UserId,
};

use crate::request::{normalize, Request, RequestStatus, RequestType};

/// Per-item approval status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Approved,
    Rejected,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Approved => "approved",
            ItemStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for ItemStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "pending" => Ok(ItemStatus::Pending),
            "approved" | "allowed" => Ok(ItemStatus::Approved),
            "rejected" | "declined" => Ok(ItemStatus::Rejected),
            _ => Err(DomainError::validation(format!("unknown item status '{s}'"))),
        }
    }
}

/// Line item of a purchase-style request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedItem {
    pub id: LineItemId,
    pub name: String,
    pub brand: Option<String>,
    pub quantity: i64,
    /// Quantity already available or purchased.
    pub purchased_quantity: i64,
    pub unit_cost: i64,
    /// `quantity * unit_cost`.
    pub total_cost: i64,
    pub status: ItemStatus,
    pub comments: Option<String>,
    pub decided_by: Option<UserId>,
    pub decided_at: Option<DateTime<Utc>>,
    pub received: bool,
}

impl RequestedItem {
    pub(crate) fn new(
        id: LineItemId,
        name: String,
        brand: Option<String>,
        quantity: Quantity,
        unit_cost: i64,
    ) -> DomainResult<Self> {
        let total_cost = line_total(id, quantity.get(), unit_cost)?;
        Ok(Self {
            id,
            name,
            brand,
            quantity: quantity.get(),
            purchased_quantity: 0,
            unit_cost,
            total_cost,
            status: ItemStatus::Pending,
            comments: None,
            decided_by: None,
            decided_at: None,
            received: false,
        })
    }

    /// Who holds the rejection lock, if the item is rejected.
    pub fn locked_for(&self, actor: UserId) -> Option<Option<UserId>> {
        match (self.status, self.decided_by) {
            (ItemStatus::Rejected, Some(by)) if by == actor => None,
            (ItemStatus::Rejected, by) => Some(by),
            _ => None,
        }
    }
}

fn line_total(id: LineItemId, quantity: i64, unit_cost: i64) -> DomainResult<i64> {
    quantity
        .checked_mul(unit_cost)
        .ok_or_else(|| DomainError::validation(format!("total cost of item {id} overflows")))
}

/// Sum of line totals. Fails instead of wrapping.
pub(crate) fn total_cost_of<'a>(items: impl IntoIterator<Item = &'a RequestedItem>) -> DomainResult<i64> {
    items.into_iter().try_fold(0i64, |total, item| {
        total
            .checked_add(item.total_cost)
            .ok_or_else(|| DomainError::validation("total cost of the request overflows"))
    })
}

/// Line of a warehouse-supply request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseLine {
    pub id: LineItemId,
    pub item_name: String,
    /// Explicit catalog reference; otherwise resolved by name.
    pub stock_item_id: Option<StockItemId>,
    pub quantity: i64,
}

/// Decision for one item in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDecision {
    pub item_id: LineItemId,
    pub status: ItemStatus,
    pub comments: Option<String>,
    /// New quantity; recomputes the line total.
    pub quantity: Option<i64>,
}

/// Why a line of an item-decision batch was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemLineReason {
    /// Rejected by someone else; only they may change it.
    Locked { rejected_by: Option<UserId> },
    UnknownItem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDecisionLine {
    pub item_id: LineItemId,
    #[serde(flatten)]
    pub outcome: LineOutcome<ItemLineReason>,
}

/// Result of [`Request::apply_item_decisions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDecisionReport {
    pub lines: Vec<ItemDecisionLine>,
    pub approved: u32,
    pub rejected: u32,
    pub pending: u32,
    pub calculated_total_cost: i64,
    /// Estimate after the batch (updated only on opt-in).
    pub estimated_cost: i64,
    pub exceeds_estimate: bool,
    pub estimate_updated: bool,
}

impl ItemDecisionReport {
    pub fn applied(&self) -> usize {
        self.lines.iter().filter(|l| l.outcome.is_applied()).count()
    }
}

impl Request {
    /// Apply a batch of per-item decisions.
    ///
    /// Quantities are validated for the whole batch before anything changes.
    /// Unknown items fail and rejection-locked items are skipped; neither aborts
    /// the batch. `may_decide_any` is the `items.decide` capability; without it
    /// the actor must be the approver of the active step.
    pub fn apply_item_decisions(
        &mut self,
        actor: UserId,
        decisions: &[ItemDecision],
        may_decide_any: bool,
        persist_estimate: bool,
        now: DateTime<Utc>,
    ) -> DomainResult<ItemDecisionReport> {
        if self.header.request_type == RequestType::WarehouseSupply {
            return Err(DomainError::validation(
                "warehouse supply requests have no decidable items",
            ));
        }
        if !matches!(
            self.header.status,
            RequestStatus::Pending | RequestStatus::OnHold | RequestStatus::Approved
        ) {
            return Err(DomainError::invalid_request_state(format!(
                "items of a {} request cannot be decided",
                self.header.status
            )));
        }
        if !may_decide_any {
            let is_active_approver = self
                .active_approval()
                .is_some_and(|a| a.approver_id == actor);
            if !is_active_approver {
                return Err(DomainError::unauthorized(format!(
                    "user {actor} is not the active approver of request {}",
                    self.header.id
                )));
            }
        }

        for decision in decisions {
            if let Some(qty) = decision.quantity {
                let qty = Quantity::new(qty).map_err(|_| {
                    DomainError::validation(format!(
                        "quantity for item {} must be a positive integer (got {qty})",
                        decision.item_id
                    ))
                })?;
                if let Some(item) = self.items.iter().find(|i| i.id == decision.item_id) {
                    line_total(item.id, qty.get(), item.unit_cost)?;
                }
            }
        }

        let mut items = self.items.clone();
        let mut lines = Vec::with_capacity(decisions.len());
        for decision in decisions {
            let Some(item) = items.iter_mut().find(|i| i.id == decision.item_id) else {
                lines.push(ItemDecisionLine {
                    item_id: decision.item_id,
                    outcome: LineOutcome::failed(ItemLineReason::UnknownItem),
                });
                continue;
            };

            if let Some(rejected_by) = item.locked_for(actor) {
                lines.push(ItemDecisionLine {
                    item_id: decision.item_id,
                    outcome: LineOutcome::skipped(ItemLineReason::Locked { rejected_by }),
                });
                continue;
            }

            item.status = decision.status;
            item.comments = decision.comments.clone();
            item.decided_by = Some(actor);
            item.decided_at = Some(now);
            if let Some(qty) = decision.quantity {
                item.quantity = qty;
                item.total_cost = line_total(item.id, qty, item.unit_cost)?;
            }
            lines.push(ItemDecisionLine {
                item_id: decision.item_id,
                outcome: LineOutcome::Applied,
            });
        }

        total_cost_of(items.iter().filter(|i| i.status != ItemStatus::Rejected))?;
        self.items = items;
        let summary = self.summary()?;
        let exceeds_estimate = summary.calculated_total_cost > self.header.estimated_cost;
        let estimate_updated = exceeds_estimate && persist_estimate;
        if estimate_updated {
            self.header.estimated_cost = summary.calculated_total_cost;
        }
        self.header.updated_at = now;

        Ok(ItemDecisionReport {
            lines,
            approved: summary.approved_items,
            rejected: summary.rejected_items,
            pending: summary.pending_items,
            calculated_total_cost: summary.calculated_total_cost,
            estimated_cost: self.header.estimated_cost,
            exceeds_estimate,
            estimate_updated,
        })
    }
}
