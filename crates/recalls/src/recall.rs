use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procura_core::{
    Conflict, DepartmentId, DomainError, DomainResult, Entity, Quantity, RecallId, StockItemId,
    UserId, WarehouseId,
};
use procura_warehouse::{lot_key, name_key};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallType {
    DepartmentToWarehouse,
    WarehouseToProcurement,
}

impl RecallType {
    pub fn as_str(self) -> &'static str {
        match self {
            RecallType::DepartmentToWarehouse => "department_to_warehouse",
            RecallType::WarehouseToProcurement => "warehouse_to_procurement",
        }
    }
}

impl FromStr for RecallType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match key(s).as_str() {
            "department_to_warehouse" | "department" => Ok(RecallType::DepartmentToWarehouse),
            "warehouse_to_procurement" | "warehouse" => Ok(RecallType::WarehouseToProcurement),
            _ => Err(DomainError::validation(format!("unknown recall type '{s}'"))),
        }
    }
}

/// Primary recall status. Quarantine is tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallStatus {
    PendingWarehouseReview,
    PendingProcurementAction,
    QuarantinedBlockIssuance,
    Rejected,
    Resolved,
}

impl RecallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecallStatus::PendingWarehouseReview => "pending_warehouse_review",
            RecallStatus::PendingProcurementAction => "pending_procurement_action",
            RecallStatus::QuarantinedBlockIssuance => "quarantined_block_issuance",
            RecallStatus::Rejected => "rejected",
            RecallStatus::Resolved => "resolved",
        }
    }

    pub fn is_closed(self) -> bool {
        matches!(self, RecallStatus::Rejected | RecallStatus::Resolved)
    }
}

impl core::fmt::Display for RecallStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecallStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match key(s).as_str() {
            "pending_warehouse_review" | "pending" => Ok(RecallStatus::PendingWarehouseReview),
            "pending_procurement_action" | "escalated" => Ok(RecallStatus::PendingProcurementAction),
            "quarantined_block_issuance" | "quarantined" => Ok(RecallStatus::QuarantinedBlockIssuance),
            "rejected" => Ok(RecallStatus::Rejected),
            "resolved" | "closed" => Ok(RecallStatus::Resolved),
            _ => Err(DomainError::validation(format!("unknown recall status '{s}'"))),
        }
    }
}

fn key(s: &str) -> String {
    s.trim()
        .chars()
        .filter_map(|c| match c {
            ' ' | '-' | '_' => Some('_'),
            '(' | ')' | ',' => None,
            c => Some(c.to_ascii_lowercase()),
        })
        .collect::<String>()
        .split('_')
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Intake data for a recall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecall {
    pub stock_item_id: Option<StockItemId>,
    pub item_name: String,
    pub lot_number: Option<String>,
    pub quantity: i64,
    pub reason: String,
    pub department_id: Option<DepartmentId>,
    pub warehouse_id: Option<WarehouseId>,
    pub notes: Option<String>,
}

/// A defective or expired lot report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecall {
    pub id: RecallId,
    pub stock_item_id: Option<StockItemId>,
    pub item_name: String,
    pub lot_number: Option<String>,
    pub quantity: i64,
    pub reason: String,
    pub recall_type: RecallType,
    pub status: RecallStatus,
    pub department_id: Option<DepartmentId>,
    pub warehouse_id: Option<WarehouseId>,
    pub initiated_by: UserId,
    pub escalated: bool,
    pub escalated_at: Option<DateTime<Utc>>,
    pub escalated_by: Option<UserId>,
    pub quarantine_active: bool,
    pub quarantine_reason: Option<String>,
    /// Set on the first quarantine and kept afterwards.
    pub quarantine_started_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub resolved_by: Option<UserId>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ItemRecall {
    fn open(
        id: RecallId,
        new: NewRecall,
        recall_type: RecallType,
        status: RecallStatus,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let item_name = new.item_name.trim().to_string();
        if item_name.is_empty() {
            return Err(DomainError::validation("item name cannot be empty"));
        }
        let reason = new.reason.trim().to_string();
        if reason.is_empty() {
            return Err(DomainError::validation("recall reason cannot be empty"));
        }
        let quantity = Quantity::new(new.quantity)?.get();
        let lot_number = new
            .lot_number
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());

        Ok(Self {
            id,
            stock_item_id: new.stock_item_id,
            item_name,
            lot_number,
            quantity,
            reason,
            recall_type,
            status,
            department_id: new.department_id,
            warehouse_id: new.warehouse_id,
            initiated_by: actor,
            escalated: false,
            escalated_at: None,
            escalated_by: None,
            quarantine_active: false,
            quarantine_reason: None,
            quarantine_started_at: None,
            notes: new.notes,
            resolved_by: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// A department sends a defective lot back to the warehouse for review.
    pub fn from_department(
        id: RecallId,
        new: NewRecall,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if new.department_id.is_none() {
            return Err(DomainError::validation("department recall needs a department"));
        }
        Self::open(
            id,
            new,
            RecallType::DepartmentToWarehouse,
            RecallStatus::PendingWarehouseReview,
            actor,
            now,
        )
    }

    /// The warehouse raises a recall straight to procurement; the lot is
    /// escalated and quarantined in the same step.
    pub fn from_warehouse(
        id: RecallId,
        new: NewRecall,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let quarantine_reason = new.reason.trim().to_string();
        let mut recall = Self::open(
            id,
            new,
            RecallType::WarehouseToProcurement,
            RecallStatus::QuarantinedBlockIssuance,
            actor,
            now,
        )?;
        recall.escalated = true;
        recall.escalated_at = Some(now);
        recall.escalated_by = Some(actor);
        recall.quarantine_active = true;
        recall.quarantine_reason = Some(quarantine_reason);
        recall.quarantine_started_at = Some(now);
        Ok(recall)
    }

    fn ensure_open(&self, action: &str) -> DomainResult<()> {
        if self.status.is_closed() {
            return Err(DomainError::invalid_recall_state(format!(
                "cannot {action} recall {}: it is {}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// Hand the recall to procurement. One way only.
    pub fn escalate(&mut self, actor: UserId, notes: Option<String>, now: DateTime<Utc>) -> DomainResult<()> {
        if self.escalated {
            return Err(Conflict::AlreadyEscalated(self.id).into());
        }
        self.ensure_open("escalate")?;
        self.escalated = true;
        self.escalated_at = Some(now);
        self.escalated_by = Some(actor);
        self.status = RecallStatus::PendingProcurementAction;
        if notes.is_some() {
            self.notes = notes;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Block issuance of the lot. A repeated quarantine keeps the original start time.
    pub fn quarantine(&mut self, reason: &str, now: DateTime<Utc>) -> DomainResult<()> {
        if self.quarantine_active && self.status == RecallStatus::QuarantinedBlockIssuance {
            return Err(Conflict::AlreadyQuarantined(self.id).into());
        }
        self.ensure_open("quarantine")?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("quarantine reason cannot be empty"));
        }
        self.quarantine_active = true;
        self.quarantine_reason = Some(reason.to_string());
        self.quarantine_started_at.get_or_insert(now);
        self.status = RecallStatus::QuarantinedBlockIssuance;
        self.updated_at = now;
        Ok(())
    }

    /// The warehouse declines a department recall it has not acted on yet.
    pub fn reject(&mut self, actor: UserId, notes: Option<String>, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != RecallStatus::PendingWarehouseReview {
            return Err(DomainError::invalid_recall_state(format!(
                "only recalls pending warehouse review can be rejected, recall {} is {}",
                self.id, self.status
            )));
        }
        self.status = RecallStatus::Rejected;
        self.resolved_by = Some(actor);
        self.resolved_at = Some(now);
        if notes.is_some() {
            self.notes = notes;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Close the recall and lift the quarantine.
    pub fn resolve(&mut self, actor: UserId, notes: Option<String>, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_open("resolve")?;
        self.status = RecallStatus::Resolved;
        self.quarantine_active = false;
        self.resolved_by = Some(actor);
        self.resolved_at = Some(now);
        if notes.is_some() {
            self.notes = notes;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Whether this recall blocks issuing `lot_number` of `item_name`.
    pub fn blocks_issuance(&self, item_name: &str, lot_number: &str) -> bool {
        self.quarantine_active
            && name_key(&self.item_name) == name_key(item_name)
            && self
                .lot_number
                .as_deref()
                .is_some_and(|lot| lot_key(lot) == lot_key(lot_number))
    }
}

impl Entity for ItemRecall {
    type Id = RecallId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Recall with denormalized names for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecallView {
    #[serde(flatten)]
    pub recall: ItemRecall,
    pub department_name: Option<String>,
    pub warehouse_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecallFilter {
    pub status: Option<RecallStatus>,
    pub recall_type: Option<RecallType>,
    pub department_id: Option<DepartmentId>,
    pub quarantined_only: bool,
}

impl RecallFilter {
    pub fn matches(&self, recall: &ItemRecall) -> bool {
        self.status.is_none_or(|s| s == recall.status)
            && self.recall_type.is_none_or(|t| t == recall.recall_type)
            && self
                .department_id
                .is_none_or(|d| recall.department_id == Some(d))
            && (!self.quarantined_only || recall.quarantine_active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-06-01T07:45:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn later() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-06-02T11:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn syringe_l100() -> NewRecall {
        NewRecall {
            stock_item_id: None,
            item_name: "Syringe".to_string(),
            lot_number: Some("L100".to_string()),
            quantity: 40,
            reason: "Cracked barrels".to_string(),
            department_id: Some(DepartmentId::new()),
            warehouse_id: None,
            notes: None,
        }
    }

    #[test]
    fn department_recall_escalates_once() {
        let mut recall =
            ItemRecall::from_department(RecallId::new(), syringe_l100(), UserId::new(), test_time())
                .unwrap();
        assert_eq!(recall.status, RecallStatus::PendingWarehouseReview);
        assert_eq!(recall.recall_type, RecallType::DepartmentToWarehouse);

        let warehouse_actor = UserId::new();
        recall.escalate(warehouse_actor, None, later()).unwrap();
        assert_eq!(recall.status, RecallStatus::PendingProcurementAction);
        assert_eq!(recall.escalated_by, Some(warehouse_actor));
        assert_eq!(recall.escalated_at, Some(later()));

        let err = recall.escalate(warehouse_actor, None, later()).unwrap_err();
        assert_eq!(err, DomainError::Conflict(Conflict::AlreadyEscalated(recall.id)));
    }

    #[test]
    fn warehouse_recall_is_escalated_and_quarantined() {
        let recall =
            ItemRecall::from_warehouse(RecallId::new(), syringe_l100(), UserId::new(), test_time())
                .unwrap();
        assert_eq!(recall.recall_type, RecallType::WarehouseToProcurement);
        assert_eq!(recall.status, RecallStatus::QuarantinedBlockIssuance);
        assert!(recall.escalated);
        assert!(recall.quarantine_active);
        assert_eq!(recall.quarantine_started_at, Some(test_time()));
        assert!(recall.blocks_issuance("syringe", "l100"));
        assert!(!recall.blocks_issuance("syringe", "L101"));
    }

    #[test]
    fn quarantine_twice_keeps_start_time() {
        let mut recall =
            ItemRecall::from_department(RecallId::new(), syringe_l100(), UserId::new(), test_time())
                .unwrap();
        recall.quarantine("Visible contamination", test_time()).unwrap();
        let started = recall.quarantine_started_at;

        let err = recall.quarantine("Again", later()).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(Conflict::AlreadyQuarantined(_))));
        assert_eq!(recall.quarantine_started_at, started);
        assert_eq!(recall.quarantine_reason.as_deref(), Some("Visible contamination"));
    }

    #[test]
    fn requarantine_after_escalation_keeps_start_time() {
        let mut recall =
            ItemRecall::from_department(RecallId::new(), syringe_l100(), UserId::new(), test_time())
                .unwrap();
        recall.quarantine("Contamination", test_time()).unwrap();
        recall.escalate(UserId::new(), None, later()).unwrap();
        assert!(recall.quarantine_active);
        assert_eq!(recall.status, RecallStatus::PendingProcurementAction);

        recall.quarantine("Procurement hold", later()).unwrap();
        assert_eq!(recall.status, RecallStatus::QuarantinedBlockIssuance);
        assert_eq!(recall.quarantine_started_at, Some(test_time()));
    }

    #[test]
    fn reject_only_from_warehouse_review() {
        let mut recall =
            ItemRecall::from_department(RecallId::new(), syringe_l100(), UserId::new(), test_time())
                .unwrap();
        recall.escalate(UserId::new(), None, later()).unwrap();
        let err = recall.reject(UserId::new(), None, later()).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(Conflict::InvalidRecallState(_))));

        let mut fresh =
            ItemRecall::from_department(RecallId::new(), syringe_l100(), UserId::new(), test_time())
                .unwrap();
        fresh.reject(UserId::new(), Some("Not defective".to_string()), later()).unwrap();
        assert_eq!(fresh.status, RecallStatus::Rejected);
        assert!(fresh.escalate(UserId::new(), None, later()).is_err());
    }

    #[test]
    fn resolve_lifts_quarantine() {
        let mut recall =
            ItemRecall::from_warehouse(RecallId::new(), syringe_l100(), UserId::new(), test_time())
                .unwrap();
        recall.resolve(UserId::new(), Some("Supplier replaced lot".to_string()), later()).unwrap();
        assert_eq!(recall.status, RecallStatus::Resolved);
        assert!(!recall.quarantine_active);
        assert_eq!(recall.quarantine_started_at, Some(test_time()));
        assert!(!recall.blocks_issuance("Syringe", "L100"));

        let err = recall.quarantine("reopen", later()).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(Conflict::InvalidRecallState(_))));
    }

    #[test]
    fn intake_validation() {
        let mut new = syringe_l100();
        new.department_id = None;
        assert!(matches!(
            ItemRecall::from_department(RecallId::new(), new, UserId::new(), test_time()),
            Err(DomainError::Validation(_))
        ));

        let mut new = syringe_l100();
        new.quantity = 0;
        assert!(matches!(
            ItemRecall::from_department(RecallId::new(), new, UserId::new(), test_time()),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn status_parsing_accepts_display_labels() {
        assert_eq!(
            "Pending Warehouse Review".parse::<RecallStatus>().unwrap(),
            RecallStatus::PendingWarehouseReview
        );
        assert_eq!(
            "Quarantined (Block Issuance)".parse::<RecallStatus>().unwrap(),
            RecallStatus::QuarantinedBlockIssuance
        );
        assert_eq!(
            "department-to-warehouse".parse::<RecallType>().unwrap(),
            RecallType::DepartmentToWarehouse
        );
    }

    #[test]
    fn filter_matches_status_and_quarantine() {
        let recall =
            ItemRecall::from_warehouse(RecallId::new(), syringe_l100(), UserId::new(), test_time())
                .unwrap();
        let filter = RecallFilter {
            quarantined_only: true,
            ..RecallFilter::default()
        };
        assert!(filter.matches(&recall));
        let filter = RecallFilter {
            status: Some(RecallStatus::Resolved),
            ..RecallFilter::default()
        };
        assert!(!filter.matches(&recall));
    }
}
