use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procura_core::{
    ApprovalId, DepartmentId, DomainError, DomainResult, Entity, LineItemId, Quantity, RequestId,
    UserId, WarehouseId,
};

use crate::approval::{Approval, ApprovalStatus, WorkflowState};
use crate::items::{ItemStatus, RequestedItem, WarehouseLine, total_cost_of};

/// Kind of request. Decides which line-item shape and which downstream flow apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    StockSupply,
    NonStock,
    Maintenance,
    WarehouseSupply,
    MedicalDevice,
    Medication,
    ItItem,
}

impl RequestType {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestType::StockSupply => "stock_supply",
            RequestType::NonStock => "non_stock",
            RequestType::Maintenance => "maintenance",
            RequestType::WarehouseSupply => "warehouse_supply",
            RequestType::MedicalDevice => "medical_device",
            RequestType::Medication => "medication",
            RequestType::ItItem => "it_item",
        }
    }
}

impl FromStr for RequestType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "stocksupply" | "stock" => Ok(RequestType::StockSupply),
            "nonstock" => Ok(RequestType::NonStock),
            "maintenance" => Ok(RequestType::Maintenance),
            "warehousesupply" | "warehouse" => Ok(RequestType::WarehouseSupply),
            "medicaldevice" => Ok(RequestType::MedicalDevice),
            "medication" => Ok(RequestType::Medication),
            "ititem" | "it" => Ok(RequestType::ItItem),
            _ => Err(DomainError::validation(format!("unknown request type '{s}'"))),
        }
    }
}

/// Request lifecycle status.
///
/// Stored as the snake_case string from [`RequestStatus::as_str`]. Parsing is
/// case-insensitive and accepts the legacy labels older rows were written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Created without any approval step.
    Draft,
    Pending,
    OnHold,
    Approved,
    Rejected,
    /// Fully fulfilled.
    Completed,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Draft => "draft",
            RequestStatus::Pending => "pending",
            RequestStatus::OnHold => "on_hold",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Rejected | RequestStatus::Completed)
    }
}

impl core::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "draft" | "new" | "submitted" => Ok(RequestStatus::Draft),
            "pending" | "pendingapproval" | "inprogress" => Ok(RequestStatus::Pending),
            "onhold" | "hold" => Ok(RequestStatus::OnHold),
            "approved" => Ok(RequestStatus::Approved),
            "rejected" | "declined" => Ok(RequestStatus::Rejected),
            "completed" | "complete" | "received" | "fulfilled" => Ok(RequestStatus::Completed),
            _ => Err(DomainError::validation(format!("unknown request status '{s}'"))),
        }
    }
}

/// Lowercase alphanumerics only, so `On Hold`, `on-hold`, `on_hold` and
/// `OnHold` compare equal.
pub(crate) fn normalize(s: &str) -> String {
    s.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Header row of a request: everything except its child collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub id: RequestId,
    pub request_type: RequestType,
    pub status: RequestStatus,
    pub title: String,
    pub urgent: bool,
    pub requester_id: UserId,
    /// Person expected to fulfil the request once approved.
    pub assigned_to: Option<UserId>,
    pub department_id: Option<DepartmentId>,
    /// Fulfillment warehouse (warehouse-supply requests).
    pub warehouse_id: Option<WarehouseId>,
    /// Estimated cost in minor currency units.
    pub estimated_cost: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for a new request line item (non-warehouse requests).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRequestedItem {
    pub name: String,
    pub brand: Option<String>,
    pub quantity: i64,
    /// Unit cost in minor currency units.
    pub unit_cost: i64,
}

/// Input for a new warehouse-supply line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWarehouseLine {
    pub item_name: String,
    pub stock_item_id: Option<procura_core::StockItemId>,
    pub quantity: i64,
}

/// Everything the intake collaborator supplies to open a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRequest {
    pub request_type: RequestType,
    pub title: String,
    pub urgent: bool,
    pub requester_id: UserId,
    pub assigned_to: Option<UserId>,
    pub department_id: Option<DepartmentId>,
    pub warehouse_id: Option<WarehouseId>,
    /// Defaults to the sum of the line totals when absent.
    pub estimated_cost: Option<i64>,
    pub items: Vec<NewRequestedItem>,
    pub warehouse_lines: Vec<NewWarehouseLine>,
    /// Approvers in level order; level 1 first.
    pub approvers: Vec<UserId>,
}

/// Aggregate root: a request with its approval chain and line items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub(crate) header: RequestHeader,
    pub(crate) approvals: Vec<Approval>,
    pub(crate) items: Vec<RequestedItem>,
    pub(crate) warehouse_lines: Vec<WarehouseLine>,
}

impl Request {
    /// Validate intake input and seed the approval chain (only level 1 active).
    pub fn submit(id: RequestId, new: NewRequest, now: DateTime<Utc>) -> DomainResult<Self> {
        if new.title.trim().is_empty() {
            return Err(DomainError::validation("title cannot be empty"));
        }

        let is_warehouse = new.request_type == RequestType::WarehouseSupply;
        if is_warehouse {
            if new.warehouse_lines.is_empty() {
                return Err(DomainError::validation(
                    "warehouse supply request needs at least one line",
                ));
            }
            if !new.items.is_empty() {
                return Err(DomainError::validation(
                    "warehouse supply request cannot carry purchase line items",
                ));
            }
            if new.warehouse_id.is_none() {
                return Err(DomainError::validation(
                    "warehouse supply request needs a fulfillment warehouse",
                ));
            }
        } else if !new.warehouse_lines.is_empty() {
            return Err(DomainError::validation(
                "only warehouse supply requests carry warehouse lines",
            ));
        }

        let mut items = Vec::with_capacity(new.items.len());
        for item in new.items {
            if item.name.trim().is_empty() {
                return Err(DomainError::validation("item name cannot be empty"));
            }
            let quantity = Quantity::new(item.quantity)?;
            if item.unit_cost < 0 {
                return Err(DomainError::validation("unit cost cannot be negative"));
            }
            items.push(RequestedItem::new(
                LineItemId::new(),
                item.name.trim().to_string(),
                item.brand,
                quantity,
                item.unit_cost,
            )?);
        }

        let mut warehouse_lines = Vec::with_capacity(new.warehouse_lines.len());
        for line in new.warehouse_lines {
            if line.item_name.trim().is_empty() {
                return Err(DomainError::validation("item name cannot be empty"));
            }
            warehouse_lines.push(WarehouseLine {
                id: LineItemId::new(),
                item_name: line.item_name.trim().to_string(),
                stock_item_id: line.stock_item_id,
                quantity: Quantity::new(line.quantity)?.get(),
            });
        }

        let items_total = total_cost_of(&items)?;
        let estimated_cost = match new.estimated_cost {
            Some(cost) if cost < 0 => {
                return Err(DomainError::validation("estimated cost cannot be negative"));
            }
            Some(cost) => cost,
            None => items_total,
        };

        let approvals: Vec<Approval> = new
            .approvers
            .iter()
            .enumerate()
            .map(|(idx, approver)| {
                Approval::new(ApprovalId::new(), id, *approver, idx as u32 + 1, idx == 0, new.urgent)
            })
            .collect();

        let status = if approvals.is_empty() {
            RequestStatus::Draft
        } else {
            RequestStatus::Pending
        };

        Ok(Self {
            header: RequestHeader {
                id,
                request_type: new.request_type,
                status,
                title: new.title.trim().to_string(),
                urgent: new.urgent,
                requester_id: new.requester_id,
                assigned_to: new.assigned_to,
                department_id: new.department_id,
                warehouse_id: new.warehouse_id,
                estimated_cost,
                created_at: now,
                updated_at: now,
            },
            approvals,
            items,
            warehouse_lines,
        })
    }

    /// Rehydrate from persisted rows.
    pub fn from_parts(
        header: RequestHeader,
        mut approvals: Vec<Approval>,
        items: Vec<RequestedItem>,
        warehouse_lines: Vec<WarehouseLine>,
    ) -> DomainResult<Self> {
        approvals.sort_by_key(|a| a.level);
        let active = approvals.iter().filter(|a| a.active).count();
        if active > 1 {
            return Err(DomainError::invariant(format!(
                "request {} has {active} active approval steps",
                header.id
            )));
        }
        Ok(Self {
            header,
            approvals,
            items,
            warehouse_lines,
        })
    }

    pub fn header(&self) -> &RequestHeader {
        &self.header
    }

    pub fn request_id(&self) -> RequestId {
        self.header.id
    }

    pub fn request_type(&self) -> RequestType {
        self.header.request_type
    }

    pub fn status(&self) -> RequestStatus {
        self.header.status
    }

    pub fn approvals(&self) -> &[Approval] {
        &self.approvals
    }

    pub fn items(&self) -> &[RequestedItem] {
        &self.items
    }

    pub fn warehouse_lines(&self) -> &[WarehouseLine] {
        &self.warehouse_lines
    }

    pub fn active_approval(&self) -> Option<&Approval> {
        self.approvals.iter().find(|a| a.active)
    }

    /// Approval-workflow view of the request.
    pub fn workflow_state(&self) -> WorkflowState {
        match self.header.status {
            RequestStatus::Rejected => return WorkflowState::Rejected,
            RequestStatus::Approved | RequestStatus::Completed => return WorkflowState::Approved,
            _ => {}
        }
        match self.active_approval() {
            Some(a) if a.status == ApprovalStatus::OnHold => WorkflowState::OnHold,
            Some(a) => WorkflowState::PendingAtLevel(a.level),
            None => WorkflowState::NoActiveApproval,
        }
    }

    /// Mark the request fulfilled. Only approved (or already completed) requests qualify.
    pub fn complete(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        match self.header.status {
            RequestStatus::Approved => {
                self.header.status = RequestStatus::Completed;
                self.header.updated_at = now;
                Ok(())
            }
            RequestStatus::Completed => Ok(()),
            other => Err(DomainError::invalid_request_state(format!(
                "request {} is {other}, only approved requests can complete",
                self.header.id
            ))),
        }
    }

    /// Read model handed to the presentation layer.
    pub fn summary(&self) -> DomainResult<RequestSummary> {
        let mut approved = 0;
        let mut rejected = 0;
        let mut pending = 0;
        for item in &self.items {
            match item.status {
                ItemStatus::Approved => approved += 1,
                ItemStatus::Rejected => rejected += 1,
                ItemStatus::Pending => pending += 1,
            }
        }

        Ok(RequestSummary {
            id: self.header.id,
            request_type: self.header.request_type,
            status: self.header.status,
            workflow_state: self.workflow_state(),
            urgent: self.header.urgent,
            title: self.header.title.clone(),
            approved_items: approved,
            rejected_items: rejected,
            pending_items: pending,
            calculated_total_cost: self.calculated_total_cost()?,
            estimated_cost: self.header.estimated_cost,
        })
    }

    /// Sum of line totals, ignoring rejected lines.
    pub fn calculated_total_cost(&self) -> DomainResult<i64> {
        total_cost_of(self.items.iter().filter(|i| i.status != ItemStatus::Rejected))
    }
}

impl Entity for Request {
    type Id = RequestId;

    fn id(&self) -> &Self::Id {
        &self.header.id
    }
}

/// Request summary with computed item-status aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub id: RequestId,
    pub request_type: RequestType,
    pub status: RequestStatus,
    pub workflow_state: WorkflowState,
    pub urgent: bool,
    pub title: String,
    pub approved_items: u32,
    pub rejected_items: u32,
    pub pending_items: u32,
    pub calculated_total_cost: i64,
    pub estimated_cost: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn item(name: &str, quantity: i64, unit_cost: i64) -> NewRequestedItem {
        NewRequestedItem {
            name: name.to_string(),
            brand: None,
            quantity,
            unit_cost,
        }
    }

    fn new_request(request_type: RequestType) -> NewRequest {
        NewRequest {
            request_type,
            title: "Ward restock".to_string(),
            urgent: false,
            requester_id: UserId::new(),
            assigned_to: None,
            department_id: Some(DepartmentId::new()),
            warehouse_id: None,
            estimated_cost: None,
            items: vec![item("Gauze", 10, 250), item("Tape", 4, 100)],
            warehouse_lines: vec![],
            approvers: vec![UserId::new(), UserId::new()],
        }
    }

    #[test]
    fn submit_rejects_costs_that_overflow() {
        let half = i64::MAX / 2 + 1;

        let mut new = new_request(RequestType::NonStock);
        new.items = vec![item("Scanner", 1, half), item("Monitor", 1, half)];
        let err = Request::submit(RequestId::new(), new, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let mut new = new_request(RequestType::NonStock);
        new.items = vec![item("Scanner", 2, half)];
        let err = Request::submit(RequestId::new(), new, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let mut new = new_request(RequestType::NonStock);
        new.items = vec![item("Scanner", 1, half), item("Monitor", 1, half - 1)];
        let request = Request::submit(RequestId::new(), new, Utc::now()).unwrap();
        assert_eq!(request.summary().unwrap().calculated_total_cost, i64::MAX);
    }

    #[test]
    fn submit_seeds_chain_with_only_level_one_active() {
        let request = Request::submit(RequestId::new(), new_request(RequestType::NonStock), Utc::now())
            .unwrap();

        assert_eq!(request.status(), RequestStatus::Pending);
        assert_eq!(request.approvals().len(), 2);
        assert!(request.approvals()[0].active);
        assert!(!request.approvals()[1].active);
        assert_eq!(request.workflow_state(), WorkflowState::PendingAtLevel(1));
        assert_eq!(request.header().estimated_cost, 10 * 250 + 4 * 100);
    }

    #[test]
    fn submit_without_approvers_has_no_active_approval() {
        let mut new = new_request(RequestType::NonStock);
        new.approvers.clear();
        let request = Request::submit(RequestId::new(), new, Utc::now()).unwrap();
        assert_eq!(request.status(), RequestStatus::Draft);
        assert_eq!(request.workflow_state(), WorkflowState::NoActiveApproval);
    }

    #[test]
    fn warehouse_supply_requires_lines_and_warehouse() {
        let mut new = new_request(RequestType::WarehouseSupply);
        new.items.clear();
        let err = Request::submit(RequestId::new(), new.clone(), Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        new.warehouse_lines.push(NewWarehouseLine {
            item_name: "Gloves".to_string(),
            stock_item_id: None,
            quantity: 100,
        });
        let err = Request::submit(RequestId::new(), new.clone(), Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("warehouse")));

        new.warehouse_id = Some(WarehouseId::new());
        let request = Request::submit(RequestId::new(), new, Utc::now()).unwrap();
        assert_eq!(request.warehouse_lines().len(), 1);
    }

    #[test]
    fn non_positive_quantity_is_rejected_at_intake() {
        let mut new = new_request(RequestType::NonStock);
        new.items.push(item("Scissors", 0, 500));
        let err = Request::submit(RequestId::new(), new, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn status_parsing_accepts_legacy_casing() {
        assert_eq!("Completed".parse::<RequestStatus>().unwrap(), RequestStatus::Completed);
        assert_eq!("completed".parse::<RequestStatus>().unwrap(), RequestStatus::Completed);
        assert_eq!("received".parse::<RequestStatus>().unwrap(), RequestStatus::Completed);
        assert_eq!("On Hold".parse::<RequestStatus>().unwrap(), RequestStatus::OnHold);
        assert!("archived".parse::<RequestStatus>().is_err());
    }

    #[test]
    fn request_type_parsing_accepts_display_forms() {
        assert_eq!("ITItem".parse::<RequestType>().unwrap(), RequestType::ItItem);
        assert_eq!("Warehouse Supply".parse::<RequestType>().unwrap(), RequestType::WarehouseSupply);
        for t in [
            RequestType::StockSupply,
            RequestType::NonStock,
            RequestType::Maintenance,
            RequestType::WarehouseSupply,
            RequestType::MedicalDevice,
            RequestType::Medication,
            RequestType::ItItem,
        ] {
            assert_eq!(t.as_str().parse::<RequestType>().unwrap(), t);
        }
    }

    #[test]
    fn request_type_parsing_ignores_case_and_separators() {
        for (raw, expected) in [
            ("MedicalDevice", RequestType::MedicalDevice),
            ("medical-device", RequestType::MedicalDevice),
            ("StockSupply", RequestType::StockSupply),
            ("NonStock", RequestType::NonStock),
            ("non-stock", RequestType::NonStock),
            ("IT-Item", RequestType::ItItem),
            ("WAREHOUSE_SUPPLY", RequestType::WarehouseSupply),
            (" warehouse ", RequestType::WarehouseSupply),
        ] {
            assert_eq!(raw.parse::<RequestType>().unwrap(), expected, "{raw}");
        }
        assert_eq!("Pending Approval".parse::<RequestStatus>().unwrap(), RequestStatus::Pending);
        assert_eq!("OnHold".parse::<RequestStatus>().unwrap(), RequestStatus::OnHold);
        assert!("medical devices".parse::<RequestType>().is_err());
    }

    #[test]
    fn complete_requires_approval() {
        let mut request =
            Request::submit(RequestId::new(), new_request(RequestType::NonStock), Utc::now())
                .unwrap();
        let err = request.complete(Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            DomainError::Conflict(procura_core::Conflict::InvalidRequestState(_))
        ));
    }
}
