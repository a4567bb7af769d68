use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procura_core::{ApprovalId, DomainError, DomainResult, Entity, RequestId, UserId};

use crate::request::{normalize, Request, RequestStatus, RequestType};

/// Status of one approval step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    OnHold,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::OnHold => "on_hold",
        }
    }

    pub fn is_decided(self) -> bool {
        matches!(self, ApprovalStatus::Approved | ApprovalStatus::Rejected)
    }
}

impl core::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" | "declined" => Ok(ApprovalStatus::Rejected),
            "onhold" | "hold" => Ok(ApprovalStatus::OnHold),
            _ => Err(DomainError::validation(format!("unknown approval status '{s}'"))),
        }
    }
}

/// Where a request sits in its approval chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "level", rename_all = "snake_case")]
pub enum WorkflowState {
    NoActiveApproval,
    PendingAtLevel(u32),
    Approved,
    Rejected,
    OnHold,
}

/// One step of a request's approval chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub id: ApprovalId,
    pub request_id: RequestId,
    pub approver_id: UserId,
    /// 1-based position in the chain.
    pub level: u32,
    pub status: ApprovalStatus,
    pub active: bool,
    pub urgent: bool,
    pub comments: Option<String>,
    pub decided_by: Option<UserId>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl Approval {
    pub fn new(
        id: ApprovalId,
        request_id: RequestId,
        approver_id: UserId,
        level: u32,
        active: bool,
        urgent: bool,
    ) -> Self {
        Self {
            id,
            request_id,
            approver_id,
            level,
            status: ApprovalStatus::Pending,
            active,
            urgent,
            comments: None,
            decided_by: None,
            decided_at: None,
        }
    }
}

impl Entity for Approval {
    type Id = ApprovalId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Final answer an approver can give.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    Rejected,
}

impl From<Verdict> for ApprovalStatus {
    fn from(v: Verdict) -> Self {
        match v {
            Verdict::Approved => ApprovalStatus::Approved,
            Verdict::Rejected => ApprovalStatus::Rejected,
        }
    }
}

/// Input to [`Request::decide`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub approval_id: ApprovalId,
    pub verdict: Verdict,
    pub comments: Option<String>,
    /// Set or clear the request's urgent flag.
    pub urgent: Option<bool>,
    /// Replace the estimated cost (minor units).
    pub cost_override: Option<i64>,
}

/// Capabilities of the acting user, resolved from the permission oracle before
/// the transition runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecisionRights {
    /// May act on any step, not only their own.
    pub manage: bool,
    pub flag_urgent: bool,
    pub override_cost: bool,
}

/// What a decision did to the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub approval_id: ApprovalId,
    pub request_status: RequestStatus,
    /// Level activated by this decision, if any.
    pub activated_level: Option<u32>,
}

impl Request {
    fn approval_index(&self, approval_id: ApprovalId) -> DomainResult<usize> {
        self.approvals
            .iter()
            .position(|a| a.id == approval_id)
            .ok_or_else(|| DomainError::not_found(format!("approval {approval_id}")))
    }

    /// Validate that `actor` may act on the active, undecided step at `idx`.
    fn ensure_actionable(&self, idx: usize, actor: UserId, rights: &DecisionRights) -> DomainResult<()> {
        let approval = &self.approvals[idx];
        if approval.status.is_decided() {
            return Err(DomainError::invalid_approval_state(format!(
                "approval {} is already {}",
                approval.id, approval.status
            )));
        }
        if !approval.active {
            return Err(DomainError::invalid_approval_state(format!(
                "approval {} at level {} is not the active step",
                approval.id, approval.level
            )));
        }
        if !matches!(self.header.status, RequestStatus::Pending | RequestStatus::OnHold) {
            return Err(DomainError::invalid_request_state(format!(
                "request {} is {}",
                self.header.id, self.header.status
            )));
        }
        if approval.approver_id != actor && !rights.manage {
            return Err(DomainError::unauthorized(format!(
                "user {actor} is not the approver of level {}",
                approval.level
            )));
        }
        Ok(())
    }

    /// Decide the active step. Approving activates the next pending level or,
    /// at the end of the chain, approves the request. Rejecting terminates the chain.
    pub fn decide(
        &mut self,
        actor: UserId,
        decision: Decision,
        rights: &DecisionRights,
        now: DateTime<Utc>,
    ) -> DomainResult<DecisionOutcome> {
        let idx = self.approval_index(decision.approval_id)?;
        self.ensure_actionable(idx, actor, rights)?;

        if decision.urgent.is_some() && !rights.flag_urgent {
            return Err(DomainError::unauthorized("not allowed to change the urgent flag"));
        }
        if let Some(cost) = decision.cost_override {
            if !rights.override_cost {
                return Err(DomainError::unauthorized("not allowed to override the estimated cost"));
            }
            if cost < 0 {
                return Err(DomainError::validation("estimated cost cannot be negative"));
            }
        }

        if let Some(urgent) = decision.urgent {
            self.header.urgent = urgent;
            for approval in self.approvals.iter_mut().filter(|a| !a.status.is_decided()) {
                approval.urgent = urgent;
            }
        }
        if let Some(cost) = decision.cost_override {
            self.header.estimated_cost = cost;
        }

        let level = {
            let approval = &mut self.approvals[idx];
            approval.status = decision.verdict.into();
            approval.active = false;
            approval.comments = decision.comments;
            approval.decided_by = Some(actor);
            approval.decided_at = Some(now);
            approval.level
        };

        let mut activated_level = None;
        match decision.verdict {
            Verdict::Approved => {
                let next = self
                    .approvals
                    .iter_mut()
                    .filter(|a| a.level > level && a.status == ApprovalStatus::Pending)
                    .min_by_key(|a| a.level);
                match next {
                    Some(next) => {
                        next.active = true;
                        activated_level = Some(next.level);
                        self.header.status = RequestStatus::Pending;
                    }
                    None => self.header.status = RequestStatus::Approved,
                }
            }
            Verdict::Rejected => self.header.status = RequestStatus::Rejected,
        }
        self.header.updated_at = now;

        Ok(DecisionOutcome {
            approval_id: decision.approval_id,
            request_status: self.header.status,
            activated_level,
        })
    }

    /// Pause the active step. It keeps its active designation.
    pub fn hold(
        &mut self,
        approval_id: ApprovalId,
        actor: UserId,
        rights: &DecisionRights,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        let idx = self.approval_index(approval_id)?;
        self.ensure_actionable(idx, actor, rights)?;
        let approval = &mut self.approvals[idx];
        if approval.status == ApprovalStatus::OnHold {
            return Err(DomainError::invalid_approval_state(format!(
                "approval {approval_id} is already on hold"
            )));
        }
        approval.status = ApprovalStatus::OnHold;
        self.header.status = RequestStatus::OnHold;
        self.header.updated_at = now;
        Ok(())
    }

    pub fn resume(
        &mut self,
        approval_id: ApprovalId,
        actor: UserId,
        rights: &DecisionRights,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        let idx = self.approval_index(approval_id)?;
        self.ensure_actionable(idx, actor, rights)?;
        let approval = &mut self.approvals[idx];
        if approval.status != ApprovalStatus::OnHold {
            return Err(DomainError::invalid_approval_state(format!(
                "approval {approval_id} is not on hold"
            )));
        }
        approval.status = ApprovalStatus::Pending;
        self.header.status = RequestStatus::Pending;
        self.header.updated_at = now;
        Ok(())
    }

    /// Forward a maintenance request to another approver: append a step at
    /// `max level + 1` and move the active designation onto it.
    ///
    /// `may_forward` is the caller's standing on the forwarding role allow-list.
    pub fn forward(
        &mut self,
        approval_id: ApprovalId,
        approver: UserId,
        may_forward: bool,
        now: DateTime<Utc>,
    ) -> DomainResult<&Approval> {
        if self.header.request_type != RequestType::Maintenance {
            return Err(DomainError::validation(format!(
                "only maintenance requests can be forwarded, request {} is {}",
                self.header.id,
                self.header.request_type.as_str()
            )));
        }
        if !may_forward {
            return Err(DomainError::unauthorized("role may not forward maintenance requests"));
        }
        if !matches!(
            self.header.status,
            RequestStatus::Draft | RequestStatus::Pending | RequestStatus::OnHold
        ) {
            return Err(DomainError::invalid_request_state(format!(
                "request {} is {}",
                self.header.id, self.header.status
            )));
        }

        for approval in self.approvals.iter_mut().filter(|a| a.active) {
            approval.active = false;
            if approval.status == ApprovalStatus::OnHold {
                approval.status = ApprovalStatus::Pending;
            }
        }

        let level = self.approvals.iter().map(|a| a.level).max().unwrap_or(0) + 1;
        self.approvals.push(Approval::new(
            approval_id,
            self.header.id,
            approver,
            level,
            true,
            self.header.urgent,
        ));
        self.header.status = RequestStatus::Pending;
        self.header.updated_at = now;

        Ok(&self.approvals[self.approvals.len() - 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{NewRequest, NewRequestedItem};
    use procura_core::{Conflict, DepartmentId};

    fn test_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn request_with_chain(request_type: RequestType, approvers: &[UserId]) -> Request {
        let new = NewRequest {
            request_type,
            title: "Replace autoclave seal".to_string(),
            urgent: false,
            requester_id: UserId::new(),
            assigned_to: None,
            department_id: Some(DepartmentId::new()),
            warehouse_id: None,
            estimated_cost: Some(10_000),
            items: vec![NewRequestedItem {
                name: "Seal".to_string(),
                brand: None,
                quantity: 1,
                unit_cost: 10_000,
            }],
            warehouse_lines: vec![],
            approvers: approvers.to_vec(),
        };
        Request::submit(RequestId::new(), new, test_time()).unwrap()
    }

    fn decision(approval_id: ApprovalId, verdict: Verdict) -> Decision {
        Decision {
            approval_id,
            verdict,
            comments: None,
            urgent: None,
            cost_override: None,
        }
    }

    #[test]
    fn approving_every_level_approves_request() {
        let chain = [UserId::new(), UserId::new()];
        let mut request = request_with_chain(RequestType::NonStock, &chain);
        let rights = DecisionRights::default();

        let first = request.approvals()[0].id;
        let out = request
            .decide(chain[0], decision(first, Verdict::Approved), &rights, test_time())
            .unwrap();
        assert_eq!(out.activated_level, Some(2));
        assert_eq!(request.workflow_state(), WorkflowState::PendingAtLevel(2));

        let second = request.approvals()[1].id;
        let out = request
            .decide(chain[1], decision(second, Verdict::Approved), &rights, test_time())
            .unwrap();
        assert_eq!(out.request_status, RequestStatus::Approved);
        assert_eq!(request.workflow_state(), WorkflowState::Approved);
        assert!(request.active_approval().is_none());
    }

    #[test]
    fn rejecting_level_one_never_activates_later_levels() {
        let chain = [UserId::new(), UserId::new(), UserId::new()];
        let mut request = request_with_chain(RequestType::NonStock, &chain);
        let first = request.approvals()[0].id;

        request
            .decide(
                chain[0],
                decision(first, Verdict::Rejected),
                &DecisionRights::default(),
                test_time(),
            )
            .unwrap();

        assert_eq!(request.status(), RequestStatus::Rejected);
        assert!(request.approvals().iter().all(|a| !a.active));
        assert_eq!(request.approvals()[1].status, ApprovalStatus::Pending);
        assert_eq!(request.approvals()[2].status, ApprovalStatus::Pending);

        let second = request.approvals()[1].id;
        let err = request
            .decide(
                chain[1],
                decision(second, Verdict::Approved),
                &DecisionRights::default(),
                test_time(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Conflict(Conflict::InvalidApprovalState(_))
        ));
    }

    #[test]
    fn deciding_twice_is_invalid() {
        let chain = [UserId::new(), UserId::new()];
        let mut request = request_with_chain(RequestType::NonStock, &chain);
        let first = request.approvals()[0].id;
        let rights = DecisionRights::default();
        request
            .decide(chain[0], decision(first, Verdict::Approved), &rights, test_time())
            .unwrap();

        let err = request
            .decide(chain[0], decision(first, Verdict::Rejected), &rights, test_time())
            .unwrap_err();
        match err {
            DomainError::Conflict(Conflict::InvalidApprovalState(msg)) if msg.contains("already") => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn only_the_approver_or_manager_decides() {
        let chain = [UserId::new()];
        let mut request = request_with_chain(RequestType::NonStock, &chain);
        let first = request.approvals()[0].id;

        let err = request
            .decide(
                UserId::new(),
                decision(first, Verdict::Approved),
                &DecisionRights::default(),
                test_time(),
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));

        let manager = DecisionRights {
            manage: true,
            ..DecisionRights::default()
        };
        request
            .decide(UserId::new(), decision(first, Verdict::Approved), &manager, test_time())
            .unwrap();
        assert_eq!(request.status(), RequestStatus::Approved);
    }

    #[test]
    fn urgent_flag_and_cost_override_need_capabilities() {
        let chain = [UserId::new()];
        let mut request = request_with_chain(RequestType::NonStock, &chain);
        let first = request.approvals()[0].id;

        let mut d = decision(first, Verdict::Approved);
        d.urgent = Some(true);
        let err = request
            .decide(chain[0], d.clone(), &DecisionRights::default(), test_time())
            .unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));
        assert!(!request.header().urgent);

        d.cost_override = Some(12_500);
        let rights = DecisionRights {
            flag_urgent: true,
            override_cost: true,
            ..DecisionRights::default()
        };
        request.decide(chain[0], d, &rights, test_time()).unwrap();
        assert!(request.header().urgent);
        assert_eq!(request.header().estimated_cost, 12_500);
    }

    #[test]
    fn hold_keeps_active_designation_and_resume_restores_pending() {
        let chain = [UserId::new(), UserId::new()];
        let mut request = request_with_chain(RequestType::NonStock, &chain);
        let first = request.approvals()[0].id;
        let rights = DecisionRights::default();

        request.hold(first, chain[0], &rights, test_time()).unwrap();
        assert_eq!(request.status(), RequestStatus::OnHold);
        assert_eq!(request.workflow_state(), WorkflowState::OnHold);
        assert!(request.approvals()[0].active);

        let err = request.hold(first, chain[0], &rights, test_time()).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(Conflict::InvalidApprovalState(_))));

        request.resume(first, chain[0], &rights, test_time()).unwrap();
        assert_eq!(request.workflow_state(), WorkflowState::PendingAtLevel(1));
    }

    #[test]
    fn on_hold_step_can_still_be_decided() {
        let chain = [UserId::new()];
        let mut request = request_with_chain(RequestType::NonStock, &chain);
        let first = request.approvals()[0].id;
        let rights = DecisionRights::default();

        request.hold(first, chain[0], &rights, test_time()).unwrap();
        request
            .decide(chain[0], decision(first, Verdict::Approved), &rights, test_time())
            .unwrap();
        assert_eq!(request.status(), RequestStatus::Approved);
    }

    #[test]
    fn forwarding_appends_active_step_for_maintenance_only() {
        let chain = [UserId::new()];
        let head_of_department = UserId::new();

        let mut other = request_with_chain(RequestType::NonStock, &chain);
        let err = other
            .forward(ApprovalId::new(), head_of_department, true, test_time())
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let mut request = request_with_chain(RequestType::Maintenance, &chain);
        let err = request
            .forward(ApprovalId::new(), head_of_department, false, test_time())
            .unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));

        let forwarded = request
            .forward(ApprovalId::new(), head_of_department, true, test_time())
            .unwrap();
        assert_eq!(forwarded.level, 2);
        assert_eq!(forwarded.approver_id, head_of_department);

        assert!(!request.approvals()[0].active);
        assert_eq!(request.active_approval().map(|a| a.level), Some(2));
        assert_eq!(request.workflow_state(), WorkflowState::PendingAtLevel(2));
    }

    #[test]
    fn approval_status_parses_case_insensitively() {
        assert_eq!("On_Hold".parse::<ApprovalStatus>().unwrap(), ApprovalStatus::OnHold);
        assert_eq!("APPROVED".parse::<ApprovalStatus>().unwrap(), ApprovalStatus::Approved);
    }
}
