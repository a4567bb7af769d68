use chrono::Utc;
use tracing::{info, warn};

use procura_auth::{Actor, PermissionOracle, may_forward_maintenance, names, require};
use procura_core::{ApprovalId, DomainError, Quantity, RequestId};
use procura_requests::{
    Approval, ApprovalStatus, Decision, DecisionOutcome, ItemDecision, ItemDecisionReport,
    NewRequest, Request, RequestStatus, RequestSummary,
};

use super::{Procura, ServiceResult, decision_rights};
use crate::audit::{AuditEntry, actions};
use crate::error::ServiceError;
use crate::store::ProcuraStore;

impl<S: ProcuraStore> Procura<S> {
    /// Open a request with its items and approval chain.
    pub async fn submit_request(
        &self,
        actor: &Actor,
        oracle: &dyn PermissionOracle,
        new: NewRequest,
    ) -> ServiceResult<Request> {
        require(oracle, &names::REQUESTS_SUBMIT)?;

        let now = Utc::now();
        let request = Request::submit(RequestId::new(), new, now)?;
        let header = request.header();
        let audit = AuditEntry::new(
            actor.user_id,
            Some(header.id),
            actions::REQUEST_SUBMITTED,
            format!(
                "Submitted {} request '{}' with {} approval level(s)",
                header.request_type.as_str(),
                header.title,
                request.approvals().len()
            ),
            now,
        );
        self.store.insert_request(&request, &audit).await?;

        info!(
            request_id = %header.id,
            request_type = header.request_type.as_str(),
            status = %header.status,
            "request submitted"
        );
        Ok(request)
    }

    pub async fn request(
        &self,
        oracle: &dyn PermissionOracle,
        request_id: RequestId,
    ) -> ServiceResult<Request> {
        require(oracle, &names::REQUESTS_VIEW)?;
        self.store
            .load_request(request_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("request {request_id}")))
    }

    /// Newest first, optionally filtered by status.
    pub async fn request_summaries(
        &self,
        oracle: &dyn PermissionOracle,
        status: Option<RequestStatus>,
    ) -> ServiceResult<Vec<RequestSummary>> {
        require(oracle, &names::REQUESTS_VIEW)?;
        Ok(self.store.request_summaries(status).await?)
    }

    pub async fn audit_log(
        &self,
        oracle: &dyn PermissionOracle,
        request_id: Option<RequestId>,
    ) -> ServiceResult<Vec<AuditEntry>> {
        require(oracle, &names::REQUESTS_VIEW)?;
        Ok(self.store.audit_log(request_id).await?)
    }

    /// Approve or reject the active step.
    pub async fn decide(
        &self,
        actor: &Actor,
        oracle: &dyn PermissionOracle,
        request_id: RequestId,
        decision: Decision,
    ) -> ServiceResult<DecisionOutcome> {
        let rights = decision_rights(oracle);
        if decision.urgent.is_some() && !rights.flag_urgent {
            return Err(ServiceError::Unauthorized(format!(
                "missing permission '{}'",
                names::APPROVALS_FLAG_URGENT.as_str()
            )));
        }
        if let Some(cost) = decision.cost_override {
            if !rights.override_cost {
                return Err(ServiceError::Unauthorized(format!(
                    "missing permission '{}'",
                    names::APPROVALS_OVERRIDE_COST.as_str()
                )));
            }
            if cost < 0 {
                return Err(ServiceError::Validation(format!(
                    "estimated cost cannot be negative (got {cost})"
                )));
            }
        }

        let user_id = actor.user_id;
        let outcome = self
            .store
            .update_request(request_id, move |request| {
                let now = Utc::now();
                let verdict = ApprovalStatus::from(decision.verdict);
                let outcome = request.decide(user_id, decision, &rights, now)?;
                let level = level_of(request, outcome.approval_id);
                let mut message = format!("Level {level} {verdict}; request is {}", outcome.request_status);
                if let Some(next) = outcome.activated_level {
                    message.push_str(&format!(", level {next} is now active"));
                }
                let audit = AuditEntry::new(user_id, Some(request_id), actions::APPROVAL_DECIDED, message, now);
                Ok((outcome, audit))
            })
            .await?;

        info!(
            %request_id,
            approval_id = %outcome.approval_id,
            status = %outcome.request_status,
            activated_level = ?outcome.activated_level,
            "approval decided"
        );
        Ok(outcome)
    }

    /// Pause the active step without advancing the chain.
    pub async fn hold(
        &self,
        actor: &Actor,
        oracle: &dyn PermissionOracle,
        request_id: RequestId,
        approval_id: ApprovalId,
    ) -> ServiceResult<()> {
        let rights = decision_rights(oracle);
        let user_id = actor.user_id;
        self.store
            .update_request(request_id, move |request| {
                let now = Utc::now();
                request.hold(approval_id, user_id, &rights, now)?;
                let level = level_of(request, approval_id);
                let audit = AuditEntry::new(
                    user_id,
                    Some(request_id),
                    actions::APPROVAL_HELD,
                    format!("Level {level} put on hold"),
                    now,
                );
                Ok(((), audit))
            })
            .await?;
        info!(%request_id, %approval_id, "approval on hold");
        Ok(())
    }

    pub async fn resume(
        &self,
        actor: &Actor,
        oracle: &dyn PermissionOracle,
        request_id: RequestId,
        approval_id: ApprovalId,
    ) -> ServiceResult<()> {
        let rights = decision_rights(oracle);
        let user_id = actor.user_id;
        self.store
            .update_request(request_id, move |request| {
                let now = Utc::now();
                request.resume(approval_id, user_id, &rights, now)?;
                let level = level_of(request, approval_id);
                let audit = AuditEntry::new(
                    user_id,
                    Some(request_id),
                    actions::APPROVAL_RESUMED,
                    format!("Level {level} resumed"),
                    now,
                );
                Ok(((), audit))
            })
            .await?;
        info!(%request_id, %approval_id, "approval resumed");
        Ok(())
    }

    /// Forward a maintenance request to `approver` as a new, active step.
    pub async fn forward(
        &self,
        actor: &Actor,
        oracle: &dyn PermissionOracle,
        request_id: RequestId,
        approver: procura_core::UserId,
    ) -> ServiceResult<Approval> {
        let may_forward = may_forward_maintenance(oracle.roles());
        if !may_forward {
            return Err(ServiceError::Unauthorized(
                "role may not forward maintenance requests".to_string(),
            ));
        }

        let user_id = actor.user_id;
        let approval = self
            .store
            .update_request(request_id, move |request| {
                let now = Utc::now();
                let approval = request
                    .forward(ApprovalId::new(), approver, may_forward, now)?
                    .clone();
                let audit = AuditEntry::new(
                    user_id,
                    Some(request_id),
                    actions::APPROVAL_FORWARDED,
                    format!("Forwarded to approver {approver} at level {}", approval.level),
                    now,
                );
                Ok((approval, audit))
            })
            .await?;

        info!(%request_id, level = approval.level, approver = %approver, "request forwarded");
        Ok(approval)
    }

    /// Record per-item decisions. Locked and unknown items are reported, not fatal.
    pub async fn apply_item_decisions(
        &self,
        actor: &Actor,
        oracle: &dyn PermissionOracle,
        request_id: RequestId,
        decisions: Vec<ItemDecision>,
        persist_estimate: bool,
    ) -> ServiceResult<ItemDecisionReport> {
        if decisions.is_empty() {
            return Err(ServiceError::Validation("no item decisions given".to_string()));
        }
        for decision in &decisions {
            if let Some(quantity) = decision.quantity {
                Quantity::new(quantity).map_err(|_| {
                    DomainError::validation(format!(
                        "quantity for item {} must be a positive integer (got {quantity})",
                        decision.item_id
                    ))
                })?;
            }
        }

        let may_decide_any = oracle.has_permission(&names::ITEMS_DECIDE);
        let user_id = actor.user_id;
        let report = self
            .store
            .update_request(request_id, move |request| {
                let now = Utc::now();
                let report =
                    request.apply_item_decisions(user_id, &decisions, may_decide_any, persist_estimate, now)?;
                let mut message = format!(
                    "Item decisions: {} approved, {} rejected, {} pending; total {}",
                    report.approved, report.rejected, report.pending, report.calculated_total_cost
                );
                if report.estimate_updated {
                    message.push_str(&format!(", estimate raised to {}", report.estimated_cost));
                }
                let audit = AuditEntry::new(user_id, Some(request_id), actions::ITEMS_DECIDED, message, now);
                Ok((report, audit))
            })
            .await?;

        for line in report.lines.iter().filter(|l| !l.outcome.is_applied()) {
            warn!(
                %request_id,
                item_id = %line.item_id,
                reason = ?line.outcome.reason(),
                "item decision not applied"
            );
        }
        info!(
            %request_id,
            applied = report.applied(),
            total = report.calculated_total_cost,
            exceeds_estimate = report.exceeds_estimate,
            "item decisions recorded"
        );
        Ok(report)
    }
}

fn level_of(request: &Request, approval_id: ApprovalId) -> u32 {
    request
        .approvals()
        .iter()
        .find(|a| a.id == approval_id)
        .map(|a| a.level)
        .unwrap_or_default()
}
