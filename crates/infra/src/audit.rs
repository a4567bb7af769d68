//! Human-readable audit log, written in the same transaction as the change it describes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procura_core::{AuditEntryId, RequestId, UserId};

/// Stable action codes.
pub mod actions {
    pub const REQUEST_SUBMITTED: &str = "request.submitted";
    pub const APPROVAL_DECIDED: &str = "approval.decided";
    pub const APPROVAL_HELD: &str = "approval.held";
    pub const APPROVAL_RESUMED: &str = "approval.resumed";
    pub const APPROVAL_FORWARDED: &str = "approval.forwarded";
    pub const ITEMS_DECIDED: &str = "items.decided";
    pub const WAREHOUSE_SUPPLIED: &str = "warehouse.supplied";
    pub const RECALL_CREATED: &str = "recall.created";
    pub const RECALL_ESCALATED: &str = "recall.escalated";
    pub const RECALL_QUARANTINED: &str = "recall.quarantined";
    pub const RECALL_REJECTED: &str = "recall.rejected";
    pub const RECALL_RESOLVED: &str = "recall.resolved";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub actor: UserId,
    pub request_id: Option<RequestId>,
    pub action: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor: UserId,
        request_id: Option<RequestId>,
        action: &str,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AuditEntryId::new(),
            actor,
            request_id,
            action: action.to_string(),
            message: message.into(),
            created_at: now,
        }
    }
}
