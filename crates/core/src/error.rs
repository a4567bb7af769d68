//! Domain error model.

use thiserror::Error;

use crate::id::{LineItemId, RecallId, StockItemId, WarehouseId};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A referenced request/item/recall/stock item does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation is well-formed but conflicts with the current state.
    #[error("conflict: {0}")]
    Conflict(Conflict),

    /// The stock ledger has no balance row for the (warehouse, item) pair.
    #[error("no inventory recorded for item {stock_item_id} in warehouse {warehouse_id}")]
    UninitializedInventory {
        warehouse_id: WarehouseId,
        stock_item_id: StockItemId,
    },

    /// Authorization failure at the domain boundary.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

/// Current-state conflicts, detailed enough to explain the conflicting state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Conflict {
    #[error("insufficient stock for item {stock_item_id}: available {available}, requested {requested}")]
    InsufficientStock {
        stock_item_id: StockItemId,
        available: i64,
        requested: i64,
    },

    #[error(
        "over-supply of line {line_item_id}: requested {requested}, already supplied {already_supplied}, attempted {attempted}"
    )]
    OverSupply {
        line_item_id: LineItemId,
        requested: i64,
        already_supplied: i64,
        attempted: i64,
    },

    #[error("recall {0} is already escalated to procurement")]
    AlreadyEscalated(RecallId),

    #[error("recall {0} is already quarantined")]
    AlreadyQuarantined(RecallId),

    #[error("invalid approval state: {0}")]
    InvalidApprovalState(String),

    #[error("invalid request state: {0}")]
    InvalidRequestState(String),

    #[error("invalid recall state: {0}")]
    InvalidRecallState(String),

    #[error("lot '{lot_number}' of '{item_name}' is quarantined and cannot be issued")]
    QuarantinedLot { item_name: String, lot_number: String },

    #[error("already exists: {0}")]
    Duplicate(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn invalid_approval_state(msg: impl Into<String>) -> Self {
        Self::Conflict(Conflict::InvalidApprovalState(msg.into()))
    }

    pub fn invalid_request_state(msg: impl Into<String>) -> Self {
        Self::Conflict(Conflict::InvalidRequestState(msg.into()))
    }

    pub fn invalid_recall_state(msg: impl Into<String>) -> Self {
        Self::Conflict(Conflict::InvalidRecallState(msg.into()))
    }

    /// The conflict detail, if this is a conflict.
    pub fn conflict(&self) -> Option<&Conflict> {
        match self {
            Self::Conflict(c) => Some(c),
            _ => None,
        }
    }
}

impl From<Conflict> for DomainError {
    fn from(value: Conflict) -> Self {
        Self::Conflict(value)
    }
}
