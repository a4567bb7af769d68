//! Requests domain module (approval chain + item decision ledger).
//!
//! This crate contains the business rules for procurement and supply requests,
//! implemented purely as deterministic domain logic (no IO, no HTTP, no storage).
//! Infrastructure loads a [`Request`] under a row lock, runs one of the
//! transitions below and persists the result.

pub mod approval;
pub mod items;
pub mod request;

pub use approval::{
    Approval, ApprovalStatus, Decision, DecisionOutcome, DecisionRights, Verdict, WorkflowState,
};
pub use items::{
    ItemDecision, ItemDecisionLine, ItemDecisionReport, ItemLineReason, ItemStatus,
    RequestedItem, WarehouseLine,
};
pub use request::{
    NewRequest, NewRequestedItem, NewWarehouseLine, Request, RequestHeader, RequestStatus,
    RequestSummary, RequestType,
};
