//! `procura-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the error taxonomy shared by every bounded context, and a few
//! value objects.

pub mod entity;
pub mod error;
pub mod id;
pub mod outcome;
pub mod value_object;

pub use entity::Entity;
pub use error::{Conflict, DomainError, DomainResult};
pub use id::{
    ApprovalId, AuditEntryId, DepartmentId, LineItemId, MovementId, RecallId, RequestId,
    StockItemId, SuppliedItemId, UserId, WarehouseId,
};
pub use outcome::LineOutcome;
pub use value_object::{Quantity, ValueObject};
