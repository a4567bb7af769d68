//! Infrastructure and service-level error types.
//!
//! ## SQLx error mapping
//!
//! | SQLx error | SQLSTATE | `StoreError` |
//! |------------|----------|--------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (foreign key violation) | `23503` | `Integrity` |
//! | Database (check violation) | `23514` | `Integrity` |
//! | Database (other) | any other | `Database` |
//! | PoolClosed / PoolTimedOut / other | n/a | `Database` |

use thiserror::Error;

use procura_auth::AuthzError;
use procura_core::{Conflict, DomainError, StockItemId, WarehouseId};

/// Failure inside a store operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The pure transition refused the change; the transaction was rolled back.
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("integrity violation: {0}")]
    Integrity(String),

    /// A persisted row could not be mapped back into the domain.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("storage error: {0}")]
    Storage(String),
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(msg),
                Some("23503") | Some("23514") => StoreError::Integrity(msg),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Database(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Database(format!("timed out acquiring a connection in {operation}"))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Corrupt(format!("{operation}: {err}"))
        }
        _ => StoreError::Database(format!("sqlx error in {operation}: {err}")),
    }
}

/// Error surfaced to collaborators (UI, batch jobs, the provisioning binary).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(Conflict),

    #[error("no inventory recorded for item {stock_item_id} in warehouse {warehouse_id}")]
    UninitializedInventory {
        warehouse_id: WarehouseId,
        stock_item_id: StockItemId,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn conflict(&self) -> Option<&Conflict> {
        match self {
            ServiceError::Conflict(c) => Some(c),
            _ => None,
        }
    }
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                ServiceError::Validation(msg)
            }
            DomainError::InvariantViolation(msg) => ServiceError::Internal(msg),
            DomainError::NotFound(what) => ServiceError::NotFound(what),
            DomainError::Conflict(conflict) => ServiceError::Conflict(conflict),
            DomainError::UninitializedInventory {
                warehouse_id,
                stock_item_id,
            } => ServiceError::UninitializedInventory {
                warehouse_id,
                stock_item_id,
            },
            DomainError::Unauthorized(msg) => ServiceError::Unauthorized(msg),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Domain(err) => err.into(),
            StoreError::Duplicate(msg) => ServiceError::Conflict(Conflict::Duplicate(msg)),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<AuthzError> for ServiceError {
    fn from(value: AuthzError) -> Self {
        ServiceError::Unauthorized(value.to_string())
    }
}
