//! Warehouse domain module (stock ledger + supply fulfillment rules).
//!
//! Pure, deterministic rules for per-warehouse stock balances, the append-only
//! movement log, the stock catalog and partial supply runs against approved
//! warehouse-supply requests. Locking and persistence live in `procura-infra`.

pub mod catalog;
pub mod ledger;
pub mod supply;

pub use catalog::{Department, StockItem, Warehouse, lot_key, name_key};
pub use ledger::{
    Direction, LedgerChanges, LedgerDraft, LedgerOutcome, LedgerWarning, MissingStockPolicy, MovementReference,
    Reconciliation, StockBook, StockLevel, StockMovement, missing_level, signed_sum,
};
pub use supply::{
    LineProgress, PlannedSupply, SuppliedItem, SuppliedLine, SupplyLine, SupplyProgress,
    SupplyReport, ensure_suppliable, is_fully_supplied, plan_supply, supplied_totals,
    supply_progress,
};
