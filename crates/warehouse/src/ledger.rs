//! Stock ledger rules: per-warehouse balances plus an append-only movement log.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procura_core::{
    Conflict, DepartmentId, DomainError, DomainResult, MovementId, Quantity, RequestId,
    StockItemId, UserId, WarehouseId,
};

/// Direction of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            other => Err(DomainError::validation(format!("unknown movement direction '{other}'"))),
        }
    }

    /// Sign applied to the movement quantity when summing the log.
    pub fn sign(self) -> i64 {
        match self {
            Direction::In => 1,
            Direction::Out => -1,
        }
    }
}

/// What a movement was for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementReference {
    pub request_id: Option<RequestId>,
    pub department_id: Option<DepartmentId>,
    pub section: Option<String>,
    pub notes: Option<String>,
}

impl MovementReference {
    pub fn note(notes: impl Into<String>) -> Self {
        Self {
            notes: Some(notes.into()),
            ..Self::default()
        }
    }

    pub fn for_request(request_id: RequestId, department_id: Option<DepartmentId>) -> Self {
        Self {
            request_id: Some(request_id),
            department_id,
            ..Self::default()
        }
    }
}

/// Write-once ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub warehouse_id: WarehouseId,
    pub stock_item_id: StockItemId,
    pub direction: Direction,
    pub quantity: i64,
    #[serde(flatten)]
    pub reference: MovementReference,
    pub actor: UserId,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn signed_quantity(&self) -> i64 {
        self.direction.sign() * self.quantity
    }
}

/// Authoritative balance of one item in one warehouse. Never negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub warehouse_id: WarehouseId,
    pub stock_item_id: StockItemId,
    pub item_name: String,
    pub quantity: i64,
    pub updated_by: UserId,
    pub updated_at: DateTime<Utc>,
}

impl StockLevel {
    /// Empty balance row, created on the first increase.
    pub fn open(
        warehouse_id: WarehouseId,
        stock_item_id: StockItemId,
        item_name: impl Into<String>,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            warehouse_id,
            stock_item_id,
            item_name: item_name.into(),
            quantity: 0,
            updated_by: actor,
            updated_at: now,
        }
    }

    pub fn increase(
        &mut self,
        quantity: Quantity,
        actor: UserId,
        reference: MovementReference,
        now: DateTime<Utc>,
    ) -> DomainResult<StockMovement> {
        self.quantity = self.quantity.checked_add(quantity.get()).ok_or_else(|| {
            DomainError::validation(format!(
                "balance of item {} would overflow",
                self.stock_item_id
            ))
        })?;
        Ok(self.record(Direction::In, quantity, actor, reference, now))
    }

    /// Fails with `InsufficientStock` when the balance cannot cover `quantity`.
    pub fn decrease(
        &mut self,
        quantity: Quantity,
        actor: UserId,
        reference: MovementReference,
        now: DateTime<Utc>,
    ) -> DomainResult<StockMovement> {
        if self.quantity < quantity.get() {
            return Err(Conflict::InsufficientStock {
                stock_item_id: self.stock_item_id,
                available: self.quantity,
                requested: quantity.get(),
            }
            .into());
        }
        self.quantity -= quantity.get();
        Ok(self.record(Direction::Out, quantity, actor, reference, now))
    }

    fn record(
        &mut self,
        direction: Direction,
        quantity: Quantity,
        actor: UserId,
        reference: MovementReference,
        now: DateTime<Utc>,
    ) -> StockMovement {
        self.updated_by = actor;
        self.updated_at = now;
        StockMovement {
            id: MovementId::new(),
            warehouse_id: self.warehouse_id,
            stock_item_id: self.stock_item_id,
            direction,
            quantity: quantity.get(),
            reference,
            actor,
            created_at: now,
        }
    }
}

/// How a decrease treats a (warehouse, item) pair with no balance row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingStockPolicy {
    #[default]
    Fail,
    /// Report a warning and leave the ledger untouched (used by fulfillment).
    Skip,
}

/// Non-fatal ledger condition reported instead of a movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerWarning {
    UninitializedInventory {
        warehouse_id: WarehouseId,
        stock_item_id: StockItemId,
    },
    /// The line's item could not be matched to a catalog entry.
    UnmatchedItem { item_name: String },
}

impl core::fmt::Display for LedgerWarning {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LedgerWarning::UninitializedInventory {
                warehouse_id,
                stock_item_id,
            } => write!(
                f,
                "no inventory for item {stock_item_id} in warehouse {warehouse_id}; stock not decremented"
            ),
            LedgerWarning::UnmatchedItem { item_name } => {
                write!(f, "'{item_name}' is not in the stock catalog; stock not decremented")
            }
        }
    }
}

/// Resolve a decrease against a missing balance row.
pub fn missing_level(
    policy: MissingStockPolicy,
    warehouse_id: WarehouseId,
    stock_item_id: StockItemId,
) -> DomainResult<LedgerWarning> {
    match policy {
        MissingStockPolicy::Fail => Err(DomainError::UninitializedInventory {
            warehouse_id,
            stock_item_id,
        }),
        MissingStockPolicy::Skip => Ok(LedgerWarning::UninitializedInventory {
            warehouse_id,
            stock_item_id,
        }),
    }
}

/// Result of a ledger mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LedgerOutcome {
    Moved {
        balance: i64,
        available_quantity: i64,
        movement: StockMovement,
    },
    Skipped { warning: LedgerWarning },
}

impl LedgerOutcome {
    pub fn balance(&self) -> Option<i64> {
        match self {
            LedgerOutcome::Moved { balance, .. } => Some(*balance),
            LedgerOutcome::Skipped { .. } => None,
        }
    }
}

/// Outcome of comparing a balance against its movement log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub warehouse_id: WarehouseId,
    pub stock_item_id: StockItemId,
    pub balance: i64,
    pub movement_sum: i64,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.balance == self.movement_sum
    }
}

pub fn signed_sum<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> i64 {
    movements.into_iter().map(StockMovement::signed_quantity).sum()
}

/// In-process stock book: balances keyed by (warehouse, item) and the full log.
///
/// Backs the in-memory store and the ledger property tests. Callers provide
/// serialization; the book itself is a plain value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockBook {
    levels: BTreeMap<(WarehouseId, StockItemId), StockLevel>,
    movements: Vec<StockMovement>,
}

impl StockBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage writes against the book without touching it.
    pub fn draft(&self) -> LedgerDraft<'_> {
        LedgerDraft {
            book: self,
            levels: BTreeMap::new(),
            movements: Vec::new(),
        }
    }

    /// Write staged changes. Infallible: every check ran while staging.
    pub fn apply(&mut self, changes: LedgerChanges) {
        for level in changes.levels {
            self.levels
                .insert((level.warehouse_id, level.stock_item_id), level);
        }
        self.movements.extend(changes.movements);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn increase(
        &mut self,
        warehouse_id: WarehouseId,
        stock_item_id: StockItemId,
        item_name: &str,
        quantity: i64,
        actor: UserId,
        reference: MovementReference,
        now: DateTime<Utc>,
    ) -> DomainResult<LedgerOutcome> {
        let mut draft = self.draft();
        let outcome = draft.increase(warehouse_id, stock_item_id, item_name, quantity, actor, reference, now)?;
        let changes = draft.finish();
        self.apply(changes);
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn decrease(
        &mut self,
        warehouse_id: WarehouseId,
        stock_item_id: StockItemId,
        quantity: i64,
        actor: UserId,
        reference: MovementReference,
        policy: MissingStockPolicy,
        now: DateTime<Utc>,
    ) -> DomainResult<LedgerOutcome> {
        let mut draft = self.draft();
        let outcome = draft.decrease(warehouse_id, stock_item_id, quantity, actor, reference, policy, now)?;
        let changes = draft.finish();
        self.apply(changes);
        Ok(outcome)
    }

    pub fn level(&self, warehouse_id: WarehouseId, stock_item_id: StockItemId) -> Option<&StockLevel> {
        self.levels.get(&(warehouse_id, stock_item_id))
    }

    pub fn balance(&self, warehouse_id: WarehouseId, stock_item_id: StockItemId) -> Option<i64> {
        self.level(warehouse_id, stock_item_id).map(|l| l.quantity)
    }

    pub fn warehouse_levels(&self, warehouse_id: WarehouseId) -> Vec<StockLevel> {
        self.levels
            .values()
            .filter(|l| l.warehouse_id == warehouse_id)
            .cloned()
            .collect()
    }

    /// Sum of the item's balances over every warehouse.
    pub fn available_quantity(&self, stock_item_id: StockItemId) -> i64 {
        self.levels
            .values()
            .filter(|l| l.stock_item_id == stock_item_id)
            .map(|l| l.quantity)
            .fold(0, i64::saturating_add)
    }

    pub fn movements(&self, warehouse_id: WarehouseId, stock_item_id: StockItemId) -> Vec<StockMovement> {
        self.movements
            .iter()
            .filter(|m| m.warehouse_id == warehouse_id && m.stock_item_id == stock_item_id)
            .cloned()
            .collect()
    }

    pub fn reconcile(&self, warehouse_id: WarehouseId, stock_item_id: StockItemId) -> Reconciliation {
        Reconciliation {
            warehouse_id,
            stock_item_id,
            balance: self.balance(warehouse_id, stock_item_id).unwrap_or(0),
            movement_sum: signed_sum(
                self.movements
                    .iter()
                    .filter(|m| m.warehouse_id == warehouse_id && m.stock_item_id == stock_item_id),
            ),
        }
    }
}

/// Ledger writes staged over a [`StockBook`].
///
/// Touched balances are copied into the draft on first use and movements are
/// buffered, so a multi-line run that fails halfway leaves the book unchanged.
/// [`LedgerDraft::finish`] hands the result to [`StockBook::apply`].
#[derive(Debug)]
pub struct LedgerDraft<'a> {
    book: &'a StockBook,
    levels: BTreeMap<(WarehouseId, StockItemId), StockLevel>,
    movements: Vec<StockMovement>,
}

/// Staged balances and movements, ready for [`StockBook::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerChanges {
    levels: Vec<StockLevel>,
    movements: Vec<StockMovement>,
}

impl LedgerChanges {
    /// Items whose balances changed.
    pub fn stock_item_ids(&self) -> impl Iterator<Item = StockItemId> + '_ {
        self.levels.iter().map(|l| l.stock_item_id)
    }

    pub fn movements(&self) -> &[StockMovement] {
        &self.movements
    }
}

impl LedgerDraft<'_> {
    fn stage(&mut self, key: (WarehouseId, StockItemId)) {
        if self.levels.contains_key(&key) {
            return;
        }
        if let Some(level) = self.book.levels.get(&key) {
            self.levels.insert(key, level.clone());
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn increase(
        &mut self,
        warehouse_id: WarehouseId,
        stock_item_id: StockItemId,
        item_name: &str,
        quantity: i64,
        actor: UserId,
        reference: MovementReference,
        now: DateTime<Utc>,
    ) -> DomainResult<LedgerOutcome> {
        let quantity = Quantity::new(quantity)?;
        let key = (warehouse_id, stock_item_id);
        self.stage(key);
        let level = self
            .levels
            .entry(key)
            .or_insert_with(|| StockLevel::open(warehouse_id, stock_item_id, item_name, actor, now));
        let movement = level.increase(quantity, actor, reference, now)?;
        let balance = level.quantity;
        self.movements.push(movement.clone());
        Ok(LedgerOutcome::Moved {
            balance,
            available_quantity: self.available_quantity(stock_item_id),
            movement,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn decrease(
        &mut self,
        warehouse_id: WarehouseId,
        stock_item_id: StockItemId,
        quantity: i64,
        actor: UserId,
        reference: MovementReference,
        policy: MissingStockPolicy,
        now: DateTime<Utc>,
    ) -> DomainResult<LedgerOutcome> {
        let quantity = Quantity::new(quantity)?;
        let key = (warehouse_id, stock_item_id);
        self.stage(key);
        let Some(level) = self.levels.get_mut(&key) else {
            let warning = missing_level(policy, warehouse_id, stock_item_id)?;
            return Ok(LedgerOutcome::Skipped { warning });
        };
        let movement = level.decrease(quantity, actor, reference, now)?;
        let balance = level.quantity;
        self.movements.push(movement.clone());
        Ok(LedgerOutcome::Moved {
            balance,
            available_quantity: self.available_quantity(stock_item_id),
            movement,
        })
    }

    /// Available quantity as it will be once the draft is applied.
    pub fn available_quantity(&self, stock_item_id: StockItemId) -> i64 {
        let committed = self
            .book
            .levels
            .iter()
            .filter(|(key, _)| key.1 == stock_item_id && !self.levels.contains_key(key))
            .map(|(_, l)| l.quantity);
        let staged = self
            .levels
            .values()
            .filter(|l| l.stock_item_id == stock_item_id)
            .map(|l| l.quantity);
        committed.chain(staged).fold(0, i64::saturating_add)
    }

    pub fn finish(self) -> LedgerChanges {
        LedgerChanges {
            levels: self.levels.into_values().collect(),
            movements: self.movements,
        }
    }
}
