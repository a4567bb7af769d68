//! Stock catalog and reference entities.

use serde::{Deserialize, Serialize};

use procura_core::{DepartmentId, DomainError, DomainResult, Entity, StockItemId, WarehouseId};

/// Catalog entry of a stock item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    pub id: StockItemId,
    pub name: String,
    /// Sum of the item's balances over every warehouse, recomputed by each ledger write.
    pub available_quantity: i64,
}

impl StockItem {
    pub fn new(id: StockItemId, name: &str) -> DomainResult<Self> {
        Ok(Self {
            id,
            name: validate_name(name, "stock item")?,
            available_quantity: 0,
        })
    }

    pub fn matches_name(&self, name: &str) -> bool {
        name_key(&self.name) == name_key(name)
    }
}

impl Entity for StockItem {
    type Id = StockItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub name: String,
}

impl Warehouse {
    pub fn new(id: WarehouseId, name: &str) -> DomainResult<Self> {
        Ok(Self {
            id,
            name: validate_name(name, "warehouse")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub id: DepartmentId,
    pub name: String,
}

impl Department {
    pub fn new(id: DepartmentId, name: &str) -> DomainResult<Self> {
        Ok(Self {
            id,
            name: validate_name(name, "department")?,
        })
    }
}

/// Case-insensitive lookup key for item names.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Normalized lot number for quarantine matching.
pub fn lot_key(lot_number: &str) -> String {
    lot_number.trim().to_uppercase()
}

fn validate_name(name: &str, what: &str) -> DomainResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation(format!("{what} name cannot be empty")));
    }
    Ok(name.to_string())
}
