use serde::{Deserialize, Serialize};

use procura_core::{DepartmentId, UserId, WarehouseId};

/// The identity acting on the core.
///
/// Authentication happens elsewhere; by the time an `Actor` reaches the core it
/// only carries who the caller is and where they are assigned. Capability
/// checks go through a separate [`PermissionOracle`](crate::PermissionOracle).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    /// Warehouse the caller is assigned to (storekeepers).
    pub warehouse_id: Option<WarehouseId>,
    /// Department the caller belongs to (department staff).
    pub department_id: Option<DepartmentId>,
}

impl Actor {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            warehouse_id: None,
            department_id: None,
        }
    }

    pub fn in_warehouse(mut self, warehouse_id: WarehouseId) -> Self {
        self.warehouse_id = Some(warehouse_id);
        self
    }

    pub fn in_department(mut self, department_id: DepartmentId) -> Self {
        self.department_id = Some(department_id);
        self
    }
}
