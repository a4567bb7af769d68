use async_trait::async_trait;
use sqlx::Row;
use tracing::instrument;

use procura_core::{Conflict, DepartmentId, DomainError, StockItemId, WarehouseId};
use procura_warehouse::{Department, StockItem, Warehouse, name_key};

use super::{PostgresStore, abort, commit, rows};
use crate::error::{StoreError, map_sqlx_error};
use crate::store::CatalogStore;

#[async_trait]
impl CatalogStore for PostgresStore {
    #[instrument(skip(self), err)]
    async fn register_stock_item(&self, name: &str) -> Result<StockItem, StoreError> {
        let item = StockItem::new(StockItemId::new(), name)?;
        let mut tx = self.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO stock_items (id, name, name_key, available_quantity)
            VALUES ($1, $2, $3, 0)
            ON CONFLICT (name_key) DO NOTHING
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(&item.name)
        .bind(name_key(&item.name))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("register_stock_item", e))?;

        if inserted.rows_affected() == 0 {
            let conflict = Conflict::Duplicate(format!("stock item '{}'", item.name));
            return abort(tx, DomainError::from(conflict)).await;
        }
        commit(tx).await?;
        Ok(item)
    }

    #[instrument(skip(self), err)]
    async fn register_warehouse(&self, name: &str) -> Result<Warehouse, StoreError> {
        let warehouse = Warehouse::new(WarehouseId::new(), name)?;
        sqlx::query("INSERT INTO warehouses (id, name) VALUES ($1, $2)")
            .bind(warehouse.id.as_uuid())
            .bind(&warehouse.name)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("register_warehouse", e))?;
        Ok(warehouse)
    }

    #[instrument(skip(self), err)]
    async fn register_department(&self, name: &str) -> Result<Department, StoreError> {
        let department = Department::new(DepartmentId::new(), name)?;
        sqlx::query("INSERT INTO departments (id, name) VALUES ($1, $2)")
            .bind(department.id.as_uuid())
            .bind(&department.name)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("register_department", e))?;
        Ok(department)
    }

    async fn stock_item(&self, id: StockItemId) -> Result<Option<StockItem>, StoreError> {
        let row = sqlx::query("SELECT id, name, available_quantity FROM stock_items WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("stock_item", e))?;
        row.as_ref().map(rows::stock_item).transpose()
    }

    async fn find_stock_item(&self, name: &str) -> Result<Option<StockItem>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, available_quantity FROM stock_items WHERE name_key = $1",
        )
        .bind(name_key(name))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_stock_item", e))?;
        row.as_ref().map(rows::stock_item).transpose()
    }

    async fn warehouse(&self, id: WarehouseId) -> Result<Option<Warehouse>, StoreError> {
        let row = sqlx::query("SELECT name FROM warehouses WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("warehouse", e))?;
        row.map(|r| -> Result<Warehouse, StoreError> {
            Ok(Warehouse {
                id,
                name: r.try_get("name").map_err(|e| map_sqlx_error("warehouse", e))?,
            })
        })
        .transpose()
    }

    async fn department(&self, id: DepartmentId) -> Result<Option<Department>, StoreError> {
        let row = sqlx::query("SELECT name FROM departments WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("department", e))?;
        row.map(|r| -> Result<Department, StoreError> {
            Ok(Department {
                id,
                name: r.try_get("name").map_err(|e| map_sqlx_error("department", e))?,
            })
        })
        .transpose()
    }
}
