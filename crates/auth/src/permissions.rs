use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are modeled as opaque strings (e.g. "stock.receive").
/// A special wildcard permission `"*"` can be used by policy layers to indicate
/// "allow all" without hardcoding domain permissions into grants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capabilities consumed by the core.
///
/// Which principal holds which capability is decided outside the core; these
/// are only the names the core asks the oracle about.
pub mod names {
    use super::Permission;

    pub const WILDCARD: Permission = Permission::from_static("*");

    pub const REQUESTS_SUBMIT: Permission = Permission::from_static("requests.submit");
    pub const REQUESTS_VIEW: Permission = Permission::from_static("requests.view");

    /// Decide any approval step, not only the ones assigned to the caller.
    pub const APPROVALS_MANAGE: Permission = Permission::from_static("approvals.manage");
    pub const APPROVALS_FLAG_URGENT: Permission = Permission::from_static("approvals.flag_urgent");
    pub const APPROVALS_OVERRIDE_COST: Permission =
        Permission::from_static("approvals.override_cost");

    /// Decide line items of a request without being its active approver.
    pub const ITEMS_DECIDE: Permission = Permission::from_static("items.decide");

    pub const CATALOG_MANAGE: Permission = Permission::from_static("catalog.manage");
    pub const STOCK_VIEW: Permission = Permission::from_static("stock.view");
    pub const STOCK_RECEIVE: Permission = Permission::from_static("stock.receive");
    pub const STOCK_ISSUE: Permission = Permission::from_static("stock.issue");
    pub const WAREHOUSE_SUPPLY: Permission = Permission::from_static("warehouse.supply");

    pub const RECALLS_CREATE: Permission = Permission::from_static("recalls.create");
    pub const RECALLS_VIEW: Permission = Permission::from_static("recalls.view");
    pub const RECALLS_WAREHOUSE: Permission = Permission::from_static("recalls.warehouse");
    pub const RECALLS_PROCUREMENT: Permission = Permission::from_static("recalls.procurement");
}
