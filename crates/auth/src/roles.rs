use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role identifier.
///
/// Roles are opaque strings at this layer. The core only ever compares them
/// against the small allow-lists below; everything else goes through
/// permissions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Roles allowed to forward a maintenance request to a chosen Head of Department.
pub const FORWARDING_ROLES: &[&str] = &[
    "admin",
    "maintenance_manager",
    "maintenance_supervisor",
    "biomedical_engineer",
];

/// Whether any of `roles` is on the maintenance forwarding allow-list.
///
/// Comparison is case-insensitive; role names arrive from identity providers
/// with inconsistent casing.
pub fn may_forward_maintenance(roles: &[Role]) -> bool {
    roles.iter().any(|role| {
        FORWARDING_ROLES
            .iter()
            .any(|allowed| role.as_str().eq_ignore_ascii_case(allowed))
    })
}
