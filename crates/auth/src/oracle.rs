use std::collections::HashSet;

use thiserror::Error;

use crate::{Permission, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),

    #[error("forbidden: none of the permissions [{0}] is granted")]
    ForbiddenAny(String),

    #[error("forbidden: {0}")]
    Policy(String),
}

/// Capability oracle supplied by the caller's identity.
///
/// The core never inspects how grants were derived (tokens, role tables, ...);
/// it only asks yes/no questions.
pub trait PermissionOracle: Send + Sync {
    fn has_permission(&self, permission: &Permission) -> bool;

    fn has_any_permission(&self, permissions: &[Permission]) -> bool {
        permissions.iter().any(|p| self.has_permission(p))
    }

    /// Roles carried by the identity, used only for explicit allow-lists.
    fn roles(&self) -> &[Role] {
        &[]
    }
}

impl<O> PermissionOracle for &O
where
    O: PermissionOracle + ?Sized,
{
    fn has_permission(&self, permission: &Permission) -> bool {
        (**self).has_permission(permission)
    }

    fn has_any_permission(&self, permissions: &[Permission]) -> bool {
        (**self).has_any_permission(permissions)
    }

    fn roles(&self) -> &[Role] {
        (**self).roles()
    }
}

/// Require a single capability.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn require(oracle: &dyn PermissionOracle, required: &Permission) -> Result<(), AuthzError> {
    if oracle.has_permission(required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

/// Require at least one of several capabilities.
pub fn require_any(
    oracle: &dyn PermissionOracle,
    required: &[Permission],
) -> Result<(), AuthzError> {
    if oracle.has_any_permission(required) {
        Ok(())
    } else {
        let names: Vec<&str> = required.iter().map(|p| p.as_str()).collect();
        Err(AuthzError::ForbiddenAny(names.join(", ")))
    }
}

/// Oracle backed by an explicit grant set.
///
/// Used by callers that already resolved the identity's permissions, and by
/// tests. The wildcard permission `"*"` grants everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticPermissions {
    granted: HashSet<Permission>,
    roles: Vec<Role>,
}

impl StaticPermissions {
    pub fn new(granted: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            granted: granted.into_iter().collect(),
            roles: Vec::new(),
        }
    }

    /// Oracle that answers yes to everything.
    pub fn all() -> Self {
        Self::new([crate::names::WILDCARD])
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    pub fn grant(&mut self, permission: Permission) {
        self.granted.insert(permission);
    }
}

impl PermissionOracle for StaticPermissions {
    fn has_permission(&self, permission: &Permission) -> bool {
        self.granted.contains(&crate::names::WILDCARD) || self.granted.contains(permission)
    }

    fn roles(&self) -> &[Role] {
        &self.roles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names;

    #[test]
    fn wildcard_grants_everything() {
        let oracle = StaticPermissions::all();
        assert!(require(&oracle, &names::STOCK_ISSUE).is_ok());
        assert!(require_any(&oracle, &[names::RECALLS_PROCUREMENT]).is_ok());
    }

    #[test]
    fn missing_permission_is_reported_by_name() {
        let oracle = StaticPermissions::new([names::STOCK_VIEW]);
        let err = require(&oracle, &names::STOCK_RECEIVE).unwrap_err();
        assert_eq!(err, AuthzError::Forbidden("stock.receive".to_string()));
    }

    #[test]
    fn any_of_accepts_a_single_match() {
        let oracle = StaticPermissions::new([names::RECALLS_PROCUREMENT]);
        assert!(require_any(&oracle, &[names::RECALLS_WAREHOUSE, names::RECALLS_PROCUREMENT]).is_ok());
        assert!(matches!(
            require_any(&oracle, &[names::RECALLS_WAREHOUSE]),
            Err(AuthzError::ForbiddenAny(_))
        ));
    }
}
