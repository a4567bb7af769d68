//! `procura-auth`: the authorization boundary consumed by the core.
//!
//! Authentication and grant resolution live outside the core. This crate only
//! names the capabilities the core asks about and defines the oracle it asks.

pub mod oracle;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use oracle::{require, require_any, AuthzError, PermissionOracle, StaticPermissions};
pub use permissions::{names, Permission};
pub use principal::Actor;
pub use roles::{may_forward_maintenance, Role};
