//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Requests, recalls and stock levels keep their identity while their status,
/// balance or escalation fields change.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
