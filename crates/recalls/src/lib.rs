//! Recalls domain module (defective-lot recalls and lot quarantine).
//!
//! A recall moves one way: department → warehouse → procurement. Quarantine is
//! an orthogonal flag that blocks issuance of the lot whatever the status.

pub mod recall;

pub use recall::{
    ItemRecall, NewRecall, RecallFilter, RecallStatus, RecallType, RecallView,
};
