//! Application services.
//!
//! Each operation checks capabilities against the caller's
//! [`PermissionOracle`] and validates its input before any transaction opens,
//! then hands the pure transition to the store as one unit of work.
//! Notifications go out after commit and never undo it.

mod recalls;
mod requests;
mod stock;
mod supply;

use std::sync::Arc;

use procura_auth::{PermissionOracle, names};
use procura_requests::DecisionRights;

use crate::error::ServiceError;
use crate::notify::{NotificationSink, notify_best_effort};
use crate::store::ProcuraStore;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Entry point for collaborators. Generic over the storage backend.
pub struct Procura<S> {
    store: Arc<S>,
    notifier: Arc<dyn NotificationSink>,
    procurement_recipients: Vec<String>,
}

impl<S> Clone for Procura<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            notifier: Arc::clone(&self.notifier),
            procurement_recipients: self.procurement_recipients.clone(),
        }
    }
}

impl<S: ProcuraStore> Procura<S> {
    pub fn new(store: Arc<S>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            store,
            notifier,
            procurement_recipients: Vec::new(),
        }
    }

    /// Addresses notified about recall escalations and quarantines.
    pub fn with_procurement_recipients(mut self, recipients: Vec<String>) -> Self {
        self.procurement_recipients = recipients;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn notify_procurement(&self, subject: &str, body: &str) {
        notify_best_effort(
            self.notifier.as_ref(),
            &self.procurement_recipients,
            subject,
            body,
        )
        .await;
    }
}

fn decision_rights(oracle: &dyn PermissionOracle) -> DecisionRights {
    DecisionRights {
        manage: oracle.has_permission(&names::APPROVALS_MANAGE),
        flag_urgent: oracle.has_permission(&names::APPROVALS_FLAG_URGENT),
        override_cost: oracle.has_permission(&names::APPROVALS_OVERRIDE_COST),
    }
}

#[cfg(test)]
mod fixtures {
    use std::sync::Arc;

    use procura_auth::{Actor, Permission, StaticPermissions};
    use procura_core::UserId;

    use super::Procura;
    use crate::notify::RecordingNotifier;
    use crate::store::InMemoryStore;

    pub(super) const PROCUREMENT: &str = "procurement@hospital.test";

    pub(super) fn service(notifier: Arc<RecordingNotifier>) -> Procura<InMemoryStore> {
        Procura::new(InMemoryStore::arc(), notifier)
            .with_procurement_recipients(vec![PROCUREMENT.to_string()])
    }

    pub(super) fn grants(permissions: impl IntoIterator<Item = Permission>) -> StaticPermissions {
        StaticPermissions::new(permissions)
    }

    pub(super) fn user() -> Actor {
        Actor::new(UserId::new())
    }
}
