use chrono::Utc;
use tracing::info;

use procura_auth::{Actor, PermissionOracle, names, require, require_any};
use procura_core::{RecallId, UserId};
use procura_recalls::{ItemRecall, NewRecall, RecallFilter, RecallView};

use super::{Procura, ServiceResult};
use crate::audit::{AuditEntry, actions};
use crate::error::ServiceError;
use crate::store::ProcuraStore;

fn lot_label(recall: &ItemRecall) -> String {
    match &recall.lot_number {
        Some(lot) => format!("{} (lot {lot})", recall.item_name),
        None => recall.item_name.clone(),
    }
}

impl<S: ProcuraStore> Procura<S> {
    /// A department reports a defective lot to its warehouse.
    pub async fn create_department_recall(
        &self,
        actor: &Actor,
        oracle: &dyn PermissionOracle,
        mut new: NewRecall,
    ) -> ServiceResult<ItemRecall> {
        require(oracle, &names::RECALLS_CREATE)?;
        new.department_id = new.department_id.or(actor.department_id);

        let now = Utc::now();
        let recall = ItemRecall::from_department(RecallId::new(), new, actor.user_id, now)?;
        let audit = AuditEntry::new(
            actor.user_id,
            None,
            actions::RECALL_CREATED,
            format!(
                "Department recall of {} x{}: {}",
                lot_label(&recall),
                recall.quantity,
                recall.reason
            ),
            now,
        );
        self.store.insert_recall(&recall, &audit).await?;

        info!(recall_id = %recall.id, item = %recall.item_name, "department recall created");
        Ok(recall)
    }

    /// The warehouse raises a recall to procurement; the lot is quarantined at once.
    pub async fn create_warehouse_recall(
        &self,
        actor: &Actor,
        oracle: &dyn PermissionOracle,
        mut new: NewRecall,
    ) -> ServiceResult<ItemRecall> {
        require(oracle, &names::RECALLS_WAREHOUSE)?;
        new.warehouse_id = new.warehouse_id.or(actor.warehouse_id);

        let now = Utc::now();
        let recall = ItemRecall::from_warehouse(RecallId::new(), new, actor.user_id, now)?;
        let audit = AuditEntry::new(
            actor.user_id,
            None,
            actions::RECALL_CREATED,
            format!(
                "Warehouse recall of {} x{} escalated to procurement and quarantined: {}",
                lot_label(&recall),
                recall.quantity,
                recall.reason
            ),
            now,
        );
        self.store.insert_recall(&recall, &audit).await?;

        info!(recall_id = %recall.id, item = %recall.item_name, "warehouse recall created");
        self.notify_procurement(
            &format!("Recall: {} quarantined", lot_label(&recall)),
            &format!(
                "The warehouse raised a recall of {} units. Reason: {}. Issuance of the lot is blocked.",
                recall.quantity, recall.reason
            ),
        )
        .await;
        Ok(recall)
    }

    /// Hand a recall to procurement.
    pub async fn escalate_recall(
        &self,
        actor: &Actor,
        oracle: &dyn PermissionOracle,
        recall_id: RecallId,
        notes: Option<String>,
    ) -> ServiceResult<ItemRecall> {
        require(oracle, &names::RECALLS_WAREHOUSE)?;
        let user_id = actor.user_id;
        let recall = self
            .store
            .update_recall(recall_id, move |recall| {
                let now = Utc::now();
                recall.escalate(user_id, notes, now)?;
                let audit = AuditEntry::new(
                    user_id,
                    None,
                    actions::RECALL_ESCALATED,
                    format!("Recall of {} escalated to procurement", lot_label(recall)),
                    now,
                );
                Ok((recall.clone(), audit))
            })
            .await?;

        info!(%recall_id, status = %recall.status, "recall escalated");
        self.notify_procurement(
            &format!("Recall escalated: {}", lot_label(&recall)),
            &format!(
                "A recall of {} units needs procurement action. Reason: {}.",
                recall.quantity, recall.reason
            ),
        )
        .await;
        Ok(recall)
    }

    /// Block issuance of the recalled lot.
    pub async fn quarantine_recall(
        &self,
        actor: &Actor,
        oracle: &dyn PermissionOracle,
        recall_id: RecallId,
        reason: String,
    ) -> ServiceResult<ItemRecall> {
        require_any(oracle, &[names::RECALLS_WAREHOUSE, names::RECALLS_PROCUREMENT])?;
        if reason.trim().is_empty() {
            return Err(ServiceError::Validation(
                "quarantine reason cannot be empty".to_string(),
            ));
        }

        let user_id = actor.user_id;
        let recall = self
            .store
            .update_recall(recall_id, move |recall| {
                let now = Utc::now();
                recall.quarantine(&reason, now)?;
                let audit = AuditEntry::new(
                    user_id,
                    None,
                    actions::RECALL_QUARANTINED,
                    format!("{} quarantined: {}", lot_label(recall), reason.trim()),
                    now,
                );
                Ok((recall.clone(), audit))
            })
            .await?;

        info!(%recall_id, started_at = ?recall.quarantine_started_at, "lot quarantined");
        self.notify_procurement(
            &format!("Quarantine: {}", lot_label(&recall)),
            &format!(
                "Issuance is blocked. Reason: {}.",
                recall.quarantine_reason.as_deref().unwrap_or_default()
            ),
        )
        .await;
        Ok(recall)
    }

    /// The warehouse declines a department recall it has not acted on.
    pub async fn reject_recall(
        &self,
        actor: &Actor,
        oracle: &dyn PermissionOracle,
        recall_id: RecallId,
        notes: Option<String>,
    ) -> ServiceResult<ItemRecall> {
        require(oracle, &names::RECALLS_WAREHOUSE)?;
        let recall = self
            .close_recall(actor.user_id, recall_id, actions::RECALL_REJECTED, move |recall, user_id, now| {
                recall.reject(user_id, notes, now)
            })
            .await?;
        info!(%recall_id, "recall rejected");
        Ok(recall)
    }

    /// Procurement closes the recall and lifts any quarantine.
    pub async fn resolve_recall(
        &self,
        actor: &Actor,
        oracle: &dyn PermissionOracle,
        recall_id: RecallId,
        notes: Option<String>,
    ) -> ServiceResult<ItemRecall> {
        require(oracle, &names::RECALLS_PROCUREMENT)?;
        let recall = self
            .close_recall(actor.user_id, recall_id, actions::RECALL_RESOLVED, move |recall, user_id, now| {
                recall.resolve(user_id, notes, now)
            })
            .await?;
        info!(%recall_id, "recall resolved");
        Ok(recall)
    }

    async fn close_recall<F>(
        &self,
        user_id: UserId,
        recall_id: RecallId,
        action: &'static str,
        transition: F,
    ) -> ServiceResult<ItemRecall>
    where
        F: FnOnce(&mut ItemRecall, UserId, chrono::DateTime<Utc>) -> procura_core::DomainResult<()>
            + Send
            + 'static,
    {
        Ok(self
            .store
            .update_recall(recall_id, move |recall| {
                let now = Utc::now();
                transition(recall, user_id, now)?;
                let audit = AuditEntry::new(
                    user_id,
                    None,
                    action,
                    format!("Recall of {} is now {}", lot_label(recall), recall.status),
                    now,
                );
                Ok((recall.clone(), audit))
            })
            .await?)
    }

    pub async fn recall(
        &self,
        oracle: &dyn PermissionOracle,
        recall_id: RecallId,
    ) -> ServiceResult<RecallView> {
        require(oracle, &names::RECALLS_VIEW)?;
        self.store
            .get_recall(recall_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("recall {recall_id}")))
    }

    /// Newest first.
    pub async fn list_recalls(
        &self,
        oracle: &dyn PermissionOracle,
        filter: &RecallFilter,
    ) -> ServiceResult<Vec<RecallView>> {
        require(oracle, &names::RECALLS_VIEW)?;
        Ok(self.store.list_recalls(filter).await?)
    }

    pub async fn is_lot_quarantined(
        &self,
        oracle: &dyn PermissionOracle,
        item_name: &str,
        lot_number: &str,
    ) -> ServiceResult<bool> {
        require_any(
            oracle,
            &[names::RECALLS_VIEW, names::WAREHOUSE_SUPPLY, names::STOCK_ISSUE],
        )?;
        Ok(self.store.is_lot_quarantined(item_name, lot_number).await?)
    }
}
