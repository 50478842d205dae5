//! Session: the storage manager and the cloud reconciler, composed.
//!
//! RULES:
//!   - Slot switches, imports and hard resets invalidate the cloud
//!     fingerprint, so each one resets the reconciler's temp state.
//!   - None of them may run while a cloud check holds the affected slot.
//!   - Conflicts wait in `pending` until the player resolves them by id.

use crate::{
    cloud::{
        CloudConflict, CloudReconciler, LoadCheckOutcome, Resolution, ResolveOutcome,
        SaveCheckOutcome,
    },
    error::{SaveError, SaveResult},
    event::SaveEvent,
    storage::{LoadOutcome, StorageManager},
    types::SlotId,
};
use std::collections::HashMap;
use uuid::Uuid;

pub struct Session {
    pub storage: StorageManager,
    pub cloud:   CloudReconciler,
    pending:     HashMap<Uuid, CloudConflict>,
}

impl Session {
    pub fn new(storage: StorageManager, cloud: CloudReconciler) -> Self {
        Self {
            storage,
            cloud,
            pending: HashMap::new(),
        }
    }

    pub fn load(&mut self) -> SaveResult<LoadOutcome> {
        self.storage.load()
    }

    pub fn load_slot(&mut self, slot: SlotId) -> SaveResult<LoadOutcome> {
        self.ensure_idle(self.storage.current_slot())?;
        self.ensure_idle(slot)?;
        let outcome = self.storage.load_slot(slot)?;
        self.cloud.reset_temp_state();
        Ok(outcome)
    }

    pub fn import(&mut self, text: &str) -> SaveResult<LoadOutcome> {
        self.ensure_idle(self.storage.current_slot())?;
        let outcome = self.storage.import(text)?;
        if !matches!(outcome, LoadOutcome::Rejected { .. }) {
            self.cloud.reset_temp_state();
        }
        Ok(outcome)
    }

    pub fn import_file(&mut self, path: &std::path::Path) -> SaveResult<Option<LoadOutcome>> {
        self.ensure_idle(self.storage.current_slot())?;
        let outcome = self.storage.import_file(path)?;
        if matches!(&outcome, Some(o) if !matches!(o, LoadOutcome::Rejected { .. })) {
            self.cloud.reset_temp_state();
        }
        Ok(outcome)
    }

    pub fn hard_reset(&mut self) -> SaveResult<LoadOutcome> {
        self.ensure_idle(self.storage.current_slot())?;
        let outcome = self.storage.hard_reset()?;
        self.cloud.reset_temp_state();
        Ok(outcome)
    }

    // ── Cloud ──────────────────────────────────────────────────

    pub async fn save_check(&mut self, force_modal: bool) -> SaveResult<SaveCheckOutcome> {
        let outcome = self.cloud.save_check(&mut self.storage, force_modal).await?;
        if let SaveCheckOutcome::Conflict(c) | SaveCheckOutcome::InvalidCloudData(c) = &outcome {
            self.pending.insert(c.id, c.clone());
        }
        Ok(outcome)
    }

    pub async fn load_check(&mut self) -> SaveResult<LoadCheckOutcome> {
        let outcome = self.cloud.load_check(&mut self.storage).await?;
        if let LoadCheckOutcome::Conflict(c) | LoadCheckOutcome::InvalidCloudData(c) = &outcome {
            self.pending.insert(c.id, c.clone());
        }
        Ok(outcome)
    }

    pub fn pending_conflicts(&self) -> impl Iterator<Item = &CloudConflict> {
        self.pending.values()
    }

    pub async fn resolve_conflict(
        &mut self,
        id: Uuid,
        resolution: Resolution,
    ) -> SaveResult<ResolveOutcome> {
        let conflict = self.pending.remove(&id).ok_or_else(|| {
            SaveError::Other(anyhow::anyhow!("no pending cloud conflict {id}"))
        })?;
        self.cloud
            .resolve_conflict(conflict, resolution, &mut self.storage)
            .await
    }

    /// Events from both halves, storage first.
    pub fn drain_events(&mut self) -> Vec<SaveEvent> {
        let mut events = self.storage.drain_events();
        events.extend(self.cloud.drain_events());
        events
    }

    fn ensure_idle(&self, slot: SlotId) -> SaveResult<()> {
        if self.cloud.is_busy(slot) {
            Err(SaveError::SlotBusy { slot })
        } else {
            Ok(())
        }
    }
}
