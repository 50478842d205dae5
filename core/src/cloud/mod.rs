//! Cloud reconciler: decides whether the local or the cloud copy of the
//! active slot wins.
//!
//! FLOW (phased, for embedders that keep the game running during the
//! network round trip):
//!   begin_check  → lease the slot, note its revision
//!   fetch        → async read of the user's root document
//!   finish_*     → compare against the CURRENT local state and decide
//!   send         → async write, for pushes only
//!
//! RULES:
//!   - Push and pull use different conflict predicates. They are mirror
//!     images on the progress axis, not copies of each other.
//!   - An absent comparison always surfaces as invalid cloud data and never
//!     auto-resolves.
//!   - A push captures local state before the network write begins.
//!   - An empty cloud slot is never pulled over a local save.

mod compare;
mod lock;
mod remote;

pub use compare::{compare_saves, DefaultProgressChecker, ProgressChecker, SaveComparison, Side};
pub use lock::{SlotLease, SlotLocks};
pub use remote::{legacy_path, web_path, MemoryRemote, RemoteStore, SqliteRemote};

use crate::{
    clock::{Clock, Interval},
    codec,
    config::SaveConfig,
    error::{SaveError, SaveResult},
    event::SaveEvent,
    player::PlayerState,
    storage::StorageManager,
    types::{Millis, SlotId, UserId},
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: UserId,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

/// Session-only knowledge about the cloud copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloudRecord {
    /// Fingerprint of the slot save last pushed to or pulled from the cloud.
    pub last_known_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Save,
    Load,
}

/// The player's answer to a conflict prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Save: local replaces cloud. Load: cloud replaces local.
    Overwrite,
    Keep,
}

/// A decision the player has to make.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudConflict {
    pub id:         Uuid,
    pub direction:  Direction,
    pub slot:       SlotId,
    /// `None` when the cloud data could not be compared.
    pub comparison: Option<SaveComparison>,
    pub cloud:      Option<PlayerState>,
    pub local:      PlayerState,
}

/// An in-flight check. Holds the slot lease until it is finished or dropped.
#[derive(Debug)]
pub struct CheckTicket {
    pub id:        Uuid,
    pub direction: Direction,
    pub slot:      SlotId,
    revision:      u64,
    force_modal:   bool,
    user_id:       UserId,
    lease:         SlotLease,
}

#[derive(Debug)]
pub struct FetchedCloud {
    ticket:   CheckTicket,
    document: Option<String>,
}

/// Everything needed to write the cloud copy, captured synchronously.
#[derive(Debug)]
pub struct PushRequest {
    pub id:    Uuid,
    pub slot:  SlotId,
    user_id:   UserId,
    payload:   String,
    slot_hash: String,
    hide_name: bool,
    _lease:    Option<SlotLease>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReceipt {
    pub slot: SlotId,
    pub hash: String,
}

#[derive(Debug)]
pub enum SaveCheckOutcome {
    /// Ready to send (phased API).
    Push(PushRequest),
    Pushed(PushReceipt),
    Conflict(CloudConflict),
    InvalidCloudData(CloudConflict),
    /// A conflict exists but the player neither wants prompts nor forced
    /// overwrites. Nothing was written.
    Skipped,
    /// The active slot changed while the fetch was in flight.
    Discarded,
}

#[derive(Debug)]
pub enum LoadCheckOutcome {
    NoCloudSave,
    Loaded { slot: SlotId },
    Conflict(CloudConflict),
    InvalidCloudData(CloudConflict),
    EmptyCloudSlot { slot: SlotId },
    Discarded,
}

#[derive(Debug)]
pub enum ResolveOutcome {
    Pushed(PushReceipt),
    Loaded { slot: SlotId },
    Kept,
    Discarded,
}

pub struct CloudReconciler {
    remote:          Box<dyn RemoteStore>,
    checker:         Box<dyn ProgressChecker>,
    clock:           Arc<dyn Clock>,
    identity:        Option<Identity>,
    record:          CloudRecord,
    last_cloud_save: Millis,
    interval:        Interval,
    locks:           SlotLocks,
    events:          Vec<SaveEvent>,
}

impl CloudReconciler {
    pub fn new(remote: Box<dyn RemoteStore>, config: &SaveConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        Self {
            remote,
            checker: Box::new(DefaultProgressChecker::default()),
            interval: Interval::new(config.cloud_save_interval_ms, now),
            clock,
            identity: None,
            record: CloudRecord::default(),
            last_cloud_save: now,
            locks: SlotLocks::default(),
            events: Vec::new(),
        }
    }

    pub fn with_checker(mut self, checker: Box<dyn ProgressChecker>) -> Self {
        self.checker = checker;
        self
    }

    // ── Identity ───────────────────────────────────────────────

    pub fn login(&mut self, identity: Identity) {
        log::info!("cloud login as {}", identity.id);
        self.identity = Some(identity);
    }

    pub fn logout(&mut self) {
        if let Some(identity) = self.identity.take() {
            log::info!("cloud logout for {}", identity.id);
        }
        self.record = CloudRecord::default();
    }

    pub fn logged_in(&self) -> bool {
        self.identity.is_some()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    // ── Session state ──────────────────────────────────────────

    pub fn record(&self) -> &CloudRecord {
        &self.record
    }

    pub fn last_cloud_save(&self) -> Millis {
        self.last_cloud_save
    }

    pub fn is_busy(&self, slot: SlotId) -> bool {
        self.locks.is_busy(slot)
    }

    pub fn cloud_save_due(&self) -> bool {
        self.logged_in() && self.interval.is_due(self.clock.now_ms())
    }

    /// Forget the session fingerprint and restart the cloud-save schedule.
    pub fn reset_temp_state(&mut self) {
        let now = self.clock.now_ms();
        self.record.last_known_hash = None;
        self.last_cloud_save = now;
        self.interval.restart(now);
        self.events.push(SaveEvent::CloudStateReset);
    }

    pub fn drain_events(&mut self) -> Vec<SaveEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn compare(
        &self,
        cloud: &PlayerState,
        local: &PlayerState,
        cloud_hash: Option<&str>,
    ) -> Option<SaveComparison> {
        compare_saves(
            self.checker.as_ref(),
            cloud,
            local,
            self.record.last_known_hash.as_deref(),
            cloud_hash,
        )
    }

    // ── Phased API ─────────────────────────────────────────────

    pub fn begin_check(
        &self,
        direction: Direction,
        storage: &StorageManager,
        force_modal: bool,
    ) -> SaveResult<CheckTicket> {
        let identity = self.identity.as_ref().ok_or(SaveError::NotLoggedIn)?;
        let slot = storage.current_slot();
        if storage.is_write_protected() {
            return Err(SaveError::WriteProtected { slot });
        }
        let lease = self.locks.try_acquire(slot)?;
        let ticket = CheckTicket {
            id: Uuid::new_v4(),
            direction,
            slot,
            revision: storage.revision(slot),
            force_modal,
            user_id: identity.id.clone(),
            lease,
        };
        log::debug!("cloud {direction:?} check {} on slot {slot}", ticket.id);
        Ok(ticket)
    }

    pub async fn fetch(&self, ticket: CheckTicket) -> SaveResult<FetchedCloud> {
        let document = self.remote.get(&web_path(&ticket.user_id)).await?;
        Ok(FetchedCloud { ticket, document })
    }

    pub fn finish_save_check(
        &mut self,
        fetched: FetchedCloud,
        storage: &mut StorageManager,
    ) -> SaveResult<SaveCheckOutcome> {
        let FetchedCloud { ticket, document } = fetched;
        if self.is_stale(&ticket, storage) {
            return Ok(SaveCheckOutcome::Discarded);
        }
        let slot = ticket.slot;

        let Some(text) = document else {
            return self.push_outcome(storage, ticket);
        };
        let root = match codec::decode_root(&text) {
            Ok(stored) => stored.into_root(),
            Err(e) => {
                log::warn!("cloud root for slot {slot} could not be decoded: {e}");
                return Ok(SaveCheckOutcome::InvalidCloudData(
                    self.conflict(&ticket, None, None, storage),
                ));
            }
        };
        let Some(cloud_save) = root.slot(slot).cloned() else {
            return self.push_outcome(storage, ticket);
        };

        let cloud_hash = codec::fingerprint(&cloud_save)?;
        if self.record.last_known_hash.is_none() {
            self.record.last_known_hash = Some(cloud_hash.clone());
        }
        let local = storage.player();
        let Some(comparison) = self.compare(&cloud_save, local, Some(&cloud_hash)) else {
            return Ok(SaveCheckOutcome::InvalidCloudData(self.conflict(
                &ticket,
                None,
                Some(cloud_save),
                storage,
            )));
        };

        // Pushing would replace a cloud save that is newer, farther, named
        // differently, or changed elsewhere.
        let has_conflict = comparison.older == Side::Cloud
            || comparison.farther_ahead == Side::Cloud
            || comparison.different_name
            || comparison.hash_mismatch;

        if ticket.force_modal || (has_conflict && local.show_cloud_modal()) {
            Ok(SaveCheckOutcome::Conflict(self.conflict(
                &ticket,
                Some(comparison),
                Some(cloud_save),
                storage,
            )))
        } else if !has_conflict || local.force_cloud_overwrite() {
            self.push_outcome(storage, ticket)
        } else {
            log::debug!("cloud save for slot {slot} skipped: unprompted conflict");
            Ok(SaveCheckOutcome::Skipped)
        }
    }

    pub fn finish_load_check(
        &mut self,
        fetched: FetchedCloud,
        storage: &mut StorageManager,
    ) -> SaveResult<LoadCheckOutcome> {
        let FetchedCloud { ticket, document } = fetched;
        if self.is_stale(&ticket, storage) {
            return Ok(LoadCheckOutcome::Discarded);
        }
        let slot = ticket.slot;

        let Some(text) = document else {
            let user = self.user_label(storage.player());
            self.events.push(SaveEvent::NoCloudSave { user });
            return Ok(LoadCheckOutcome::NoCloudSave);
        };
        let root = match codec::decode_root(&text) {
            Ok(stored) => stored.into_root(),
            Err(e) => {
                log::warn!("cloud root for slot {slot} could not be decoded: {e}");
                return Ok(LoadCheckOutcome::InvalidCloudData(
                    self.conflict(&ticket, None, None, storage),
                ));
            }
        };
        let Some(cloud_save) = root.slot(slot).cloned() else {
            log::debug!("cloud slot {slot} is empty; local save kept");
            return Ok(LoadCheckOutcome::EmptyCloudSlot { slot });
        };

        let Some(comparison) = self.compare(&cloud_save, storage.player(), None) else {
            return Ok(LoadCheckOutcome::InvalidCloudData(self.conflict(
                &ticket,
                None,
                Some(cloud_save),
                storage,
            )));
        };

        // Pulling would replace a local save that is newer, not strictly
        // behind, or named differently.
        let has_conflict = comparison.older == Side::Local
            || comparison.farther_ahead != Side::Cloud
            || comparison.different_name;

        if has_conflict {
            Ok(LoadCheckOutcome::Conflict(self.conflict(
                &ticket,
                Some(comparison),
                Some(cloud_save),
                storage,
            )))
        } else {
            self.apply_pull(storage, slot, cloud_save)?;
            Ok(LoadCheckOutcome::Loaded { slot })
        }
    }

    /// Write a prepared push. Updates the session fingerprint only once the
    /// remote accepted the write.
    pub async fn send(&mut self, request: PushRequest) -> SaveResult<PushReceipt> {
        self.remote
            .set(&web_path(&request.user_id), &request.payload)
            .await?;

        let now = self.clock.now_ms();
        self.record.last_known_hash = Some(request.slot_hash.clone());
        self.last_cloud_save = now;
        self.interval.restart(now);
        let user = if request.hide_name {
            None
        } else {
            self.identity.as_ref().and_then(|i| i.display_name.clone())
        };
        log::info!("game saved (slot {}) to cloud", request.slot + 1);
        self.events.push(SaveEvent::CloudSaved {
            slot: request.slot,
            user,
        });
        Ok(PushReceipt {
            slot: request.slot,
            hash: request.slot_hash,
        })
    }

    // ── One-shot operations ────────────────────────────────────

    pub async fn save_check(
        &mut self,
        storage: &mut StorageManager,
        force_modal: bool,
    ) -> SaveResult<SaveCheckOutcome> {
        let ticket = self.begin_check(Direction::Save, storage, force_modal)?;
        let fetched = self.fetch(ticket).await?;
        match self.finish_save_check(fetched, storage)? {
            SaveCheckOutcome::Push(request) => Ok(SaveCheckOutcome::Pushed(self.send(request).await?)),
            other => Ok(other),
        }
    }

    pub async fn load_check(&mut self, storage: &mut StorageManager) -> SaveResult<LoadCheckOutcome> {
        let ticket = self.begin_check(Direction::Load, storage, false)?;
        let fetched = self.fetch(ticket).await?;
        self.finish_load_check(fetched, storage)
    }

    /// Unconditionally push the local root. `None` when the push was
    /// skipped for a transient UI state.
    pub async fn push(&mut self, storage: &mut StorageManager) -> SaveResult<Option<PushReceipt>> {
        if self.identity.is_none() {
            return Err(SaveError::NotLoggedIn);
        }
        let lease = self.locks.try_acquire(storage.current_slot())?;
        match self.prepare_push(storage, Some(lease))? {
            Some(request) => Ok(Some(self.send(request).await?)),
            None => Ok(None),
        }
    }

    pub async fn resolve_conflict(
        &mut self,
        conflict: CloudConflict,
        resolution: Resolution,
        storage: &mut StorageManager,
    ) -> SaveResult<ResolveOutcome> {
        if resolution == Resolution::Keep {
            return Ok(ResolveOutcome::Kept);
        }
        if storage.current_slot() != conflict.slot {
            log::warn!(
                "conflict {} was for slot {}, now on slot {}; discarded",
                conflict.id,
                conflict.slot,
                storage.current_slot()
            );
            return Ok(ResolveOutcome::Discarded);
        }
        let lease = self.locks.try_acquire(conflict.slot)?;
        match conflict.direction {
            Direction::Save => match self.prepare_push(storage, Some(lease))? {
                Some(request) => Ok(ResolveOutcome::Pushed(self.send(request).await?)),
                None => Ok(ResolveOutcome::Kept),
            },
            Direction::Load => match conflict.cloud {
                Some(cloud) => {
                    self.apply_pull(storage, conflict.slot, cloud)?;
                    Ok(ResolveOutcome::Loaded { slot: conflict.slot })
                }
                None => {
                    log::warn!("conflict {} has no readable cloud save to load", conflict.id);
                    Ok(ResolveOutcome::Kept)
                }
            },
        }
    }

    /// Read the legacy bundled save for the logged-in user, if any.
    pub async fn load_legacy(&self) -> SaveResult<Option<PlayerState>> {
        let identity = self.identity.as_ref().ok_or(SaveError::NotLoggedIn)?;
        let Some(blob) = self.remote.get(&legacy_path(&identity.id)).await? else {
            return Ok(None);
        };
        let text = codec::decode_bundle(&blob)?;
        let save = match codec::decode::<PlayerState>(&text) {
            Ok(save) => save,
            Err(_) => serde_json::from_str(&text)?,
        };
        Ok(Some(save))
    }

    // ── Internals ──────────────────────────────────────────────

    /// A fetch is stale when the slot it was for is no longer active.
    /// Local edits made during the fetch are not stale: the decision is
    /// always taken against the current local state.
    fn is_stale(&self, ticket: &CheckTicket, storage: &StorageManager) -> bool {
        if storage.current_slot() != ticket.slot {
            log::warn!(
                "cloud check {} for slot {} finished after a switch to slot {}; discarded",
                ticket.id,
                ticket.slot,
                storage.current_slot()
            );
            return true;
        }
        if storage.revision(ticket.slot) != ticket.revision {
            log::warn!(
                "slot {} changed during cloud check {}; comparing against current state",
                ticket.slot,
                ticket.id
            );
        }
        debug_assert_eq!(ticket.lease.slot(), ticket.slot);
        false
    }

    fn push_outcome(
        &mut self,
        storage: &mut StorageManager,
        ticket: CheckTicket,
    ) -> SaveResult<SaveCheckOutcome> {
        match self.prepare_push(storage, Some(ticket.lease))? {
            Some(mut request) => {
                request.id = ticket.id;
                Ok(SaveCheckOutcome::Push(request))
            }
            None => Ok(SaveCheckOutcome::Skipped),
        }
    }

    /// Capture the whole local root for upload.
    fn prepare_push(
        &mut self,
        storage: &mut StorageManager,
        lease: Option<SlotLease>,
    ) -> SaveResult<Option<PushRequest>> {
        let identity = self.identity.as_ref().ok_or(SaveError::NotLoggedIn)?;
        if storage.guards.transient_ui_active || storage.is_write_protected() {
            return Ok(None);
        }
        let user_id = identity.id.clone();
        if storage.player().sync_save_intervals() {
            storage.save(true, false)?;
        }
        let slot = storage.current_slot();
        let root = storage.root();
        let slot_hash = codec::fingerprint(storage.player())?;
        Ok(Some(PushRequest {
            id: Uuid::new_v4(),
            slot,
            user_id,
            payload: codec::encode(&root)?,
            slot_hash,
            hide_name: storage.player().hide_google_name(),
            _lease: lease,
        }))
    }

    fn apply_pull(
        &mut self,
        storage: &mut StorageManager,
        slot: SlotId,
        cloud: PlayerState,
    ) -> SaveResult<()> {
        let hash = codec::fingerprint(&cloud)?;
        storage.overwrite_slot(slot, Some(cloud))?;
        self.record.last_known_hash = Some(hash);
        let user = self.user_label(storage.player());
        log::info!("cloud save (slot {}) loaded", slot + 1);
        self.events.push(SaveEvent::CloudLoaded { slot, user });
        Ok(())
    }

    fn conflict(
        &self,
        ticket: &CheckTicket,
        comparison: Option<SaveComparison>,
        cloud: Option<PlayerState>,
        storage: &StorageManager,
    ) -> CloudConflict {
        if comparison.is_none() {
            log::warn!("cloud data for slot {} is invalid; asking the player", ticket.slot);
        }
        CloudConflict {
            id: ticket.id,
            direction: ticket.direction,
            slot: ticket.slot,
            comparison,
            cloud,
            local: storage.player().clone(),
        }
    }

    fn user_label(&self, player: &PlayerState) -> Option<String> {
        if player.hide_google_name() {
            None
        } else {
            self.identity.as_ref().and_then(|i| i.display_name.clone())
        }
    }
}
