//! Storage manager: owns the save slots and the active-slot pointer.
//!
//! FLOW:
//!   load:  durable text → codec → migration → validation gate → active state
//!   save:  active state → SaveRoot → codec → durable text
//!
//! RULES:
//!   - Only this module writes the durable save key.
//!   - Every candidate save passes the gate in `load_player_object`.
//!   - Post-load side effects are queued as `SaveEvent`s, never performed.
//!   - A save written by a newer schema is never overwritten.

use crate::{
    clock::{Clock, Interval},
    codec,
    config::SaveConfig,
    error::{MigrationError, SaveError, SaveResult},
    event::SaveEvent,
    migration::MigrationEngine,
    player::PlayerState,
    root::{SaveRoot, StoredRoot},
    store::LocalStore,
    types::{is_valid_slot, Millis, SlotId, SLOT_COUNT},
    validator,
};
use std::sync::Arc;

pub const IMPORT_REJECTED: &str = "Could not load the save (format unrecognized or invalid).";

/// How a save came to be the active state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A fresh DefaultState. `reason` is set when an unusable save was
    /// discarded to get here.
    Initialized { reason: Option<String> },
    /// The save was already at the current schema.
    Restored,
    Migrated { from: u32, to: u32 },
    /// Nothing changed; the candidate was refused.
    Rejected { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    Skipped(SaveSkip),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveSkip {
    SaveDisabled,
    InteractivityDisabled,
    TransientUi,
    /// The slot holds a save from a newer schema.
    WriteProtected,
}

/// Game-end progression, in order.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EndState {
    #[default]
    Playing,
    SaveDisabled,
    InteractivityDisabled,
}

/// Moments in which saving would capture an invalid state.
#[derive(Debug, Default, Clone, Copy)]
pub struct SaveGuards {
    pub end_state: EndState,
    /// Set once the player dismissed the additional ending; re-enables saving.
    pub remove_additional_end: bool,
    /// A selection or progress-bar dialog is open.
    pub transient_ui_active: bool,
    pub credits_ever_closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub file_name: String,
    pub contents: String,
}

pub struct StorageManager {
    store:           Box<dyn LocalStore>,
    config:          SaveConfig,
    clock:           Arc<dyn Clock>,
    migrations:      MigrationEngine,
    /// Inactive slots and the pointer. The active entry is refreshed from
    /// `player` whenever the root is written or handed out.
    root:            SaveRoot,
    player:          PlayerState,
    revisions:       [u64; SLOT_COUNT as usize],
    /// Manual saves since the last load.
    saved:           u32,
    last_save_time:  Millis,
    offline_override: Option<bool>,
    write_protected: bool,
    save_interval:   Interval,
    events:          Vec<SaveEvent>,
    pub guards:      SaveGuards,
}

impl StorageManager {
    pub fn new(store: Box<dyn LocalStore>, config: SaveConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        Self {
            store,
            save_interval: Interval::new(config.save_interval_ms, now),
            config,
            clock,
            migrations: MigrationEngine::standard(),
            root: SaveRoot::default(),
            player: PlayerState::default_start(),
            revisions: [0; SLOT_COUNT as usize],
            saved: 0,
            last_save_time: now,
            offline_override: None,
            write_protected: false,
            events: Vec::new(),
            guards: SaveGuards::default(),
        }
    }

    /// Replace the migration chain (tests and tooling).
    pub fn with_migrations(mut self, migrations: MigrationEngine) -> Self {
        self.migrations = migrations;
        self
    }

    // ── Accessors ──────────────────────────────────────────────

    pub fn config(&self) -> &SaveConfig {
        &self.config
    }

    pub fn now(&self) -> Millis {
        self.clock.now_ms()
    }

    pub fn current_slot(&self) -> SlotId {
        self.root.current
    }

    pub fn player(&self) -> &PlayerState {
        &self.player
    }

    /// Mutable access to the active state. Counts as a mutation of the
    /// active slot.
    pub fn player_mut(&mut self) -> &mut PlayerState {
        self.bump(self.root.current);
        &mut self.player
    }

    /// A slot's save, reading the live state for the active slot.
    pub fn slot(&self, slot: SlotId) -> Option<&PlayerState> {
        if slot == self.root.current && !self.write_protected {
            Some(&self.player)
        } else {
            self.root.slot(slot)
        }
    }

    /// Full root with the active slot up to date. A write-protected slot
    /// is returned exactly as it was read.
    pub fn root(&self) -> SaveRoot {
        let mut root = self.root.clone();
        if !self.write_protected {
            root.set_slot(root.current, Some(self.player.clone()));
        }
        root
    }

    /// Monotonic mutation counter for a slot.
    pub fn revision(&self, slot: SlotId) -> u64 {
        self.revisions.get(slot as usize).copied().unwrap_or(0)
    }

    pub fn last_save_time(&self) -> Millis {
        self.last_save_time
    }

    pub fn is_write_protected(&self) -> bool {
        self.write_protected
    }

    pub fn autosave_due(&self) -> bool {
        self.save_interval.is_due(self.now())
    }

    /// Force offline progress on or off for the next load, regardless of
    /// the save's own option.
    pub fn set_offline_override(&mut self, enabled: Option<bool>) {
        self.offline_override = enabled;
    }

    pub fn drain_events(&mut self) -> Vec<SaveEvent> {
        std::mem::take(&mut self.events)
    }

    // ── Load ───────────────────────────────────────────────────

    /// Read durable storage and install the active slot.
    pub fn load(&mut self) -> SaveResult<LoadOutcome> {
        let Some(text) = self.store.read(self.config.storage_key())? else {
            return self.load_root(None);
        };
        match codec::decode_root(&text) {
            Ok(stored) => self.load_root(Some(stored)),
            Err(e) => {
                log::warn!("stored save could not be decoded, starting fresh: {e}");
                self.root = SaveRoot::default();
                let now = self.now();
                let reason = format!("{} ({e})", validator::DECODE_FAILED);
                let player = self.fresh_start(now, Some(&reason));
                Ok(self.install(player, LoadOutcome::Initialized { reason: Some(reason) }, now))
            }
        }
    }

    pub fn load_root(&mut self, stored: Option<StoredRoot>) -> SaveResult<LoadOutcome> {
        match stored {
            None => {
                self.root = SaveRoot::default();
                self.load_player_object(None)
            }
            Some(StoredRoot::Legacy(save)) => {
                log::debug!("converting single-save storage to slots");
                self.root = SaveRoot::from_legacy(save.clone());
                let outcome = self.load_stored(Some(save))?;
                self.save(true, false)?;
                Ok(outcome)
            }
            Some(StoredRoot::Slotted(root)) => {
                self.root = root.normalize();
                let candidate = self.root.active().cloned();
                self.load_stored(candidate)
            }
        }
    }

    /// The central gate. `None` requests a fresh DefaultState.
    ///
    /// An invalid candidate is silently replaced by a fresh start (logged in
    /// development builds only). A candidate from a newer schema is refused
    /// and nothing changes.
    pub fn load_player_object(&mut self, candidate: Option<PlayerState>) -> SaveResult<LoadOutcome> {
        let now = self.now();
        let reason = validator::check(candidate.as_ref());

        let (player, outcome) = match candidate {
            Some(save) if reason.is_empty() => {
                let from = save.version();
                let player = self.migrations.patch(save)?;
                if from < self.config.previous_major_version {
                    self.events.push(SaveEvent::SaveConvertedFromPreviousVersion {
                        slot: self.root.current,
                        from_version: from,
                    });
                }
                let to = self.migrations.current_version();
                let outcome = if from < to {
                    LoadOutcome::Migrated { from, to }
                } else {
                    LoadOutcome::Restored
                };
                (player, outcome)
            }
            discarded => {
                let reason = discarded.map(|_| reason);
                let player = self.fresh_start(now, reason.as_ref());
                (player, LoadOutcome::Initialized { reason })
            }
        };
        Ok(self.install(player, outcome, now))
    }

    /// Load the active slot's own stored save. A save from a newer schema
    /// leaves the slot untouched and write-protected.
    fn load_stored(&mut self, candidate: Option<PlayerState>) -> SaveResult<LoadOutcome> {
        match self.load_player_object(candidate) {
            Err(SaveError::Migration(e @ MigrationError::FutureVersion { .. })) => {
                log::warn!(
                    "slot {}: {e}; slot left untouched and write-protected",
                    self.root.current
                );
                self.write_protected = true;
                Err(e.into())
            }
            other => other,
        }
    }

    /// A DefaultState stamped with `now`. `reason` names what was discarded.
    fn fresh_start(&mut self, now: Millis, reason: Option<&String>) -> PlayerState {
        if let Some(reason) = reason {
            if self.config.dev_build {
                log::warn!("Savefile was invalid and has been reset - {reason}");
            }
            self.events.push(SaveEvent::SaveReset {
                slot: self.root.current,
                reason: reason.clone(),
            });
        }
        let mut player = PlayerState::default_start();
        player.set_version(self.migrations.current_version());
        player.set_game_created_time(now);
        player.set_last_update(now);
        player
    }

    /// Make `player` the active state of the current slot.
    fn install(&mut self, player: PlayerState, outcome: LoadOutcome, now: Millis) -> LoadOutcome {
        let slot = self.root.current;
        self.saved = 0;
        self.player = player;
        self.write_protected = false;
        self.root.set_slot(slot, Some(self.player.clone()));
        self.bump(slot);
        self.after_load(now);
        outcome
    }

    /// Offline progress and notices that follow every successful gate.
    fn after_load(&mut self, now: Millis) {
        let slot = self.root.current;
        self.events.push(SaveEvent::GameLoaded { slot });

        let raw_diff = (now - self.player.last_update().unwrap_or(now)).max(0);
        let simulate_offline = self
            .offline_override
            .unwrap_or_else(|| self.player.offline_progress());

        if simulate_offline {
            self.player.add_offline_time_used(raw_diff);
            if raw_diff > self.config.offline_simulation_threshold_ms {
                let max_ticks = self.max_offline_ticks(raw_diff, None);
                self.events.push(SaveEvent::OfflineProgressPending {
                    elapsed_ms: raw_diff,
                    fast: raw_diff < self.config.fast_simulation_threshold_ms,
                    max_ticks,
                });
            } else {
                self.events.push(SaveEvent::PostLoad);
            }
        } else {
            self.player.set_last_update(now);
            self.events.push(SaveEvent::PostLoad);
        }

        if raw_diff > self.config.catchup_threshold_ms {
            self.events.push(SaveEvent::CatchupRecommended { away_ms: raw_diff });
        }
    }

    /// Ticks to spend simulating `simulated_ms` of absence.
    pub fn max_offline_ticks(&self, simulated_ms: Millis, default_ticks: Option<u64>) -> u64 {
        let cap = default_ticks.unwrap_or(self.config.offline_ticks);
        let by_time = (simulated_ms.max(0) / self.config.offline_tick_ms.max(1)) as u64;
        cap.min(by_time)
    }

    // ── Slots ──────────────────────────────────────────────────

    /// Switch the active slot. The outgoing slot is persisted first.
    pub fn load_slot(&mut self, slot: SlotId) -> SaveResult<LoadOutcome> {
        check_slot(slot)?;
        self.sync_active();
        self.root.current = slot;
        self.write(true, false, false)?;
        let candidate = self.root.slot(slot).cloned();
        log::debug!("switched to slot {slot}");
        self.load_stored(candidate)
    }

    /// Replace a slot's content. Reloads it when it is the active slot. A
    /// replacement from a newer schema is refused before anything changes.
    pub fn overwrite_slot(
        &mut self,
        slot: SlotId,
        save: Option<PlayerState>,
    ) -> SaveResult<Option<LoadOutcome>> {
        check_slot(slot)?;
        if slot == self.root.current {
            self.ensure_writable()?;
        }
        if let Some(incoming) = &save {
            validator::validate(Some(incoming))?;
            let current = self.migrations.current_version();
            if incoming.version() > current {
                return Err(MigrationError::FutureVersion {
                    found: incoming.version(),
                    current,
                }
                .into());
            }
        }

        let outcome = if slot == self.root.current {
            Some(self.load_player_object(save)?)
        } else {
            self.root.set_slot(slot, save);
            self.bump(slot);
            None
        };
        self.save(true, false)?;
        Ok(outcome)
    }

    pub fn hard_reset(&mut self) -> SaveResult<LoadOutcome> {
        let outcome = self.load_player_object(None)?;
        self.save(true, false)?;
        Ok(outcome)
    }

    // ── Import ─────────────────────────────────────────────────

    pub fn import(&mut self, text: &str) -> SaveResult<LoadOutcome> {
        let candidate = match codec::decode::<PlayerState>(text) {
            Ok(save) => Some(save),
            Err(e) => {
                log::debug!("import decode failed: {e}");
                None
            }
        };
        let reason = validator::check(candidate.as_ref());
        let save = match candidate {
            Some(save) if reason.is_empty() => save,
            _ => return Ok(rejected(&reason)),
        };
        let current = self.migrations.current_version();
        if save.version() > current {
            let e = SaveError::from(MigrationError::FutureVersion {
                found: save.version(),
                current,
            });
            return Ok(rejected(&e.to_string()));
        }

        self.guards.transient_ui_active = false;
        self.events.push(SaveEvent::TransientStateCleared);
        let outcome = self.load_player_object(Some(save))?;
        if self.player.speedrun_active() {
            self.player.set_speedrun_segmented(true);
        }
        self.save(true, false)?;
        self.events.push(SaveEvent::GameImported {
            slot: self.root.current,
        });
        Ok(outcome)
    }

    /// Import from a file. Returns `None` when importing is closed off.
    pub fn import_file(&mut self, path: &std::path::Path) -> SaveResult<Option<LoadOutcome>> {
        if self.guards.credits_ever_closed {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)?;
        self.import(&text).map(Some)
    }

    // ── Save ───────────────────────────────────────────────────

    fn save_blocker(&self) -> Option<SaveSkip> {
        let guards = &self.guards;
        if guards.end_state >= EndState::SaveDisabled && !guards.remove_additional_end {
            return Some(SaveSkip::SaveDisabled);
        }
        if guards.end_state >= EndState::InteractivityDisabled {
            return Some(SaveSkip::InteractivityDisabled);
        }
        if guards.transient_ui_active {
            return Some(SaveSkip::TransientUi);
        }
        if self.write_protected {
            return Some(SaveSkip::WriteProtected);
        }
        None
    }

    pub fn save(&mut self, silent: bool, manual: bool) -> SaveResult<SaveOutcome> {
        self.write(silent, manual, true)
    }

    /// `sync` copies the active state into its slot first. A slot switch
    /// skips it: the pointer has already moved on.
    fn write(&mut self, silent: bool, manual: bool, sync: bool) -> SaveResult<SaveOutcome> {
        if let Some(skip) = self.save_blocker() {
            log::debug!("save skipped: {skip:?}");
            return Ok(SaveOutcome::Skipped(skip));
        }

        let now = self.now();
        self.last_save_time = now;
        self.save_interval.restart(now);
        if manual {
            self.saved += 1;
            if self.saved == self.config.manual_save_milestone + 1 {
                self.events.push(SaveEvent::ManualSaveMilestone { count: self.saved });
            }
        }

        if sync {
            self.sync_active();
        }
        let text = codec::encode(&self.root)?;
        self.store.write(self.config.storage_key(), &text)?;
        log::debug!("saved slot {} ({} bytes)", self.root.current, text.len());
        self.events.push(SaveEvent::GameSaved {
            slot: self.root.current,
            manual,
            silent,
        });
        Ok(SaveOutcome::Saved)
    }

    // ── Export ─────────────────────────────────────────────────

    /// Encoded copy of the active state, export-normalized. Refused while
    /// the slot is write-protected: the live state is not that slot's save.
    pub fn export(&mut self) -> SaveResult<String> {
        self.ensure_writable()?;
        let text = codec::encode_for_export(&self.player)?;
        self.events.push(SaveEvent::Exported {
            slot: self.root.current,
            file_name: None,
        });
        Ok(text)
    }

    pub fn export_as_file(&mut self) -> SaveResult<ExportFile> {
        self.ensure_writable()?;
        let count = self.player.exported_file_count() + 1;
        self.player_mut().set_exported_file_count(count);
        self.save(true, false)?;

        let name = match self.player.save_file_name() {
            Some(name) if !name.is_empty() => format!(" - {name},"),
            _ => String::new(),
        };
        let (y, m, d) = self.clock.date();
        let file_name = format!(
            "{}, Slot {}{name} #{count} ({y}-{m}-{d}).txt",
            self.config.export_file_prefix,
            self.root.current + 1,
        );
        let contents = codec::encode_for_export(&self.player)?;
        self.events.push(SaveEvent::Exported {
            slot: self.root.current,
            file_name: Some(file_name.clone()),
        });
        Ok(ExportFile { file_name, contents })
    }

    // ── Internals ──────────────────────────────────────────────

    fn ensure_writable(&self) -> SaveResult<()> {
        if self.write_protected {
            Err(SaveError::WriteProtected {
                slot: self.root.current,
            })
        } else {
            Ok(())
        }
    }

    fn sync_active(&mut self) {
        if self.write_protected {
            return;
        }
        let current = self.root.current;
        self.root.set_slot(current, Some(self.player.clone()));
    }

    fn bump(&mut self, slot: SlotId) {
        if let Some(rev) = self.revisions.get_mut(slot as usize) {
            *rev += 1;
        }
    }
}

fn check_slot(slot: SlotId) -> SaveResult<()> {
    if is_valid_slot(slot) {
        Ok(())
    } else {
        Err(SaveError::InvalidSlot { slot })
    }
}

fn rejected(reason: &str) -> LoadOutcome {
    LoadOutcome::Rejected {
        reason: format!("{IMPORT_REJECTED} {reason}"),
    }
}
