//! Save lifecycle notices.
//!
//! RULE: the save core never talks to the UI or the game's event bus. Every
//! side effect the boundary layer may want to surface is queued here and
//! drained by the caller.

use crate::types::{Millis, SlotId};
use serde::{Deserialize, Serialize};

/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SaveEvent {
    // ── Load ──────────────────────────────────────
    GameLoaded {
        slot: SlotId,
    },
    SaveConvertedFromPreviousVersion {
        slot: SlotId,
        from_version: u32,
    },
    /// The slot's save was unusable and was replaced by a fresh start.
    SaveReset {
        slot: SlotId,
        reason: String,
    },
    OfflineProgressPending {
        elapsed_ms: Millis,
        fast: bool,
        max_ticks: u64,
    },
    /// Load finished without offline simulation; intervals may restart.
    PostLoad,
    CatchupRecommended {
        away_ms: Millis,
    },

    // ── Save / import / export ────────────────────
    GameSaved {
        slot: SlotId,
        manual: bool,
        silent: bool,
    },
    ManualSaveMilestone {
        count: u32,
    },
    /// Open dialogs and editors should be closed before the new save shows.
    TransientStateCleared,
    GameImported {
        slot: SlotId,
    },
    Exported {
        slot: SlotId,
        file_name: Option<String>,
    },

    // ── Cloud ─────────────────────────────────────
    CloudStateReset,
    /// `user` is the display name, or `None` when the player hides it.
    CloudSaved {
        slot: SlotId,
        user: Option<String>,
    },
    CloudLoaded {
        slot: SlotId,
        user: Option<String>,
    },
    NoCloudSave {
        user: Option<String>,
    },
}
