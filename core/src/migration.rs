//! Migration engine: upgrades old save shapes to the current schema.
//!
//! RULES:
//!   - Each transform is keyed by the version it upgrades FROM and takes a
//!     save to `key + 1`.
//!   - Keys must form one contiguous run ending at `current - 1`. A chain
//!     with a gap cannot be constructed, so no save ever skips a step.
//!   - `patch` applies every transform keyed at or above the save's version,
//!     strictly in increasing order, each consuming the previous output.
//!   - Transforms never assume a field from two versions back still has its
//!     old shape; they test before they move.

use crate::{
    error::MigrationError,
    player::{PlayerState, LEGACY_PROGRESS_FIELD, PROGRESS_FIELD},
    types::CURRENT_VERSION,
    value::SaveValue,
};
use std::collections::BTreeMap;

pub type Transform = Box<dyn Fn(PlayerState) -> PlayerState + Send + Sync>;

pub struct MigrationEngine {
    current: u32,
    transforms: BTreeMap<u32, Transform>,
}

impl MigrationEngine {
    pub fn new(current: u32, transforms: Vec<(u32, Transform)>) -> Result<Self, MigrationError> {
        let mut chain = BTreeMap::new();
        for (key, transform) in transforms {
            if key >= current {
                return Err(MigrationError::KeyOutOfRange { key, current });
            }
            if chain.insert(key, transform).is_some() {
                return Err(MigrationError::Duplicate { key });
            }
        }
        if let Some(&oldest) = chain.keys().next() {
            if let Some(missing) = (oldest..current).find(|v| !chain.contains_key(v)) {
                return Err(MigrationError::Gap { missing });
            }
        }
        Ok(Self { current, transforms: chain })
    }

    /// The built-in chain shipped with the game.
    pub fn standard() -> Self {
        Self {
            current: CURRENT_VERSION,
            transforms: standard_transforms().into_iter().collect(),
        }
    }

    pub fn current_version(&self) -> u32 {
        self.current
    }

    /// Oldest version with a dedicated transform, if any.
    pub fn oldest_known(&self) -> Option<u32> {
        self.transforms.keys().next().copied()
    }

    /// Upgrade `state` to the current version.
    pub fn patch(&self, state: PlayerState) -> Result<PlayerState, MigrationError> {
        let from = state.version();
        if from > self.current {
            return Err(MigrationError::FutureVersion {
                found: from,
                current: self.current,
            });
        }
        if from == self.current {
            return Ok(state);
        }

        let mut state = state;
        let mut applied = 0usize;
        for (&key, transform) in self.transforms.range(from..) {
            state = transform(state);
            state.set_version(key + 1);
            applied += 1;
        }
        state.set_version(self.current);
        log::debug!(
            "migrated save v{from} -> v{} ({applied} transforms)",
            self.current
        );
        Ok(state)
    }
}

impl Default for MigrationEngine {
    fn default() -> Self {
        Self::standard()
    }
}

fn standard_transforms() -> Vec<(u32, Transform)> {
    vec![
        (10, Box::new(rename_progress_field) as Transform),
        (11, Box::new(split_cloud_option) as Transform),
        (12, Box::new(nest_speedrun_flags) as Transform),
        (13, Box::new(fill_option_defaults) as Transform),
    ]
}

// v10 -> v11: the primary currency was renamed.
fn rename_progress_field(mut save: PlayerState) -> PlayerState {
    if !save.contains(PROGRESS_FIELD) {
        save.rename(LEGACY_PROGRESS_FIELD, PROGRESS_FIELD);
    } else {
        save.remove(LEGACY_PROGRESS_FIELD);
    }
    if let Some(progress) = save.get(PROGRESS_FIELD).cloned() {
        save.set_default("records.totalAntimatter", progress);
    }
    save
}

// v11 -> v12: the single `options.cloud` toggle became a prompt preference
// plus a forced-overwrite preference.
fn split_cloud_option(mut save: PlayerState) -> PlayerState {
    if let Some(SaveValue::Bool(prompt)) = save.remove("options.cloud") {
        save.set_default("options.showCloudModal", prompt);
    }
    save.set_default("options.showCloudModal", true);
    save.set_default("options.forceCloudOverwrite", false);
    save.set_default("options.syncSaveIntervals", true);
    save
}

// v12 -> v13: top-level speedrun flags moved under `speedrun`.
fn nest_speedrun_flags(mut save: PlayerState) -> PlayerState {
    if let Some(active) = save.remove("speedrunActive") {
        save.set_default("speedrun.isActive", active);
    }
    if let Some(segmented) = save.remove("speedrunSegmented") {
        save.set_default("speedrun.isSegmented", segmented);
    }
    save.set_default("speedrun.isActive", false);
    save.set_default("speedrun.isSegmented", false);
    save.set_default("speedrun.hasStarted", false);
    save.set_default("speedrun.offlineTimeUsed", 0i64);
    save
}

// v13 -> v14: export counter and save names.
fn fill_option_defaults(mut save: PlayerState) -> PlayerState {
    save.set_default("options.saveFileName", "");
    save.set_default("options.exportedFileCount", 0i64);
    save.set_default("options.offlineProgress", true);
    save.set_default("options.hideGoogleName", false);
    save
}
