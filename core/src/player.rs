//! PlayerState: the versioned per-slot save payload.
//!
//! RULE: this core never interprets gameplay fields. It only reads the
//! handful of fields the save lifecycle depends on (version, progress,
//! timestamps, options) through the accessors below.

use crate::{
    types::{Millis, CURRENT_VERSION},
    value::{Record, SaveValue},
};
use serde::{Deserialize, Serialize};

/// Current primary-currency field.
pub const PROGRESS_FIELD: &str = "antimatter";
/// Name the progress field had before schema version 11.
pub const LEGACY_PROGRESS_FIELD: &str = "money";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerState(Record);

impl PlayerState {
    pub fn from_record(record: Record) -> Self {
        Self(record)
    }

    pub fn record(&self) -> &Record {
        &self.0
    }

    pub fn into_record(self) -> Record {
        self.0
    }

    /// A fresh copy of the DefaultState template at the current schema.
    /// Timestamps are zero; the load gate stamps them.
    pub fn default_start() -> Self {
        let records = record([
            ("gameCreatedTime", 0i64.into()),
            ("totalTimePlayed", 0i64.into()),
            ("realTimePlayed", 0i64.into()),
            ("totalAntimatter", 10i64.into()),
            ("fullGameCompletions", 0i64.into()),
        ]);
        let options = record([
            ("saveFileName", "".into()),
            ("offlineProgress", true.into()),
            ("showCloudModal", true.into()),
            ("forceCloudOverwrite", false.into()),
            ("syncSaveIntervals", true.into()),
            ("hideGoogleName", false.into()),
            ("exportedFileCount", 0i64.into()),
            ("notation", "Mixed scientific".into()),
            ("commas", true.into()),
            ("updateRate", 33i64.into()),
            ("newUI", true.into()),
            ("lastOpenTab", 0i64.into()),
            ("news", record([("enabled", true.into())])),
        ]);
        let speedrun = record([
            ("isActive", false.into()),
            ("isSegmented", false.into()),
            ("hasStarted", false.into()),
            ("offlineTimeUsed", 0i64.into()),
        ]);
        let root = record([
            ("version", CURRENT_VERSION.into()),
            (PROGRESS_FIELD, 10i64.into()),
            ("infinities", 0i64.into()),
            ("eternities", 0i64.into()),
            ("realities", 0i64.into()),
            ("lastUpdate", 0i64.into()),
            ("records", records),
            ("options", options),
            ("speedrun", speedrun),
            ("tutorialState", 0i64.into()),
            ("tutorialActive", true.into()),
        ]);
        match root {
            SaveValue::Record(r) => Self(r),
            _ => Self::default(),
        }
    }

    // ── Path access ────────────────────────────────────────────

    pub fn get(&self, path: &str) -> Option<&SaveValue> {
        match path.split_once('.') {
            Some((head, rest)) => self.0.get(head)?.pointer(rest),
            None => self.0.get(path),
        }
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut SaveValue> {
        match path.split_once('.') {
            Some((head, rest)) => self.0.get_mut(head)?.pointer_mut(rest),
            None => self.0.get_mut(path),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Set a value, creating (or replacing non-record) intermediate nodes.
    pub fn set(&mut self, path: &str, value: impl Into<SaveValue>) {
        let mut keys: Vec<&str> = path.split('.').collect();
        let Some(last) = keys.pop() else { return };
        let mut node = &mut self.0;
        for key in keys {
            let child = node.entry(key.to_string()).or_insert_with(SaveValue::record);
            if child.as_record().is_none() {
                *child = SaveValue::record();
            }
            node = match child {
                SaveValue::Record(r) => r,
                _ => return,
            };
        }
        node.insert(last.to_string(), value.into());
    }

    /// Set a value only if nothing is stored at `path` yet.
    pub fn set_default(&mut self, path: &str, value: impl Into<SaveValue>) {
        if !self.contains(path) {
            self.set(path, value);
        }
    }

    pub fn remove(&mut self, path: &str) -> Option<SaveValue> {
        match path.rsplit_once('.') {
            Some((parent, key)) => self.get_mut(parent)?.as_record_mut()?.remove(key),
            None => self.0.remove(path),
        }
    }

    /// Move the value at `from` to `to`. Returns false if `from` was absent.
    pub fn rename(&mut self, from: &str, to: &str) -> bool {
        match self.remove(from) {
            Some(value) => {
                self.set(to, value);
                true
            }
            None => false,
        }
    }

    // ── Lifecycle fields ───────────────────────────────────────

    /// Schema revision. Saves from before versioning existed read as 0.
    pub fn version(&self) -> u32 {
        self.get("version")
            .and_then(SaveValue::to_number)
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map_or(0, |v| v as u32)
    }

    pub fn set_version(&mut self, version: u32) {
        self.set("version", version);
    }

    /// The primary-currency progress field, under either of its names.
    pub fn progress(&self) -> Option<&SaveValue> {
        self.get(PROGRESS_FIELD).or_else(|| self.get(LEGACY_PROGRESS_FIELD))
    }

    pub fn has_progress_field(&self) -> bool {
        self.progress().is_some()
    }

    pub fn last_update(&self) -> Option<Millis> {
        self.get("lastUpdate")
            .and_then(SaveValue::to_number)
            .map(|v| v as Millis)
    }

    pub fn set_last_update(&mut self, now: Millis) {
        self.set("lastUpdate", now);
    }

    pub fn set_game_created_time(&mut self, now: Millis) {
        self.set("records.gameCreatedTime", now);
    }

    // ── Options ────────────────────────────────────────────────

    pub fn has_options(&self) -> bool {
        matches!(self.get("options"), Some(SaveValue::Record(_)))
    }

    /// User-facing save name; `None` when unset.
    pub fn save_file_name(&self) -> Option<&str> {
        self.get("options.saveFileName").and_then(SaveValue::as_str)
    }

    pub fn offline_progress(&self) -> bool {
        self.flag("options.offlineProgress", true)
    }

    pub fn show_cloud_modal(&self) -> bool {
        self.flag("options.showCloudModal", true)
    }

    pub fn force_cloud_overwrite(&self) -> bool {
        self.flag("options.forceCloudOverwrite", false)
    }

    pub fn sync_save_intervals(&self) -> bool {
        self.flag("options.syncSaveIntervals", true)
    }

    pub fn hide_google_name(&self) -> bool {
        self.flag("options.hideGoogleName", false)
    }

    pub fn exported_file_count(&self) -> u64 {
        self.get("options.exportedFileCount")
            .and_then(SaveValue::to_number)
            .map_or(0, |v| v.max(0.0) as u64)
    }

    pub fn set_exported_file_count(&mut self, count: u64) {
        self.set("options.exportedFileCount", count as i64);
    }

    // ── Speedrun ───────────────────────────────────────────────

    pub fn speedrun_active(&self) -> bool {
        self.flag("speedrun.isActive", false)
    }

    pub fn speedrun_segmented(&self) -> bool {
        self.flag("speedrun.isSegmented", false)
    }

    pub fn set_speedrun_segmented(&mut self, segmented: bool) {
        self.set("speedrun.isSegmented", segmented);
    }

    pub fn add_offline_time_used(&mut self, elapsed: Millis) {
        let used = self
            .get("speedrun.offlineTimeUsed")
            .and_then(SaveValue::to_number)
            .unwrap_or(0.0);
        self.set("speedrun.offlineTimeUsed", used + elapsed as f64);
    }

    fn flag(&self, path: &str, default: bool) -> bool {
        self.get(path).and_then(SaveValue::as_bool).unwrap_or(default)
    }
}

fn record<const N: usize>(pairs: [(&str, SaveValue); N]) -> SaveValue {
    SaveValue::Record(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}
