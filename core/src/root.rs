//! SaveRoot: the top-level persisted structure: active-slot pointer plus
//! every slot's PlayerState.

use crate::{
    player::PlayerState,
    types::{is_valid_slot, SlotId, SLOT_COUNT},
    value::{Record, SaveValue},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveRoot {
    pub current: SlotId,
    pub saves: BTreeMap<SlotId, Option<PlayerState>>,
}

impl Default for SaveRoot {
    fn default() -> Self {
        Self {
            current: 0,
            saves: (0..SLOT_COUNT).map(|slot| (slot, None)).collect(),
        }
    }
}

impl SaveRoot {
    /// Wrap a pre-slot single save as slot 0.
    pub fn from_legacy(save: PlayerState) -> Self {
        let mut root = Self::default();
        root.saves.insert(0, Some(save));
        root
    }

    /// Build a root from loosely typed stored values. One damaged slot never
    /// costs the others: a slot that is not a record is kept as an empty
    /// save, which the load gate resets on its own when that slot loads.
    pub fn from_values(current: Option<&SaveValue>, saves: Record) -> Self {
        let current = current
            .and_then(SaveValue::to_number)
            .filter(|n| n.is_finite() && *n >= 0.0 && *n <= f64::from(SlotId::MAX))
            .map_or(0, |n| n as SlotId);
        let mut root = Self {
            current,
            saves: BTreeMap::new(),
        };
        for (key, value) in saves {
            let Ok(slot) = key.parse::<SlotId>() else {
                log::warn!("stored root has unknown slot key {key:?}; ignored");
                continue;
            };
            let save = match value {
                SaveValue::Null => None,
                SaveValue::Record(record) => Some(PlayerState::from_record(record)),
                other => {
                    log::warn!("stored slot {slot} is not a save ({other:?}); it will be reset");
                    Some(PlayerState::default())
                }
            };
            root.saves.insert(slot, save);
        }
        root.normalize()
    }

    /// Ensure exactly the fixed slots exist and `current` points at one.
    /// Slots missing from an encoded root read as empty.
    pub fn normalize(mut self) -> Self {
        self.saves.retain(|slot, _| is_valid_slot(*slot));
        for slot in 0..SLOT_COUNT {
            self.saves.entry(slot).or_insert(None);
        }
        if !is_valid_slot(self.current) {
            log::warn!("save root pointed at slot {}; using slot 0", self.current);
            self.current = 0;
        }
        self
    }

    pub fn slot(&self, slot: SlotId) -> Option<&PlayerState> {
        self.saves.get(&slot).and_then(Option::as_ref)
    }

    pub fn slot_mut(&mut self, slot: SlotId) -> Option<&mut PlayerState> {
        self.saves.get_mut(&slot).and_then(Option::as_mut)
    }

    pub fn active(&self) -> Option<&PlayerState> {
        self.slot(self.current)
    }

    pub fn set_slot(&mut self, slot: SlotId, save: Option<PlayerState>) {
        self.saves.insert(slot, save);
    }
}

/// What a durable-storage read can contain: the slotted root, or a single
/// save written before slots existed.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredRoot {
    Slotted(SaveRoot),
    Legacy(PlayerState),
}

impl StoredRoot {
    pub fn into_root(self) -> SaveRoot {
        match self {
            Self::Slotted(root) => root.normalize(),
            Self::Legacy(save) => SaveRoot::from_legacy(save),
        }
    }
}
