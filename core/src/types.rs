//! Shared primitive types used across the entire save core.

/// Index of a save slot. Valid slots are `0..SLOT_COUNT`.
pub type SlotId = u8;

/// Number of independent save slots a player can switch between.
pub const SLOT_COUNT: SlotId = 3;

/// Wall-clock milliseconds since the Unix epoch.
pub type Millis = i64;

/// Opaque user identifier supplied by the auth provider.
pub type UserId = String;

/// The current player schema revision. Every loaded save is migrated to this.
pub const CURRENT_VERSION: u32 = 14;

/// True if `slot` names one of the fixed save slots.
pub fn is_valid_slot(slot: SlotId) -> bool {
    slot < SLOT_COUNT
}
