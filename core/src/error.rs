use crate::types::SlotId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SaveError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("Invalid save: {reason}")]
    Validation { reason: String },

    #[error("Slot {slot} does not exist")]
    InvalidSlot { slot: SlotId },

    #[error("Slot {slot} has a cloud operation in progress")]
    SlotBusy { slot: SlotId },

    #[error("Slot {slot} holds a save from a newer version and cannot be replaced")]
    WriteProtected { slot: SlotId },

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Remote store error: {message}")]
    Remote { message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type SaveResult<T> = Result<T, SaveError>;

/// Failure to turn encoded text back into a save.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Save text is empty")]
    Empty,

    #[error("Save text is missing its end-of-file marker")]
    MissingTrailer,

    #[error("Save text is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Save payload could not be decompressed: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("Save payload is not UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Save payload is not a recognized save: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Save payload has an unexpected shape: {0}")]
    Shape(&'static str),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MigrationError {
    #[error("Save version {found} is newer than the supported version {current}")]
    FutureVersion { found: u32, current: u32 },

    #[error("Migration chain has no transform from version {missing}")]
    Gap { missing: u32 },

    #[error("Migration chain defines version {key} twice")]
    Duplicate { key: u32 },

    #[error("Migration keyed {key} does not upgrade towards version {current}")]
    KeyOutOfRange { key: u32, current: u32 },
}

/// A save was missing something the cloud comparison needs.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("Cannot compare saves: {what}")]
pub struct ComparisonError {
    pub what: String,
}

impl ComparisonError {
    pub fn missing(what: impl Into<String>) -> Self {
        Self { what: what.into() }
    }
}
