//! Save validation: the precondition for every load, import, and slot
//! overwrite.
//!
//! `check` returns an empty string for a usable save, otherwise a readable
//! reason naming every offending field.

use crate::{
    error::{SaveError, SaveResult},
    player::PlayerState,
    value::SaveValue,
};

pub const DECODE_FAILED: &str = "Save decoding failed (invalid format)";
pub const MISSING_PROGRESS: &str = "Save does not have antimatter property";

/// Text form a NaN takes after a round trip through an import path.
const NAN_TEXT: &str = "NaN";

pub fn check(candidate: Option<&PlayerState>) -> String {
    let Some(save) = candidate else {
        return DECODE_FAILED.to_string();
    };
    if !save.has_progress_field() {
        return MISSING_PROGRESS.to_string();
    }

    let invalid = nan_paths(save);
    if invalid.is_empty() {
        return String::new();
    }
    format!(
        "{} found: {}",
        quantify("NaN player property", invalid.len()),
        invalid.join(", ")
    )
}

pub fn validate(candidate: Option<&PlayerState>) -> SaveResult<()> {
    let reason = check(candidate);
    if reason.is_empty() {
        Ok(())
    } else {
        Err(SaveError::Validation { reason })
    }
}

/// Every path (rooted at `player`) holding a NaN number or the text "NaN".
pub fn nan_paths(save: &PlayerState) -> Vec<String> {
    let mut invalid = Vec::new();
    for (key, value) in save.record() {
        scan(value, format!("player.{key}"), &mut invalid);
    }
    invalid
}

fn scan(value: &SaveValue, path: String, invalid: &mut Vec<String>) {
    match value {
        SaveValue::Number(n) if n.is_nan() => invalid.push(path),
        SaveValue::Text(s) if s == NAN_TEXT => invalid.push(path),
        SaveValue::Record(record) => {
            for (key, child) in record {
                scan(child, format!("{path}.{key}"), invalid);
            }
        }
        SaveValue::List(items) => {
            for (index, child) in items.iter().enumerate() {
                scan(child, format!("{path}.{index}"), invalid);
            }
        }
        _ => {}
    }
}

fn quantify(noun: &str, count: usize) -> String {
    if count == 1 {
        format!("1 {noun}")
    } else {
        match noun.strip_suffix('y') {
            Some(stem) => format!("{count} {stem}ies"),
            None => format!("{count} {noun}s"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantify_pluralizes() {
        assert_eq!(quantify("NaN player property", 1), "1 NaN player property");
        assert_eq!(quantify("NaN player property", 3), "3 NaN player properties");
    }
}
