//! Local/cloud save comparison.
//!
//! RULE: a comparison that cannot be computed is absent, never guessed.
//! Downstream treats an absent comparison as corrupt cloud data.

use crate::{
    error::ComparisonError,
    player::{PlayerState, PROGRESS_FIELD},
    value::SaveValue,
};
use serde::Serialize;
use std::cmp::Ordering;

/// Which copy a comparison axis points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Cloud,
    Neither,
    Local,
}

impl Side {
    /// Signed form: cloud -1, neither 0, local +1.
    pub fn signum(self) -> i8 {
        match self {
            Side::Cloud => -1,
            Side::Neither => 0,
            Side::Local => 1,
        }
    }

    /// `Cloud` when the cloud value is the larger one.
    fn larger(cloud: f64, local: f64) -> Side {
        match cloud.partial_cmp(&local) {
            Some(Ordering::Greater) => Side::Cloud,
            Some(Ordering::Less) => Side::Local,
            _ => Side::Neither,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SaveComparison {
    /// The copy with more progress.
    pub farther_ahead: Side,
    /// The copy that was updated less recently.
    pub older: Side,
    pub different_name: bool,
    /// The cloud copy changed since this session last saw it.
    pub hash_mismatch: bool,
}

/// Judges progress and recency between two saves.
pub trait ProgressChecker: Send + Sync {
    fn compare_save_progress(
        &self,
        cloud: &PlayerState,
        local: &PlayerState,
    ) -> Result<Side, ComparisonError>;

    /// Returns the older side.
    fn compare_save_times(
        &self,
        cloud: &PlayerState,
        local: &PlayerState,
    ) -> Result<Side, ComparisonError>;
}

/// Compares milestone counters from the latest stage down, then the primary
/// currency. The first stage that differs decides.
#[derive(Debug, Clone)]
pub struct DefaultProgressChecker {
    stages: Vec<String>,
}

impl Default for DefaultProgressChecker {
    fn default() -> Self {
        Self {
            stages: ["realities", "eternities", "infinities"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl DefaultProgressChecker {
    pub fn with_stages(stages: Vec<String>) -> Self {
        Self { stages }
    }
}

impl ProgressChecker for DefaultProgressChecker {
    fn compare_save_progress(
        &self,
        cloud: &PlayerState,
        local: &PlayerState,
    ) -> Result<Side, ComparisonError> {
        for stage in &self.stages {
            let side = Side::larger(counter(cloud, stage), counter(local, stage));
            if side != Side::Neither {
                return Ok(side);
            }
        }
        Ok(Side::larger(progress(cloud)?, progress(local)?))
    }

    fn compare_save_times(
        &self,
        cloud: &PlayerState,
        local: &PlayerState,
    ) -> Result<Side, ComparisonError> {
        let cloud_time = cloud
            .last_update()
            .ok_or_else(|| ComparisonError::missing("cloud lastUpdate"))?;
        let local_time = local
            .last_update()
            .ok_or_else(|| ComparisonError::missing("local lastUpdate"))?;
        // The smaller timestamp is the older save.
        Ok(Side::larger(local_time as f64, cloud_time as f64))
    }
}

fn counter(save: &PlayerState, key: &str) -> f64 {
    save.get(key)
        .and_then(SaveValue::to_number)
        .filter(|n| !n.is_nan())
        .unwrap_or(0.0)
}

fn progress(save: &PlayerState) -> Result<f64, ComparisonError> {
    save.progress()
        .and_then(SaveValue::to_number)
        .ok_or_else(|| ComparisonError::missing(PROGRESS_FIELD))
}

/// Compare a cloud save against the local one. `cloud_hash` is the
/// fingerprint of the cloud save, checked against `last_known_hash` when
/// both are present.
pub fn compare_saves(
    checker: &dyn ProgressChecker,
    cloud: &PlayerState,
    local: &PlayerState,
    last_known_hash: Option<&str>,
    cloud_hash: Option<&str>,
) -> Option<SaveComparison> {
    match try_compare(checker, cloud, local, last_known_hash, cloud_hash) {
        Ok(comparison) => Some(comparison),
        Err(e) => {
            log::warn!("cloud comparison failed, treating cloud data as invalid: {e}");
            None
        }
    }
}

fn try_compare(
    checker: &dyn ProgressChecker,
    cloud: &PlayerState,
    local: &PlayerState,
    last_known_hash: Option<&str>,
    cloud_hash: Option<&str>,
) -> Result<SaveComparison, ComparisonError> {
    if !cloud.has_options() {
        return Err(ComparisonError::missing("cloud options"));
    }
    if !local.has_options() {
        return Err(ComparisonError::missing("local options"));
    }
    Ok(SaveComparison {
        farther_ahead: checker.compare_save_progress(cloud, local)?,
        older: checker.compare_save_times(cloud, local)?,
        different_name: cloud.save_file_name() != local.save_file_name(),
        hash_mismatch: matches!(
            (last_known_hash, cloud_hash),
            (Some(known), Some(fresh)) if known != fresh
        ),
    })
}
