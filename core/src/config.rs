use crate::types::Millis;
use serde::{Deserialize, Serialize};

const DAY_MS: Millis = 86_400_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    /// Durable-storage key in production builds.
    pub local_storage_key: String,
    /// Durable-storage key in development builds.
    pub dev_storage_key: String,
    pub dev_build: bool,
    pub save_interval_ms: Millis,
    pub cloud_save_interval_ms: Millis,
    /// Upper bound on ticks simulated for offline progress.
    pub offline_ticks: u64,
    /// Simulated milliseconds per offline tick.
    pub offline_tick_ms: Millis,
    /// Absences at or below this are not simulated, only resumed.
    pub offline_simulation_threshold_ms: Millis,
    /// Absences below this use the fast (capped) simulation.
    pub fast_simulation_threshold_ms: Millis,
    /// Absences above this get a catch-up summary.
    pub catchup_threshold_ms: Millis,
    /// Loading a save older than this version emits a conversion notice.
    pub previous_major_version: u32,
    /// Manual saves beyond this count emit a milestone notice once.
    pub manual_save_milestone: u32,
    pub export_file_prefix: String,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            local_storage_key: "dimensionSave".into(),
            dev_storage_key: "dimensionTestSave".into(),
            dev_build: false,
            save_interval_ms: 30_000,
            cloud_save_interval_ms: 600_000,
            offline_ticks: 100_000,
            offline_tick_ms: 50,
            offline_simulation_threshold_ms: 10_000,
            fast_simulation_threshold_ms: 50_000,
            catchup_threshold_ms: 14 * DAY_MS,
            previous_major_version: 13,
            manual_save_milestone: 99,
            export_file_prefix: "Dimension Save".into(),
        }
    }
}

impl SaveConfig {
    /// Load from a JSON file. Fields absent from the file keep their defaults.
    /// In tests, use SaveConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: SaveConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        if config.offline_tick_ms <= 0 {
            anyhow::bail!("{path}: offline_tick_ms must be positive");
        }
        Ok(config)
    }

    /// Development-build defaults for unit and integration tests.
    pub fn default_test() -> Self {
        Self {
            dev_build: true,
            ..Self::default()
        }
    }

    pub fn storage_key(&self) -> &str {
        if self.dev_build {
            &self.dev_storage_key
        } else {
            &self.local_storage_key
        }
    }
}
