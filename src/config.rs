//! Configuration for the activity window engine and its adapters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default rolling window length in days.
pub const DEFAULT_HORIZON_DAYS: u32 = 15;

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine settings, resolved once when the engine is built
    pub engine: EngineConfig,

    /// Path for exporting published snapshots
    pub export_path: PathBuf,

    /// Path for storing persisted pipeline statistics
    pub data_path: PathBuf,

    /// Delay between replayed messages
    #[serde(with = "duration_millis_serde")]
    pub replay_interval: Duration,

    /// Render snapshots on a dedicated thread, coalescing when the sink falls behind
    pub background_publish: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("activity-window");

        Self {
            engine: EngineConfig::default(),
            export_path: data_dir.join("exports"),
            data_path: data_dir,
            replay_interval: Duration::from_millis(1000),
            background_publish: true,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file, falling back to defaults if it is absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a specific file.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("activity-window")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Check that the configuration can drive an engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()
    }
}

/// Settings owned by the aggregation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rolling window length in days (must be at least 1)
    pub horizon_days: u32,
    /// Where each derivation input lives in an inbound payload
    pub fields: FieldMapping,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            horizon_days: DEFAULT_HORIZON_DAYS,
            fields: FieldMapping::default(),
        }
    }
}

impl EngineConfig {
    /// Engine configuration with a custom horizon and default field names.
    pub fn with_horizon(horizon_days: u32) -> Self {
        Self {
            horizon_days,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.horizon_days == 0 {
            return Err(ConfigError::Invalid(
                "horizon_days must be at least 1".to_string(),
            ));
        }
        let names = [
            ("date", &self.fields.date),
            ("basal_energy", &self.fields.basal_energy),
            ("active_energy", &self.fields.active_energy),
            ("activity_buckets", &self.fields.activity_buckets),
            ("high_intensity_label", &self.fields.high_intensity_label),
        ];
        for (role, name) in names {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("field name for {role} is empty")));
            }
        }
        if matches!(&self.fields.total_energy, Some(name) if name.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "field name for total_energy is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Mapping from payload field names to the roles the deriver needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMapping {
    /// Calendar date of the record (ISO-8601)
    pub date: String,
    /// Resting energy expenditure for the day
    pub basal_energy: String,
    /// Active energy expenditure for the day
    pub active_energy: String,
    /// Precomputed daily total, used only when the basal field is absent
    pub total_energy: Option<String>,
    /// Array of `{intensity, minutes}` buckets
    pub activity_buckets: String,
    /// Intensity tag counted as high activity
    pub high_intensity_label: String,
    /// Flat per-intensity fields holding seconds, used when the bucket array is absent.
    /// Keys are intensity labels, values are payload field names.
    pub intensity_seconds_fields: BTreeMap<String, String>,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            date: "day".to_string(),
            basal_energy: "basal_calories".to_string(),
            active_energy: "active_calories".to_string(),
            total_energy: None,
            activity_buckets: "activity_buckets".to_string(),
            high_intensity_label: "high".to_string(),
            intensity_seconds_fields: BTreeMap::new(),
        }
    }
}

impl FieldMapping {
    /// Mapping for a daily-activity export: flat per-intensity second counters
    /// stand in for the bucket array, and `total_calories` stands in for the
    /// basal component the export does not carry.
    pub fn with_activity_time_fields(mut self) -> Self {
        for (level, field) in [
            ("sedentary", "sedentary_time"),
            ("low", "low_activity_time"),
            ("medium", "medium_activity_time"),
            ("high", "high_activity_time"),
        ] {
            self.intensity_seconds_fields
                .insert(level.to_string(), field.to_string());
        }
        if self.total_energy.is_none() {
            self.total_energy = Some("total_calories".to_string());
        }
        self
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as whole milliseconds.
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
