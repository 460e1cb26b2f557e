//! Engine configuration
//!
//! `EngineConfig` is serializable with plain-millisecond duration fields so
//! it can be loaded from JSON as well as built from CLI flags.

use crate::xp::{LevelCurve, DEFAULT_POINTS_PER_LEVEL};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Points needed per level step
    pub points_per_level: u64,
    /// Leaderboard page size when the caller gives none
    pub default_page_size: usize,
    /// Upper bound on a leaderboard page
    pub max_page_size: usize,
    /// Pause before the single retry of an idempotent storage call
    #[serde(with = "millis_serde")]
    pub retry_backoff: Duration,
    /// Compute winners as soon as a prize quest closes
    pub auto_settle: bool,
    /// Expiry sweep period, zero disables the sweeper
    #[serde(with = "millis_serde")]
    pub sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            points_per_level: DEFAULT_POINTS_PER_LEVEL,
            default_page_size: 50,
            max_page_size: 100,
            retry_backoff: Duration::from_millis(50),
            auto_settle: true,
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    pub fn level_curve(&self) -> LevelCurve {
        LevelCurve::new(self.points_per_level)
    }

    /// Clamp a requested page size into `1..=max_page_size`
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }

    /// Page offsets beyond `i64::MAX` cannot be expressed to SQL
    pub fn page_offset(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(0).min(i64::MAX as usize)
    }
}

/// Storage backend selection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

mod millis_serde {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.points_per_level, 1000);
        assert_eq!(config.max_page_size, 100);
        assert!(config.auto_settle);
        assert_eq!(config.level_curve().level(1000), 2);
    }

    #[test]
    fn test_page_size_clamped() {
        let config = EngineConfig::default();
        assert_eq!(config.page_size(None), 50);
        assert_eq!(config.page_size(Some(0)), 1);
        assert_eq!(config.page_size(Some(10)), 10);
        assert_eq!(config.page_size(Some(10_000)), 100);
    }

    #[test]
    fn test_page_offset_clamped() {
        let config = EngineConfig::default();
        assert_eq!(config.page_offset(None), 0);
        assert_eq!(config.page_offset(Some(30)), 30);
        assert_eq!(config.page_offset(Some(usize::MAX)), i64::MAX as usize);
    }

    #[test]
    fn test_config_json_round_trip() {
        let json = r#"{
            "points_per_level": 500,
            "default_page_size": 20,
            "max_page_size": 40,
            "retry_backoff": 250,
            "auto_settle": false,
            "sweep_interval": 0
        }"#;

        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.retry_backoff, Duration::from_millis(250));
        assert_eq!(config.sweep_interval, Duration::ZERO);
        assert!(!config.auto_settle);

        let back = serde_json::to_value(&config).unwrap();
        assert_eq!(back["retry_backoff"], 250);
    }
}
