/// Scheduling configuration.
///
/// Loaded from an optional `easybook.toml` and `EASYBOOK__*` environment
/// variables, environment taking precedence. Every field has a default so an
/// empty configuration is valid.

use std::path::Path;

use chrono::{Datelike, NaiveDate, NaiveTime};
use config::{Config as RawConfig, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::models::hhmm;

pub const DEFAULT_CONFIG_FILE: &str = "easybook.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    pub grid: GridConfig,
    pub availability: AvailabilityConfig,
    pub slots: SlotConfig,
    pub gesture: GestureConfig,
    /// Quiet period before a proactive conflict check fires.
    pub debounce_ms: u64,
    pub recurrence: RecurrenceConfig,
    pub enforcement: EnforcementPolicy,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        SchedulingConfig {
            grid: GridConfig::default(),
            availability: AvailabilityConfig::default(),
            slots: SlotConfig::default(),
            gesture: GestureConfig::default(),
            debounce_ms: 300,
            recurrence: RecurrenceConfig::default(),
            enforcement: EnforcementPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub move_snap_minutes: i64,
    pub resize_snap_minutes: i64,
    pub min_duration_minutes: i64,
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            move_snap_minutes: 30,
            resize_snap_minutes: 15,
            min_duration_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailabilityConfig {
    /// Free gaps shorter than this are not bookable.
    pub min_gap_minutes: i64,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        AvailabilityConfig { min_gap_minutes: 5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotConfig {
    pub granularity_minutes: i64,
    /// Number of days, starting today, scanned for available dates.
    pub horizon_days: u32,
    /// Slots today must start at least this far after now.
    pub min_notice_minutes: i64,
    pub holidays: Vec<Holiday>,
}

impl Default for SlotConfig {
    fn default() -> Self {
        SlotConfig {
            granularity_minutes: 30,
            horizon_days: 60,
            min_notice_minutes: 0,
            holidays: Vec::new(),
        }
    }
}

impl SlotConfig {
    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.iter().any(|h| h.matches(date))
    }
}

/// A day the whole business is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holiday {
    pub date: NaiveDate,
    #[serde(default)]
    pub name: String,
    /// Repeats every year on the same month and day.
    #[serde(default)]
    pub recurring: bool,
}

impl Holiday {
    pub fn matches(&self, date: NaiveDate) -> bool {
        if self.recurring {
            self.date.month() == date.month() && self.date.day() == date.day()
        } else {
            self.date == date
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    pub pixels_per_minute: f64,
    /// Gestures shorter than this are clicks.
    pub drag_threshold_px: f64,
    #[serde(with = "hhmm")]
    pub board_start: NaiveTime,
    #[serde(with = "hhmm")]
    pub board_end: NaiveTime,
}

impl Default for GestureConfig {
    fn default() -> Self {
        GestureConfig {
            pixels_per_minute: 2.0,
            drag_threshold_px: 5.0,
            board_start: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or(NaiveTime::MIN),
            board_end: NaiveTime::from_hms_opt(21, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecurrenceConfig {
    /// Upper bound on occurrences expanded from one rule.
    pub max_occurrences: u32,
}

impl Default for RecurrenceConfig {
    fn default() -> Self {
        RecurrenceConfig {
            max_occurrences: 104,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Enforcement {
    /// Reject the write.
    Block,
    /// Allow the write and surface the conflict.
    Warn,
}

/// How the authoritative write check treats non-overlap conflicts.
/// Provider overlap always blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnforcementPolicy {
    pub client_overlap: Enforcement,
    pub outside_hours: Enforcement,
}

impl Default for EnforcementPolicy {
    fn default() -> Self {
        EnforcementPolicy {
            client_overlap: Enforcement::Block,
            outside_hours: Enforcement::Block,
        }
    }
}

impl SchedulingConfig {
    /// Load configuration from `path` (or `easybook.toml` if present) and the
    /// environment.
    ///
    /// ## Errors
    /// Returns an error if an explicitly given file is missing, if any source
    /// fails to parse, or if the merged values are out of range.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

        let config: SchedulingConfig = RawConfig::builder()
            .add_source(File::from(file).required(path.is_some()))
            .add_source(
                Environment::with_prefix("EASYBOOK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("grid.move_snap_minutes", self.grid.move_snap_minutes),
            ("grid.resize_snap_minutes", self.grid.resize_snap_minutes),
            ("grid.min_duration_minutes", self.grid.min_duration_minutes),
            ("availability.min_gap_minutes", self.availability.min_gap_minutes),
            ("slots.granularity_minutes", self.slots.granularity_minutes),
        ];
        for (key, value) in positive {
            if value <= 0 {
                return Err(ConfigError::Message(format!(
                    "{key} must be positive, got {value}"
                )));
            }
        }
        if self.slots.min_notice_minutes < 0 {
            return Err(ConfigError::Message(
                "slots.min_notice_minutes cannot be negative".to_string(),
            ));
        }
        if self.gesture.pixels_per_minute <= 0.0 {
            return Err(ConfigError::Message(
                "gesture.pixels_per_minute must be positive".to_string(),
            ));
        }
        if self.gesture.board_end <= self.gesture.board_start {
            return Err(ConfigError::Message(
                "gesture.board_end must be after gesture.board_start".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(source: &str) -> Result<SchedulingConfig, ConfigError> {
        RawConfig::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    #[test]
    fn empty_source_uses_defaults() {
        let config = from_toml("").unwrap();
        assert_eq!(config, SchedulingConfig::default());
        assert_eq!(config.debounce_ms, 300);
        assert_eq!(config.grid.move_snap_minutes, 30);
        assert_eq!(config.grid.resize_snap_minutes, 15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = from_toml(
            r#"
            debounce_ms = 500

            [slots]
            horizon_days = 14
            holidays = [
                { date = "2024-12-25", name = "Christmas", recurring = true },
                { date = "2024-04-01" },
            ]

            [gesture]
            board_start = "08:00"

            [enforcement]
            client_overlap = "warn"
            "#,
        )
        .unwrap();

        assert_eq!(config.debounce_ms, 500);
        assert_eq!(config.slots.horizon_days, 14);
        assert_eq!(config.slots.granularity_minutes, 30);
        assert_eq!(
            config.gesture.board_start,
            NaiveTime::from_hms_opt(8, 0, 0).unwrap()
        );
        assert_eq!(config.enforcement.client_overlap, Enforcement::Warn);
        assert_eq!(config.enforcement.outside_hours, Enforcement::Block);

        assert!(config.slots.is_holiday(NaiveDate::from_ymd_opt(2031, 12, 25).unwrap()));
        assert!(config.slots.is_holiday(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()));
        assert!(!config.slots.is_holiday(NaiveDate::from_ymd_opt(2025, 4, 1).unwrap()));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut config = SchedulingConfig::default();
        config.slots.granularity_minutes = 0;
        assert!(config.validate().is_err());

        let mut config = SchedulingConfig::default();
        config.gesture.board_end = config.gesture.board_start;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_default_file_is_not_an_error() {
        let config = SchedulingConfig::load(None).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(SchedulingConfig::load(Some(Path::new("does/not/exist.toml"))).is_err());
    }
}
