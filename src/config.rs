//! Scan configuration using Figment.
//!
//! Configuration is loaded from (in order of precedence):
//! 1. Environment variables prefixed with `LASER_ALIGN_` (nested keys
//!    separated by `__`)
//! 2. A TOML file (default: `config/laser_align.toml`)
//! 3. Built-in defaults
//!
//! ```text
//! LASER_ALIGN_APPLICATION__LOG_LEVEL=debug
//! LASER_ALIGN_SENSOR__SATURATION_LEVEL=4095
//! LASER_ALIGN_SCAN__SEQUENCE=fixed_timer
//! ```
//!
//! # Example
//!
//! ```no_run
//! use laser_align::config::ScanConfig;
//!
//! let config = ScanConfig::load_from("config/laser_align.toml")?;
//! for position in config.sequence()?.take(3) {
//!     println!("{}", position);
//! }
//! # Ok::<(), laser_align::error::ScanError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ScanError, ScanResult};
use crate::measurement::Position;
use crate::sequence::{linspace, ExplicitList, FixedTimer, Raster};
use crate::validators::{SaturationPolicy, DEFAULT_GAIN_STEP, TEN_BIT_FULL_SCALE};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/laser_align.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "LASER_ALIGN_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub application: ApplicationConfig,
    pub sensor: SensorConfig,
    pub scan: ScanSettings,
}

/// Application-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "laser_align".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Sensor limits and validation criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Full-scale sensor value treated as saturation
    pub saturation_level: f64,
    /// Gain decrement on a saturation retry
    pub gain_step: f64,
    /// Gain at scan start
    pub initial_gain: f64,
    /// Relative error above which a reading is noisy
    pub max_relative_error: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            saturation_level: TEN_BIT_FULL_SCALE,
            gain_step: DEFAULT_GAIN_STEP,
            initial_gain: 0.0,
            max_relative_error: 0.5,
        }
    }
}

/// Evenly spaced samples along one axis, relative to the initial position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisRange {
    pub start: f64,
    pub stop: f64,
    pub points: usize,
}

impl AxisRange {
    pub fn values(&self) -> Vec<f64> {
        linspace(self.start, self.stop, self.points)
    }

    /// A single sample at offset zero.
    pub fn fixed() -> Self {
        Self {
            start: 0.0,
            stop: 0.0,
            points: 1,
        }
    }
}

/// Traversal policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceKind {
    #[default]
    Raster,
    FixedTimer,
    Explicit,
}

/// Scan geometry and sequencing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    pub initial_position: [f64; 3],
    pub x: AxisRange,
    pub y: AxisRange,
    pub z: AxisRange,
    pub sequence: SequenceKind,
    /// Absolute positions visited by the explicit sequence
    pub positions: Vec<[f64; 3]>,
    /// Measurements per position for the fixed timer
    pub dwell_count: usize,
    /// Wait between dwell measurements in milliseconds
    pub dwell_interval_ms: u64,
    pub overlap_allowed: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            initial_position: [0.0; 3],
            x: AxisRange {
                start: -2.0,
                stop: 2.0,
                points: 5,
            },
            y: AxisRange::fixed(),
            z: AxisRange::fixed(),
            sequence: SequenceKind::Raster,
            positions: Vec::new(),
            dwell_count: 5,
            dwell_interval_ms: 1000,
            overlap_allowed: false,
        }
    }
}

impl ScanConfig {
    /// Loads from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> ScanResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Loads from `path` (missing files fall back to defaults) and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> ScanResult<Self> {
        let config: ScanConfig = Figment::from(Serialized::defaults(ScanConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that would produce an unusable scan.
    pub fn validate(&self) -> ScanResult<()> {
        if self.scan.sequence == SequenceKind::FixedTimer && self.scan.dwell_count == 0 {
            return Err(ScanError::Configuration(
                "dwell_count must be at least 1".to_string(),
            ));
        }
        if self.sensor.gain_step < 0.0 {
            return Err(ScanError::Configuration(format!(
                "gain_step must not be negative, got {}",
                self.sensor.gain_step
            )));
        }
        if self.sensor.max_relative_error < 0.0 {
            return Err(ScanError::Configuration(format!(
                "max_relative_error must not be negative, got {}",
                self.sensor.max_relative_error
            )));
        }
        if self.scan.sequence == SequenceKind::Explicit {
            if self.scan.positions.is_empty() {
                return Err(ScanError::Configuration(
                    "explicit sequence requires at least one position".to_string(),
                ));
            }
        } else {
            for (name, range) in [("x", self.scan.x), ("y", self.scan.y), ("z", self.scan.z)] {
                if range.points == 0 {
                    return Err(ScanError::Configuration(format!(
                        "axis {} must have at least one point",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn initial_position(&self) -> Position {
        Position::from(self.scan.initial_position)
    }

    pub fn saturation_policy(&self) -> SaturationPolicy {
        SaturationPolicy {
            saturation_level: self.sensor.saturation_level,
            gain_step: self.sensor.gain_step,
        }
    }

    pub fn dwell_interval(&self) -> Duration {
        Duration::from_millis(self.scan.dwell_interval_ms)
    }

    /// Raster over the configured axis ranges around the initial position.
    pub fn raster(&self) -> Raster {
        Raster::new(
            self.scan.x.values(),
            self.scan.y.values(),
            self.scan.z.values(),
            self.initial_position(),
        )
    }

    /// Builds the configured position sequence.
    pub fn sequence(&self) -> ScanResult<Box<dyn Iterator<Item = Position>>> {
        self.validate()?;
        Ok(match self.scan.sequence {
            SequenceKind::Raster => Box::new(self.raster()),
            SequenceKind::FixedTimer => Box::new(
                FixedTimer::new(self.raster(), self.scan.dwell_count, self.dwell_interval())
                    .blocking(true),
            ),
            SequenceKind::Explicit => Box::new(ExplicitList::new(self.scan.positions.clone())),
        })
    }
}
