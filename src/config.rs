//! Detection configuration.
//!
//! Loaded from an optional TOML file, then individual values can be
//! overridden from the command line. The finished `DetectionConfig` is
//! immutable and passed by reference into the pipeline.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How per-comparison percentage and absolute triggers are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combinator {
    Or,
    And,
    Weighted,
}

/// The single detection method for a run, with only its own parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum DetectionStrategy {
    Threshold {
        pct_threshold: f64,
        abs_threshold: f64,
        combinator: Combinator,
    },
    ZScore {
        threshold: f64,
    },
    Iqr {
        multiplier: f64,
    },
    MeanDeviation {
        threshold_pct: f64,
    },
}

impl DetectionStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            DetectionStrategy::Threshold { .. } => "threshold comparison",
            DetectionStrategy::ZScore { .. } => "z-score",
            DetectionStrategy::Iqr { .. } => "IQR",
            DetectionStrategy::MeanDeviation { .. } => "mean deviation",
        }
    }

    pub fn needs_series(&self) -> bool {
        !matches!(self, DetectionStrategy::Threshold { .. })
    }
}

impl Default for DetectionStrategy {
    fn default() -> Self {
        DetectionStrategy::Threshold {
            pct_threshold: 30.0,
            abs_threshold: 100.0,
            combinator: Combinator::Or,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub strategy: DetectionStrategy,

    /// Comparisons at or below this percentage never trip (threshold method).
    pub tolerance_pct: f64,

    /// Days measured so far in the current period of a direct-comparison upload.
    pub measured_period_days: u32,

    /// Cell tokens meaning "no data".
    pub sentinels: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            strategy: DetectionStrategy::default(),
            tolerance_pct: 0.0,
            measured_period_days: 30,
            sentinels: vec!["#YOK".to_string(), "#N/A".to_string()],
        }
    }
}

impl DetectionConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: DetectionConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.strategy {
            DetectionStrategy::Threshold {
                pct_threshold,
                abs_threshold,
                ..
            } => {
                non_negative("pct_threshold", *pct_threshold)?;
                non_negative("abs_threshold", *abs_threshold)?;
            }
            DetectionStrategy::ZScore { threshold } => positive("threshold", *threshold)?,
            DetectionStrategy::Iqr { multiplier } => positive("multiplier", *multiplier)?,
            DetectionStrategy::MeanDeviation { threshold_pct } => {
                non_negative("threshold_pct", *threshold_pct)?
            }
        }

        non_negative("tolerance_pct", self.tolerance_pct)?;

        if !(1..=31).contains(&self.measured_period_days) {
            return Err(ConfigError::Invalid {
                name: "measured_period_days",
                reason: format!("{} is outside 1..=31", self.measured_period_days),
            });
        }

        Ok(())
    }
}

fn non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::Invalid {
            name,
            reason: format!("{value} must be a finite, non-negative number"),
        });
    }
    Ok(())
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::Invalid {
            name,
            reason: format!("{value} must be a finite, positive number"),
        });
    }
    Ok(())
}
