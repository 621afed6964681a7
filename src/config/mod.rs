//! Decoder configuration.
//!
//! All tunables of the decode pipeline live here and load from TOML:
//!
//! ```toml
//! [survey]
//! separation_time_secs = 4.5
//!
//! [burst]
//! grouping = "status-bracket"
//! bracket_padding_secs = 1.5
//! footer_lookback_secs = 7200.0
//! fd_sample_count = "per-pulse"
//!
//! [status]
//! survey_period_mapping = "documented"
//! ```
//!
//! Every field has a default matching the wire contract, so an empty file
//! (or [`DecoderConfig::default`]) is a valid configuration.

use std::path::Path;

use chrono::Duration;
use serde::Deserialize;
use thiserror::Error;

use crate::burst::grouping::{
    BracketOptions, DEFAULT_BRACKET_PADDING_SECS, DEFAULT_FOOTER_LOOKBACK_SECS,
    DEFAULT_MAX_BRACKET_GAP_SECS,
};
use crate::burst::FdCountVariant;
use crate::status::SurveyPeriodMapping;
use crate::survey::DEFAULT_SEPARATION_TIME_SECS;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Top-level decoder configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DecoderConfig {
    #[serde(default)]
    pub survey: SurveyOptions,
    #[serde(default)]
    pub burst: BurstOptions,
    #[serde(default)]
    pub status: StatusOptions,
}

impl DecoderConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration from a TOML string (useful for testing).
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

// =============================================================================
// Survey
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct SurveyOptions {
    /// Arrival gap starting a new cluster within one experiment number.
    #[serde(default = "default_separation_time")]
    pub separation_time_secs: f64,
}

impl Default for SurveyOptions {
    fn default() -> Self {
        Self {
            separation_time_secs: default_separation_time(),
        }
    }
}

impl SurveyOptions {
    pub fn separation_time(&self) -> Duration {
        secs(self.separation_time_secs)
    }
}

fn default_separation_time() -> f64 {
    DEFAULT_SEPARATION_TIME_SECS
}

// =============================================================================
// Burst
// =============================================================================

/// Grouping strategy applied during a decode pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupingMode {
    /// Group by experiment number, command recovered from the GPS echo.
    #[default]
    ExperimentNumber,
    /// Group between matching burst-type status frames.
    StatusBracket,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BurstOptions {
    #[serde(default)]
    pub grouping: GroupingMode,

    /// Padding applied on both sides of a status bracket.
    #[serde(default = "default_bracket_padding")]
    pub bracket_padding_secs: f64,

    /// Maximum span between two bracketing status frames.
    #[serde(default = "default_max_bracket_gap")]
    pub max_bracket_gap_secs: f64,

    /// Lookback window ahead of an unpaired trailing status frame.
    #[serde(default = "default_footer_lookback")]
    pub footer_lookback_secs: f64,

    /// Expected-sample-count formula for frequency-domain bursts.
    #[serde(default)]
    pub fd_sample_count: FdCountVariant,
}

impl Default for BurstOptions {
    fn default() -> Self {
        Self {
            grouping: GroupingMode::default(),
            bracket_padding_secs: default_bracket_padding(),
            max_bracket_gap_secs: default_max_bracket_gap(),
            footer_lookback_secs: default_footer_lookback(),
            fd_sample_count: FdCountVariant::default(),
        }
    }
}

impl BurstOptions {
    pub fn bracket_options(&self) -> BracketOptions {
        BracketOptions {
            padding: secs(self.bracket_padding_secs),
            max_gap: secs(self.max_bracket_gap_secs),
            lookback: secs(self.footer_lookback_secs),
        }
    }
}

fn default_bracket_padding() -> f64 {
    DEFAULT_BRACKET_PADDING_SECS
}

fn default_max_bracket_gap() -> f64 {
    DEFAULT_MAX_BRACKET_GAP_SECS
}

fn default_footer_lookback() -> f64 {
    DEFAULT_FOOTER_LOOKBACK_SECS
}

// =============================================================================
// Status
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusOptions {
    /// Which survey-period bit mapping to apply (see
    /// [`SurveyPeriodMapping`]).
    #[serde(default)]
    pub survey_period_mapping: SurveyPeriodMapping,
}

fn secs(s: f64) -> Duration {
    Duration::milliseconds((s * 1000.0) as i64)
}

// =============================================================================
// Tests
// =============================================================================
