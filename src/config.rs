//! Analyzer configuration and rate-derived timing
//!
//! This module provides the rate pair that parameterizes the whole pipeline
//! and the millisecond-to-sample conversion every component derives its
//! window lengths from. Configuration can be loaded from a JSON file for
//! experimentation without recompilation, falling back to defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::AnalyzerError;

/// Lowest supported detection rate in Hz
pub const MIN_SAMPLE_RATE: u32 = 150;
/// Highest supported detection rate in Hz
pub const MAX_SAMPLE_RATE: u32 = 400;

/// Rate pair driving the analyzer
///
/// The detection rate is the rate at which raw samples arrive and the QRS
/// filters run; the beat rate is the (lower) rate at which beat templates
/// are stored and compared. The beat rate must evenly divide the detection
/// rate; the typical configuration is 200/100 Hz.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Detection rate in Hz (input stream and filter chain)
    pub sample_rate: u32,
    /// Beat-analysis rate in Hz (template storage and matching)
    pub beat_sample_rate: u32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 200,
            beat_sample_rate: 100,
        }
    }
}

impl AnalyzerConfig {
    /// Create a validated config from a rate pair
    pub fn new(sample_rate: u32, beat_sample_rate: u32) -> Result<Self, AnalyzerError> {
        let config = Self {
            sample_rate,
            beat_sample_rate,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the rate pair against the supported envelope
    pub fn validate(&self) -> Result<(), AnalyzerError> {
        if self.sample_rate < MIN_SAMPLE_RATE || self.sample_rate > MAX_SAMPLE_RATE {
            return Err(AnalyzerError::SampleRateOutOfRange {
                rate: self.sample_rate,
            });
        }
        if self.beat_sample_rate == 0 || self.sample_rate % self.beat_sample_rate != 0 {
            return Err(AnalyzerError::RateMismatch {
                sample_rate: self.sample_rate,
                beat_sample_rate: self.beat_sample_rate,
            });
        }
        Ok(())
    }

    /// Integer ratio between detection and beat rates
    pub fn rate_ratio(&self) -> usize {
        (self.sample_rate / self.beat_sample_rate) as usize
    }

    /// Load configuration from a JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The loaded configuration, or defaults if the file is missing or invalid.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<AnalyzerConfig>(&contents) {
                Ok(config) => {
                    if let Err(err) = config.validate() {
                        log::warn!(
                            "[Config] Invalid rates in {:?}: {}. Using defaults.",
                            path.as_ref(),
                            err
                        );
                        return Self::default();
                    }
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }
}

/// Convert a duration in milliseconds to a sample count at `rate` Hz
///
/// Rounds to the nearest sample; exact at the canonical 200/100 Hz rates.
pub fn ms_to_samples(rate: u32, ms: u32) -> usize {
    ((ms as u64 * rate as u64 + 500) / 1000) as usize
}
