// Error types for the ECG analyzer
//
// Errors can only arise at construction time (invalid rate combinations).
// The per-sample hot path is total: every sample is accepted and degraded
// input is expressed as UNKNOWN verdicts, never as errors.

use std::fmt;

use crate::config::{MAX_SAMPLE_RATE, MIN_SAMPLE_RATE};

/// Construction-time analyzer errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyzerError {
    /// Detection sample rate outside the supported range
    SampleRateOutOfRange { rate: u32 },

    /// Beat-analysis rate does not evenly divide the detection rate
    RateMismatch {
        sample_rate: u32,
        beat_sample_rate: u32,
    },
}

impl AnalyzerError {
    /// Get the human-readable error message
    pub fn message(&self) -> String {
        match self {
            AnalyzerError::SampleRateOutOfRange { rate } => {
                format!(
                    "sample rate {} Hz outside supported range {}-{} Hz",
                    rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
                )
            }
            AnalyzerError::RateMismatch {
                sample_rate,
                beat_sample_rate,
            } => {
                format!(
                    "beat rate {} Hz must evenly divide sample rate {} Hz",
                    beat_sample_rate, sample_rate
                )
            }
        }
    }
}

impl fmt::Display for AnalyzerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for AnalyzerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = AnalyzerError::SampleRateOutOfRange { rate: 100 };
        assert!(err.message().contains("100"));
        assert!(err.message().contains("150-400"));

        let err = AnalyzerError::RateMismatch {
            sample_rate: 200,
            beat_sample_rate: 150,
        };
        assert!(err.message().contains("150"));
        assert!(err.message().contains("200"));
    }

    #[test]
    fn test_error_display_matches_message() {
        let err = AnalyzerError::SampleRateOutOfRange { rate: 500 };
        assert_eq!(format!("{}", err), err.message());
    }
}
