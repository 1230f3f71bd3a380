// Public result types for the analyzer
//
// Beat-type codes follow the externally defined annotation enumeration
// shared with record-reading tools; only the members this analyzer emits
// are represented here.

use serde::{Deserialize, Serialize};

use crate::analysis::BeatClass;

/// Externally defined annotation code for a classified beat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeatCode {
    /// Normal sinus beat (annotation code 1)
    Normal,
    /// Premature ventricular contraction (annotation code 5)
    Pvc,
    /// Beat of unknown origin (annotation code 13)
    Unknown,
}

impl BeatCode {
    /// Numeric annotation code
    pub fn code(self) -> u8 {
        match self {
            BeatCode::Normal => 1,
            BeatCode::Pvc => 5,
            BeatCode::Unknown => 13,
        }
    }

    pub(crate) fn from_class(class: BeatClass) -> Self {
        match class {
            BeatClass::Normal => BeatCode::Normal,
            BeatClass::Pvc => BeatCode::Pvc,
            BeatClass::Unknown => BeatCode::Unknown,
        }
    }
}

/// One emitted beat annotation
///
/// Returned by `EcgAnalyzer::analyze` on the sample at which the beat
/// becomes classifiable; absent on every other sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeatAnnotation {
    /// Samples between the estimated R-wave and the current input sample
    pub samples_since_r_wave: usize,
    /// Beat classification code
    pub beat_type: BeatCode,
    /// Template slot the beat matched; the slot count when unmatched
    pub match_type: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotation_codes() {
        assert_eq!(BeatCode::Normal.code(), 1);
        assert_eq!(BeatCode::Pvc.code(), 5);
        assert_eq!(BeatCode::Unknown.code(), 13);
    }

    #[test]
    fn test_code_from_class() {
        assert_eq!(BeatCode::from_class(BeatClass::Normal), BeatCode::Normal);
        assert_eq!(BeatCode::from_class(BeatClass::Pvc), BeatCode::Pvc);
        assert_eq!(BeatCode::from_class(BeatClass::Unknown), BeatCode::Unknown);
    }

    #[test]
    fn test_annotation_serializes() {
        let annotation = BeatAnnotation {
            samples_since_r_wave: 72,
            beat_type: BeatCode::Normal,
            match_type: 0,
        };
        let json = serde_json::to_string(&annotation).unwrap();
        let parsed: BeatAnnotation = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, annotation);
    }
}
