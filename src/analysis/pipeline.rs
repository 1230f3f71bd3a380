// Top-level stream orchestrator
//
// Drives one raw sample at a time through the detector and, once a detected
// beat has enough trailing samples, extracts the beat from the sample ring,
// downsamples it to the beat-analysis rate and hands it to the classifier.
// Detection delays wait in a small FIFO, aging by one sample per call,
// until the ring holds the full beat tail.
//
// The first emitted beat is always reported with the unknown-beat code;
// a beat the classifier discards as a PVC trailing edge folds its RR
// interval into the next one.

use crate::analysis::classifier::{BeatClassifier, Classification};
use crate::analysis::detector::QrsDetector;
use crate::analysis::features::BeatAnalyzer;
use crate::analysis::noise::NoiseEstimate;
use crate::api::{BeatAnnotation, BeatCode};
use crate::config::{ms_to_samples, AnalyzerConfig};
use crate::error::AnalyzerError;

/// Maximum number of detections awaiting classification
const BEAT_QUEUE_LENGTH: usize = 10;

/// Streaming ECG analyzer: QRS detection plus beat classification
pub struct EcgAnalyzer {
    detector: QrsDetector,
    classifier: BeatClassifier,
    noise: NoiseEstimate,

    ratio: usize,
    beat_length: usize,
    fidmark: usize,

    ring: Vec<i32>,
    ring_ptr: usize,
    rr_count: i32,
    queue: Vec<i32>,
    first_beat_reported: bool,

    // Detection-rate fallbacks and limits
    ms250: usize,
    ms300: usize,
    ms80: isize,
}

impl EcgAnalyzer {
    /// Create an analyzer for a detection/beat rate pair in Hz
    pub fn new(sample_rate: u32, beat_sample_rate: u32) -> Result<Self, AnalyzerError> {
        Self::with_config(AnalyzerConfig::new(sample_rate, beat_sample_rate)?)
    }

    /// Create an analyzer from a validated configuration
    pub fn with_config(config: AnalyzerConfig) -> Result<Self, AnalyzerError> {
        config.validate()?;
        let sample_rate = config.sample_rate;
        let beat_rate = config.beat_sample_rate;
        let beat_layout = BeatAnalyzer::new(beat_rate);

        // Ten seconds of history comfortably covers one beat span plus the
        // detection delay at every supported rate.
        let ring_length = ms_to_samples(sample_rate, 10_000);

        Ok(Self {
            detector: QrsDetector::new(sample_rate)?,
            classifier: BeatClassifier::new(sample_rate, beat_rate)?,
            noise: NoiseEstimate::new(sample_rate),
            ratio: config.rate_ratio(),
            beat_length: beat_layout.beat_length(),
            fidmark: beat_layout.fidmark(),
            ring: vec![0; ring_length],
            ring_ptr: 0,
            rr_count: 0,
            queue: Vec::with_capacity(BEAT_QUEUE_LENGTH),
            first_beat_reported: false,
            ms250: ms_to_samples(sample_rate, 250),
            ms300: ms_to_samples(sample_rate, 300),
            ms80: ms_to_samples(sample_rate, 80) as isize,
        })
    }

    /// True while the rhythm shows every-other-beat prematurity
    pub fn is_bigeminy(&self) -> bool {
        self.classifier.is_bigeminy()
    }

    /// Number of beat templates currently learned
    pub fn template_count(&self) -> usize {
        self.classifier.type_count()
    }

    /// Process one sample; returns an annotation when a beat is ready
    pub fn analyze(&mut self, sample: i32) -> Option<BeatAnnotation> {
        self.ring[self.ring_ptr] = sample;
        self.ring_ptr += 1;
        if self.ring_ptr == self.ring.len() {
            self.ring_ptr = 0;
        }

        self.rr_count += 1;
        for delay in self.queue.iter_mut() {
            *delay += 1;
        }

        let detected = self.detector.detect(sample);
        if detected != 0 {
            if self.queue.len() == BEAT_QUEUE_LENGTH {
                log::warn!("[EcgAnalyzer] Beat queue full, dropping oldest pending detection");
                self.queue.remove(0);
            }
            self.queue.push(detected as i32);
        }

        // The beat buffer extends past the R-wave; wait until the ring
        // holds the full tail.
        let tail_needed = ((self.beat_length - self.fidmark) * self.ratio) as i32;
        if self.queue.is_empty() || self.queue[0] < tail_needed {
            self.noise.check(sample, 0, 0, 0, 0);
            return None;
        }

        let delay = self.queue.remove(0);
        let rr = self.rr_count - delay;
        self.rr_count = delay;

        let (beat_begin, beat_end) = match self.classifier.dominant_anchors() {
            Some((begin, end)) => (begin * self.ratio, end * self.ratio),
            None => (self.ms250, self.ms300),
        };
        let noise_est = self.noise.check(
            sample,
            delay,
            rr,
            beat_begin as i32,
            beat_end as i32,
        );

        let mut beat = self.extract_beat(delay);

        let first_beat = !self.first_beat_reported;
        self.first_beat_reported = true;

        match self.classifier.classify(&mut beat, rr, noise_est) {
            Classification::Discard => {
                self.rr_count += rr;
                None
            }
            Classification::Beat(classified) => {
                let beat_type = if first_beat {
                    BeatCode::Unknown
                } else {
                    BeatCode::from_class(classified.class)
                };

                // Limit the fiducial correction in case onset and offset
                // estimation went wrong on a distorted beat.
                let adjustment =
                    (classified.fid_adj * self.ratio as isize).clamp(-self.ms80, self.ms80);
                let samples_since_r_wave = (delay as isize - adjustment).max(1) as usize;

                Some(BeatAnnotation {
                    samples_since_r_wave,
                    beat_type,
                    match_type: classified.match_type,
                })
            }
        }
    }

    /// Copy the beat span from the ring, pair-averaging down to beat rate
    fn extract_beat(&self, delay: i32) -> Vec<i32> {
        let ring_length = self.ring.len() as isize;
        let span_start = self.ring_ptr as isize
            - delay as isize
            - (self.fidmark * self.ratio) as isize;

        let mut beat = Vec::with_capacity(self.beat_length);
        let mut index = span_start.rem_euclid(ring_length) as usize;
        for _ in 0..self.beat_length {
            let mut sum = 0i32;
            for _ in 0..self.ratio {
                sum += self.ring[index];
                index += 1;
                if index == self.ring.len() {
                    index = 0;
                }
            }
            beat.push(sum.div_euclid(self.ratio as i32));
        }
        beat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::{EcgPattern, FixtureSpec};

    fn run(analyzer: &mut EcgAnalyzer, signal: &[i32]) -> Vec<(usize, BeatAnnotation)> {
        let mut annotations = Vec::new();
        for (i, &sample) in signal.iter().enumerate() {
            if let Some(annotation) = analyzer.analyze(sample) {
                annotations.push((i, annotation));
            }
        }
        annotations
    }

    #[test]
    fn test_rejects_invalid_rate_pairs() {
        assert!(EcgAnalyzer::new(100, 50).is_err());
        assert!(EcgAnalyzer::new(200, 150).is_err());
        assert!(EcgAnalyzer::new(200, 100).is_ok());
    }

    #[test]
    fn test_silence_produces_no_beats() {
        let mut analyzer = EcgAnalyzer::new(200, 100).unwrap();
        for _ in 0..4000 {
            assert!(analyzer.analyze(0).is_none());
        }
    }

    #[test]
    fn test_first_beat_reports_unknown_code() {
        let mut analyzer = EcgAnalyzer::new(200, 100).unwrap();
        let signal = FixtureSpec::named("sinus-60").generate();
        let annotations = run(&mut analyzer, &signal);

        assert!(!annotations.is_empty(), "sinus fixture must produce beats");
        assert_eq!(
            annotations[0].1.beat_type,
            BeatCode::Unknown,
            "first beat carries the unknown-beat code"
        );
    }

    #[test]
    fn test_annotation_positions_are_monotonic() {
        let mut analyzer = EcgAnalyzer::new(200, 100).unwrap();
        let signal = FixtureSpec::named("sinus-60").generate();
        let annotations = run(&mut analyzer, &signal);

        let positions: Vec<isize> = annotations
            .iter()
            .map(|&(at, a)| at as isize - a.samples_since_r_wave as isize)
            .collect();
        for pair in positions.windows(2) {
            assert!(
                pair[1] > pair[0],
                "R-wave estimates must advance: {positions:?}"
            );
        }
    }

    #[test]
    fn test_identical_streams_identical_output() {
        let signal = FixtureSpec {
            id: "noisy".into(),
            pattern: EcgPattern::NoisySinus {
                bpm: 70,
                noise_amp: 20,
            },
            sample_rate: 200,
            duration_ms: 30_000,
            amplitude: 600,
        }
        .generate();

        let mut first = EcgAnalyzer::new(200, 100).unwrap();
        let mut second = EcgAnalyzer::new(200, 100).unwrap();
        let a = run(&mut first, &signal);
        let b = run(&mut second, &signal);
        assert_eq!(a, b, "analysis must be deterministic");
    }
}
