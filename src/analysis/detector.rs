// Adaptive QRS detector
//
// Streams one sample at a time through the QRS filter chain and tracks
// peaks of the integrated signal against an adaptive threshold placed
// between running QRS and noise-peak means. Detection logic per sample:
//
// 1. Peak tracking: a local maximum is emitted once the signal falls below
//    half its height or 95 ms pass without a new maximum.
// 2. Pre-blanking: peaks are held for 195 ms so only the largest peak in
//    any blanking window survives (one QRS per window).
// 3. Baseline-shift rejection: a candidate is only accepted when the raw
//    signal's derivative shows both a positive and a negative excursion of
//    comparable size within 150 ms of each other.
// 4. Adaptive threshold: thresh = nmean + 0.3125 * (qmean - nmean) over
//    8-deep QRS and noise peak histories.
// 5. Search-back: a sub-threshold peak at least 360 ms after the previous
//    QRS is accepted retroactively when 1.5 RR intervals elapse with no
//    detection and the peak still clears half the threshold.
// 6. Reset: eight consecutive one-second windows without a detection
//    rebuild the peak history from the per-window maxima.
//
// `detect` returns 0 or, once per QRS, the number of samples elapsed
// between the R-wave estimate and the current input sample.

use crate::analysis::filter::QrsFilter;
use crate::config::ms_to_samples;
use crate::error::AnalyzerError;

/// Peaks smaller than this never count as QRS candidates
const MIN_PEAK_AMP: i32 = 7;

/// Fraction of the QRS-to-noise mean gap used for the detection threshold
const THRESHOLD_FRACTION: f64 = 0.3125;

/// Depth of the QRS, noise and RR histories
const HISTORY: usize = 8;

/// Streaming QRS detector over a single integer sample stream
pub struct QrsDetector {
    filter: QrsFilter,

    // Rate-derived windows
    ms95: i32,
    ms150: i32,
    ms220: usize,
    ms360: i32,
    ms1000: i32,
    ms1500: i32,
    pre_blank: i32,
    window_width: i32,
    filter_delay: i32,

    // Peak tracker on the filtered signal
    peak_max: i32,
    peak_time_since_max: i32,
    peak_last_datum: i32,

    // Pre-blank peak holding
    pre_blank_cnt: i32,
    temp_peak: i32,

    // Raw-derivative ring for baseline-shift discrimination
    dd_buffer: Vec<i32>,
    dd_ptr: usize,

    // Adaptive detection state
    det_thresh: i32,
    qpkcnt: usize,
    qrsbuf: [i32; HISTORY],
    noise: [i32; HISTORY],
    rrbuf: [i32; HISTORY],
    rset_buff: [i32; HISTORY],
    rset_count: usize,
    qmean: i32,
    nmean: i32,
    rrmean: i32,
    count: i32,
    sbpeak: i32,
    sbloc: i32,
    sbcount: i32,
    init_blank: i32,
    init_max: i32,
}

impl QrsDetector {
    /// Create a detector for the given detection rate in Hz
    pub fn new(sample_rate: u32) -> Result<Self, AnalyzerError> {
        if !(crate::config::MIN_SAMPLE_RATE..=crate::config::MAX_SAMPLE_RATE)
            .contains(&sample_rate)
        {
            return Err(AnalyzerError::SampleRateOutOfRange { rate: sample_rate });
        }

        let filter = QrsFilter::new(sample_rate);
        let ms = |millis| ms_to_samples(sample_rate, millis);
        let pre_blank = ms(195) as i32;
        let window_width = filter.window_width() as i32;
        let filter_delay = filter.chain_delay() as i32 + pre_blank;
        let der_delay = window_width + filter_delay + ms(100) as i32;

        Ok(Self {
            filter,
            ms95: ms(95) as i32,
            ms150: ms(150) as i32,
            ms220: ms(220),
            ms360: ms(360) as i32,
            ms1000: ms(1000) as i32,
            ms1500: ms(1500) as i32,
            pre_blank,
            window_width,
            filter_delay,
            peak_max: 0,
            peak_time_since_max: 0,
            peak_last_datum: 0,
            pre_blank_cnt: 0,
            temp_peak: 0,
            dd_buffer: vec![0; der_delay as usize],
            dd_ptr: 0,
            det_thresh: 0,
            qpkcnt: 0,
            qrsbuf: [0; HISTORY],
            noise: [0; HISTORY],
            rrbuf: [0; HISTORY],
            rset_buff: [0; HISTORY],
            rset_count: 0,
            qmean: 0,
            nmean: 0,
            rrmean: 0,
            count: 0,
            sbpeak: 0,
            sbloc: 0,
            sbcount: ms(1500) as i32,
            init_blank: 0,
            init_max: 0,
        })
    }

    /// Fixed estimate of samples between R-wave and detection
    pub fn detection_delay(&self) -> usize {
        (self.window_width + self.filter_delay) as usize
    }

    /// Process one sample; returns 0 or the detection delay in samples
    pub fn detect(&mut self, sample: i32) -> usize {
        let fdatum = self.filter.filter(sample);

        let mut a_peak = self.track_peak(fdatum);
        if a_peak < MIN_PEAK_AMP {
            a_peak = 0;
        }

        // Hold any peak for the blanking interval in case a bigger one
        // arrives; there can only be one QRS per blanking window.
        let mut new_peak = 0;
        if a_peak != 0 && self.pre_blank_cnt == 0 {
            self.temp_peak = a_peak;
            self.pre_blank_cnt = self.pre_blank;
        } else if a_peak == 0 && self.pre_blank_cnt > 0 {
            self.pre_blank_cnt -= 1;
            if self.pre_blank_cnt == 0 {
                new_peak = self.temp_peak;
            }
        } else if a_peak != 0 {
            if a_peak > self.temp_peak {
                self.temp_peak = a_peak;
                self.pre_blank_cnt = self.pre_blank;
            } else {
                self.pre_blank_cnt -= 1;
                if self.pre_blank_cnt == 0 {
                    new_peak = self.temp_peak;
                }
            }
        }

        // Keep the raw signal's derivative for baseline-shift checks.
        let raw_slope = self.filter.deriv1(sample);
        self.dd_buffer[self.dd_ptr] = raw_slope;
        self.dd_ptr += 1;
        if self.dd_ptr == self.dd_buffer.len() {
            self.dd_ptr = 0;
        }

        let mut qrs_delay: i32 = 0;

        if self.qpkcnt < HISTORY {
            // Initialization: collect the largest peak in each of the first
            // eight one-second windows.
            self.count += 1;
            if new_peak > 0 {
                self.count = self.window_width;
            }
            self.init_blank += 1;
            if self.init_blank == self.ms1000 {
                self.init_blank = 0;
                self.qrsbuf[self.qpkcnt] = self.init_max;
                self.init_max = 0;
                self.qpkcnt += 1;
                if self.qpkcnt == HISTORY {
                    self.qmean = mean(&self.qrsbuf);
                    self.nmean = 0;
                    self.rrmean = self.ms1000;
                    self.sbcount = self.ms1500 + self.ms150;
                    self.det_thresh = self.threshold();
                    log::debug!(
                        "[QrsDetector] Initialized: qmean={} thresh={}",
                        self.qmean,
                        self.det_thresh
                    );
                }
            }
            if new_peak > self.init_max {
                self.init_max = new_peak;
            }
        } else {
            self.count += 1;
            if new_peak > 0 && !self.is_baseline_shift() {
                if new_peak > self.det_thresh {
                    // QRS detected.
                    shift_push(&mut self.qrsbuf, new_peak);
                    self.qmean = mean(&self.qrsbuf);
                    self.det_thresh = self.threshold();
                    shift_push(&mut self.rrbuf, self.count - self.window_width);
                    self.rrmean = mean(&self.rrbuf);
                    self.sbcount = self.rrmean + (self.rrmean >> 1) + self.window_width;
                    self.count = self.window_width;
                    self.sbpeak = 0;
                    qrs_delay = self.window_width + self.filter_delay;
                    self.init_blank = 0;
                    self.init_max = 0;
                    self.rset_count = 0;
                } else {
                    // Sub-threshold peak: feed the noise estimate and hold
                    // the peak for search-back, excluding early peaks that
                    // are likely T-waves.
                    shift_push(&mut self.noise, new_peak);
                    self.nmean = mean(&self.noise);
                    self.det_thresh = self.threshold();
                    if new_peak > self.sbpeak && (self.count - self.window_width) >= self.ms360 {
                        self.sbpeak = new_peak;
                        self.sbloc = self.count - self.window_width;
                    }
                }
            }

            // Search-back: accept the held peak retroactively when the
            // expected RR interval has elapsed by half again.
            if self.count > self.sbcount && self.sbpeak > (self.det_thresh >> 1) {
                shift_push(&mut self.qrsbuf, self.sbpeak);
                self.qmean = mean(&self.qrsbuf);
                self.det_thresh = self.threshold();
                shift_push(&mut self.rrbuf, self.sbloc);
                self.rrmean = mean(&self.rrbuf);
                self.sbcount = self.rrmean + (self.rrmean >> 1) + self.window_width;
                self.count -= self.sbloc;
                qrs_delay = self.count + self.filter_delay;
                self.sbpeak = 0;
                self.init_blank = 0;
                self.init_max = 0;
                self.rset_count = 0;
                log::debug!("[QrsDetector] Search-back detection, delay={}", qrs_delay);
            }
        }

        // Background reset estimator: after eight silent one-second windows
        // rebuild the peak history from the window maxima.
        if self.qpkcnt == HISTORY {
            self.init_blank += 1;
            if self.init_blank == self.ms1000 {
                self.init_blank = 0;
                self.rset_buff[self.rset_count] = self.init_max;
                self.init_max = 0;
                self.rset_count += 1;
                if self.rset_count == HISTORY {
                    self.qrsbuf = self.rset_buff;
                    self.noise = [0; HISTORY];
                    self.qmean = mean(&self.rset_buff);
                    self.nmean = 0;
                    self.rrmean = self.ms1000;
                    self.sbcount = self.ms1500 + self.ms150;
                    self.det_thresh = self.threshold();
                    self.init_blank = 0;
                    self.init_max = 0;
                    self.rset_count = 0;
                    self.sbpeak = 0;
                    log::debug!(
                        "[QrsDetector] Threshold reset after silence: qmean={}",
                        self.qmean
                    );
                }
            }
            if new_peak > self.init_max {
                self.init_max = new_peak;
            }
        }

        qrs_delay.max(0) as usize
    }

    /// Track local maxima of the filtered signal
    ///
    /// A peak is emitted once the signal drops below half the running
    /// maximum or 95 ms pass without exceeding it. Strict comparisons keep
    /// the first-seen maximum on ties.
    fn track_peak(&mut self, datum: i32) -> i32 {
        let mut pk = 0;

        if self.peak_time_since_max > 0 {
            self.peak_time_since_max += 1;
        }

        if datum > self.peak_last_datum && datum > self.peak_max {
            self.peak_max = datum;
            if self.peak_max > 2 {
                self.peak_time_since_max = 1;
            }
        } else if datum < (self.peak_max >> 1) || self.peak_time_since_max > self.ms95 {
            pk = self.peak_max;
            self.peak_max = 0;
            self.peak_time_since_max = 0;
        }

        self.peak_last_datum = datum;
        pk
    }

    /// Baseline-shift discrimination over the raw-derivative ring
    ///
    /// Scans the oldest 220 ms span of the ring (which by construction
    /// covers the candidate peak's location in the raw signal). A true QRS
    /// shows a positive and a negative slope excursion of comparable size
    /// within 150 ms; a baseline step shows only one polarity.
    fn is_baseline_shift(&self) -> bool {
        let mut max = 0;
        let mut min = 0;
        let mut maxt = 0i32;
        let mut mint = 0i32;

        let mut ptr = self.dd_ptr;
        for t in 0..self.ms220 {
            let x = self.dd_buffer[ptr];
            if x > max {
                max = x;
                maxt = t as i32;
            } else if x < min {
                min = x;
                mint = t as i32;
            }
            ptr += 1;
            if ptr == self.dd_buffer.len() {
                ptr = 0;
            }
        }

        let min = -min;
        !(max > (min >> 3) && min > (max >> 3) && (maxt - mint).abs() < self.ms150)
    }

    fn threshold(&self) -> i32 {
        let gap = (self.qmean - self.nmean) as f64 * THRESHOLD_FRACTION;
        self.nmean + gap as i32
    }
}

fn mean(buf: &[i32; HISTORY]) -> i32 {
    buf.iter().sum::<i32>() / HISTORY as i32
}

fn shift_push(buf: &mut [i32; HISTORY], value: i32) {
    for i in (1..HISTORY).rev() {
        buf[i] = buf[i - 1];
    }
    buf[0] = value;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One synthetic biphasic QRS-like wavelet at detection rate 200 Hz
    fn place_beat(signal: &mut [i32], at: usize, amp: i32) {
        let shape = [0, 2, 5, 10, 6, 2, 0, -3, -6, -3, 0];
        for (k, &s) in shape.iter().enumerate() {
            if at + k < signal.len() {
                signal[at + k] += s * amp / 10;
            }
        }
    }

    /// Build a train of beats with the given period in samples
    fn beat_train(len: usize, period: usize, amp: i32) -> Vec<i32> {
        let mut signal = vec![0; len];
        let mut at = period;
        while at + 16 < len {
            place_beat(&mut signal, at, amp);
            at += period;
        }
        signal
    }

    fn run(detector: &mut QrsDetector, signal: &[i32]) -> Vec<(usize, usize)> {
        let mut detections = Vec::new();
        for (i, &s) in signal.iter().enumerate() {
            let delay = detector.detect(s);
            if delay != 0 {
                detections.push((i, delay));
            }
        }
        detections
    }

    #[test]
    fn test_no_detections_on_silence() {
        let mut detector = QrsDetector::new(200).unwrap();
        let detections = run(&mut detector, &vec![0; 4000]);
        assert!(
            detections.is_empty(),
            "silence must not produce detections, got {:?}",
            detections
        );
    }

    #[test]
    fn test_rejects_unsupported_rates() {
        assert!(QrsDetector::new(100).is_err());
        assert!(QrsDetector::new(500).is_err());
        assert!(QrsDetector::new(200).is_ok());
    }

    #[test]
    fn test_impulse_train_delay_consistency() {
        // 60 bpm at 200 Hz: one beat per 200 samples, 30 seconds.
        let mut detector = QrsDetector::new(200).unwrap();
        let signal = beat_train(6000, 200, 2000);
        let detections = run(&mut detector, &signal);

        assert!(
            detections.len() >= 15,
            "expected steady detections, got {}",
            detections.len()
        );

        let expected = detector.detection_delay();
        // Skip the learning period, then every delay is the fixed estimate.
        for &(at, delay) in detections.iter().skip(3) {
            assert_eq!(
                delay, expected,
                "delay at sample {} should be {}",
                at, expected
            );
        }

        // R-wave estimates are spaced exactly one period apart.
        let locations: Vec<isize> = detections
            .iter()
            .skip(3)
            .map(|&(at, delay)| at as isize - delay as isize)
            .collect();
        for pair in locations.windows(2) {
            assert_eq!(pair[1] - pair[0], 200, "RR spacing should match period");
        }
    }

    #[test]
    fn test_search_back_recovers_small_beat() {
        let mut detector = QrsDetector::new(200).unwrap();
        let mut signal = beat_train(6000, 200, 2000);
        // Replace one mid-stream beat with one far below threshold.
        let weak_at = 4000;
        for k in 0..16 {
            signal[weak_at + k] = 0;
        }
        place_beat(&mut signal, weak_at, 500);

        let detections = run(&mut detector, &signal);
        let expected = detector.detection_delay();

        // The weak beat is found retroactively: one detection between the
        // neighbors carries a delay larger than the fixed estimate.
        let recovered: Vec<_> = detections
            .iter()
            .filter(|&&(at, delay)| at > weak_at && at < weak_at + 400 && delay > expected)
            .collect();
        assert!(
            !recovered.is_empty(),
            "search-back should recover the sub-threshold beat: {:?}",
            detections
        );
    }

    #[test]
    fn test_baseline_step_is_rejected() {
        let mut detector = QrsDetector::new(200).unwrap();
        let mut signal = beat_train(4400, 200, 2000);
        // One-way step with no beats afterwards.
        for s in signal.iter_mut().skip(4000) {
            *s = 4000;
        }

        let detections = run(&mut detector, &signal);
        let after_step: Vec<_> = detections.iter().filter(|&&(at, _)| at >= 4000).collect();
        assert!(
            after_step.is_empty(),
            "positive-going step must be rejected as baseline shift: {:?}",
            after_step
        );
    }

    #[test]
    fn test_detector_ready_after_silence_reset() {
        let mut detector = QrsDetector::new(200).unwrap();
        let mut signal = beat_train(6000, 200, 2000);
        // 10 seconds of silence, then the train resumes.
        signal.extend(std::iter::repeat(0).take(2000));
        signal.extend(beat_train(1200, 200, 2000));

        let detections = run(&mut detector, &signal);
        let resumed: Vec<_> = detections.iter().filter(|&&(at, _)| at >= 8000).collect();
        assert!(
            !resumed.is_empty(),
            "detector must still fire after a long silence"
        );
    }
}
