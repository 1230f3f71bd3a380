// Noise estimator
//
// Keeps the last 1.5 seconds of raw samples and, when a beat is reported,
// measures the peak-to-peak excursion of the stretch between the end of the
// previous beat and the beginning of the current one. That inter-beat
// stretch should be near-isoelectric; its excursion divided by its length
// is a usable low-frequency noise figure for the classifier.

use crate::config::ms_to_samples;

/// Streaming noise estimate over the raw sample stream
pub struct NoiseEstimate {
    buffer: Vec<i32>,
    ptr: usize,
    ms250: i32,
}

impl NoiseEstimate {
    /// Create an estimator for the given detection rate in Hz
    pub fn new(sample_rate: u32) -> Self {
        Self {
            buffer: vec![0; ms_to_samples(sample_rate, 1500)],
            ptr: 0,
            ms250: ms_to_samples(sample_rate, 250) as i32,
        }
    }

    /// Store one sample and, when `delay != 0`, estimate noise
    ///
    /// # Arguments
    /// * `sample` - Current raw sample (stored on every call)
    /// * `delay` - Samples since the detected R-wave, 0 when no beat
    /// * `rr` - Interval between this beat and the previous one
    /// * `beat_begin` - Samples from beat onset anchor to R-wave
    /// * `beat_end` - Samples from R-wave to beat end anchor
    ///
    /// # Returns
    /// Ten times the per-sample peak-to-peak excursion of the inter-beat
    /// window, or 0 when the window is empty or out of range.
    pub fn check(&mut self, sample: i32, delay: i32, rr: i32, beat_begin: i32, beat_end: i32) -> i32 {
        self.buffer[self.ptr] = sample;
        self.ptr += 1;
        if self.ptr == self.buffer.len() {
            self.ptr = 0;
        }

        // Window between 300 ms after the last R-wave and 250 ms before the
        // present one, capped at 250 ms.
        let mut nc_start = delay + rr - beat_end;
        let nc_end = delay + beat_begin;
        if nc_start > nc_end + self.ms250 {
            nc_start = nc_end + self.ms250;
        }

        if delay != 0 && nc_start < self.buffer.len() as i32 && nc_start > nc_end {
            let mut ptr = self.ptr as i32 - nc_start;
            if ptr < 0 {
                ptr += self.buffer.len() as i32;
            }
            let mut ptr = ptr as usize;

            let mut nc_max = self.buffer[ptr];
            let mut nc_min = self.buffer[ptr];
            for _ in 0..(nc_start - nc_end) {
                let x = self.buffer[ptr];
                if x > nc_max {
                    nc_max = x;
                } else if x < nc_min {
                    nc_min = x;
                }
                ptr += 1;
                if ptr == self.buffer.len() {
                    ptr = 0;
                }
            }

            let noise_index = (nc_max - nc_min) as f64 / (nc_start - nc_end) as f64;
            (noise_index * 10.0) as i32
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_beat_returns_zero() {
        let mut noise = NoiseEstimate::new(200);
        for i in 0..500 {
            assert_eq!(noise.check(i, 0, 0, 0, 0), 0);
        }
    }

    #[test]
    fn test_flat_interbeat_window_is_quiet() {
        let mut noise = NoiseEstimate::new(200);
        for _ in 0..400 {
            noise.check(100, 0, 0, 0, 0);
        }
        // delay 72, rr 200, begin 50, end 60: window fully inside the flat run
        let est = noise.check(100, 72, 200, 50, 60);
        assert_eq!(est, 0, "constant signal has zero peak-to-peak noise");
    }

    #[test]
    fn test_noisy_interbeat_window_scores() {
        let mut noise = NoiseEstimate::new(200);
        for i in 0..400i32 {
            noise.check(if i % 2 == 0 { 0 } else { 120 }, 0, 0, 0, 0);
        }
        let est = noise.check(0, 72, 200, 50, 60);
        assert!(est > 0, "alternating signal must register noise, got {est}");
    }

    #[test]
    fn test_beats_too_close_yield_zero() {
        let mut noise = NoiseEstimate::new(200);
        for i in 0..400 {
            noise.check(i, 0, 0, 0, 0);
        }
        // rr shorter than begin+end collapses the window
        let est = noise.check(0, 72, 80, 50, 60);
        assert_eq!(est, 0, "empty or negative window must return 0");
    }
}
