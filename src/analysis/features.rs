// Per-beat geometry analysis
//
// Pure measurements over a single beat buffer sampled at the beat-analysis
// rate with the R-wave near the fiducial mark:
//
// - isoLevel: amplitude at the start of the isoelectric run preceding the
//   QRS (80 ms run, falling back to 50 ms)
// - onset/offset: QRS boundaries found by walking out from the extreme
//   slopes until the slope magnitude drops below a quarter of the smaller
//   extreme, with short inflection plateaus bridged
// - beatBegin/beatEnd: conservative anchors bounding the beat's activity,
//   used to place the inter-beat noise window
// - amp: peak-to-peak amplitude over [onset, offset)
//
// No streaming state; every call is a function of the buffer alone.

use crate::config::ms_to_samples;

/// Maximum excursion within an isoelectric run
const ISO_LIMIT: i32 = 20;

/// Geometry measurements for one beat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeatFeatures {
    /// Baseline amplitude preceding the QRS
    pub iso_level: i32,
    /// Index of the QRS onset within the beat buffer
    pub onset: usize,
    /// Index of the QRS offset within the beat buffer
    pub offset: usize,
    /// Samples from the beat's activity anchor back to the fiducial mark
    pub beat_begin: usize,
    /// Samples from the fiducial mark to the post-beat quiet anchor
    pub beat_end: usize,
    /// Peak-to-peak amplitude over [onset, offset)
    pub amp: i32,
}

/// Beat-rate geometry analyzer
///
/// Holds only rate-derived window lengths; `analyze` is pure.
pub struct BeatAnalyzer {
    length: usize,
    fidmark: usize,
    iso_length1: usize,
    iso_length2: usize,
    inf_chk: usize,
    ms100: usize,
    ms150: usize,
    ms250: usize,
    ms300: usize,
}

impl BeatAnalyzer {
    /// Create an analyzer for the given beat-analysis rate in Hz
    pub fn new(beat_rate: u32) -> Self {
        let ms = |millis| ms_to_samples(beat_rate, millis);
        Self {
            length: ms(1000),
            fidmark: ms(400),
            iso_length1: ms(50).max(2),
            iso_length2: ms(80).max(2),
            inf_chk: ms(40).max(1),
            ms100: ms(100),
            ms150: ms(150),
            ms250: ms(250),
            ms300: ms(300),
        }
    }

    /// Length of a beat buffer at this rate
    pub fn beat_length(&self) -> usize {
        self.length
    }

    /// Canonical R-wave index within a beat buffer
    pub fn fidmark(&self) -> usize {
        self.fidmark
    }

    /// Measure one beat buffer
    ///
    /// The buffer must be `beat_length()` samples with the R-wave near
    /// `fidmark()`. Degenerate (flat) buffers yield a zero-amplitude result
    /// rather than an error.
    pub fn analyze(&self, beat: &[i32]) -> BeatFeatures {
        debug_assert_eq!(beat.len(), self.length);

        let (iso_run_start, iso_level) = self.find_iso_level(beat);

        // Extreme slopes around the fiducial mark set the walk threshold.
        let lo = self.fidmark - self.ms150;
        let hi = (self.fidmark + self.ms150).min(self.length - 1);
        let mut max_slope = 0;
        let mut max_i = self.fidmark;
        let mut min_slope = 0;
        let mut min_i = self.fidmark;
        for i in lo..hi {
            let slope = beat[i + 1] - beat[i];
            if slope > max_slope {
                max_slope = slope;
                max_i = i;
            } else if slope < min_slope {
                min_slope = slope;
                min_i = i;
            }
        }

        if max_slope == 0 && min_slope == 0 {
            // Flat window: nothing to measure.
            return BeatFeatures {
                iso_level,
                onset: self.fidmark - 1,
                offset: self.fidmark + 1,
                beat_begin: self.ms250,
                beat_end: self.ms300,
                amp: 0,
            };
        }

        // The smaller extreme sets the threshold so both QRS edges qualify;
        // a monophasic complex falls back to a quarter of the larger one.
        let smaller = max_slope.min(-min_slope);
        let larger = max_slope.max(-min_slope);
        let threshold = smaller.max(larger >> 2) >> 2;

        let (early, late) = if max_i < min_i {
            ((max_i, true), (min_i, false))
        } else {
            ((min_i, false), (max_i, true))
        };

        let onset = self.walk_back(beat, early.0, threshold, early.1);
        let mut offset = self.walk_forward(beat, late.0 + 1, threshold, late.1);

        // Deep-S beats end well below the onset level; bridge the recovery
        // up-slope so the offset lands past the S-wave.
        if beat[onset] - beat[offset.min(self.length - 1)] > ISO_LIMIT {
            offset = self.extend_through_upslope(beat, offset, threshold);
        }
        let offset = offset.min(self.length - 1);

        let mut amp_max = beat[onset];
        let mut amp_min = beat[onset];
        for &v in &beat[onset..offset] {
            if v > amp_max {
                amp_max = v;
            } else if v < amp_min {
                amp_min = v;
            }
        }

        let beat_begin = match iso_run_start {
            Some(start) => (self.fidmark - start).max(self.ms250),
            None => self.ms250,
        };
        let beat_end = self.find_beat_end(beat);

        BeatFeatures {
            iso_level,
            onset,
            offset,
            beat_begin,
            beat_end,
            amp: amp_max - amp_min,
        }
    }

    /// Locate the isoelectric run preceding the QRS
    ///
    /// Returns the run's start index (if found) and the amplitude at it.
    fn find_iso_level(&self, beat: &[i32]) -> (Option<usize>, i32) {
        for &run in &[self.iso_length2, self.iso_length1] {
            let mut i = self.fidmark - run;
            while i > 0 && !is_isoelectric(&beat[i..i + run]) {
                i -= 1;
            }
            if i > 0 {
                return (Some(i), beat[i]);
            }
        }
        (None, beat[self.fidmark - self.iso_length2])
    }

    /// First isoelectric stretch at least 300 ms past the R-wave
    fn find_beat_end(&self, beat: &[i32]) -> usize {
        let run = self.iso_length1;
        let mut i = self.fidmark + self.ms300;
        while i + run < self.length && !is_isoelectric(&beat[i..i + run]) {
            i += 1;
        }
        if i + run < self.length {
            i - self.fidmark
        } else {
            self.ms300
        }
    }

    fn walk_back(&self, beat: &[i32], from: usize, threshold: i32, positive: bool) -> usize {
        let qualifies = |i: usize| {
            let slope = beat[i] - beat[i - 1];
            if positive {
                slope > threshold
            } else {
                -slope > threshold
            }
        };

        let mut i = from.max(1);
        loop {
            while i > 1 && qualifies(i) {
                i -= 1;
            }
            // Bridge a brief opposite-slope plateau if qualifying slope
            // resumes within the inflection window.
            let mut resume = None;
            let floor = i.saturating_sub(self.inf_chk).max(1);
            let mut j = i;
            while j > floor {
                j -= 1;
                if qualifies(j) {
                    resume = Some(j);
                    break;
                }
            }
            match resume {
                Some(j) => i = j,
                None => break,
            }
        }
        i
    }

    fn walk_forward(&self, beat: &[i32], from: usize, threshold: i32, positive: bool) -> usize {
        let last = self.length - 1;
        let qualifies = |i: usize| {
            let slope = beat[i + 1] - beat[i];
            if positive {
                slope > threshold
            } else {
                -slope > threshold
            }
        };

        let mut i = from.min(last - 1);
        loop {
            while i < last - 1 && qualifies(i) {
                i += 1;
            }
            let mut resume = None;
            let ceil = (i + self.inf_chk).min(last - 1);
            let mut j = i;
            while j < ceil {
                j += 1;
                if qualifies(j) {
                    resume = Some(j);
                    break;
                }
            }
            match resume {
                Some(j) => i = j,
                None => break,
            }
        }
        i
    }

    /// Carry the offset across the recovery up-slope after a deep S-wave
    fn extend_through_upslope(&self, beat: &[i32], from: usize, threshold: i32) -> usize {
        let last = self.length - 1;
        let limit = (from + self.ms100).min(last - 1);
        let mut i = from;
        while i < limit && beat[i + 1] - beat[i] > threshold {
            i += 1;
        }
        i
    }
}

fn is_isoelectric(data: &[i32]) -> bool {
    let mut max = data[0];
    let mut min = data[0];
    for &v in &data[1..] {
        if v > max {
            max = v;
        } else if v < min {
            min = v;
        }
    }
    max - min < ISO_LIMIT
}
