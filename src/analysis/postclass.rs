// Post-classification of the previous beat
//
// Some beats can only be judged once the following beat arrives: a
// premature beat is confirmed by its compensatory pause, and a poor
// amplitude match is only damning when the neighbors belong to the dominant
// morphology. This module keeps, per template, two eight-deep rings of
// delayed verdicts (beat class and rhythm) for the beat *before* the one
// currently being classified, and answers majority queries over them.
//
// The first three invocations only latch the lagged inputs without
// shifting the rings, so the delayed evidence starts one beat late.

use crate::analysis::matcher::MAXTYPES;
use crate::analysis::rhythm::{rr_short, RhythmClass};
use crate::analysis::BeatClass;

/// Depth of the per-template verdict rings
const PC_HISTORY: usize = 8;

/// Lagged unscaled match score above this marks the previous beat ectopic
const POST_MI2_LIMIT: f64 = 2.5;

/// Delayed per-template evidence for beat re-labeling
pub struct PostClassifier {
    post_class: [[BeatClass; PC_HISTORY]; MAXTYPES],
    post_rhythm: [[RhythmClass; PC_HISTORY]; MAXTYPES],
    rhythm_len: [usize; MAXTYPES],
    init_count: usize,
    last_mi2: f64,
    last_rc: RhythmClass,
}

impl Default for PostClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl PostClassifier {
    pub fn new() -> Self {
        Self {
            post_class: [[BeatClass::Unknown; PC_HISTORY]; MAXTYPES],
            post_rhythm: [[RhythmClass::Unknown; PC_HISTORY]; MAXTYPES],
            rhythm_len: [0; MAXTYPES],
            init_count: 0,
            last_mi2: 0.0,
            last_rc: RhythmClass::Unknown,
        }
    }

    /// Record delayed verdicts for the beat before the current one
    ///
    /// # Arguments
    /// * `recent_types` - Morphology slots of the current, previous and
    ///   second-previous beats
    /// * `recent_rrs` - Intervals ending the current and previous beats
    /// * `dom_type` - Current dominant morphology slot, if any
    /// * `mi2` - Unscaled match score of the current beat
    /// * `rhythm_class` - Rhythm verdict of the current beat
    pub fn post_classify(
        &mut self,
        recent_types: [usize; 3],
        recent_rrs: [i32; 2],
        dom_type: Option<usize>,
        mi2: f64,
        rhythm_class: RhythmClass,
    ) {
        if self.init_count < 3 {
            self.init_count += 1;
            self.last_mi2 = mi2;
            self.last_rc = rhythm_class;
            return;
        }

        let slot = recent_types[1];
        if slot < MAXTYPES {
            let neighbors_dominant =
                dom_type.is_some_and(|d| recent_types[0] == d && recent_types[2] == d);
            // Previous interval short, current one compensatorily long.
            let short_then_long = rr_short(recent_rrs[1], recent_rrs[0]);

            let prior_pvc_run = {
                let ring = &self.post_class[slot];
                let pvc_count = ring.iter().filter(|&&c| c == BeatClass::Pvc).count();
                (ring[0] == BeatClass::Pvc && ring[1] == BeatClass::Pvc) || pvc_count >= 6
            };
            let still_premature =
                rhythm_class == RhythmClass::Pvc || self.last_rc == RhythmClass::Pvc;

            let class_entry = if (short_then_long && neighbors_dominant)
                || (prior_pvc_run && still_premature)
                || (self.last_mi2 > POST_MI2_LIMIT && neighbors_dominant)
            {
                BeatClass::Pvc
            } else {
                BeatClass::Unknown
            };
            let rhythm_entry = if short_then_long {
                RhythmClass::Pvc
            } else {
                self.last_rc
            };

            shift_push(&mut self.post_class[slot], class_entry);
            shift_push(&mut self.post_rhythm[slot], rhythm_entry);
            self.rhythm_len[slot] = (self.rhythm_len[slot] + 1).min(PC_HISTORY);
        }

        self.last_mi2 = mi2;
        self.last_rc = rhythm_class;
    }

    /// Majority verdict over a template's delayed beat classes
    pub fn check_post_class(&self, slot: usize) -> BeatClass {
        if slot >= MAXTYPES {
            return BeatClass::Unknown;
        }
        let ring = &self.post_class[slot];
        let last4 = ring[..4].iter().filter(|&&c| c == BeatClass::Pvc).count();
        let last8 = ring.iter().filter(|&&c| c == BeatClass::Pvc).count();
        if last4 >= 3 || last8 >= 6 {
            BeatClass::Pvc
        } else {
            BeatClass::Unknown
        }
    }

    /// Majority verdict over a template's delayed rhythm labels
    pub fn check_pc_rhythm(&self, slot: usize) -> RhythmClass {
        if slot >= MAXTYPES {
            return RhythmClass::Unknown;
        }
        let usable = self.rhythm_len[slot];
        if usable == 0 {
            return RhythmClass::Unknown;
        }
        let normal = self.post_rhythm[slot][..usable]
            .iter()
            .filter(|&&r| r == RhythmClass::Normal)
            .count();

        if normal >= 7 {
            return RhythmClass::Normal;
        }
        let pvc_ceiling = match usable {
            0..=3 => 0,
            4..=6 => 1,
            _ => 2,
        };
        if normal <= pvc_ceiling {
            RhythmClass::Pvc
        } else {
            RhythmClass::Unknown
        }
    }
}

fn shift_push<T: Copy>(ring: &mut [T; PC_HISTORY], value: T) {
    for i in (1..PC_HISTORY).rev() {
        ring[i] = ring[i - 1];
    }
    ring[0] = value;
}
