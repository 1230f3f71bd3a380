// Rule-based beat classification
//
// The classifier receives one beat buffer per detected QRS together with
// its RR interval and a low-frequency noise estimate, and produces a label
// in {NORMAL, PVC, UNKNOWN}. It orchestrates the collaborators that share
// per-beat state:
//
//   rhythm checker   - prematurity from RR context
//   template bank    - morphology matching, template lifecycle
//   dominant monitor - which template is the patient's sinus shape
//   post-classifier  - delayed evidence about the previous beat
//
// The final verdict is an ordered rule cascade over beat width, match
// quality against the dominant shape, rhythm, noise measures and the
// post-classifier's majority votes. Template classifications persist: once
// a morphology is known NORMAL or PVC, its beats inherit the label.

use crate::analysis::dominant::DominantMonitor;
use crate::analysis::features::BeatAnalyzer;
use crate::analysis::matcher::{TemplateBank, TemplateEvent, MAXTYPES};
use crate::analysis::postclass::PostClassifier;
use crate::analysis::rhythm::{RhythmChecker, RhythmClass};
use crate::analysis::BeatClass;
use crate::config::ms_to_samples;
use crate::error::AnalyzerError;

/// Baseline jump between consecutive beats treated as a shift artefact
const BL_SHIFT_LIMIT: i32 = 100;

/// Shape match good enough to ignore the noise measures for this beat
const MATCH_NOISE_THRESHOLD: f64 = 0.7;

/// Shape match close enough to update an existing template
const UPDATE_MATCH_LIMIT: f64 = 1.3;

/// Unscaled match beyond which a beat does not update its template
const MATCH_WITH_AMP_LIMIT: f64 = 2.5;

/// Unscaled match beyond which a premature beat starts its own template
const PVC_MATCH_WITH_AMP_LIMIT: f64 = 0.9;

/// Low-frequency noise ceiling for starting a template on a poor match
const NEW_TYPE_NOISE_LIMIT: i32 = 7;

/// High-frequency noise ceiling for starting a template on a poor match
const NEW_TYPE_HF_NOISE_LIMIT: i32 = 75;

/// Outcome of classifying one beat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// A labeled beat
    Beat(ClassifiedBeat),
    /// Detector echo off the trailing edge of a PVC; drop it and fold the
    /// RR interval into the next beat
    Discard,
}

/// Labeled beat with its morphology slot and fiducial correction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifiedBeat {
    pub class: BeatClass,
    /// Template slot, or MAXTYPES when the beat matched nothing
    pub match_type: usize,
    /// Beat-rate offset of the QRS center from the fiducial mark
    pub fid_adj: isize,
}

/// Streaming beat classifier
pub struct BeatClassifier {
    bank: TemplateBank,
    rhythm: RhythmChecker,
    post: PostClassifier,
    monitor: DominantMonitor,
    analyzer: BeatAnalyzer,

    // Beat-rate derived windows
    fidmark: usize,
    bms10: usize,
    bms20: usize,
    bms40: usize,
    bms50: usize,
    bms60: usize,
    bms70: usize,
    bms80: usize,
    bms90: usize,
    bms100: usize,
    bms110: usize,
    bms140: usize,
    bms280: usize,
    /// Detection-rate interval below which a beat reads as a PVC echo
    min_rr: i32,

    // Streaming state
    recent_rrs: [i32; 8],
    recent_types: [usize; 8],
    last_iso_level: i32,
    last_rhythm_class: RhythmClass,
    last_beat_was_new: bool,
    last_amp: i32,
    last_class: BeatClass,
}

impl BeatClassifier {
    /// Create a classifier for the given rate pair
    pub fn new(sample_rate: u32, beat_rate: u32) -> Result<Self, AnalyzerError> {
        let analyzer = BeatAnalyzer::new(beat_rate);
        let ms = |millis| ms_to_samples(beat_rate, millis);
        Ok(Self {
            bank: TemplateBank::new(beat_rate),
            rhythm: RhythmChecker::new(sample_rate),
            post: PostClassifier::new(),
            monitor: DominantMonitor::new(sample_rate, beat_rate),
            fidmark: analyzer.fidmark(),
            analyzer,
            bms10: ms(10).max(1),
            bms20: ms(20),
            bms40: ms(40),
            bms50: ms(50),
            bms60: ms(60),
            bms70: ms(70),
            bms80: ms(80),
            bms90: ms(90),
            bms100: ms(100),
            bms110: ms(110),
            bms140: ms(140),
            bms280: ms(280),
            min_rr: ms_to_samples(sample_rate, 250) as i32,
            recent_rrs: [0; 8],
            recent_types: [MAXTYPES; 8],
            last_iso_level: 0,
            last_rhythm_class: RhythmClass::Unknown,
            last_beat_was_new: false,
            last_amp: 0,
            last_class: BeatClass::Unknown,
        })
    }

    /// True while the rhythm checker sees every-other-beat prematurity
    pub fn is_bigeminy(&self) -> bool {
        self.rhythm.is_bigeminy()
    }

    /// Number of template slots currently in use
    pub fn type_count(&self) -> usize {
        self.bank.type_count()
    }

    /// Beat-rate (beatBegin, beatEnd) anchors of the dominant template
    pub fn dominant_anchors(&self) -> Option<(usize, usize)> {
        self.bank
            .dominant_type()
            .map(|slot| (self.bank.beat_begin(slot), self.bank.beat_end(slot)))
    }

    /// Classify one beat
    ///
    /// # Arguments
    /// * `beat` - Beat buffer at the beat-analysis rate, R-wave at the
    ///   fiducial mark; the baseline is subtracted in place
    /// * `rr` - Detection-rate samples since the previous beat
    /// * `noise_level` - Low-frequency noise estimate for this beat
    pub fn classify(&mut self, beat: &mut [i32], rr: i32, noise_level: i32) -> Classification {
        let mut hf_noise = self.hf_noise_check(beat);
        let features = self.analyzer.analyze(beat);

        // A detection on the trailing edge of a wide PVC arrives
        // unphysiologically early and far smaller than the beat it echoes.
        if self.last_class == BeatClass::Pvc
            && rr < self.min_rr
            && features.amp * 2 < self.last_amp
        {
            log::debug!("[Classifier] Discarding trailing-edge echo, rr={}", rr);
            return Classification::Discard;
        }

        let rhythm_class = self.rhythm.rhythm_check(rr);

        // A large baseline jump right after a template was created from a
        // normally-timed beat means that template was a shift artefact.
        let mut bl_shift = (features.iso_level - self.last_iso_level).abs();
        if bl_shift > BL_SHIFT_LIMIT
            && self.last_beat_was_new
            && self.last_rhythm_class == RhythmClass::Normal
        {
            self.bank.clear_last_new_type();
            if self.recent_types[0] >= self.bank.type_count() {
                self.recent_types[0] = MAXTYPES;
            }
        }

        for value in beat.iter_mut() {
            *value -= features.iso_level;
        }

        let (matched, event) = self.bank.best_match(beat);
        if let Some(event) = event {
            self.monitor.apply(event);
            self.remap_recent(event);
        }
        let match_index = matched.match_index;
        let mi2 = matched.mi2;
        let mut morph_type = matched.match_type;

        let mut noise_level = noise_level;
        if match_index < MATCH_NOISE_THRESHOLD {
            hf_noise = 0;
            noise_level = 0;
            bl_shift = 0;
        }

        // Template disposition.
        let premature = rhythm_class == RhythmClass::Pvc;
        let mut new_this_beat = false;
        if premature
            && morph_type < self.bank.type_count()
            && self.bank.minimum_beat_variation(morph_type)
            && mi2 > PVC_MATCH_WITH_AMP_LIMIT
        {
            // A premature beat that only loosely matches a tight template
            // is a different beat that happens to share its shape.
            morph_type = self.start_new_type(beat);
            new_this_beat = true;
        } else if match_index < UPDATE_MATCH_LIMIT && mi2 <= MATCH_WITH_AMP_LIMIT {
            self.bank.update_beat_type(morph_type, beat, mi2, matched.shift);
        } else if bl_shift < BL_SHIFT_LIMIT
            && noise_level < NEW_TYPE_NOISE_LIMIT
            && hf_noise < NEW_TYPE_HF_NOISE_LIMIT
        {
            morph_type = self.start_new_type(beat);
            new_this_beat = true;
        } else if rhythm_class != RhythmClass::Normal
            || self.last_rhythm_class != RhythmClass::Normal
        {
            morph_type = self.start_new_type(beat);
            new_this_beat = true;
        } else {
            morph_type = MAXTYPES;
        }

        for i in (1..8).rev() {
            self.recent_rrs[i] = self.recent_rrs[i - 1];
            self.recent_types[i] = self.recent_types[i - 1];
        }
        self.recent_rrs[0] = rr;
        self.recent_types[0] = morph_type;

        // Width and fiducial adjustment come from the matched template,
        // falling back to this beat's own geometry.
        let (beat_width, fid_adj) = if morph_type < self.bank.type_count() {
            let center = self.bank.center(morph_type) as isize;
            (self.bank.width(morph_type), center - self.fidmark as isize)
        } else {
            let center = ((features.onset + features.offset) / 2) as isize;
            (
                features.offset - features.onset,
                center - self.fidmark as isize,
            )
        };

        self.monitor.observe(morph_type, rhythm_class, beat_width, rr);
        for slot in 0..self.bank.type_count() {
            if self.bank.classification(slot) == BeatClass::Normal
                && self.monitor.is_inconsistent(slot)
            {
                log::debug!("[Classifier] Demoting inconsistent slot {} to unknown", slot);
                self.bank.set_classification(slot, BeatClass::Unknown);
            }
        }
        let dom_type = self
            .monitor
            .dominant()
            .filter(|&slot| slot < self.bank.type_count());

        self.post.post_classify(
            [
                self.recent_types[0],
                self.recent_types[1],
                self.recent_types[2],
            ],
            [self.recent_rrs[0], self.recent_rrs[1]],
            dom_type,
            mi2,
            rhythm_class,
        );

        let verdict = self.rule_cascade(
            morph_type,
            dom_type,
            beat_width,
            rhythm_class,
            premature,
            hf_noise,
            noise_level,
            bl_shift,
        );

        self.run_length_classification(morph_type, dom_type, beat_width, rhythm_class, premature);

        // Persistent template class wins, then delayed PVC evidence, then
        // the cascade verdict.
        let template_class = if morph_type < self.bank.type_count() {
            self.bank.classification(morph_type)
        } else {
            BeatClass::Unknown
        };
        let final_class = if template_class != BeatClass::Unknown {
            template_class
        } else if self.post.check_post_class(morph_type) == BeatClass::Pvc {
            BeatClass::Pvc
        } else {
            verdict
        };

        self.last_iso_level = features.iso_level;
        self.last_rhythm_class = rhythm_class;
        self.last_beat_was_new = new_this_beat;
        self.last_amp = features.amp;
        self.last_class = final_class;

        Classification::Beat(ClassifiedBeat {
            class: final_class,
            match_type: morph_type,
            fid_adj,
        })
    }

    fn start_new_type(&mut self, beat: &[i32]) -> usize {
        let (slot, event) = self.bank.new_beat_type(beat);
        if let Some(event) = event {
            self.monitor.apply(event);
            self.remap_recent(event);
        }
        slot
    }

    fn remap_recent(&mut self, event: TemplateEvent) {
        for slot in self.recent_types.iter_mut() {
            match event {
                TemplateEvent::Evicted { slot: evicted } => {
                    if *slot == evicted {
                        *slot = MAXTYPES;
                    }
                }
                TemplateEvent::Merged { kept, removed } => {
                    if *slot == removed {
                        *slot = kept;
                    } else if *slot > removed && *slot < MAXTYPES {
                        *slot -= 1;
                    }
                }
            }
        }
    }

    /// Ordered verdict rules, first hit wins
    #[allow(clippy::too_many_arguments)]
    fn rule_cascade(
        &self,
        morph_type: usize,
        dom_type: Option<usize>,
        beat_width: usize,
        rhythm_class: RhythmClass,
        premature: bool,
        hf_noise: i32,
        noise_level: i32,
        bl_shift: i32,
    ) -> BeatClass {
        // Rule 1: nothing to compare against yet.
        let dom = match dom_type {
            None => return BeatClass::Unknown,
            Some(dom) => dom,
        };

        let matched = morph_type < self.bank.type_count();
        let dom_index = if matched {
            self.bank.compare_to_dominant(morph_type, dom)
        } else {
            f64::INFINITY
        };
        let dom_width = self.bank.width(dom);
        let dom_stable = self.bank.minimum_beat_variation(dom);
        let dom_rhythm_regular = !self.monitor.is_irregular();
        let post_rhythm = self.post.check_pc_rhythm(morph_type);

        // Rule 2: premature and clearly off the stable dominant shape.
        if dom_stable && premature && dom_index > 1.0 && dom_rhythm_regular {
            return BeatClass::Pvc;
        }
        // Rule 3: beats this narrow are supraventricular.
        if beat_width < self.bms90 {
            return BeatClass::Normal;
        }
        // Rule 4: unmatched but normally timed.
        if !matched && !premature {
            return BeatClass::Normal;
        }
        // Rule 5: full bank, single occurrence, no rhythm evidence.
        if self.bank.type_count() == MAXTYPES
            && matched
            && self.bank.beat_count(morph_type) == 1
            && rhythm_class == RhythmClass::Unknown
        {
            return BeatClass::Normal;
        }
        // Rule 6: close to dominant with normal timing.
        if dom_index < 1.2 && rhythm_class == RhythmClass::Normal {
            return BeatClass::Normal;
        }
        // Rule 7: close to dominant with normal delayed rhythm.
        if dom_index < 1.5 && post_rhythm == RhythmClass::Normal {
            return BeatClass::Normal;
        }
        // Rule 8: moderately close while the dominant itself varies widely.
        if dom_index < 2.0 && !premature && self.bank.wide_beat_variation(dom) {
            return BeatClass::Normal;
        }
        // Rule 9: far from dominant with recurring delayed PVC evidence.
        if dom_index > 2.5
            && matched
            && self.bank.beat_count(morph_type) >= 3
            && self.post.check_post_class(morph_type) == BeatClass::Pvc
            && dom_rhythm_regular
        {
            return BeatClass::Pvc;
        }
        // Rule 10: wide, much wider than dominant, and clean enough to trust.
        let much_wider = (beat_width >= dom_width + self.bms40 && dom_width < self.bms140)
            || beat_width >= dom_width + self.bms60;
        if beat_width >= self.bms110
            && much_wider
            && hf_noise < 45
            && noise_level < 14
            && bl_shift < BL_SHIFT_LIMIT
            && matched
            && self.bank.beat_count(morph_type) > 1
        {
            return BeatClass::Pvc;
        }
        // Rule 11: premature against a regular background.
        if premature && dom_rhythm_regular {
            return BeatClass::Pvc;
        }
        // Rule 12: normal rhythm against a regular background.
        if rhythm_class == RhythmClass::Normal && dom_rhythm_regular {
            return BeatClass::Normal;
        }
        // Rule 13: wide and very far from the dominant shape.
        if beat_width > dom_width && dom_index > 3.5 && beat_width >= self.bms100 {
            return BeatClass::Pvc;
        }
        // Rules 14-16: not wide enough to call ectopic.
        if beat_width < self.bms100 {
            return BeatClass::Normal;
        }
        if beat_width < dom_width + self.bms20 {
            return BeatClass::Normal;
        }
        if dom_index < 1.5 {
            return BeatClass::Normal;
        }
        // Rule 17: too noisy to call anything but normal.
        if hf_noise > 75 {
            return BeatClass::Normal;
        }
        // Rule 18: wide, far from dominant, clean: ectopic.
        BeatClass::Pvc
    }

    /// Promote a still-unknown template based on repetition patterns
    fn run_length_classification(
        &mut self,
        morph_type: usize,
        dom_type: Option<usize>,
        beat_width: usize,
        rhythm_class: RhythmClass,
        premature: bool,
    ) {
        if morph_type >= self.bank.type_count()
            || self.bank.classification(morph_type) != BeatClass::Unknown
        {
            return;
        }

        let run = self
            .recent_types
            .iter()
            .take_while(|&&slot| slot == morph_type)
            .count();

        if let Some(dom) = dom_type {
            if run >= 3 && beat_width < self.bank.width(dom) + self.bms20 {
                self.bank.set_classification(morph_type, BeatClass::Normal);
                return;
            }
        } else if run >= 6 {
            self.bank.set_classification(morph_type, BeatClass::Normal);
            return;
        }

        if self.rhythm.is_bigeminy() && premature && beat_width > self.bms100 {
            self.bank.set_classification(morph_type, BeatClass::Pvc);
        } else if rhythm_class == RhythmClass::Normal {
            self.bank.set_classification(morph_type, BeatClass::Normal);
        }
    }

    /// High-frequency noise inside the beat, relative to QRS amplitude
    ///
    /// Moving average of the second difference over a 50 ms window, taken
    /// outside the immediate QRS region and scaled against a quarter of the
    /// QRS peak-to-peak.
    fn hf_noise_check(&self, beat: &[i32]) -> i32 {
        let ave_length = self.bms50.max(1);

        let mut qrs_max = 0;
        let mut qrs_min = 0;
        for &v in &beat[self.fidmark - self.bms70..self.fidmark + self.bms80] {
            if v > qrs_max {
                qrs_max = v;
            } else if v < qrs_min {
                qrs_min = v;
            }
        }

        let mut ave_buff = vec![0i32; ave_length];
        let mut ptr = 0;
        let mut sum = 0i64;
        let mut max_noise_ave = 0i64;
        for i in self.fidmark - self.bms280..self.fidmark + self.bms280 {
            sum -= ave_buff[ptr] as i64;
            let second_diff =
                (beat[i] - 2 * beat[i - self.bms10] + beat[i - 2 * self.bms10]).abs();
            ave_buff[ptr] = second_diff;
            sum += second_diff as i64;
            ptr += 1;
            if ptr == ave_length {
                ptr = 0;
            }
            if (i < self.fidmark - self.bms50 || i > self.fidmark + self.bms50)
                && sum > max_noise_ave
            {
                max_noise_ave = sum;
            }
        }

        let peak_to_peak = qrs_max - qrs_min;
        if peak_to_peak >= 4 {
            ((max_noise_ave * (50 / ave_length) as i64) / ((peak_to_peak >> 2) as i64)) as i32
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> BeatClassifier {
        BeatClassifier::new(200, 100).unwrap()
    }

    /// Narrow sinus-shaped beat buffer at beat rate 100 Hz
    fn narrow_beat(amp: i32) -> Vec<i32> {
        let mut beat = vec![0; 100];
        let shape = [0, 3, 10, 4, 0, -2, 0];
        for (k, &s) in shape.iter().enumerate() {
            beat[38 + k] = s * amp / 10;
        }
        beat
    }

    /// Wide ectopic-shaped beat buffer
    fn wide_beat(amp: i32) -> Vec<i32> {
        let mut beat = vec![0; 100];
        for k in 0..9 {
            let v = amp * (9 - k) as i32 / 9;
            beat[40 + k] = v;
            beat[40 - k] = v;
        }
        beat
    }

    fn feed_normals(classifier: &mut BeatClassifier, n: usize, rr: i32) -> Vec<BeatClass> {
        (0..n)
            .map(|_| {
                let mut beat = narrow_beat(500);
                match classifier.classify(&mut beat, rr, 0) {
                    Classification::Beat(b) => b.class,
                    Classification::Discard => panic!("unexpected discard"),
                }
            })
            .collect()
    }

    #[test]
    fn test_first_beat_creates_a_template() {
        let mut classifier = classifier();
        let mut beat = narrow_beat(500);
        let result = classifier.classify(&mut beat, 200, 0);
        match result {
            Classification::Beat(b) => {
                assert_eq!(b.match_type, 0, "first beat seeds slot 0");
                assert_eq!(classifier.type_count(), 1);
            }
            Classification::Discard => panic!("first beat must not be discarded"),
        }
    }

    #[test]
    fn test_steady_stream_classifies_normal() {
        let mut classifier = classifier();
        let classes = feed_normals(&mut classifier, 12, 200);
        assert!(
            classes[4..].iter().all(|&c| c == BeatClass::Normal),
            "steady narrow beats must go normal: {classes:?}"
        );
        assert_eq!(classifier.type_count(), 1, "one morphology, one template");
    }

    #[test]
    fn test_wide_premature_beat_is_pvc() {
        let mut classifier = classifier();
        feed_normals(&mut classifier, 10, 200);

        let mut pvc = wide_beat(700);
        let result = classifier.classify(&mut pvc, 120, 0);
        match result {
            Classification::Beat(b) => {
                assert_eq!(b.class, BeatClass::Pvc, "wide premature beat must be PVC")
            }
            Classification::Discard => panic!("unexpected discard"),
        }
    }

    #[test]
    fn test_trailing_edge_echo_is_discarded() {
        let mut classifier = classifier();
        feed_normals(&mut classifier, 10, 200);

        let mut pvc = wide_beat(900);
        classifier.classify(&mut pvc, 120, 0);

        // A tiny beat 150 ms later reads as the PVC's trailing edge.
        let mut echo = narrow_beat(60);
        let result = classifier.classify(&mut echo, 30, 0);
        assert_eq!(result, Classification::Discard);
    }

    #[test]
    fn test_template_class_persists() {
        let mut classifier = classifier();
        feed_normals(&mut classifier, 10, 200);
        // The established template carries a NORMAL classification, so a
        // fresh instance of the same narrow shape stays normal.
        let mut beat = narrow_beat(500);
        let result = classifier.classify(&mut beat, 200, 0);
        match result {
            Classification::Beat(b) => assert_eq!(b.class, BeatClass::Normal),
            Classification::Discard => panic!("unexpected discard"),
        }
    }

    #[test]
    fn test_hf_noise_zero_for_clean_beat() {
        let classifier = classifier();
        let beat = narrow_beat(500);
        let hf = classifier.hf_noise_check(&beat);
        assert!(hf < 45, "clean beat must measure low HF noise, got {hf}");
    }

    #[test]
    fn test_hf_noise_flags_jitter() {
        let classifier = classifier();
        let mut beat = narrow_beat(500);
        // Inject alternating jitter outside the QRS core.
        for (i, v) in beat.iter_mut().enumerate() {
            if !(30..=50).contains(&i) {
                *v += if i % 2 == 0 { 40 } else { -40 };
            }
        }
        let noisy = classifier.hf_noise_check(&beat);
        let clean = classifier.hf_noise_check(&narrow_beat(500));
        assert!(
            noisy > clean,
            "jitter must raise the HF measure: {noisy} vs {clean}"
        );
    }
}
