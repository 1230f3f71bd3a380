// Beat template bank and morphology matcher
//
// Maintains up to eight average-shape templates of the beats seen so far.
// New beats are compared against every template over a 300 ms window around
// the fiducial mark, trying small alignment shifts and removing the mean
// residual; the score is the minimum mean absolute residual normalized by
// the combined peak-to-peak magnitudes:
//
//   metric = minAbsResidual / (magA + magB) * 30 / MATCH_LENGTH
//
// `compare` scales the candidate to the reference's magnitude first (shape
// match); `compare2` skips the scaling so amplitude differences count
// (shape-and-size match). Close templates merge; a full bank evicts the
// template with the fewest occurrences. Structural changes are reported as
// events the orchestrator forwards to the dominant-beat monitor.

use crate::analysis::features::BeatAnalyzer;
use crate::analysis::BeatClass;
use crate::config::ms_to_samples;

/// Maximum number of concurrent beat templates
pub const MAXTYPES: usize = 8;

/// Depth of each template's recent match-score history
///
/// Sized independently of MAXTYPES even though both are currently 8.
const MATCH_HISTORY: usize = 8;

/// Both top matches below this triggers tie-breaking and merge checks
const MATCH_LIMIT: f64 = 1.2;

/// Templates closer than this to each other are candidates for merging
const COMBINE_LIMIT: f64 = 0.8;

/// Mean recent match score above this marks a template as wide-variation
const WIDE_VAR_LIMIT: f64 = 0.50;

/// All recent match scores below this marks a template as tight
const MIN_VAR_LIMIT: f64 = 0.5;

/// Beat total after which a dominant type is chosen even without normals
const DOM_FALLBACK_COUNT: i64 = 300;

/// Result of matching a beat against the bank
#[derive(Debug, Clone, Copy)]
pub struct MatchResult {
    /// Slot of the best-matching template
    pub match_type: usize,
    /// Scaled comparison score of the winner
    pub match_index: f64,
    /// Unscaled comparison score of the winner
    pub mi2: f64,
    /// Alignment shift that produced the best score
    pub shift: isize,
}

/// Structural change to the bank, to be applied to the dominant monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateEvent {
    /// `removed` was folded into `kept`; slots above `removed` shifted down
    Merged { kept: usize, removed: usize },
    /// The template in `slot` was evicted and replaced by a new one
    Evicted { slot: usize },
}

struct BeatTemplate {
    samples: Vec<i32>,
    count: i32,
    width: usize,
    center: usize,
    onset: usize,
    offset: usize,
    begin: usize,
    end: usize,
    amp: i32,
    classification: BeatClass,
    since_last_match: i32,
    match_history: [f64; MATCH_HISTORY],
    history_len: usize,
}

/// Fixed-capacity bank of beat-shape templates
pub struct TemplateBank {
    analyzer: BeatAnalyzer,
    templates: Vec<BeatTemplate>,
    beat_length: usize,
    match_start: usize,
    match_end: usize,
    max_shift: isize,
    total_beats: i64,
}

impl TemplateBank {
    /// Create an empty bank for the given beat-analysis rate in Hz
    pub fn new(beat_rate: u32) -> Self {
        let analyzer = BeatAnalyzer::new(beat_rate);
        let beat_length = analyzer.beat_length();
        let fidmark = analyzer.fidmark();
        let match_length = ms_to_samples(beat_rate, 300);
        let max_shift = ms_to_samples(beat_rate, 40).max(1) as isize;

        Self {
            analyzer,
            templates: Vec::with_capacity(MAXTYPES),
            beat_length,
            match_start: fidmark - match_length / 2,
            match_end: fidmark + match_length / 2,
            max_shift,
            total_beats: 0,
        }
    }

    /// Number of template slots currently in use
    pub fn type_count(&self) -> usize {
        self.templates.len()
    }

    /// Find the best and runner-up matches for a beat
    ///
    /// May merge two templates when they turn out to be closer to each other
    /// than the combine limit; the returned event must then be forwarded to
    /// the dominant monitor so its slot references stay valid.
    pub fn best_match(&mut self, new_beat: &[i32]) -> (MatchResult, Option<TemplateEvent>) {
        if self.templates.is_empty() {
            return (
                MatchResult {
                    match_type: 0,
                    match_index: f64::INFINITY,
                    mi2: f64::INFINITY,
                    shift: 0,
                },
                None,
            );
        }

        let mut best = 0usize;
        let mut best_diff = f64::INFINITY;
        let mut best_shift = 0isize;
        let mut next = 0usize;
        let mut next_diff = f64::INFINITY;

        for slot in 0..self.templates.len() {
            let (diff, shift) = self.compare(&self.templates[slot].samples, new_beat, true);
            if diff < best_diff {
                next = best;
                next_diff = best_diff;
                best = slot;
                best_diff = diff;
                best_shift = shift;
            } else if diff < next_diff {
                next = slot;
                next_diff = diff;
            }
        }

        let mut event = None;
        if self.templates.len() > 1 && best_diff < MATCH_LIMIT && next_diff < MATCH_LIMIT {
            let (template_diff, _) = self.compare(
                &self.templates[best].samples,
                &self.templates[next].samples,
                true,
            );
            let loose = self.minimum_beat_variation(best) || self.minimum_beat_variation(next);
            if template_diff < COMBINE_LIMIT && loose {
                let kept = best.min(next);
                let removed = best.max(next);
                self.merge_templates(kept, removed);
                event = Some(TemplateEvent::Merged { kept, removed });
                let (diff, shift) = self.compare(&self.templates[kept].samples, new_beat, true);
                best = kept;
                best_diff = diff;
                best_shift = shift;
            } else {
                // Amplitude-aware tie-break between two close shape matches.
                let (best2, _) = self.compare(&self.templates[best].samples, new_beat, false);
                let (next2, _) = self.compare(&self.templates[next].samples, new_beat, false);
                if next2 < best2 {
                    best = next;
                    best_diff = next_diff;
                    let (_, shift) = self.compare(&self.templates[best].samples, new_beat, true);
                    best_shift = shift;
                }
            }
        }

        let (mi2, _) = self.compare(&self.templates[best].samples, new_beat, false);
        (
            MatchResult {
                match_type: best,
                match_index: best_diff,
                mi2,
                shift: best_shift,
            },
            event,
        )
    }

    /// Install a beat as a new template, evicting if the bank is full
    pub fn new_beat_type(&mut self, new_beat: &[i32]) -> (usize, Option<TemplateEvent>) {
        self.total_beats += 1;
        for template in &mut self.templates {
            template.since_last_match += 1;
        }

        let features = self.analyzer.analyze(new_beat);
        let template = BeatTemplate {
            samples: new_beat.to_vec(),
            count: 1,
            width: features.offset - features.onset,
            center: (features.onset + features.offset) / 2,
            onset: features.onset,
            offset: features.offset,
            begin: features.beat_begin,
            end: features.beat_end,
            amp: features.amp,
            classification: BeatClass::Unknown,
            since_last_match: 0,
            match_history: [0.0; MATCH_HISTORY],
            history_len: 0,
        };

        if self.templates.len() < MAXTYPES {
            self.templates.push(template);
            let slot = self.templates.len() - 1;
            log::debug!("[TemplateBank] New beat type in slot {}", slot);
            (slot, None)
        } else {
            // Evict the template with the fewest occurrences, preferring the
            // stalest on ties.
            let mut evict = 0usize;
            for slot in 1..self.templates.len() {
                let candidate = &self.templates[slot];
                let current = &self.templates[evict];
                if candidate.count < current.count
                    || (candidate.count == current.count
                        && candidate.since_last_match > current.since_last_match)
                {
                    evict = slot;
                }
            }
            log::debug!(
                "[TemplateBank] Bank full, evicting slot {} (count {})",
                evict,
                self.templates[evict].count
            );
            self.templates[evict] = template;
            (evict, Some(TemplateEvent::Evicted { slot: evict }))
        }
    }

    /// Blend a matched beat into its template and refresh its features
    pub fn update_beat_type(&mut self, slot: usize, new_beat: &[i32], mi2: f64, shift: isize) {
        self.total_beats += 1;
        for template in &mut self.templates {
            template.since_last_match += 1;
        }

        let beat_length = self.beat_length;
        let template = &mut self.templates[slot];
        template.since_last_match = 0;

        for i in (1..MATCH_HISTORY).rev() {
            template.match_history[i] = template.match_history[i - 1];
        }
        template.match_history[0] = mi2;
        template.history_len = (template.history_len + 1).min(MATCH_HISTORY);

        for i in 0..beat_length {
            let j = i as isize + shift;
            if j >= 0 && (j as usize) < beat_length {
                let incoming = new_beat[j as usize];
                template.samples[i] = if template.count == 1 {
                    (template.samples[i] + incoming) >> 1
                } else {
                    template.samples[i] - (template.samples[i] >> 3) + (incoming >> 3)
                };
            }
        }
        template.count += 1;

        let features = self.analyzer.analyze(&self.templates[slot].samples);
        let template = &mut self.templates[slot];
        template.width = features.offset - features.onset;
        template.center = (features.onset + features.offset) / 2;
        template.onset = features.onset;
        template.offset = features.offset;
        template.begin = features.beat_begin;
        template.end = features.beat_end;
        template.amp = features.amp;
    }

    /// Drop the most recently created template
    ///
    /// Used when the beat that created it turns out to have been a baseline
    /// shift artefact. Always drops the highest slot.
    pub fn clear_last_new_type(&mut self) {
        if self.templates.pop().is_some() {
            log::debug!("[TemplateBank] Revoked last new beat type");
        }
    }

    /// NORMAL template with the highest count, falling back to the most
    /// frequent template once enough beats have been seen
    pub fn dominant_type(&self) -> Option<usize> {
        let normal = self
            .templates
            .iter()
            .enumerate()
            .filter(|(_, t)| t.classification == BeatClass::Normal)
            .max_by_key(|(_, t)| t.count)
            .map(|(slot, _)| slot);
        if normal.is_some() {
            return normal;
        }
        if self.total_beats > DOM_FALLBACK_COUNT {
            return self
                .templates
                .iter()
                .enumerate()
                .max_by_key(|(_, t)| t.count)
                .map(|(slot, _)| slot);
        }
        None
    }

    /// True when every recent match of this template scored tightly
    pub fn minimum_beat_variation(&self, slot: usize) -> bool {
        self.templates[slot]
            .match_history
            .iter()
            .all(|&mi| mi < MIN_VAR_LIMIT)
    }

    /// True when the template's recent matches vary widely on average
    pub fn wide_beat_variation(&self, slot: usize) -> bool {
        let template = &self.templates[slot];
        if template.history_len == 0 {
            return false;
        }
        let sum: f64 = template.match_history[..template.history_len].iter().sum();
        sum / template.history_len as f64 > WIDE_VAR_LIMIT
    }

    /// Unscaled comparison between a template and the dominant template
    pub fn compare_to_dominant(&self, slot: usize, dom: usize) -> f64 {
        if slot == dom {
            return 0.0;
        }
        let (metric, _) = self.compare(
            &self.templates[dom].samples,
            &self.templates[slot].samples,
            false,
        );
        metric
    }

    pub fn classification(&self, slot: usize) -> BeatClass {
        self.templates[slot].classification
    }

    pub fn set_classification(&mut self, slot: usize, class: BeatClass) {
        self.templates[slot].classification = class;
    }

    pub fn width(&self, slot: usize) -> usize {
        self.templates[slot].width
    }

    pub fn center(&self, slot: usize) -> usize {
        self.templates[slot].center
    }

    pub fn beat_begin(&self, slot: usize) -> usize {
        self.templates[slot].begin
    }

    pub fn beat_end(&self, slot: usize) -> usize {
        self.templates[slot].end
    }

    pub fn amplitude(&self, slot: usize) -> i32 {
        self.templates[slot].amp
    }

    pub fn beat_count(&self, slot: usize) -> i32 {
        self.templates[slot].count
    }

    /// Compare two beats over the match window
    ///
    /// With `scaled`, the candidate is scaled to the reference's
    /// peak-to-peak magnitude so only shape differences count. Tries every
    /// alignment shift in the allowed range, removes the mean residual,
    /// and scores by mean absolute residual.
    fn compare(&self, reference: &[i32], candidate: &[i32], scaled: bool) -> (f64, isize) {
        let match_length = (self.match_end - self.match_start) as f64;
        let mag_ref = peak_to_peak(&reference[self.match_start..self.match_end]);
        let mag_cand = peak_to_peak(&candidate[self.match_start..self.match_end]);
        let scale = if scaled {
            mag_ref as f64 / mag_cand.max(1) as f64
        } else {
            1.0
        };

        let mut best = f64::INFINITY;
        let mut best_shift = -self.max_shift;
        for shift in -self.max_shift..=self.max_shift {
            let mut mean_diff = 0.0;
            for i in self.match_start..self.match_end {
                let c = candidate[(i as isize + shift) as usize] as f64 * scale;
                mean_diff += reference[i] as f64 - c;
            }
            mean_diff /= match_length;

            let mut abs_diff = 0.0;
            for i in self.match_start..self.match_end {
                let c = candidate[(i as isize + shift) as usize] as f64 * scale;
                abs_diff += (reference[i] as f64 - mean_diff - c).abs();
            }
            if abs_diff < best {
                best = abs_diff;
                best_shift = shift;
            }
        }

        let denominator = (mag_ref + mag_cand).max(1) as f64;
        (best / denominator * 30.0 / match_length, best_shift)
    }

    /// Fold `removed` into `kept` and shift higher slots down
    fn merge_templates(&mut self, kept: usize, removed: usize) {
        log::debug!(
            "[TemplateBank] Merging slot {} into slot {}",
            removed,
            kept
        );
        {
            let (a, b) = self.templates.split_at_mut(removed);
            let target = &mut a[kept];
            let source = &b[0];
            for i in 0..target.samples.len() {
                target.samples[i] = (target.samples[i] + source.samples[i]) >> 1;
            }
            target.classification = merge_class(target.classification, source.classification);
            target.count += source.count;
            target.since_last_match = target.since_last_match.min(source.since_last_match);
        }

        let features = self.analyzer.analyze(&self.templates[kept].samples);
        let target = &mut self.templates[kept];
        target.width = features.offset - features.onset;
        target.center = (features.onset + features.offset) / 2;
        target.onset = features.onset;
        target.offset = features.offset;
        target.begin = features.beat_begin;
        target.end = features.beat_end;
        target.amp = features.amp;

        for slot in removed..self.templates.len() - 1 {
            self.copy_template(slot + 1, slot);
        }
        self.templates.pop();
    }

    /// Copy one template slot over another
    fn copy_template(&mut self, src: usize, dst: usize) {
        let source_samples = self.templates[src].samples.clone();
        let source = &self.templates[src];
        let copied = BeatTemplate {
            samples: source_samples,
            count: source.count,
            width: source.width,
            center: source.center,
            onset: source.onset,
            offset: source.offset,
            begin: source.begin,
            end: source.begin,
            amp: source.amp,
            classification: source.classification,
            since_last_match: source.since_last_match,
            match_history: source.match_history,
            history_len: source.history_len,
        };
        self.templates[dst] = copied;
    }
}

fn peak_to_peak(data: &[i32]) -> i32 {
    let mut max = data[0];
    let mut min = data[0];
    for &v in &data[1..] {
        if v > max {
            max = v;
        } else if v < min {
            min = v;
        }
    }
    max - min
}

fn merge_class(a: BeatClass, b: BeatClass) -> BeatClass {
    if a == BeatClass::Normal || b == BeatClass::Normal {
        BeatClass::Normal
    } else if a == BeatClass::Pvc || b == BeatClass::Pvc {
        BeatClass::Pvc
    } else {
        BeatClass::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank() -> TemplateBank {
        TemplateBank::new(100)
    }

    /// Distinct morphology: triangular complex with parameterized polarity
    /// width and amplitude
    fn shaped_beat(bank: &TemplateBank, half_width: usize, amp: i32) -> Vec<i32> {
        let fid = bank.analyzer.fidmark();
        let mut beat = vec![0; bank.beat_length];
        for k in 0..half_width {
            let v = amp * (half_width - k) as i32 / half_width as i32;
            beat[fid + k] = v;
            beat[fid - k] = v;
        }
        beat
    }

    #[test]
    fn test_empty_bank_reports_no_match() {
        let mut bank = bank();
        let beat = shaped_beat(&bank, 4, 400);
        let (result, event) = bank.best_match(&beat);
        assert!(result.match_index.is_infinite());
        assert!(event.is_none());
    }

    #[test]
    fn test_identical_beat_matches_tightly() {
        let mut bank = bank();
        let beat = shaped_beat(&bank, 4, 400);
        bank.new_beat_type(&beat);
        let (result, _) = bank.best_match(&beat);
        assert_eq!(result.match_type, 0);
        assert!(
            result.match_index < 0.1,
            "identical beat must score near zero, got {}",
            result.match_index
        );
        assert!(result.mi2 < 0.1);
    }

    #[test]
    fn test_shifted_beat_still_matches() {
        let mut bank = bank();
        let beat = shaped_beat(&bank, 4, 400);
        bank.new_beat_type(&beat);

        let mut shifted = vec![0; beat.len()];
        shifted[2..].copy_from_slice(&beat[..beat.len() - 2]);
        let (result, _) = bank.best_match(&shifted);
        assert!(
            result.match_index < 0.3,
            "2-sample shift should be absorbed, got {}",
            result.match_index
        );
        assert_eq!(result.shift, 2);
    }

    #[test]
    fn test_scaled_match_ignores_amplitude_but_mi2_does_not() {
        let mut bank = bank();
        let beat = shaped_beat(&bank, 4, 400);
        bank.new_beat_type(&beat);

        let double = shaped_beat(&bank, 4, 800);
        let (result, _) = bank.best_match(&double);
        assert!(
            result.match_index < 0.2,
            "same shape at twice the amplitude matches on shape, got {}",
            result.match_index
        );
        assert!(
            result.mi2 > result.match_index,
            "unscaled score must see the amplitude gap"
        );
    }

    #[test]
    fn test_type_count_never_exceeds_cap() {
        let mut bank = bank();
        for n in 0..12 {
            // Widths and amplitudes far enough apart to stay distinct
            let beat = shaped_beat(&bank, 3 + n, 200 + 300 * n as i32);
            bank.new_beat_type(&beat);
            assert!(
                bank.type_count() <= MAXTYPES,
                "cap exceeded at beat {}",
                n
            );
        }
        assert_eq!(bank.type_count(), MAXTYPES);
    }

    #[test]
    fn test_eviction_prefers_fewest_occurrences() {
        let mut bank = bank();
        for n in 0..MAXTYPES {
            let beat = shaped_beat(&bank, 3 + n, 200 + 300 * n as i32);
            let (slot, _) = bank.new_beat_type(&beat);
            // Give every slot except 2 extra occurrences
            if slot != 2 {
                bank.update_beat_type(slot, &beat, 0.0, 0);
            }
        }

        let newcomer = shaped_beat(&bank, 14, 3800);
        let (slot, event) = bank.new_beat_type(&newcomer);
        assert_eq!(slot, 2, "slot with the fewest occurrences is evicted");
        assert_eq!(event, Some(TemplateEvent::Evicted { slot: 2 }));
    }

    #[test]
    fn test_update_blends_and_counts() {
        let mut bank = bank();
        let beat = shaped_beat(&bank, 4, 400);
        let (slot, _) = bank.new_beat_type(&beat);
        assert_eq!(bank.beat_count(slot), 1);

        bank.update_beat_type(slot, &beat, 0.1, 0);
        assert_eq!(bank.beat_count(slot), 2);
        // Identical updates leave the template matching itself tightly.
        let (result, _) = bank.best_match(&beat);
        assert!(result.match_index < 0.1);
    }

    #[test]
    fn test_clear_last_new_type_drops_highest_slot() {
        let mut bank = bank();
        bank.new_beat_type(&shaped_beat(&bank, 4, 400));
        bank.new_beat_type(&shaped_beat(&bank, 8, 1200));
        assert_eq!(bank.type_count(), 2);
        bank.clear_last_new_type();
        assert_eq!(bank.type_count(), 1);
    }

    #[test]
    fn test_dominant_type_prefers_normal_templates() {
        let mut bank = bank();
        let a = shaped_beat(&bank, 4, 400);
        let b = shaped_beat(&bank, 9, 1500);
        let (slot_a, _) = bank.new_beat_type(&a);
        let (slot_b, _) = bank.new_beat_type(&b);

        // More occurrences of b, but only a is classified normal.
        for _ in 0..5 {
            bank.update_beat_type(slot_b, &b, 0.1, 0);
        }
        assert_eq!(bank.dominant_type(), None, "no normal template yet");

        bank.set_classification(slot_a, BeatClass::Normal);
        assert_eq!(bank.dominant_type(), Some(slot_a));
    }

    #[test]
    fn test_merge_close_templates() {
        let mut bank = bank();
        let beat = shaped_beat(&bank, 4, 400);
        // Near-identical shape lands a second template only if forced.
        let mut near = beat.clone();
        for v in near.iter_mut() {
            *v += *v / 10;
        }
        bank.new_beat_type(&beat);
        bank.new_beat_type(&near);
        assert_eq!(bank.type_count(), 2);

        let (result, event) = bank.best_match(&beat);
        assert_eq!(
            event,
            Some(TemplateEvent::Merged {
                kept: 0,
                removed: 1
            }),
            "near-identical templates must merge"
        );
        assert_eq!(bank.type_count(), 1);
        assert_eq!(result.match_type, 0);
    }

    #[test]
    fn test_wide_variation_tracks_history() {
        let mut bank = bank();
        let beat = shaped_beat(&bank, 4, 400);
        let (slot, _) = bank.new_beat_type(&beat);
        assert!(!bank.wide_beat_variation(slot), "no history yet");
        assert!(bank.minimum_beat_variation(slot), "empty history reads tight");

        for _ in 0..4 {
            bank.update_beat_type(slot, &beat, 2.0, 0);
        }
        assert!(bank.wide_beat_variation(slot), "large scores mark variation");
        assert!(!bank.minimum_beat_variation(slot));
    }
}
