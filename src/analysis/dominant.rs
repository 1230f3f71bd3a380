// Dominant-beat monitor
//
// Tracks the last 180 classified beats as (morphology slot, normality flag,
// rhythm label) and answers which template currently represents the
// patient's dominant (sinus) morphology. A beat earns its normality flag
// when its rhythm is normal, its QRS is narrow and its morphology has been
// seen before, or when it follows a same-morphology beat at a short
// coupling interval. Dominance goes to the template with the most normal
// flags, falling back to raw frequency when normality evidence is missing
// or badly outnumbered.
//
// Template merges and evictions in the bank rewrite slot numbers; the
// monitor consumes those events so its historical references stay valid.

use crate::analysis::matcher::{TemplateEvent, MAXTYPES};
use crate::analysis::rhythm::RhythmClass;
use crate::config::ms_to_samples;

/// Number of recent beats the monitor remembers
pub const DM_BUFFER_LENGTH: usize = 180;

/// Non-normal rhythm labels in the ring above this count mark the rhythm
/// as irregular
pub const IRREG_RR_LIMIT: usize = 60;

/// Coupling interval (ms) short enough to read as an adjacent-wave repeat
const PR_LIKE_RR_MS: u32 = 400;

/// Ring presence with zero normality flags that demotes a NORMAL template
const DEMOTE_PRESENCE: i32 = 24;

#[derive(Debug, Clone, Copy)]
struct DomEntry {
    slot: usize,
    normal: bool,
    rhythm: RhythmClass,
}

/// Circular monitor of recent beat normality per template slot
pub struct DominantMonitor {
    ring: Vec<Option<DomEntry>>,
    ptr: usize,
    beat_counts: [i32; MAXTYPES],
    norm_counts: [i32; MAXTYPES],
    irregular: usize,
    narrow_width: usize,
    pr_like_rr: i32,
    last_slot: Option<usize>,
}

impl DominantMonitor {
    /// Create a monitor; widths arrive at `beat_rate`, RR at `sample_rate`
    pub fn new(sample_rate: u32, beat_rate: u32) -> Self {
        Self {
            ring: vec![None; DM_BUFFER_LENGTH],
            ptr: 0,
            beat_counts: [0; MAXTYPES],
            norm_counts: [0; MAXTYPES],
            irregular: 0,
            narrow_width: ms_to_samples(beat_rate, 130),
            pr_like_rr: ms_to_samples(sample_rate, PR_LIKE_RR_MS) as i32,
            last_slot: None,
        }
    }

    /// Record one classified beat
    ///
    /// `slot == MAXTYPES` records an unmatched beat: it still occupies a
    /// ring position and contributes to the irregularity gauge, but no
    /// template counts move.
    pub fn observe(&mut self, slot: usize, rhythm: RhythmClass, beat_width: usize, rr: i32) {
        if let Some(old) = self.ring[self.ptr] {
            if old.slot < MAXTYPES {
                self.beat_counts[old.slot] -= 1;
                if old.normal {
                    self.norm_counts[old.slot] -= 1;
                }
            }
            if old.rhythm != RhythmClass::Normal {
                self.irregular -= 1;
            }
        }

        let tracked = slot < MAXTYPES;
        let normal = tracked
            && ((rhythm == RhythmClass::Normal
                && beat_width < self.narrow_width
                && self.beat_counts[slot] > 0)
                || (rr < self.pr_like_rr && self.last_slot == Some(slot)));

        if tracked {
            self.beat_counts[slot] += 1;
            if normal {
                self.norm_counts[slot] += 1;
            }
        }
        if rhythm != RhythmClass::Normal {
            self.irregular += 1;
        }

        self.ring[self.ptr] = Some(DomEntry {
            slot,
            normal,
            rhythm,
        });
        self.ptr += 1;
        if self.ptr == DM_BUFFER_LENGTH {
            self.ptr = 0;
        }
        self.last_slot = tracked.then_some(slot);
    }

    /// Template slot currently representing the dominant morphology
    pub fn dominant(&self) -> Option<usize> {
        let best_norm = argmax(&self.norm_counts);
        let best_freq = argmax(&self.beat_counts);

        if self.beat_counts[best_freq] == 0 {
            return None;
        }
        if self.norm_counts[best_norm] == 0 {
            return Some(best_freq);
        }
        // Normality evidence badly outnumbered by a more frequent type.
        if best_freq != best_norm
            && self.beat_counts[best_freq] >= 2 * self.beat_counts[best_norm]
        {
            return Some(best_freq);
        }
        Some(best_norm)
    }

    /// True while recent rhythm labels are predominantly non-normal
    pub fn is_irregular(&self) -> bool {
        self.irregular > IRREG_RR_LIMIT
    }

    /// A supposedly NORMAL template whose ring presence shows no normality
    pub fn is_inconsistent(&self, slot: usize) -> bool {
        slot < MAXTYPES
            && self.beat_counts[slot] >= DEMOTE_PRESENCE
            && self.norm_counts[slot] == 0
    }

    /// Number of this slot's beats still inside the monitoring window
    pub fn beat_count(&self, slot: usize) -> i32 {
        self.beat_counts[slot]
    }

    /// Number of this slot's beats flagged normal
    pub fn norm_count(&self, slot: usize) -> i32 {
        self.norm_counts[slot]
    }

    /// Rewrite slot references after a bank merge or eviction
    pub fn apply(&mut self, event: TemplateEvent) {
        match event {
            TemplateEvent::Evicted { slot } => self.retire(slot),
            TemplateEvent::Merged { kept, removed } => self.combine(kept, removed),
        }
    }

    /// Retire an evicted slot's history without disturbing the rhythm gauge
    fn retire(&mut self, slot: usize) {
        for entry in self.ring.iter_mut().flatten() {
            if entry.slot == slot {
                entry.slot = MAXTYPES;
                entry.normal = false;
            }
        }
        self.beat_counts[slot] = 0;
        self.norm_counts[slot] = 0;
        if self.last_slot == Some(slot) {
            self.last_slot = None;
        }
    }

    /// Fold `removed` into `kept` and close the slot gap
    fn combine(&mut self, kept: usize, removed: usize) {
        for entry in self.ring.iter_mut().flatten() {
            if entry.slot == removed {
                entry.slot = kept;
            } else if entry.slot > removed && entry.slot < MAXTYPES {
                entry.slot -= 1;
            }
        }

        self.beat_counts[kept] += self.beat_counts[removed];
        self.norm_counts[kept] += self.norm_counts[removed];
        for slot in removed..MAXTYPES - 1 {
            self.beat_counts[slot] = self.beat_counts[slot + 1];
            self.norm_counts[slot] = self.norm_counts[slot + 1];
        }
        self.beat_counts[MAXTYPES - 1] = 0;
        self.norm_counts[MAXTYPES - 1] = 0;

        self.last_slot = self.last_slot.map(|s| {
            if s == removed {
                kept
            } else if s > removed {
                s - 1
            } else {
                s
            }
        });
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        let mut total = 0;
        for slot in 0..MAXTYPES {
            assert!(self.norm_counts[slot] >= 0);
            assert!(
                self.norm_counts[slot] <= self.beat_counts[slot],
                "norm count exceeds beat count for slot {}",
                slot
            );
            total += self.beat_counts[slot];
        }
        assert!(total <= DM_BUFFER_LENGTH as i32);
    }
}

fn argmax(counts: &[i32; MAXTYPES]) -> usize {
    let mut best = 0;
    for slot in 1..MAXTYPES {
        if counts[slot] > counts[best] {
            best = slot;
        }
    }
    best
}
