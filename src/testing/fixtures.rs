//! Fixture specification + synthetic ECG generators.
//!
//! The test suite and the CLI harness rely on deterministic sample streams
//! that exercise the pipeline without real recordings. This module defines
//! the declarative `FixtureSpec` together with generators for the rhythm
//! scenarios the analyzer must handle: steady sinus, bigeminy, an isolated
//! premature beat, a baseline step, silence, noisy sinus and a cycle of
//! distinct morphologies.
//!
//! All randomness comes from a fixed-seed `StdRng`, so every generation of
//! a given spec yields the identical stream.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::ms_to_samples;

/// Seed for fixture noise; fixed so streams are reproducible
const FIXTURE_SEED: u64 = 0x00EC_60AA;

/// Declarative description of a synthetic ECG stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FixtureSpec {
    pub id: String,
    pub pattern: EcgPattern,
    /// Detection rate the stream is generated at, in Hz
    pub sample_rate: u32,
    pub duration_ms: u32,
    /// R-wave amplitude in ADC units
    pub amplitude: i32,
}

/// Supported deterministic rhythm patterns
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EcgPattern {
    /// Steady sinus rhythm
    SinusRhythm { bpm: u32 },
    /// Every other beat premature, wide, with the given coupling/pause
    Bigeminy { coupling_ms: u32, pause_ms: u32 },
    /// Sinus rhythm with one wide premature beat and compensatory pause
    IsolatedPvc { bpm: u32, pvc_beat: usize },
    /// Sinus rhythm with a DC step between two beats
    BaselineStep { bpm: u32, at_ms: u32, height: i32 },
    /// All-zero stream
    Silence,
    /// Sinus rhythm plus uniform sample noise
    NoisySinus { bpm: u32, noise_amp: i32 },
    /// Beats cycling through distinct widths and amplitudes
    MorphologyCycle { shapes: usize, interval_ms: u32 },
}

impl FixtureSpec {
    /// Look up one of the built-in fixtures by name
    ///
    /// # Panics
    /// Panics when the name is unknown; `builtin()` lists valid names.
    pub fn named(id: &str) -> Self {
        Self::builtin()
            .into_iter()
            .find(|spec| spec.id == id)
            .unwrap_or_else(|| panic!("unknown fixture '{id}'"))
    }

    /// The fixture catalog used by tests and the CLI
    pub fn builtin() -> Vec<Self> {
        let base = |id: &str, pattern| FixtureSpec {
            id: id.to_string(),
            pattern,
            sample_rate: 200,
            duration_ms: 60_000,
            amplitude: 700,
        };
        vec![
            base("sinus-60", EcgPattern::SinusRhythm { bpm: 60 }),
            base(
                "bigeminy",
                EcgPattern::Bigeminy {
                    coupling_ms: 600,
                    pause_ms: 900,
                },
            ),
            base(
                "isolated-pvc",
                EcgPattern::IsolatedPvc {
                    bpm: 60,
                    pvc_beat: 20,
                },
            ),
            base(
                "baseline-step",
                EcgPattern::BaselineStep {
                    bpm: 60,
                    at_ms: 20_900,
                    height: 900,
                },
            ),
            base("silence", EcgPattern::Silence),
            base(
                "noisy-sinus",
                EcgPattern::NoisySinus {
                    bpm: 70,
                    noise_amp: 25,
                },
            ),
            base(
                "morphology-cycle",
                EcgPattern::MorphologyCycle {
                    shapes: 9,
                    interval_ms: 800,
                },
            ),
        ]
    }

    /// Generate the full sample stream for this spec
    pub fn generate(&self) -> Vec<i32> {
        let rate = self.sample_rate;
        let length = ms_to_samples(rate, self.duration_ms);
        let mut signal = vec![0i32; length];

        match &self.pattern {
            EcgPattern::Silence => {}
            EcgPattern::SinusRhythm { bpm } => {
                let period = beat_period(rate, *bpm);
                let mut at = period;
                while at < length {
                    place_normal_beat(&mut signal, at, rate, self.amplitude);
                    at += period;
                }
            }
            EcgPattern::Bigeminy {
                coupling_ms,
                pause_ms,
            } => {
                let coupling = ms_to_samples(rate, *coupling_ms);
                let pause = ms_to_samples(rate, *pause_ms);
                let mut at = pause;
                let mut premature = false;
                while at < length {
                    if premature {
                        place_wide_beat(&mut signal, at, rate, self.amplitude * 5 / 4);
                        at += pause;
                    } else {
                        place_normal_beat(&mut signal, at, rate, self.amplitude);
                        at += coupling;
                    }
                    premature = !premature;
                }
            }
            EcgPattern::IsolatedPvc { bpm, pvc_beat } => {
                let period = beat_period(rate, *bpm);
                let mut at = period;
                let mut beat_index = 0usize;
                while at < length {
                    if beat_index == *pvc_beat {
                        // Premature by 40% of a cycle; the next sinus beat
                        // stays on the original grid (compensatory pause).
                        let early = at - period * 2 / 5;
                        place_wide_beat(&mut signal, early, rate, self.amplitude * 5 / 4);
                        place_normal_beat(&mut signal, at + period, rate, self.amplitude);
                        at += 2 * period;
                    } else {
                        place_normal_beat(&mut signal, at, rate, self.amplitude);
                        at += period;
                    }
                    beat_index += 1;
                }
            }
            EcgPattern::BaselineStep { bpm, at_ms, height } => {
                let period = beat_period(rate, *bpm);
                let mut at = period;
                while at < length {
                    place_normal_beat(&mut signal, at, rate, self.amplitude);
                    at += period;
                }
                let step_at = ms_to_samples(rate, *at_ms);
                for value in signal.iter_mut().skip(step_at) {
                    *value += height;
                }
            }
            EcgPattern::NoisySinus { bpm, noise_amp } => {
                let period = beat_period(rate, *bpm);
                let mut at = period;
                while at < length {
                    place_normal_beat(&mut signal, at, rate, self.amplitude);
                    at += period;
                }
                let mut rng = StdRng::seed_from_u64(FIXTURE_SEED);
                for value in signal.iter_mut() {
                    *value += rng.gen_range(-noise_amp..=*noise_amp);
                }
            }
            EcgPattern::MorphologyCycle {
                shapes,
                interval_ms,
            } => {
                let period = ms_to_samples(rate, *interval_ms);
                let mut at = period;
                let mut index = 0usize;
                while at < length {
                    let shape = index % (*shapes).max(1);
                    let half_width_ms = 24 + 14 * shape as u32;
                    let amp = self.amplitude + 150 * shape as i32;
                    // Cycle polarity and phase so no two shapes are scaled
                    // versions of each other.
                    match shape % 3 {
                        0 => place_shaped_beat(&mut signal, at, rate, amp, half_width_ms),
                        1 => place_shaped_beat(&mut signal, at, rate, -amp, half_width_ms),
                        _ => place_biphasic_beat(&mut signal, at, rate, amp, half_width_ms),
                    }
                    at += period;
                    index += 1;
                }
            }
        }

        signal
    }
}

fn beat_period(rate: u32, bpm: u32) -> usize {
    ms_to_samples(rate, 60_000 / bpm.max(1))
}

/// Narrow sinus beat: Q dip, sharp R, S dip and a low T-wave hump
fn place_normal_beat(signal: &mut [i32], at: usize, rate: u32, amp: i32) {
    let ms = |millis| ms_to_samples(rate, millis);

    add_triangle(signal, at.saturating_sub(ms(25)), ms(15), -amp / 8);
    add_triangle(signal, at.saturating_sub(ms(12)), ms(24), amp);
    add_triangle(signal, at + ms(14), ms(16), -amp / 4);
    add_rounded(signal, at + ms(180), ms(160), amp / 6);
}

/// Wide ventricular beat: slurred, large, no distinct T-wave
fn place_wide_beat(signal: &mut [i32], at: usize, rate: u32, amp: i32) {
    let ms = |millis| ms_to_samples(rate, millis);

    add_triangle(signal, at.saturating_sub(ms(60)), ms(120), amp);
    add_triangle(signal, at + ms(62), ms(80), -amp / 3);
}

/// Parameterized triangular beat used by the morphology cycle
fn place_shaped_beat(signal: &mut [i32], at: usize, rate: u32, amp: i32, half_width_ms: u32) {
    let half = ms_to_samples(rate, half_width_ms);
    add_triangle(signal, at.saturating_sub(half), 2 * half, amp);
}

/// Up-then-down complex for the morphology cycle
fn place_biphasic_beat(signal: &mut [i32], at: usize, rate: u32, amp: i32, half_width_ms: u32) {
    let half = ms_to_samples(rate, half_width_ms);
    add_triangle(signal, at.saturating_sub(half), half, amp);
    add_triangle(signal, at, half, -amp);
}

/// Add an isoceles triangle of the given base width peaking at `amp`
fn add_triangle(signal: &mut [i32], start: usize, width: usize, amp: i32) {
    if width == 0 {
        return;
    }
    let half = (width / 2).max(1);
    for k in 0..width {
        let distance = k.min(width - k).min(half);
        let value = amp * distance as i32 / half as i32;
        if let Some(sample) = signal.get_mut(start + k) {
            *sample += value;
        }
    }
}

/// Add a flattened hump (T-wave like) of the given width
fn add_rounded(signal: &mut [i32], start: usize, width: usize, amp: i32) {
    if width == 0 {
        return;
    }
    for k in 0..width {
        // Parabolic arch: zero at the edges, `amp` at the center.
        let x = k as i32;
        let w = width as i32;
        let value = amp * 4 * x * (w - x) / (w * w);
        if let Some(sample) = signal.get_mut(start + k) {
            *sample += value;
        }
    }
}
