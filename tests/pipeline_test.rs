//! Integration tests for the full analysis pipeline
//!
//! These tests drive complete synthetic streams through `EcgAnalyzer` and
//! check the externally visible behavior: detection coverage, beat labels,
//! warm-up handling, rhythm flags, template-bank bounds and recovery from
//! pathological input (baseline steps, silence).

use ecg_analyzer::testing::fixtures::{EcgPattern, FixtureSpec};
use ecg_analyzer::{BeatAnnotation, BeatCode, EcgAnalyzer};

/// Drive a stream through a fresh 200/100 Hz analyzer
fn run(signal: &[i32]) -> (EcgAnalyzer, Vec<(usize, BeatAnnotation)>) {
    let mut analyzer = EcgAnalyzer::new(200, 100).expect("valid rate pair");
    let mut annotations = Vec::new();
    for (i, &sample) in signal.iter().enumerate() {
        if let Some(annotation) = analyzer.analyze(sample) {
            annotations.push((i, annotation));
        }
    }
    (analyzer, annotations)
}

#[test]
fn regular_sinus_classifies_normal_after_warmup() {
    let signal = FixtureSpec::named("sinus-60").generate();
    let (_, annotations) = run(&signal);

    // 60 bpm for 60 s minus the eight-second learning period.
    assert!(
        annotations.len() >= 40,
        "expected steady detections, got {}",
        annotations.len()
    );
    assert_eq!(
        annotations[0].1.beat_type,
        BeatCode::Unknown,
        "first beat carries the unknown-beat code"
    );
    for (i, (at, annotation)) in annotations.iter().enumerate().skip(4) {
        assert_eq!(
            annotation.beat_type,
            BeatCode::Normal,
            "annotation {} at sample {} should be normal",
            i,
            at
        );
    }
}

#[test]
fn regular_sinus_positions_follow_the_beat_grid() {
    let signal = FixtureSpec::named("sinus-60").generate();
    let (_, annotations) = run(&signal);

    let positions: Vec<isize> = annotations
        .iter()
        .map(|&(at, a)| at as isize - a.samples_since_r_wave as isize)
        .collect();
    for pair in positions.windows(2).skip(2) {
        let rr = pair[1] - pair[0];
        assert!(
            (rr - 200).abs() <= 4,
            "RR interval {} samples too far from the 200-sample grid",
            rr
        );
    }
}

#[test]
fn bigeminy_alternates_labels_and_sets_flag() {
    let signal = FixtureSpec::named("bigeminy").generate();
    let (analyzer, annotations) = run(&signal);

    assert!(
        analyzer.is_bigeminy(),
        "alternating rhythm must set the bigeminy flag"
    );

    let tail: Vec<BeatCode> = annotations
        .iter()
        .rev()
        .take(12)
        .map(|&(_, a)| a.beat_type)
        .collect();
    let pvcs = tail.iter().filter(|&&c| c == BeatCode::Pvc).count();
    let normals = tail.iter().filter(|&&c| c == BeatCode::Normal).count();
    assert!(
        pvcs >= 5 && normals >= 5,
        "steady bigeminy must alternate labels, tail = {:?}",
        tail
    );
    for pair in tail.windows(2) {
        assert_ne!(
            pair[0], pair[1],
            "consecutive beats must alternate in bigeminy: {:?}",
            tail
        );
    }
}

#[test]
fn baseline_step_does_not_mint_a_template() {
    let signal = FixtureSpec::named("baseline-step").generate();
    let (analyzer, annotations) = run(&signal);

    assert!(
        analyzer.template_count() <= 2,
        "baseline step must not grow the template bank, got {}",
        analyzer.template_count()
    );

    // The rhythm recovers: everything in the last ten seconds is normal.
    let late: Vec<_> = annotations
        .iter()
        .filter(|&&(at, _)| at > signal.len() - 2000)
        .collect();
    assert!(!late.is_empty(), "beats must still be detected after the step");
    assert!(
        late.iter().all(|&&(_, a)| a.beat_type == BeatCode::Normal),
        "rhythm must recover after the step: {:?}",
        late
    );
}

#[test]
fn detector_survives_long_silence() {
    let sinus = FixtureSpec::named("sinus-60").generate();
    let mut signal = sinus[..6000].to_vec();
    signal.extend(std::iter::repeat(0).take(2400));
    signal.extend_from_slice(&sinus[..4000]);

    let (_, annotations) = run(&signal);
    let resumed: Vec<_> = annotations.iter().filter(|&&(at, _)| at > 8400).collect();
    assert!(
        !resumed.is_empty(),
        "beats after 12 s of silence must still be detected"
    );
}

#[test]
fn isolated_pvc_is_labeled_pvc() {
    let signal = FixtureSpec::named("isolated-pvc").generate();
    let (_, annotations) = run(&signal);

    let pvcs: Vec<_> = annotations
        .iter()
        .filter(|&&(_, a)| a.beat_type == BeatCode::Pvc)
        .collect();
    assert_eq!(
        pvcs.len(),
        1,
        "exactly one premature beat expected: {:?}",
        pvcs
    );

    // The premature beat sits around 20.6 s into the record.
    let (at, _) = *pvcs[0];
    assert!(
        (4000..4400).contains(&at),
        "PVC annotation at unexpected position {}",
        at
    );

    let normals = annotations
        .iter()
        .filter(|&&(_, a)| a.beat_type == BeatCode::Normal)
        .count();
    assert!(normals >= 40, "sinus background must stay normal");
}

#[test]
fn morphology_cycle_respects_template_cap() {
    let signal = FixtureSpec::named("morphology-cycle").generate();

    let mut analyzer = EcgAnalyzer::new(200, 100).expect("valid rate pair");
    let mut beats = 0;
    for &sample in &signal {
        if analyzer.analyze(sample).is_some() {
            beats += 1;
            assert!(
                analyzer.template_count() <= 8,
                "template cap exceeded after {} beats",
                beats
            );
        }
    }
    assert!(beats >= 30, "cycle must keep producing beats, got {}", beats);
    assert_eq!(
        analyzer.template_count(),
        8,
        "nine distinct shapes must saturate the eight-slot bank"
    );
}

#[test]
fn identical_streams_produce_identical_annotations() {
    let signal = FixtureSpec::named("noisy-sinus").generate();
    let (_, first) = run(&signal);
    let (_, second) = run(&signal);
    assert_eq!(first, second, "analysis must be deterministic");
    assert!(!first.is_empty());
}

#[test]
fn alternate_rate_pair_smoke() {
    let spec = FixtureSpec {
        id: "sinus-360".into(),
        pattern: EcgPattern::SinusRhythm { bpm: 72 },
        sample_rate: 360,
        duration_ms: 40_000,
        amplitude: 700,
    };
    let signal = spec.generate();

    let mut analyzer = EcgAnalyzer::new(360, 180).expect("360/180 Hz is supported");
    let mut annotations = Vec::new();
    for &sample in &signal {
        if let Some(annotation) = analyzer.analyze(sample) {
            annotations.push(annotation);
        }
    }
    assert!(
        annotations.len() >= 20,
        "detection must work away from the canonical rates, got {}",
        annotations.len()
    );
}

#[test]
fn silence_stream_stays_quiet() {
    let signal = FixtureSpec::named("silence").generate();
    let (analyzer, annotations) = run(&signal);
    assert!(annotations.is_empty(), "no beats in silence");
    assert_eq!(analyzer.template_count(), 0);
}
