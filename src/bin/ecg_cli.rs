use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ecg_analyzer::testing::fixtures::FixtureSpec;
use ecg_analyzer::{AnalyzerConfig, EcgAnalyzer};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(
    name = "ecg_cli",
    about = "Deterministic ECG analysis harness: classify records and fixtures"
)]
struct Cli {
    /// JSON config file overriding the default 200/100 Hz rate pair
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a record or fixture and print a JSON report
    Classify {
        /// Mono WAV file holding integer ECG samples
        #[arg(long, conflicts_with = "fixture")]
        input: Option<PathBuf>,
        /// Built-in fixture name (see dump-fixtures)
        #[arg(long)]
        fixture: Option<String>,
        /// Write the report here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Stream beat annotations to stdout as JSON lines
    Stream {
        #[arg(long, conflicts_with = "fixture")]
        input: Option<PathBuf>,
        #[arg(long)]
        fixture: Option<String>,
    },
    /// List the built-in synthetic fixtures
    DumpFixtures,
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = cli
        .config
        .map(AnalyzerConfig::load_from_file)
        .unwrap_or_default();

    match cli.command {
        Commands::Classify {
            input,
            fixture,
            output,
        } => run_classify(config, input, fixture, output),
        Commands::Stream { input, fixture } => run_stream(config, input, fixture),
        Commands::DumpFixtures => run_dump(),
    }
}

fn run_classify(
    config: AnalyzerConfig,
    input: Option<PathBuf>,
    fixture: Option<String>,
    output: Option<PathBuf>,
) -> Result<ExitCode> {
    let (source, samples, sample_rate) = load_samples(&config, input, fixture)?;
    let beats = analyze_all(sample_rate, &samples)?;

    let report = ReportPayload {
        source: &source,
        sample_rate,
        sample_count: samples.len(),
        beat_count: beats.len(),
        beats: &beats,
    };
    let json = serde_json::to_string_pretty(&report)?;

    if let Some(path) = output {
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    } else {
        println!("{json}");
    }
    Ok(ExitCode::from(0))
}

fn run_stream(
    config: AnalyzerConfig,
    input: Option<PathBuf>,
    fixture: Option<String>,
) -> Result<ExitCode> {
    let (_, samples, sample_rate) = load_samples(&config, input, fixture)?;
    for event in analyze_all(sample_rate, &samples)? {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(ExitCode::from(0))
}

fn run_dump() -> Result<ExitCode> {
    for spec in FixtureSpec::builtin() {
        println!(
            "{} ({} Hz, {} ms)",
            spec.id, spec.sample_rate, spec.duration_ms
        );
    }
    Ok(ExitCode::from(0))
}

fn analyze_all(sample_rate: u32, samples: &[i32]) -> Result<Vec<BeatEvent>> {
    let beat_rate = if sample_rate % 2 == 0 {
        sample_rate / 2
    } else {
        sample_rate
    };
    let mut analyzer = EcgAnalyzer::new(sample_rate, beat_rate)
        .with_context(|| format!("creating analyzer at {sample_rate} Hz"))?;

    let mut beats = Vec::new();
    for (index, &sample) in samples.iter().enumerate() {
        if let Some(annotation) = analyzer.analyze(sample) {
            beats.push(BeatEvent {
                sample_index: index,
                r_wave_index: index - annotation.samples_since_r_wave.min(index),
                beat_type: annotation.beat_type.code(),
                match_type: annotation.match_type,
            });
        }
    }
    Ok(beats)
}

fn load_samples(
    config: &AnalyzerConfig,
    input: Option<PathBuf>,
    fixture: Option<String>,
) -> Result<(String, Vec<i32>, u32)> {
    if let Some(path) = input {
        let (samples, rate) = read_wav(&path)?;
        return Ok((path.display().to_string(), samples, rate));
    }
    if let Some(name) = fixture {
        let Some(mut spec) = FixtureSpec::builtin().into_iter().find(|s| s.id == name) else {
            bail!("unknown fixture '{name}'; run dump-fixtures for the catalog");
        };
        spec.sample_rate = config.sample_rate;
        let samples = spec.generate();
        return Ok((format!("fixture:{name}"), samples, spec.sample_rate));
    }
    bail!("either --input or --fixture is required");
}

fn read_wav(path: &Path) -> Result<(Vec<i32>, u32)> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let spec = reader.spec();
    if spec.channels == 0 {
        bail!("{} has zero channels", path.display());
    }
    if spec.sample_format != hound::SampleFormat::Int {
        bail!(
            "{} holds float samples; ECG records use integer ADC units",
            path.display()
        );
    }

    let samples: Vec<i32> = reader
        .samples::<i32>()
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("error reading {}", path.display()))?;

    if spec.channels == 1 {
        return Ok((samples, spec.sample_rate));
    }

    // Average channels down to a single lead.
    let channels = spec.channels as usize;
    let mono = samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<i32>() / channels as i32)
        .collect();
    Ok((mono, spec.sample_rate))
}

#[derive(Serialize)]
struct BeatEvent {
    sample_index: usize,
    r_wave_index: usize,
    beat_type: u8,
    match_type: usize,
}

#[derive(Serialize)]
struct ReportPayload<'a> {
    source: &'a str,
    sample_rate: u32,
    sample_count: usize,
    beat_count: usize,
    #[serde(skip_serializing_if = "slice_empty")]
    beats: &'a [BeatEvent],
}

fn slice_empty(beats: &&[BeatEvent]) -> bool {
    beats.is_empty()
}
