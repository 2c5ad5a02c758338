use anyhow::Result;
use clap::{Parser, Subcommand};
use jmx_lib::{
    io::text as text_io,
    metrics::interval::{evaluate_with_config, IntervalConfig, IntervalResult, Tolerance},
};
use jmx_run::{read_benchmark, read_recordings, run_benchmark, ResultSink};
use log::info;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "jmx",
    version,
    about = "JMX: jitter / missed / extra benchmarking of heartbeat detectors"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match one recording's detections against its annotations and print the analysis as JSON
    Evaluate {
        /// Newline-delimited detected sample indices
        #[arg(long)]
        detected: PathBuf,
        /// Newline-delimited annotated sample indices
        #[arg(long)]
        annotated: PathBuf,
        #[arg(long, default_value_t = 250.0)]
        fs: f64,
        /// Match window in milliseconds (default 100)
        #[arg(long, conflicts_with = "tolerance_samples")]
        tolerance_ms: Option<f64>,
        /// Match window in samples
        #[arg(long)]
        tolerance_samples: Option<u64>,
        /// Detector delay subtracted from every detection, in samples
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        delay_samples: i64,
    },
    /// Run a benchmark manifest and write per-recording results plus running means
    Benchmark {
        #[arg(long)]
        manifest: PathBuf,
        #[arg(long)]
        out: PathBuf,
        /// Worker threads used for interval analysis
        #[arg(long, default_value_t = 1)]
        jobs: usize,
    },
}

/// Analysis plus the jitter converted to seconds.
#[derive(Serialize)]
struct EvaluateOutput {
    #[serde(flatten)]
    result: IntervalResult,
    jitter_s: Vec<f64>,
    mean_jitter_s: Option<f64>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Evaluate {
            detected,
            annotated,
            fs,
            tolerance_ms,
            tolerance_samples,
            delay_samples,
        } => cmd_evaluate(
            &detected,
            &annotated,
            fs,
            tolerance_ms,
            tolerance_samples,
            delay_samples,
        )?,
        Commands::Benchmark {
            manifest,
            out,
            jobs,
        } => cmd_benchmark(&manifest, &out, jobs)?,
    }
    Ok(())
}

fn cmd_evaluate(
    detected: &Path,
    annotated: &Path,
    fs: f64,
    tolerance_ms: Option<f64>,
    tolerance_samples: Option<u64>,
    delay_samples: i64,
) -> Result<()> {
    let detected = text_io::read_events(detected)?;
    let annotated = text_io::read_events(annotated)?;
    let tolerance = match (tolerance_samples, tolerance_ms) {
        (Some(n), _) => Tolerance::Samples(n),
        (None, Some(ms)) => Tolerance::Seconds(ms / 1000.0),
        (None, None) => IntervalConfig::default().tolerance,
    };
    let cfg = IntervalConfig {
        tolerance,
        detector_delay: delay_samples,
    };
    let result = evaluate_with_config(&detected, &annotated, fs, &cfg)?;
    let output = EvaluateOutput {
        jitter_s: result.jitter_seconds(),
        mean_jitter_s: result.mean_jitter_seconds(),
        result,
    };
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

fn cmd_benchmark(manifest: &Path, out: &Path, jobs: usize) -> Result<()> {
    let spec = read_benchmark(manifest)?;
    let recordings = read_recordings(&spec.recordings)?;
    info!(
        "Benchmark {}: {} recording(s), fs = {} Hz",
        spec.name,
        recordings.len(),
        spec.fs
    );
    let sink = ResultSink::create(out)?;
    let summary = run_benchmark(&spec, &recordings, jobs, sink)?;
    for detector in &summary.detectors {
        if let Some(means) = detector.means {
            info!(
                "FINAL {}: J = {:?} sec, M = {} beats, X = {} beats",
                detector.detector, means.jitter, means.missed, means.extra
            );
        }
    }
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}
