use anyhow::{anyhow, bail, Context, Result};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use jmx_lib::{
    io::text as text_io,
    metrics::{
        aggregate::{JmxRow, RunningAggregate, RunningMeans},
        interval::{evaluate_with_config, IntervalConfig, IntervalResult, Tolerance},
    },
    signal::SampleIndex,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

/// Benchmark manifest (TOML).
#[derive(Debug, Deserialize, Clone)]
pub struct BenchmarkSpec {
    pub name: String,
    /// Sampling rate shared by every recording (Hz).
    pub fs: f64,
    #[serde(default)]
    pub tolerance_ms: Option<f64>,
    #[serde(default)]
    pub tolerance_samples: Option<u64>,
    /// Recording table, relative to the manifest.
    pub recordings: PathBuf,
    /// Mean latency per detector in samples, subtracted before matching.
    #[serde(default)]
    pub detector_delay: BTreeMap<String, SampleIndex>,
}

impl BenchmarkSpec {
    pub fn tolerance(&self) -> Result<Tolerance> {
        match (self.tolerance_ms, self.tolerance_samples) {
            (Some(_), Some(_)) => bail!("set either tolerance_ms or tolerance_samples, not both"),
            (Some(ms), None) => Ok(Tolerance::Seconds(ms / 1000.0)),
            (None, Some(n)) => Ok(Tolerance::Samples(n)),
            (None, None) => Ok(IntervalConfig::default().tolerance),
        }
    }

    /// Matching parameters for one recording; a per-recording delay wins over the detector's.
    pub fn interval_config(&self, recording: &RecordingSpec) -> Result<IntervalConfig> {
        let detector_delay = recording
            .delay_samples
            .or_else(|| self.detector_delay.get(&recording.detector).copied())
            .unwrap_or(0);
        Ok(IntervalConfig {
            tolerance: self.tolerance()?,
            detector_delay,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RecordingRow {
    pub subject: String,
    pub detector: String,
    pub detected: PathBuf,
    #[serde(default)]
    pub annotated: Option<PathBuf>,
    #[serde(default)]
    pub delay_samples: Option<SampleIndex>,
}

/// One recording passed through one detector, with resolved paths.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordingSpec {
    pub subject: String,
    pub detector: String,
    pub detected: PathBuf,
    /// `None` when no ground truth exists; such recordings are skipped.
    pub annotated: Option<PathBuf>,
    pub delay_samples: Option<SampleIndex>,
}

impl RecordingSpec {
    fn from_row(row: RecordingRow, base: &Path) -> Self {
        Self {
            subject: row.subject,
            detector: row.detector,
            detected: resolve(base, &row.detected),
            annotated: row
                .annotated
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| resolve(base, &p)),
            delay_samples: row.delay_samples,
        }
    }

    fn label(&self) -> String {
        format!("{} / {}", self.detector, self.subject)
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn read_benchmark(path: &Path) -> Result<BenchmarkSpec> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    let mut spec: BenchmarkSpec = toml::from_str(&contents)
        .with_context(|| format!("parsing manifest {}", path.display()))?;
    spec.recordings = resolve(&parent_dir(path), &spec.recordings);
    spec.tolerance()
        .with_context(|| format!("invalid tolerance in {}", path.display()))?;
    Ok(spec)
}

pub fn read_recordings(path: &Path) -> Result<Vec<RecordingSpec>> {
    let base = parent_dir(path);
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .from_path(path)
        .with_context(|| format!("opening recordings {}", path.display()))?;
    let mut recordings = Vec::new();
    for (idx, row) in reader.deserialize::<RecordingRow>().enumerate() {
        let row = row.with_context(|| format!("parsing recording row {}", idx + 1))?;
        recordings.push(RecordingSpec::from_row(row, &base));
    }
    Ok(recordings)
}

/// Load one recording's event files and run interval analysis.
/// Returns `Ok(None)` when the recording has no annotations.
pub fn evaluate_recording(
    spec: &BenchmarkSpec,
    recording: &RecordingSpec,
) -> Result<Option<IntervalResult>> {
    let Some(annotated_path) = recording.annotated.as_deref() else {
        return Ok(None);
    };
    let cfg = spec.interval_config(recording)?;
    let detected = text_io::read_events(&recording.detected)?;
    let annotated = text_io::read_events(annotated_path)?;
    let result = evaluate_with_config(&detected, &annotated, spec.fs, &cfg)?;
    Ok(Some(result))
}

/// Evaluate every recording, spreading the work over `jobs` threads.
/// Results come back in table order.
fn evaluate_all(
    spec: &BenchmarkSpec,
    recordings: &[RecordingSpec],
    jobs: usize,
) -> Result<Vec<Result<Option<IntervalResult>>>> {
    if recordings.is_empty() {
        return Ok(Vec::new());
    }
    let chunk = recordings.len().div_ceil(jobs.max(1));
    thread::scope(|scope| {
        let handles: Vec<_> = recordings
            .chunks(chunk)
            .map(|part| {
                scope.spawn(move || {
                    part.iter()
                        .map(|rec| evaluate_recording(spec, rec))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut out = Vec::with_capacity(recordings.len());
        for handle in handles {
            let part = handle
                .join()
                .map_err(|_| anyhow!("interval analysis worker panicked"))?;
            out.extend(part);
        }
        Ok(out)
    })
}

/// One line of `norm_calc.tsv`: a recording's row and the detector's running means.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NormRow {
    pub detector: String,
    pub subject: String,
    pub jitter: Option<f64>,
    pub missed: usize,
    pub extra: usize,
    pub sensitivity: Option<f64>,
    pub norm_jitter: Option<f64>,
    pub norm_missed: f64,
    pub norm_extra: f64,
    pub norm_sensitivity: Option<f64>,
}

impl NormRow {
    fn new(recording: &RecordingSpec, row: &JmxRow, means: &RunningMeans) -> Self {
        Self {
            detector: recording.detector.clone(),
            subject: recording.subject.clone(),
            jitter: row.jitter,
            missed: row.missed,
            extra: row.extra,
            sensitivity: row.sensitivity,
            norm_jitter: means.jitter,
            norm_missed: means.missed,
            norm_extra: means.extra,
            norm_sensitivity: means.sensitivity,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DetectorSummary {
    pub detector: String,
    pub means: Option<RunningMeans>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BenchmarkSummary {
    pub name: String,
    pub analysed: usize,
    pub skipped: usize,
    pub detectors: Vec<DetectorSummary>,
}

/// Writes per-recording event lists, the running-mean table and the final summary.
pub struct ResultSink {
    out_dir: PathBuf,
    norm: csv::Writer<fs::File>,
}

impl ResultSink {
    pub const NORM_FILE: &'static str = "norm_calc.tsv";
    pub const SUMMARY_FILE: &'static str = "summary.json";

    pub fn create(out_dir: &Path) -> Result<Self> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("creating output dir {}", out_dir.display()))?;
        let norm_path = out_dir.join(Self::NORM_FILE);
        let norm = WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(&norm_path)
            .with_context(|| format!("creating {}", norm_path.display()))?;
        Ok(Self {
            out_dir: out_dir.to_path_buf(),
            norm,
        })
    }

    /// Paths of the jitter, missed and extra files for a recording.
    pub fn recording_paths(&self, recording: &RecordingSpec) -> [PathBuf; 3] {
        let dir = self.out_dir.join(file_stem(&recording.detector));
        let subject = file_stem(&recording.subject);
        ["jitter", "missed", "extra"].map(|kind| dir.join(format!("{subject}_{kind}.csv")))
    }

    pub fn write_recording(&self, recording: &RecordingSpec, result: &IntervalResult) -> Result<()> {
        let [jitter, missed, extra] = self.recording_paths(recording);
        if let Some(dir) = jitter.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating output dir {}", dir.display()))?;
        }
        write_column(&jitter, &result.jitter_seconds())?;
        write_column(&missed, &result.missed)?;
        write_column(&extra, &result.extra)?;
        Ok(())
    }

    pub fn write_norm_row(&mut self, row: &NormRow) -> Result<()> {
        self.norm.serialize(row)?;
        self.norm.flush()?;
        Ok(())
    }

    pub fn finish(mut self, summary: &BenchmarkSummary) -> Result<()> {
        self.norm.flush()?;
        let path = self.out_dir.join(Self::SUMMARY_FILE);
        let file = fs::File::create(&path)
            .with_context(|| format!("creating {}", path.display()))?;
        serde_json::to_writer_pretty(file, summary)?;
        Ok(())
    }
}

fn file_stem(name: &str) -> String {
    name.replace(['/', '\\', ' '], "-")
}

fn write_column<T: ToString>(path: &Path, values: &[T]) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for value in values {
        writer.write_record([value.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_norm_tsv(path: &Path) -> Result<Vec<NormRow>> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .trim(Trim::All)
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut rows = Vec::new();
    for row in reader.deserialize::<NormRow>() {
        rows.push(row.with_context(|| format!("parsing rows in {}", path.display()))?);
    }
    Ok(rows)
}

fn fmt_opt(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.5}"))
        .unwrap_or_else(|| "n/a".into())
}

/// Run every recording through interval analysis and fold the results into
/// one running aggregate per detector, in table order.
pub fn run_benchmark(
    spec: &BenchmarkSpec,
    recordings: &[RecordingSpec],
    jobs: usize,
    mut sink: ResultSink,
) -> Result<BenchmarkSummary> {
    let outcomes = evaluate_all(spec, recordings, jobs)?;
    let mut aggregates: Vec<(String, RunningAggregate)> = Vec::new();
    let mut skipped = 0;

    for (recording, outcome) in recordings.iter().zip(outcomes) {
        let result = match outcome.with_context(|| format!("analysing {}", recording.label()))? {
            Some(result) => result,
            None => {
                warn!("{}: no annotations, skipped", recording.label());
                skipped += 1;
                continue;
            }
        };
        sink.write_recording(recording, &result)?;

        let pos = match aggregates.iter().position(|(d, _)| d == &recording.detector) {
            Some(pos) => pos,
            None => {
                aggregates.push((recording.detector.clone(), RunningAggregate::new()));
                aggregates.len() - 1
            }
        };
        let row = JmxRow::from_result(&result);
        let means = aggregates[pos].1.append(row);
        info!(
            "{}: J = {} sec, M = {:.3} beats, X = {:.3} beats, S = {}",
            recording.label(),
            fmt_opt(means.jitter),
            means.missed,
            means.extra,
            fmt_opt(means.sensitivity)
        );
        sink.write_norm_row(&NormRow::new(recording, &row, &means))?;
    }

    let summary = BenchmarkSummary {
        name: spec.name.clone(),
        analysed: aggregates.iter().map(|(_, agg)| agg.len()).sum(),
        skipped,
        detectors: aggregates
            .iter()
            .map(|(detector, agg)| DetectorSummary {
                detector: detector.clone(),
                means: agg.means(),
            })
            .collect(),
    };
    sink.finish(&summary)?;
    Ok(summary)
}
