use crate::signal::{Events, SampleIndex};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Match window around each annotated beat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tolerance {
    /// Window in samples.
    Samples(u64),
    /// Window in seconds, rounded to the nearest sample for the recording's `fs`.
    Seconds(f64),
}

impl Tolerance {
    /// Window width in samples for sampling rate `fs`.
    pub fn to_samples(self, fs: f64) -> SampleIndex {
        match self {
            Tolerance::Samples(n) => SampleIndex::try_from(n).unwrap_or(SampleIndex::MAX),
            // `as` saturates on overflow
            Tolerance::Seconds(s) => (s * fs).round() as SampleIndex,
        }
    }
}

/// Configurable parameters for interval analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalConfig {
    /// Maximum |detected - annotated| distance for two events to be paired.
    pub tolerance: Tolerance,
    /// Mean detector latency in samples, subtracted from every detection before matching.
    pub detector_delay: SampleIndex,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            tolerance: Tolerance::Seconds(0.1),
            detector_delay: 0,
        }
    }
}

/// Which input sequence a validation error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sequence {
    Detected,
    Annotated,
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sequence::Detected => f.write_str("detected"),
            Sequence::Annotated => f.write_str("annotated"),
        }
    }
}

/// Input validation failures. Malformed input is never coerced into a result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntervalError {
    #[error("sampling rate must be positive and finite, got {0}")]
    InvalidSampleRate(f64),

    #[error("tolerance must be non-negative and finite, got {0} s")]
    InvalidTolerance(f64),

    #[error("{sequence} event {position} has negative sample index {value}")]
    NegativeIndex {
        sequence: Sequence,
        position: usize,
        value: SampleIndex,
    },

    #[error("{sequence} events are not ascending at position {position}: {current} follows {previous}")]
    Unsorted {
        sequence: Sequence,
        position: usize,
        previous: SampleIndex,
        current: SampleIndex,
    },

    #[error("detector delay {delay} moves detected event {position} ({value}) outside the recording")]
    DelayOutOfRange {
        delay: SampleIndex,
        position: usize,
        value: SampleIndex,
    },
}

/// One detected event paired with one annotated event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    /// Detected location after delay correction.
    pub detected: SampleIndex,
    pub annotated: SampleIndex,
    /// `detected - annotated`, in samples.
    pub jitter: SampleIndex,
}

/// Scalar summary of one recording. Ratios without a denominator are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalSummary {
    pub matched: usize,
    pub missed: usize,
    pub extra: usize,
    /// Mean signed jitter (samples).
    pub mean_jitter: Option<f64>,
    /// Sample standard deviation of the jitter (samples).
    pub jitter_sd: Option<f64>,
    /// matched / (matched + missed)
    pub sensitivity: Option<f64>,
    /// matched / (matched + extra)
    pub positive_predictivity: Option<f64>,
}

/// Per-recording interval analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalResult {
    pub fs: f64,
    /// Window actually used, in samples.
    pub window: SampleIndex,
    pub matches: Vec<Match>,
    /// Annotated locations without a detection.
    pub missed: Vec<SampleIndex>,
    /// Detected locations (delay corrected) without an annotation.
    pub extra: Vec<SampleIndex>,
    pub summary: IntervalSummary,
}

impl IntervalResult {
    /// Jitter of every match in samples, in chronological order.
    pub fn jitter(&self) -> Vec<SampleIndex> {
        self.matches.iter().map(|m| m.jitter).collect()
    }

    pub fn jitter_seconds(&self) -> Vec<f64> {
        self.matches
            .iter()
            .map(|m| m.jitter as f64 / self.fs)
            .collect()
    }

    pub fn mean_jitter_seconds(&self) -> Option<f64> {
        self.summary.mean_jitter.map(|j| j / self.fs)
    }
}

/// Match detections against annotations with the default window.
pub fn evaluate(
    detected: &Events,
    annotated: &Events,
    fs: f64,
) -> Result<IntervalResult, IntervalError> {
    evaluate_with_config(detected, annotated, fs, &IntervalConfig::default())
}

/// Match detections against annotations, classify the leftovers and summarize.
pub fn evaluate_with_config(
    detected: &Events,
    annotated: &Events,
    fs: f64,
    cfg: &IntervalConfig,
) -> Result<IntervalResult, IntervalError> {
    if !fs.is_finite() || fs <= 0.0 {
        return Err(IntervalError::InvalidSampleRate(fs));
    }
    if let Tolerance::Seconds(s) = cfg.tolerance {
        if !s.is_finite() || s < 0.0 {
            return Err(IntervalError::InvalidTolerance(s));
        }
    }
    validate(&detected.indices, Sequence::Detected)?;
    validate(&annotated.indices, Sequence::Annotated)?;
    let detected = apply_delay(&detected.indices, cfg.detector_delay)?;

    let window = cfg.tolerance.to_samples(fs);
    let (matches, missed, extra) = align(&detected, &annotated.indices, window);
    let summary = summarize(&matches, missed.len(), extra.len());

    Ok(IntervalResult {
        fs,
        window,
        matches,
        missed,
        extra,
        summary,
    })
}

fn validate(indices: &[SampleIndex], sequence: Sequence) -> Result<(), IntervalError> {
    for (position, &value) in indices.iter().enumerate() {
        if value < 0 {
            return Err(IntervalError::NegativeIndex {
                sequence,
                position,
                value,
            });
        }
        if position > 0 && value < indices[position - 1] {
            return Err(IntervalError::Unsorted {
                sequence,
                position,
                previous: indices[position - 1],
                current: value,
            });
        }
    }
    Ok(())
}

fn apply_delay(
    indices: &[SampleIndex],
    delay: SampleIndex,
) -> Result<Vec<SampleIndex>, IntervalError> {
    indices
        .iter()
        .enumerate()
        .map(|(position, &value)| match value.checked_sub(delay) {
            Some(shifted) if shifted >= 0 => Ok(shifted),
            _ => Err(IntervalError::DelayOutOfRange {
                delay,
                position,
                value,
            }),
        })
        .collect()
}

/// Two-cursor greedy alignment. Both inputs must be ascending and non-negative.
///
/// The earliest unmatched candidate on each side is always consumed first, so
/// the pairing is monotonic and no event is used twice. When a detection falls
/// inside the windows of two neighbouring annotations it pairs with the
/// earlier one; the later annotation then competes for the next detection.
fn align(
    detected: &[SampleIndex],
    annotated: &[SampleIndex],
    window: SampleIndex,
) -> (Vec<Match>, Vec<SampleIndex>, Vec<SampleIndex>) {
    let mut matches = Vec::with_capacity(detected.len().min(annotated.len()));
    let mut missed = Vec::new();
    let mut extra = Vec::new();
    let (mut di, mut ai) = (0usize, 0usize);

    while di < detected.len() && ai < annotated.len() {
        let d = detected[di];
        let a = annotated[ai];
        // both non-negative, cannot overflow
        let jitter = d - a;
        if jitter.abs() <= window {
            matches.push(Match {
                detected: d,
                annotated: a,
                jitter,
            });
            di += 1;
            ai += 1;
        } else if jitter < 0 {
            extra.push(d);
            di += 1;
        } else {
            missed.push(a);
            ai += 1;
        }
    }
    extra.extend_from_slice(&detected[di..]);
    missed.extend_from_slice(&annotated[ai..]);

    (matches, missed, extra)
}

fn summarize(matches: &[Match], missed: usize, extra: usize) -> IntervalSummary {
    let matched = matches.len();
    let n = matched as f64;
    let mean_jitter = if matched > 0 {
        Some(matches.iter().map(|m| m.jitter as f64).sum::<f64>() / n)
    } else {
        None
    };
    let jitter_sd = match mean_jitter {
        Some(mean) if matched > 1 => {
            let ss = matches
                .iter()
                .map(|m| (m.jitter as f64 - mean).powi(2))
                .sum::<f64>();
            Some((ss / (n - 1.0)).sqrt())
        }
        _ => None,
    };
    IntervalSummary {
        matched,
        missed,
        extra,
        mean_jitter,
        jitter_sd,
        sensitivity: ratio(matched, matched + missed),
        positive_predictivity: ratio(matched, matched + extra),
    }
}

fn ratio(num: usize, den: usize) -> Option<f64> {
    if den == 0 {
        None
    } else {
        Some(num as f64 / den as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(indices: &[SampleIndex]) -> Events {
        Events::from_indices(indices.to_vec())
    }

    fn cfg_samples(n: u64) -> IntervalConfig {
        IntervalConfig {
            tolerance: Tolerance::Samples(n),
            ..IntervalConfig::default()
        }
    }

    #[test]
    fn classifies_missed_beat_between_matches() {
        let result =
            evaluate_with_config(&ev(&[102, 405]), &ev(&[100, 250, 400]), 250.0, &cfg_samples(10))
                .unwrap();
        assert_eq!(result.jitter(), vec![2, 5]);
        assert_eq!(result.matches[0].annotated, 100);
        assert_eq!(result.matches[1].annotated, 400);
        assert_eq!(result.missed, vec![250]);
        assert!(result.extra.is_empty());
        let s = result.summary.sensitivity.unwrap();
        assert!((s - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(result.summary.positive_predictivity, Some(1.0));
    }

    #[test]
    fn classifies_trailing_extra_detection() {
        let result =
            evaluate_with_config(&ev(&[100, 300]), &ev(&[100]), 250.0, &cfg_samples(10)).unwrap();
        assert_eq!(result.jitter(), vec![0]);
        assert_eq!(result.extra, vec![300]);
        assert!(result.missed.is_empty());
        assert_eq!(result.summary.sensitivity, Some(1.0));
        assert_eq!(result.summary.positive_predictivity, Some(0.5));
    }

    #[test]
    fn identical_sequences_match_exactly() {
        let beats = ev(&[50, 260, 470, 690, 900]);
        let result = evaluate(&beats, &beats, 250.0).unwrap();
        assert!(result.jitter().iter().all(|&j| j == 0));
        assert_eq!(result.summary.missed, 0);
        assert_eq!(result.summary.extra, 0);
        assert_eq!(result.summary.sensitivity, Some(1.0));
        assert_eq!(result.summary.mean_jitter, Some(0.0));
        assert_eq!(result.summary.jitter_sd, Some(0.0));
    }

    #[test]
    fn empty_detections_miss_everything() {
        let result = evaluate(&ev(&[]), &ev(&[10, 200, 400]), 250.0).unwrap();
        assert_eq!(result.missed, vec![10, 200, 400]);
        assert!(result.matches.is_empty());
        assert!(result.extra.is_empty());
        assert_eq!(result.summary.sensitivity, Some(0.0));
        assert_eq!(result.summary.positive_predictivity, None);
        assert_eq!(result.summary.mean_jitter, None);
    }

    #[test]
    fn empty_annotations_leave_sensitivity_undefined() {
        let result = evaluate(&ev(&[10, 200]), &ev(&[]), 250.0).unwrap();
        assert_eq!(result.extra, vec![10, 200]);
        assert_eq!(result.summary.matched, 0);
        assert_eq!(result.summary.missed, 0);
        assert_eq!(result.summary.sensitivity, None);
        assert_eq!(result.summary.positive_predictivity, Some(0.0));
    }

    #[test]
    fn both_empty_is_well_defined() {
        let result = evaluate(&ev(&[]), &ev(&[]), 250.0).unwrap();
        assert_eq!(result.summary.sensitivity, None);
        assert_eq!(result.summary.positive_predictivity, None);
        assert!(result.jitter_seconds().is_empty());
    }

    #[test]
    fn leading_extra_and_trailing_missed() {
        let result =
            evaluate_with_config(&ev(&[5, 100]), &ev(&[98, 300]), 250.0, &cfg_samples(10))
                .unwrap();
        assert_eq!(result.extra, vec![5]);
        assert_eq!(result.jitter(), vec![2]);
        assert_eq!(result.missed, vec![300]);
    }

    #[test]
    fn ambiguous_detection_pairs_with_earliest_annotation() {
        // 110 is within 10 samples of both 100 and 120
        let result =
            evaluate_with_config(&ev(&[110]), &ev(&[100, 120]), 250.0, &cfg_samples(10)).unwrap();
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].annotated, 100);
        assert_eq!(result.missed, vec![120]);
    }

    #[test]
    fn ambiguous_annotation_pairs_with_earliest_detection() {
        let result =
            evaluate_with_config(&ev(&[95, 104]), &ev(&[100]), 250.0, &cfg_samples(10)).unwrap();
        assert_eq!(result.jitter(), vec![-5]);
        assert_eq!(result.extra, vec![104]);
    }

    #[test]
    fn duplicate_events_are_matched_once() {
        let result =
            evaluate_with_config(&ev(&[100, 100]), &ev(&[100, 100, 100]), 250.0, &cfg_samples(3))
                .unwrap();
        assert_eq!(result.summary.matched, 2);
        assert_eq!(result.missed, vec![100]);
        assert!(result.extra.is_empty());
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let result =
            evaluate_with_config(&ev(&[110, 289]), &ev(&[100, 300]), 250.0, &cfg_samples(10))
                .unwrap();
        assert_eq!(result.jitter(), vec![10]);
        assert_eq!(result.extra, vec![289]);
        assert_eq!(result.missed, vec![300]);
    }

    #[test]
    fn seconds_tolerance_rounds_to_samples() {
        assert_eq!(Tolerance::Seconds(0.04).to_samples(250.0), 10);
        assert_eq!(Tolerance::Seconds(0.1).to_samples(360.0), 36);
        assert_eq!(Tolerance::Samples(7).to_samples(1000.0), 7);
        assert_eq!(Tolerance::Samples(u64::MAX).to_samples(1.0), SampleIndex::MAX);
    }

    #[test]
    fn default_window_is_a_tenth_of_a_second() {
        let result = evaluate(&ev(&[125]), &ev(&[100]), 250.0).unwrap();
        assert_eq!(result.window, 25);
        assert_eq!(result.jitter(), vec![25]);
        assert_eq!(result.jitter_seconds(), vec![0.1]);
    }

    #[test]
    fn detector_delay_centres_detections() {
        let cfg = IntervalConfig {
            tolerance: Tolerance::Samples(5),
            detector_delay: 30,
        };
        let result = evaluate_with_config(&ev(&[132, 430]), &ev(&[100, 400]), 250.0, &cfg).unwrap();
        assert_eq!(result.jitter(), vec![2, 0]);
        assert_eq!(result.matches[0].detected, 102);
    }

    #[test]
    fn delay_before_recording_start_is_rejected() {
        let cfg = IntervalConfig {
            detector_delay: 20,
            ..IntervalConfig::default()
        };
        let err = evaluate_with_config(&ev(&[10]), &ev(&[0]), 250.0, &cfg).unwrap_err();
        assert_eq!(
            err,
            IntervalError::DelayOutOfRange {
                delay: 20,
                position: 0,
                value: 10
            }
        );
    }

    #[test]
    fn rejects_bad_sample_rate() {
        for fs in [0.0, -250.0, f64::NAN, f64::INFINITY] {
            let err = evaluate(&ev(&[1]), &ev(&[1]), fs).unwrap_err();
            assert!(matches!(err, IntervalError::InvalidSampleRate(_)));
        }
    }

    #[test]
    fn rejects_bad_tolerance() {
        let cfg = IntervalConfig {
            tolerance: Tolerance::Seconds(-0.1),
            ..IntervalConfig::default()
        };
        let err = evaluate_with_config(&ev(&[1]), &ev(&[1]), 250.0, &cfg).unwrap_err();
        assert_eq!(err, IntervalError::InvalidTolerance(-0.1));
    }

    #[test]
    fn rejects_unsorted_annotations() {
        let err = evaluate(&ev(&[1, 2]), &ev(&[100, 50]), 250.0).unwrap_err();
        assert_eq!(
            err,
            IntervalError::Unsorted {
                sequence: Sequence::Annotated,
                position: 1,
                previous: 100,
                current: 50
            }
        );
        assert_eq!(
            err.to_string(),
            "annotated events are not ascending at position 1: 50 follows 100"
        );
    }

    #[test]
    fn rejects_negative_detections() {
        let err = evaluate(&ev(&[-3, 2]), &ev(&[1]), 250.0).unwrap_err();
        assert_eq!(
            err,
            IntervalError::NegativeIndex {
                sequence: Sequence::Detected,
                position: 0,
                value: -3
            }
        );
    }

    #[test]
    fn repeated_evaluation_is_identical() {
        let det = ev(&[12, 260, 480, 700]);
        let ann = ev(&[10, 250, 500, 720, 950]);
        let first = evaluate(&det, &ann, 250.0).unwrap();
        let second = evaluate(&det, &ann, 250.0).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn jitter_statistics_in_seconds() {
        let result =
            evaluate_with_config(&ev(&[102, 405]), &ev(&[100, 400]), 250.0, &cfg_samples(10))
                .unwrap();
        assert_eq!(result.summary.mean_jitter, Some(3.5));
        let sd = result.summary.jitter_sd.unwrap();
        assert!((sd - 4.5f64.sqrt()).abs() < 1e-12);
        assert_eq!(result.mean_jitter_seconds(), Some(3.5 / 250.0));
    }
}
