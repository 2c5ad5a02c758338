pub mod aggregate;
pub mod interval;

pub use aggregate::{JmxRow, RunningAggregate, RunningMeans};
pub use interval::{
    evaluate, evaluate_with_config, IntervalConfig, IntervalError, IntervalResult,
    IntervalSummary, Match, Sequence, Tolerance,
};
