//! Turning replicate outcomes into an evaluation result.

use super::score::{replicate_deviation, Scorer};
use crate::types::evaluation::{EvaluationResult, RunOutcome, Status};
use crate::types::job::Configuration;

/// Status for a deviation under `tolerance`. The boundary is good.
pub fn classify(deviation: f64, tolerance: f64) -> Status {
    if deviation <= tolerance {
        Status::Good
    } else {
        Status::Bad
    }
}

/// What an approximate configuration is compared against.
#[derive(Debug, Clone, Copy)]
pub struct Baseline<'a> {
    /// Reference output.
    pub output: &'a [f64],
    /// Mean baseline time, when known.
    pub time: Option<f64>,
}

/// Assembles the result of one configuration from its replicates.
///
/// Any failed replicate makes the configuration an error; the deviation of
/// the replicates that did succeed is still recorded.
pub fn assess(
    config: Configuration,
    replicates: Vec<RunOutcome>,
    baseline: Baseline<'_>,
    scorer: &dyn Scorer,
    tolerance: f64,
) -> EvaluationResult {
    let error = replicates
        .iter()
        .enumerate()
        .find(|(_, r)| !r.is_success())
        .map(|(i, r)| {
            format!(
                "replicate {} failed: {}",
                i,
                r.failure.as_deref().unwrap_or("no output")
            )
        });

    let (outputs, durations): (Vec<_>, Vec<_>) =
        replicates.into_iter().map(|r| (r.output, r.duration)).unzip();

    let deviation = replicate_deviation(scorer, baseline.output, &outputs);
    let status = match (&error, deviation) {
        (Some(_), _) | (None, None) => Status::Error,
        (None, Some(dev)) => classify(dev, tolerance),
    };

    let mut result = EvaluationResult {
        config,
        outputs,
        durations,
        status,
        deviation,
        speedup: None,
        error: error.or_else(|| {
            deviation
                .is_none()
                .then(|| "no replicates were run".to_string())
        }),
    };
    result.speedup = speedup(baseline.time, result.mean_duration());
    result
}

/// Baseline time over configuration time.
pub fn speedup(base: Option<f64>, time: Option<f64>) -> Option<f64> {
    match (base, time) {
        (Some(base), Some(time)) if time > 0.0 => Some(base / time),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::score::MeanClampedError;

    fn reps(values: &[f64]) -> Vec<RunOutcome> {
        values
            .iter()
            .map(|v| RunOutcome::success(vec![*v], 1.0))
            .collect()
    }

    fn config() -> Configuration {
        Configuration::from_knobs([("perforate", 2)])
    }

    const BASE: Baseline<'static> = Baseline {
        output: &[1.0],
        time: Some(2.0),
    };

    #[test]
    fn test_small_deviation_is_good() {
        let result = assess(config(), reps(&[1.02, 0.98, 1.01]), BASE, &MeanClampedError, 0.05);
        assert_eq!(result.status, Status::Good);
        assert_eq!(result.speedup, Some(2.0));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_large_deviation_is_bad() {
        let result = assess(config(), reps(&[1.2, 0.8, 1.1]), BASE, &MeanClampedError, 0.05);
        assert_eq!(result.status, Status::Bad);
    }

    #[test]
    fn test_boundary_is_good() {
        assert_eq!(classify(0.05, 0.05), Status::Good);
        assert_eq!(classify(0.0500001, 0.05), Status::Bad);
        assert_eq!(classify(0.0, 0.0), Status::Good);
    }

    #[test]
    fn test_failed_replicate_keeps_the_others() {
        let replicates = vec![
            RunOutcome::success(vec![1.0], 1.0),
            RunOutcome::failed("exit status 139"),
            RunOutcome::success(vec![1.0], 3.0),
        ];
        let result = assess(config(), replicates, BASE, &MeanClampedError, 0.05);

        assert_eq!(result.status, Status::Error);
        assert_eq!(result.durations, vec![Some(1.0), None, Some(3.0)]);
        assert_eq!(result.deviation, Some(0.0));
        assert!(result.error.unwrap().contains("replicate 1"));
    }

    #[test]
    fn test_speedup_needs_both_times() {
        assert_eq!(speedup(Some(4.0), Some(2.0)), Some(2.0));
        assert_eq!(speedup(None, Some(2.0)), None);
        assert_eq!(speedup(Some(4.0), Some(0.0)), None);
    }
}
