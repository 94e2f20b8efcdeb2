//! Output scoring.

/// Measures how far a candidate output is from the reference output.
///
/// 0.0 means identical; larger is worse. Implementations decide their own
/// scale; the tolerance in `[eval]` is expressed on that scale.
pub trait Scorer: Send + Sync {
    /// Scorer name, for logs.
    fn name(&self) -> &str;

    /// Deviation of `candidate` from `reference`.
    fn score(&self, reference: &[f64], candidate: &[f64]) -> f64;
}

/// Mean absolute element error, each element clamped to 1.0.
///
/// Elements present in only one of the two outputs count as 1.0, so a
/// truncated output is penalized rather than ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanClampedError;

impl Scorer for MeanClampedError {
    fn name(&self) -> &str {
        "mean_clamped_error"
    }

    fn score(&self, reference: &[f64], candidate: &[f64]) -> f64 {
        let longest = reference.len().max(candidate.len());
        if longest == 0 {
            return 0.0;
        }
        let paired: f64 = reference
            .iter()
            .zip(candidate)
            .map(|(a, b)| {
                let diff = (a - b).abs();
                // NaN compares false, so it lands on the clamp.
                if diff <= 1.0 {
                    diff
                } else {
                    1.0
                }
            })
            .sum();
        let missing = (longest - reference.len().min(candidate.len())) as f64;
        (paired + missing) / longest as f64
    }
}

/// Scores every successful replicate against `reference` and averages.
/// `None` when no replicate produced output.
pub fn replicate_deviation(
    scorer: &dyn Scorer,
    reference: &[f64],
    outputs: &[Option<Vec<f64>>],
) -> Option<f64> {
    crate::types::evaluation::mean(
        outputs
            .iter()
            .flatten()
            .map(|out| scorer.score(reference, out)),
    )
}
