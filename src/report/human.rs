//! Plain-text renderings printed by the commands.

use crate::types::evaluation::{EvaluationResult, Status};

/// Summary of an evaluation: the reference output, then one line per
/// configuration. Only `good` configurations are listed unless `verbose`.
pub fn dump_results(results: &[EvaluationResult], reference: &[f64], verbose: bool) -> Vec<String> {
    let mut lines = vec![format!("precise output: {}", format_output(reference))];

    let shown: Vec<&EvaluationResult> = results
        .iter()
        .filter(|r| verbose || r.status == Status::Good)
        .collect();
    if shown.is_empty() {
        lines.push("no good configurations found".to_string());
        return lines;
    }

    for result in shown {
        let mut line = format!("{}: {}", result.config, result.status);
        if let Some(speedup) = result.speedup {
            line.push_str(&format!(", speedup {speedup:.2}x"));
        }
        if let Some(deviation) = result.deviation {
            line.push_str(&format!(", error {deviation:.4}"));
        }
        if verbose {
            if let Some(error) = &result.error {
                line.push_str(&format!(" ({error})"));
            }
        }
        lines.push(line);
    }
    lines
}

/// Output of the `precise` command.
pub fn dump_precise(reference: &[f64], durations: &[Option<f64>]) -> Vec<String> {
    let mut lines = vec![format!("output: {}", format_output(reference)), "time:".to_string()];
    lines.extend(durations.iter().map(|d| format!("  {}", format_time(*d))));
    lines
}

/// Output of the `approx` command for one configuration, followed by a
/// blank line.
pub fn dump_approx(result: &EvaluationResult) -> Vec<String> {
    let mut lines = vec![result.config.to_string(), "output:".to_string()];
    lines.extend(result.outputs.iter().map(|o| match o {
        Some(values) => format!("  {}", format_output(values)),
        None => "  (error)".to_string(),
    }));
    lines.push("time:".to_string());
    lines.extend(result.durations.iter().map(|d| format!("  {}", format_time(*d))));
    if result.status != Status::Good {
        lines.push(result.status.to_string());
        if let Some(error) = &result.error {
            lines.push(format!("  {error}"));
        }
    }
    lines.push(String::new());
    lines
}

fn format_output(values: &[f64]) -> String {
    format!("{values:?}")
}

fn format_time(duration: Option<f64>) -> String {
    match duration {
        Some(t) => format!("{t:.2}"),
        None => "(error)".to_string(),
    }
}
