//! Run comparison and scoring.
//!
//! Diffing is a pure signed comparison of two runs' statistics. Scoring is
//! gated: a run that failed to advance or tripped a high-severity anomaly
//! scores zero regardless of its soft metrics.

use indexmap::IndexMap;

use crate::run::RunArtifact;

/// Deterministic comparison of two runs (candidate minus baseline).
#[derive(Debug, Clone, PartialEq)]
pub struct RunDiff {
    pub baseline_run_id: String,
    pub candidate_run_id: String,
    /// Percentage points.
    pub coverage_delta: f64,
    pub bytes_parsed_delta: i64,
    pub record_count_delta: i64,
    pub error_delta: i64,
    pub anomaly_delta: i64,
    pub high_severity_delta: i64,
    /// Coverage did not regress, errors did not grow, and high-severity
    /// anomalies did not increase.
    pub is_improvement: bool,
    pub summary: String,
}

/// Compare a candidate run against a baseline.
pub fn diff_runs(baseline: &RunArtifact, candidate: &RunArtifact) -> RunDiff {
    let a = &baseline.stats;
    let b = &candidate.stats;

    let coverage_delta = b.coverage_percentage - a.coverage_percentage;
    let bytes_parsed_delta = b.total_bytes_parsed as i64 - a.total_bytes_parsed as i64;
    let record_count_delta = b.record_count as i64 - a.record_count as i64;
    let error_delta = b.error_count as i64 - a.error_count as i64;
    let anomaly_delta = b.anomaly_count as i64 - a.anomaly_count as i64;
    let high_severity_delta =
        b.high_severity_anomalies as i64 - a.high_severity_anomalies as i64;
    let is_improvement = coverage_delta >= 0.0 && error_delta <= 0 && high_severity_delta <= 0;

    let mut parts = Vec::new();
    if coverage_delta > 0.0 {
        parts.push(format!("coverage up {coverage_delta:.1} points"));
    } else if coverage_delta < 0.0 {
        parts.push(format!("coverage down {:.1} points", coverage_delta.abs()));
    } else {
        parts.push("coverage unchanged".to_string());
    }
    if error_delta < 0 {
        parts.push(format!("fixed {} error(s)", -error_delta));
    } else if error_delta > 0 {
        parts.push(format!("introduced {error_delta} error(s)"));
    }
    if high_severity_delta != 0 {
        parts.push(format!("high-severity anomalies {high_severity_delta:+}"));
    }
    if record_count_delta != 0 {
        parts.push(format!("records {record_count_delta:+}"));
    }

    RunDiff {
        baseline_run_id: baseline.run_id.clone(),
        candidate_run_id: candidate.run_id.clone(),
        coverage_delta,
        bytes_parsed_delta,
        record_count_delta,
        error_delta,
        anomaly_delta,
        high_severity_delta,
        is_improvement,
        summary: parts.join("; "),
    }
}

/// Bounded 0-100 score with hard gates and soft metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    /// In `[0, 100]`; zero when any hard gate fails.
    pub total_score: f64,
    pub passed_hard_gates: bool,
    /// Names of failed hard gates, in check order.
    pub failed_gates: Vec<String>,
    /// Coverage contribution, `0..=70`.
    pub coverage_score: f64,
    /// Quality contribution, `0..=30`.
    pub quality_score: f64,
    pub soft_metrics: IndexMap<String, f64>,
    /// Reserved for extension; empty in the default weighting.
    pub penalties: IndexMap<String, f64>,
    pub summary: String,
}

/// Score a run. With a baseline the breakdown also reports coverage and
/// error deltas, but the total derives from the candidate alone.
pub fn score_run(run: &RunArtifact, baseline: Option<&RunArtifact>) -> ScoreBreakdown {
    let stats = &run.stats;

    let mut failed_gates = Vec::new();
    if !(stats.parse_stopped_at > 0 || stats.record_count > 0) {
        failed_gates.push("parse_advanced".to_string());
    }
    if stats.high_severity_anomalies != 0 {
        failed_gates.push("no_safety_violations".to_string());
    }
    if !failed_gates.is_empty() {
        return ScoreBreakdown {
            total_score: 0.0,
            passed_hard_gates: false,
            summary: format!("failed hard gates: {}", failed_gates.join(", ")),
            failed_gates,
            coverage_score: 0.0,
            quality_score: 0.0,
            soft_metrics: IndexMap::new(),
            penalties: IndexMap::new(),
        };
    }

    let coverage_score = stats.coverage_percentage * 0.7;
    let quality_score =
        (30.0 - 3.0 * stats.error_count as f64 - stats.anomaly_count as f64).max(0.0);
    let total_score = round1(coverage_score + quality_score).clamp(0.0, 100.0);

    let mut soft_metrics = IndexMap::new();
    soft_metrics.insert("coverage".to_string(), coverage_score);
    soft_metrics.insert("quality".to_string(), quality_score);

    let mut parts = vec![
        format!("coverage {:.1}%", stats.coverage_percentage),
        format!("quality {quality_score:.1}/30"),
    ];
    if let Some(baseline) = baseline {
        let coverage_delta = stats.coverage_percentage - baseline.stats.coverage_percentage;
        let error_delta = stats.error_count as i64 - baseline.stats.error_count as i64;
        soft_metrics.insert("coverage_delta".to_string(), coverage_delta);
        soft_metrics.insert("error_delta".to_string(), error_delta as f64);
        parts.push(format!("{coverage_delta:+.1} coverage vs baseline"));
    }
    parts.push(format!("score {total_score:.1}"));

    ScoreBreakdown {
        total_score,
        passed_hard_gates: true,
        failed_gates: Vec::new(),
        coverage_score,
        quality_score,
        soft_metrics,
        penalties: IndexMap::new(),
        summary: parts.join("; "),
    }
}

/// Score and rank runs: best first, ties broken by coverage, then fewer
/// errors, then fewer anomalies, then earlier creation.
pub fn rank_runs<'a>(runs: &'a [RunArtifact]) -> Vec<(&'a RunArtifact, ScoreBreakdown)> {
    let mut scored: Vec<(&RunArtifact, ScoreBreakdown)> =
        runs.iter().map(|run| (run, score_run(run, None))).collect();
    scored.sort_by(|(a, sa), (b, sb)| {
        sb.total_score
            .total_cmp(&sa.total_score)
            .then(
                b.stats
                    .coverage_percentage
                    .total_cmp(&a.stats.coverage_percentage),
            )
            .then(a.stats.error_count.cmp(&b.stats.error_count))
            .then(a.stats.anomaly_count.cmp(&b.stats.anomaly_count))
            .then(a.created_at_ms.cmp(&b.created_at_ms))
    });
    scored
}

/// Best improving candidate against a baseline: highest coverage gain,
/// ties broken by fewer anomalies. `None` when nothing improves.
pub fn find_best_run<'a>(
    baseline: &RunArtifact,
    candidates: &'a [RunArtifact],
) -> Option<(&'a RunArtifact, RunDiff)> {
    let mut improvements: Vec<(&RunArtifact, RunDiff)> = candidates
        .iter()
        .map(|candidate| (candidate, diff_runs(baseline, candidate)))
        .filter(|(_, diff)| diff.is_improvement)
        .collect();
    improvements.sort_by(|(a, da), (b, db)| {
        db.coverage_delta
            .total_cmp(&da.coverage_delta)
            .then(a.stats.anomaly_count.cmp(&b.stats.anomaly_count))
    });
    improvements.into_iter().next()
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}
