//! Quality Scorer - aggregates per-metric statuses into one assessment
//!
//! Composite score: Σ(weight × status score), clamped to [0, 100].
//! Core metrics carry fixed weights; the remaining weight
//! `max(0, 1 - Σ core weights present)` is shared equally by the
//! non-core metrics present. No metrics ⇒ neutral 50.
//!
//! Overall status (first match wins):
//! 1. fail rate > 0.2 ⇒ Fail
//! 2. any critical metric (snr, cnr, efc) Fail ⇒ Fail
//! 3. uncertain rate > 0.4 ⇒ Uncertain
//! 4. warning rate > 0.3 or any Fail ⇒ Warning
//! 5. composite ≥ 80 Pass, ≥ 60 Warning, ≥ 40 Fail, else Uncertain

use std::collections::{BTreeMap, HashSet};

use crate::metrics::Metric;
use crate::normalizer::Normalizer;
use crate::types::{
    MetricAssessment, NormalizedMetrics, QualityAssessment, QualityStatus, ScanType, Severity,
    SubjectInfo, ThresholdViolation,
};

/// Neutral composite for an empty assessment
const NEUTRAL_SCORE: f64 = 50.0;

/// Weighted composite of per-metric statuses
pub fn composite_score(statuses: &BTreeMap<Metric, QualityStatus>) -> f64 {
    if statuses.is_empty() {
        return NEUTRAL_SCORE;
    }

    let core_weight: f64 = statuses.keys().filter_map(|m| m.composite_weight()).sum();
    let non_core = statuses
        .keys()
        .filter(|m| m.composite_weight().is_none())
        .count();
    let shared_weight = if non_core > 0 {
        (1.0 - core_weight).max(0.0) / non_core as f64
    } else {
        0.0
    };

    let score: f64 = statuses
        .iter()
        .map(|(metric, status)| metric.composite_weight().unwrap_or(shared_weight) * status.score())
        .sum();

    score.clamp(0.0, 100.0)
}

fn count(statuses: &BTreeMap<Metric, QualityStatus>, wanted: QualityStatus) -> usize {
    statuses.values().filter(|&&s| s == wanted).count()
}

/// Overall verdict from statuses and composite score
pub fn overall_status(statuses: &BTreeMap<Metric, QualityStatus>, composite: f64) -> QualityStatus {
    if statuses.is_empty() {
        return QualityStatus::Uncertain;
    }

    let total = statuses.len() as f64;
    let fail_rate = count(statuses, QualityStatus::Fail) as f64 / total;
    let warning_rate = count(statuses, QualityStatus::Warning) as f64 / total;
    let uncertain_rate = count(statuses, QualityStatus::Uncertain) as f64 / total;

    if fail_rate > 0.2 {
        return QualityStatus::Fail;
    }

    let critical_failed = statuses
        .iter()
        .any(|(metric, &status)| metric.is_critical() && status == QualityStatus::Fail);
    if critical_failed {
        return QualityStatus::Fail;
    }

    if uncertain_rate > 0.4 {
        return QualityStatus::Uncertain;
    }

    if warning_rate > 0.3 || fail_rate > 0.0 {
        return QualityStatus::Warning;
    }

    if composite >= 80.0 {
        QualityStatus::Pass
    } else if composite >= 60.0 {
        QualityStatus::Warning
    } else if composite >= 40.0 {
        QualityStatus::Fail
    } else {
        QualityStatus::Uncertain
    }
}

/// Reliability of an assessment in [0, 1]
pub fn confidence(statuses: &BTreeMap<Metric, QualityStatus>, age_resolved: bool) -> f64 {
    let n = statuses.len();
    let uncertain = count(statuses, QualityStatus::Uncertain);

    let most_common = [
        QualityStatus::Pass,
        QualityStatus::Warning,
        QualityStatus::Fail,
        QualityStatus::Uncertain,
    ]
    .iter()
    .map(|&s| count(statuses, s))
    .max()
    .unwrap_or(0);
    let consistency = if n > 0 {
        most_common as f64 / n as f64
    } else {
        0.0
    };

    let mut value = 0.5;
    value += (0.05 * n as f64).min(0.3);
    if age_resolved {
        value += 0.2;
    }
    value -= 0.1 * uncertain as f64;
    value += 0.2 * consistency;

    value.clamp(0.0, 1.0)
}

/// Ordered, de-duplicated guidance for one scan
pub fn recommendations(
    subject: Option<&SubjectInfo>,
    statuses: &BTreeMap<Metric, QualityStatus>,
    violations: &BTreeMap<Metric, ThresholdViolation>,
    normalized: Option<&NormalizedMetrics>,
) -> Vec<String> {
    let mut recs = Vec::new();

    let fail_count = count(statuses, QualityStatus::Fail);
    let warning_count = count(statuses, QualityStatus::Warning);
    if fail_count == 0 && warning_count == 0 {
        recs.push("All quality metrics within acceptable ranges".to_string());
    } else if fail_count > 0 {
        recs.push(format!("EXCLUDE: {} metric(s) failed quality thresholds", fail_count));
    } else {
        recs.push(format!("REVIEW: {} metric(s) require manual review", warning_count));
    }

    for (metric, violation) in violations {
        let label = match violation.severity {
            Severity::Fail => "CRITICAL",
            Severity::Warning => "WARNING",
        };
        recs.push(format!(
            "{}: {} = {:.2} (threshold: {:.2})",
            label, metric, violation.value, violation.threshold
        ));
    }

    match normalized {
        Some(normalized) => recs.extend(Normalizer::recommendations(normalized)),
        None if subject.map_or(false, |s| s.age.is_none()) => {
            recs.push("Consider providing age information for more accurate assessment".to_string())
        }
        None => {}
    }

    let not_pass = |metric: Metric| {
        statuses
            .get(&metric)
            .map_or(false, |&s| s != QualityStatus::Pass)
    };
    match subject.map(|s| s.scan_type) {
        Some(ScanType::T1w) if not_pass(Metric::Snr) => {
            recs.push("Consider checking T1w acquisition parameters".to_string())
        }
        Some(ScanType::Bold) if not_pass(Metric::FdMean) => {
            recs.push("High motion detected - consider motion correction".to_string())
        }
        _ => {}
    }

    let mut seen = HashSet::new();
    recs.retain(|r| seen.insert(r.clone()));
    recs
}

/// Builds the final `QualityAssessment` for one scan
#[derive(Debug, Clone, Default)]
pub struct QualityScorer;

impl QualityScorer {
    pub fn new() -> Self {
        Self
    }

    /// `subject` adds age and scan-type guidance when known
    pub fn assess(
        &self,
        subject: Option<&SubjectInfo>,
        assessments: BTreeMap<Metric, MetricAssessment>,
        normalized: Option<&NormalizedMetrics>,
        age_resolved: bool,
    ) -> QualityAssessment {
        let mut statuses = BTreeMap::new();
        let mut violations = BTreeMap::new();
        let mut flags = Vec::new();

        for (metric, assessment) in assessments {
            statuses.insert(metric, assessment.status);
            if let Some(violation) = assessment.violation {
                flags.push(format!("{}_{}", metric, violation.severity.as_str()));
                violations.insert(metric, violation);
            }
        }

        let composite = composite_score(&statuses);
        let overall = overall_status(&statuses, composite);
        let confidence = confidence(&statuses, age_resolved);
        let recommendations = recommendations(subject, &statuses, &violations, normalized);

        QualityAssessment {
            overall_status: overall,
            metric_assessments: statuses,
            composite_score: composite,
            confidence,
            recommendations,
            flags,
            threshold_violations: violations,
        }
    }
}
