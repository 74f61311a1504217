//! Quality Classifier
//!
//! Maps a metric value to Pass/Warning/Fail against its age group's
//! threshold pair. Classification is a pure function of
//! (value, warning, fail, direction); missing thresholds yield Uncertain.
//!
//! higher_better: value >= warn → Pass; fail <= value < warn → Warning; value < fail → Fail
//! lower_better:  value <= warn → Pass; warn < value <= fail → Warning; value > fail → Fail

use crate::metrics::Metric;
use crate::types::{
    Direction, MetricAssessment, QualityStatus, QualityThreshold, Severity, ThresholdViolation,
};

/// Classify one value against one threshold
pub fn classify_value(metric: Metric, value: f64, threshold: &QualityThreshold) -> MetricAssessment {
    let warn = threshold.warning_threshold;
    let fail = threshold.fail_threshold;

    let crossed = match threshold.direction {
        Direction::HigherBetter => {
            if value >= warn {
                None
            } else if value >= fail {
                Some((warn, Severity::Warning))
            } else {
                Some((fail, Severity::Fail))
            }
        }
        Direction::LowerBetter => {
            if value <= warn {
                None
            } else if value <= fail {
                Some((warn, Severity::Warning))
            } else {
                Some((fail, Severity::Fail))
            }
        }
    };

    match crossed {
        None => MetricAssessment {
            status: QualityStatus::Pass,
            violation: None,
        },
        Some((crossed_at, severity)) => MetricAssessment {
            status: match severity {
                Severity::Warning => QualityStatus::Warning,
                Severity::Fail => QualityStatus::Fail,
            },
            violation: Some(ThresholdViolation {
                metric,
                value,
                threshold: crossed_at,
                severity,
                direction: threshold.direction,
            }),
        },
    }
}

/// Classify against an optional threshold; `None` is Uncertain
pub fn classify(metric: Metric, value: f64, threshold: Option<&QualityThreshold>) -> MetricAssessment {
    match threshold {
        Some(threshold) => classify_value(metric, value, threshold),
        None => MetricAssessment::uncertain(),
    }
}

/// Ordering problem of a single threshold pair, if any
pub fn threshold_order_issue(threshold: &QualityThreshold) -> Option<&'static str> {
    match threshold.direction {
        Direction::HigherBetter if threshold.warning_threshold <= threshold.fail_threshold => Some(
            "For 'higher_better' metrics, warning threshold must be greater than fail threshold",
        ),
        Direction::LowerBetter if threshold.warning_threshold >= threshold.fail_threshold => {
            Some("For 'lower_better' metrics, warning threshold must be less than fail threshold")
        }
        _ => None,
    }
}

/// Ordering violations across a threshold table; reported, never corrected
pub fn validate_thresholds(thresholds: &[QualityThreshold]) -> Vec<String> {
    thresholds
        .iter()
        .filter_map(|t| {
            threshold_order_issue(t).map(|issue| format!("{}/{}: {}", t.metric, t.age_group, issue))
        })
        .collect()
}
