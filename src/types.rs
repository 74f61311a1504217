//! Shared domain types
//!
//! Age groups, normative rows, thresholds and the records produced by the
//! pipeline. All of them serialize with serde so they can be cached, written
//! to result files and shipped to isolated workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::metrics::{Metric, RawMetrics};

/// Categorical quality outcome for one metric or one scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityStatus {
    Pass,
    Warning,
    Fail,
    Uncertain,
}

impl QualityStatus {
    /// Score contribution used by the composite scorer
    pub fn score(self) -> f64 {
        match self {
            QualityStatus::Pass => 100.0,
            QualityStatus::Warning => 70.0,
            QualityStatus::Fail => 30.0,
            QualityStatus::Uncertain => 50.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QualityStatus::Pass => "pass",
            QualityStatus::Warning => "warning",
            QualityStatus::Fail => "fail",
            QualityStatus::Uncertain => "uncertain",
        }
    }
}

impl fmt::Display for QualityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of a threshold is good
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    HigherBetter,
    LowerBetter,
}

/// Severity of a crossed threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Fail,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanType {
    T1w,
    T2w,
    #[serde(rename = "BOLD")]
    Bold,
    #[serde(rename = "DWI")]
    Dwi,
    #[serde(rename = "FLAIR")]
    Flair,
}

impl Default for ScanType {
    fn default() -> Self {
        ScanType::T1w
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sex {
    M,
    F,
    O,
    U,
}

/// Inclusive age range with a stable identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgeGroup {
    pub id: String,
    pub min_age: f64,
    pub max_age: f64,
    #[serde(default)]
    pub label: String,
}

impl AgeGroup {
    pub fn new(id: &str, min_age: f64, max_age: f64, label: &str) -> Self {
        Self {
            id: id.to_string(),
            min_age,
            max_age,
            label: label.to_string(),
        }
    }

    pub fn contains(&self, age: f64) -> bool {
        self.min_age <= age && age <= self.max_age
    }
}

/// Published percentile anchors; any of them may be missing
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PercentileTable {
    pub p5: Option<f64>,
    pub p25: Option<f64>,
    pub p50: Option<f64>,
    pub p75: Option<f64>,
    pub p95: Option<f64>,
}

impl PercentileTable {
    /// All five anchors, or `None` when any is missing
    pub fn anchors(&self) -> Option<[f64; 5]> {
        Some([self.p5?, self.p25?, self.p50?, self.p75?, self.p95?])
    }
}

/// Reference distribution of one metric within one age group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormativeStatistic {
    pub metric: Metric,
    pub age_group: String,
    pub mean: f64,
    pub std: f64,
    #[serde(default)]
    pub percentiles: PercentileTable,
    #[serde(default)]
    pub sample_size: u32,
    #[serde(default)]
    pub source: String,
}

/// Warning and fail cut points of one metric within one age group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityThreshold {
    pub metric: Metric,
    pub age_group: String,
    pub warning_threshold: f64,
    pub fail_threshold: f64,
    pub direction: Direction,
}

/// A threshold crossed by a metric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdViolation {
    pub metric: Metric,
    pub value: f64,
    pub threshold: f64,
    pub severity: Severity,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAssessment {
    pub status: QualityStatus,
    pub violation: Option<ThresholdViolation>,
}

impl MetricAssessment {
    pub fn uncertain() -> Self {
        Self {
            status: QualityStatus::Uncertain,
            violation: None,
        }
    }
}

/// Percentiles and z-scores of one scan against its age group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMetrics {
    pub percentiles: BTreeMap<Metric, f64>,
    pub z_scores: BTreeMap<Metric, f64>,
    pub age_group: AgeGroup,
    pub normative_dataset: String,
}

/// Overall verdict for one scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub overall_status: QualityStatus,
    pub metric_assessments: BTreeMap<Metric, QualityStatus>,
    pub composite_score: f64,
    pub confidence: f64,
    pub recommendations: Vec<String>,
    pub flags: Vec<String>,
    pub threshold_violations: BTreeMap<Metric, ThresholdViolation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectInfo {
    pub subject_id: String,
    #[serde(default)]
    pub age: Option<f64>,
    #[serde(default)]
    pub sex: Option<Sex>,
    #[serde(default)]
    pub scan_type: ScanType,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub site: Option<String>,
}

impl SubjectInfo {
    pub fn new(subject_id: &str, age: Option<f64>) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            age,
            sex: None,
            scan_type: ScanType::default(),
            session: None,
            site: None,
        }
    }
}

/// One unit of batch work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcItem {
    pub subject: SubjectInfo,
    pub metrics: RawMetrics,
    #[serde(default)]
    pub study: Option<String>,
}

impl QcItem {
    pub fn new(subject: SubjectInfo, metrics: RawMetrics) -> Self {
        Self {
            subject,
            metrics,
            study: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.subject.subject_id
    }
}

/// Full per-item output of the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedSubject {
    pub subject: SubjectInfo,
    pub raw_metrics: RawMetrics,
    pub normalized_metrics: Option<NormalizedMetrics>,
    pub assessment: QualityAssessment,
    pub processed_at: DateTime<Utc>,
    pub processing_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_scores() {
        assert_eq!(QualityStatus::Pass.score(), 100.0);
        assert_eq!(QualityStatus::Warning.score(), 70.0);
        assert_eq!(QualityStatus::Fail.score(), 30.0);
        assert_eq!(QualityStatus::Uncertain.score(), 50.0);
    }

    #[test]
    fn test_percentile_table_requires_every_anchor() {
        let full = PercentileTable {
            p5: Some(1.0),
            p25: Some(2.0),
            p50: Some(3.0),
            p75: Some(4.0),
            p95: Some(5.0),
        };
        assert_eq!(full.anchors(), Some([1.0, 2.0, 3.0, 4.0, 5.0]));

        let partial = PercentileTable { p75: None, ..full };
        assert_eq!(partial.anchors(), None);
    }

    #[test]
    fn test_item_deserializes_with_defaults() {
        let json = r#"{
            "subject": {"subject_id": "sub-001", "age": 25.0, "scan_type": "BOLD"},
            "metrics": {"snr": 15.0, "fd_mean": 0.2}
        }"#;
        let item: QcItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.id(), "sub-001");
        assert_eq!(item.subject.scan_type, ScanType::Bold);
        assert_eq!(item.metrics.get(Metric::FdMean), Some(0.2));
        assert!(item.study.is_none());
    }
}
