// Classification Integration Tests
//
// Purpose: End-to-end age normalization, threshold classification and
// scoring through the public pipeline API, against the literature tables.
// Run with: cargo test --test classification_integration_tests

use approx::assert_relative_eq;
use qc_scorer_rust::store::StudyConfiguration;
use qc_scorer_rust::{
    AgeGroup, Direction, Metric, NormativeTables, PercentileMode, PipelineBlueprint, QcItem,
    QualityPipeline, QualityStatus, QualityThreshold, RawMetrics, ScanType, Severity, SubjectInfo,
};

fn pipeline() -> QualityPipeline {
    PipelineBlueprint::new(NormativeTables::literature_defaults())
        .build()
        .unwrap()
}

fn healthy_t1w() -> RawMetrics {
    RawMetrics::new()
        .with(Metric::Snr, 20.0)
        .with(Metric::Cnr, 4.2)
        .with(Metric::Efc, 0.44)
        .with(Metric::Fber, 1600.0)
        .with(Metric::FwhmAvg, 2.7)
}

// =========================================================================
// Section 1: Normalization
// =========================================================================

#[test]
fn test_young_adult_snr_percentile() {
    let normalized = pipeline()
        .normalize(&healthy_t1w(), Some(25.0), None)
        .unwrap()
        .unwrap();

    assert_eq!(normalized.age_group.id, "young_adult");
    assert_relative_eq!(normalized.z_scores[&Metric::Snr], 0.5556, epsilon = 1e-4);
    assert_relative_eq!(normalized.percentiles[&Metric::Snr], 71.07, epsilon = 0.05);
}

#[test]
fn test_lookup_mode_stays_within_anchor_band() {
    let blueprint = PipelineBlueprint {
        percentile_mode: PercentileMode::LookupTable,
        ..PipelineBlueprint::new(NormativeTables::literature_defaults())
    };
    let normalized = blueprint
        .build()
        .unwrap()
        .normalize(&RawMetrics::new().with(Metric::Snr, 1.0), Some(25.0), None)
        .unwrap()
        .unwrap();

    // Below the 5th-percentile anchor clamps to 5
    assert_eq!(normalized.percentiles[&Metric::Snr], 5.0);
}

#[test]
fn test_percentiles_always_in_range() {
    let p = pipeline();
    for snr in [0.0, 5.0, 18.5, 40.0, 900.0] {
        let normalized = p
            .normalize(&RawMetrics::new().with(Metric::Snr, snr), Some(70.0), None)
            .unwrap()
            .unwrap();
        let pct = normalized.percentiles[&Metric::Snr];
        assert!((0.0..=100.0).contains(&pct), "snr {} gave {}", snr, pct);
    }
}

// =========================================================================
// Section 2: Classification
// =========================================================================

#[test]
fn test_low_snr_fails_with_violation() {
    let subject = SubjectInfo::new("sub-low", Some(30.0));
    let raw = healthy_t1w().with(Metric::Snr, 3.0);

    let (_, assessment) = pipeline().assess(&subject, &raw, None).unwrap();

    assert_eq!(assessment.metric_assessments[&Metric::Snr], QualityStatus::Fail);
    assert_eq!(assessment.overall_status, QualityStatus::Fail);
    let violation = &assessment.threshold_violations[&Metric::Snr];
    assert_eq!(violation.severity, Severity::Fail);
    assert_eq!(violation.direction, Direction::HigherBetter);
    assert!(assessment.flags.contains(&"snr_fail".to_string()));
}

#[test]
fn test_statuses_cover_every_present_metric() {
    let raw = healthy_t1w().with(Metric::Gcor, 0.05);
    let (_, assessment) = pipeline()
        .assess(&SubjectInfo::new("sub-all", Some(45.0)), &raw, None)
        .unwrap();

    let metrics: Vec<Metric> = raw.iter().map(|(m, _)| m).collect();
    let assessed: Vec<Metric> = assessment.metric_assessments.keys().copied().collect();
    assert_eq!(metrics, assessed);
    // No threshold row for gcor
    assert_eq!(assessment.metric_assessments[&Metric::Gcor], QualityStatus::Uncertain);
}

#[test]
fn test_scores_bounded() {
    let (_, assessment) = pipeline()
        .assess(&SubjectInfo::new("sub-b", Some(30.0)), &healthy_t1w(), None)
        .unwrap();

    assert!((0.0..=100.0).contains(&assessment.composite_score));
    assert!((0.0..=1.0).contains(&assessment.confidence));
}

#[test]
fn test_age_outside_groups_is_uncertain() {
    let (normalized, assessment) = pipeline()
        .assess(&SubjectInfo::new("sub-child", Some(5.0)), &healthy_t1w(), None)
        .unwrap();

    assert!(normalized.is_none());
    assert_eq!(assessment.overall_status, QualityStatus::Uncertain);
}

#[test]
fn test_missing_age_is_uncertain() {
    let (_, assessment) = pipeline()
        .assess(&SubjectInfo::new("sub-noage", None), &healthy_t1w(), None)
        .unwrap();
    assert_eq!(assessment.overall_status, QualityStatus::Uncertain);
}

// =========================================================================
// Section 3: Items and studies
// =========================================================================

#[test]
fn test_process_stamps_version_and_keeps_inputs() {
    let mut subject = SubjectInfo::new("sub-bold", Some(28.0));
    subject.scan_type = ScanType::Bold;
    let item = QcItem::new(subject.clone(), healthy_t1w());

    let processed = pipeline().process(&item).unwrap();

    assert_eq!(processed.subject, subject);
    assert_eq!(processed.raw_metrics, healthy_t1w());
    assert_eq!(processed.processing_version, env!("CARGO_PKG_VERSION"));
}

#[test]
fn test_unknown_study_rejected() {
    let mut item = QcItem::new(SubjectInfo::new("sub-x", Some(28.0)), healthy_t1w());
    item.study = Some("missing".to_string());

    let err = pipeline().process(&item).unwrap_err();
    assert_eq!(err.kind(), "unknown_study");
}

#[test]
fn test_study_thresholds_apply_only_to_study_items() {
    let p = pipeline();
    p.register_study(StudyConfiguration::new("strict_snr").with_thresholds(vec![
        QualityThreshold {
            metric: Metric::Snr,
            age_group: "young_adult".to_string(),
            warning_threshold: 30.0,
            fail_threshold: 25.0,
            direction: Direction::HigherBetter,
        },
    ]))
    .unwrap();

    let plain = QcItem::new(SubjectInfo::new("sub-p", Some(25.0)), healthy_t1w());
    let mut strict = plain.clone();
    strict.study = Some("strict_snr".to_string());

    let plain = p.process(&plain).unwrap();
    let strict = p.process(&strict).unwrap();

    assert_eq!(plain.assessment.metric_assessments[&Metric::Snr], QualityStatus::Pass);
    assert_eq!(strict.assessment.metric_assessments[&Metric::Snr], QualityStatus::Fail);
}

#[test]
fn test_invalid_study_configuration_rejected() {
    let p = pipeline();
    let overlapping = StudyConfiguration::new("overlap").with_age_groups(vec![
        AgeGroup::new("a", 10.0, 30.0, "A"),
        AgeGroup::new("b", 20.0, 40.0, "B"),
    ]);

    let err = p.register_study(overlapping).unwrap_err();
    assert_eq!(err.kind(), "invalid_study");
    assert!(p.studies().is_empty());
}
