//! Study configurations
//!
//! A study may replace the default age groups with its own and override
//! thresholds per (metric, age group). Configurations are validated before
//! they are registered and are immutable afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use super::age_groups::validate_ranges;
use crate::classifier::threshold_order_issue;
use crate::error::{QcError, Result};
use crate::metrics::Metric;
use crate::types::{AgeGroup, QualityThreshold};

const MAX_STUDY_NAME_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyConfiguration {
    pub study_name: String,
    #[serde(default)]
    pub custom_age_groups: Vec<AgeGroup>,
    #[serde(default)]
    pub custom_thresholds: Vec<QualityThreshold>,
    #[serde(default = "default_dataset")]
    pub normative_dataset: String,
    #[serde(default)]
    pub exclusion_criteria: Vec<String>,
    #[serde(default = "default_creator")]
    pub created_by: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_dataset() -> String {
    "default".to_string()
}

fn default_creator() -> String {
    "system".to_string()
}

impl StudyConfiguration {
    pub fn new(study_name: &str) -> Self {
        Self {
            study_name: study_name.to_string(),
            custom_age_groups: Vec::new(),
            custom_thresholds: Vec::new(),
            normative_dataset: default_dataset(),
            exclusion_criteria: Vec::new(),
            created_by: default_creator(),
            created_at: Utc::now(),
        }
    }

    pub fn with_age_groups(mut self, groups: Vec<AgeGroup>) -> Self {
        self.custom_age_groups = groups;
        self
    }

    pub fn with_thresholds(mut self, thresholds: Vec<QualityThreshold>) -> Self {
        self.custom_thresholds = thresholds;
        self
    }

    /// Problems with this configuration; `default_groups` are the groups
    /// thresholds may reference besides the custom ones
    pub fn validate(&self, default_groups: &[AgeGroup]) -> Vec<String> {
        let mut errors = Vec::new();

        if self.study_name.trim().is_empty() {
            errors.push("Study name cannot be empty".to_string());
        } else if self.study_name.chars().count() > MAX_STUDY_NAME_LEN {
            errors.push("Study name cannot exceed 100 characters".to_string());
        }
        if self.normative_dataset.trim().is_empty() {
            errors.push("Normative dataset cannot be empty".to_string());
        }
        if self.exclusion_criteria.iter().any(|c| c.trim().is_empty()) {
            errors.push("Exclusion criteria must be non-empty strings".to_string());
        }
        if self.created_by.trim().is_empty() {
            errors.push("Created by field cannot be empty".to_string());
        }

        errors.extend(validate_ranges(&self.custom_age_groups));

        let valid_groups: HashSet<&str> = self
            .custom_age_groups
            .iter()
            .chain(default_groups)
            .map(|g| g.id.as_str())
            .collect();
        let mut seen: HashSet<(Metric, &str)> = HashSet::new();

        for (i, threshold) in self.custom_thresholds.iter().enumerate() {
            let prefix = format!("Threshold {}", i + 1);

            if !valid_groups.contains(threshold.age_group.as_str()) {
                errors.push(format!("{}: Invalid age group '{}'", prefix, threshold.age_group));
            }
            if !seen.insert((threshold.metric, threshold.age_group.as_str())) {
                errors.push(format!(
                    "{}: Duplicate threshold for metric '{}' and age group '{}'",
                    prefix, threshold.metric, threshold.age_group
                ));
            }
            if let Some(issue) = threshold_order_issue(threshold) {
                errors.push(format!("{}: {}", prefix, issue));
            }
        }

        errors
    }

    /// Custom groups when any are defined, otherwise the defaults
    pub fn effective_age_groups(&self, defaults: &[AgeGroup]) -> Vec<AgeGroup> {
        if self.custom_age_groups.is_empty() {
            defaults.to_vec()
        } else {
            self.custom_age_groups.clone()
        }
    }

    /// Study override for (metric, group), if any
    pub fn threshold_override(&self, metric: Metric, age_group: &str) -> Option<&QualityThreshold> {
        self.custom_thresholds
            .iter()
            .find(|t| t.metric == metric && t.age_group == age_group)
    }
}

/// Registered studies, shared by every worker of a pipeline
#[derive(Debug, Default)]
pub struct StudyRegistry {
    studies: RwLock<HashMap<String, Arc<StudyConfiguration>>>,
}

impl StudyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add a study; names are unique
    pub fn register(&self, config: StudyConfiguration, default_groups: &[AgeGroup]) -> Result<()> {
        let mut errors = config.validate(default_groups);

        let mut studies = self
            .studies
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if studies.contains_key(&config.study_name) {
            errors.push(format!(
                "Study configuration '{}' already exists",
                config.study_name
            ));
        }
        if !errors.is_empty() {
            return Err(QcError::InvalidStudy(errors));
        }

        tracing::info!(
            "Registered study '{}' ({} custom age groups, {} custom thresholds)",
            config.study_name,
            config.custom_age_groups.len(),
            config.custom_thresholds.len()
        );
        studies.insert(config.study_name.clone(), Arc::new(config));
        Ok(())
    }

    pub fn remove(&self, name: &str) -> bool {
        self.studies
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(name)
            .is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<StudyConfiguration>> {
        self.studies
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    /// All configurations, sorted by name
    pub fn all(&self) -> Vec<Arc<StudyConfiguration>> {
        let mut studies: Vec<_> = self
            .studies
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        studies.sort_by(|a, b| a.study_name.cmp(&b.study_name));
        studies
    }

    pub fn len(&self) -> usize {
        self.studies
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::default_age_groups;
    use crate::types::Direction;

    fn snr_threshold(group: &str, warn: f64, fail: f64) -> QualityThreshold {
        QualityThreshold {
            metric: Metric::Snr,
            age_group: group.to_string(),
            warning_threshold: warn,
            fail_threshold: fail,
            direction: Direction::HigherBetter,
        }
    }

    #[test]
    fn test_valid_study_registers() {
        let registry = StudyRegistry::new();
        let study = StudyConfiguration::new("infant_study")
            .with_age_groups(vec![AgeGroup::new("toddler", 1.0, 4.0, "Toddlers")])
            .with_thresholds(vec![snr_threshold("toddler", 10.0, 6.0)]);

        registry.register(study, &default_age_groups()).unwrap();
        assert_eq!(registry.len(), 1);

        let stored = registry.get("infant_study").unwrap();
        assert_eq!(stored.effective_age_groups(&default_age_groups()).len(), 1);
        assert!(stored.threshold_override(Metric::Snr, "toddler").is_some());
        assert!(stored.threshold_override(Metric::Cnr, "toddler").is_none());
    }

    #[test]
    fn test_duplicate_study_is_rejected() {
        let registry = StudyRegistry::new();
        registry
            .register(StudyConfiguration::new("s"), &default_age_groups())
            .unwrap();

        let err = registry
            .register(StudyConfiguration::new("s"), &default_age_groups())
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_threshold_validation_messages() {
        let study = StudyConfiguration::new("s").with_thresholds(vec![
            snr_threshold("young_adult", 8.0, 12.0),
            snr_threshold("young_adult", 14.0, 10.0),
            snr_threshold("martians", 14.0, 10.0),
        ]);

        let errors = study.validate(&default_age_groups());
        assert_eq!(errors.len(), 3);
        assert!(errors[0].starts_with("Threshold 1: For 'higher_better' metrics"));
        assert!(errors[1].starts_with("Threshold 2: Duplicate threshold"));
        assert_eq!(errors[2], "Threshold 3: Invalid age group 'martians'");
    }

    #[test]
    fn test_defaults_apply_without_custom_groups() {
        let study = StudyConfiguration::new("s");
        assert_eq!(study.effective_age_groups(&default_age_groups()), default_age_groups());
        assert!(study.validate(&default_age_groups()).is_empty());
    }

    #[test]
    fn test_remove() {
        let registry = StudyRegistry::new();
        registry
            .register(StudyConfiguration::new("s"), &default_age_groups())
            .unwrap();
        assert!(registry.remove("s"));
        assert!(!registry.remove("s"));
        assert!(registry.is_empty());
    }
}
