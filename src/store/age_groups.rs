//! Age group resolution
//!
//! Maps a subject age to the first age group (ascending `min_age`, ties in
//! registration order) whose inclusive range contains it. Unresolvable ages
//! are not errors: the caller gets `None` and downgrades to Uncertain.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::types::AgeGroup;

/// Oldest plausible age accepted in a group definition
const MAX_REALISTIC_AGE: f64 = 120.0;

#[derive(Debug, Clone)]
pub struct AgeGroupResolver {
    /// Sorted by `min_age`, stable
    groups: Vec<AgeGroup>,
}

/// How many ages of a cohort fall inside some group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgeCoverage {
    pub covered: usize,
    pub uncovered: Vec<f64>,
    pub coverage_rate: f64,
}

impl AgeGroupResolver {
    pub fn new(mut groups: Vec<AgeGroup>) -> Self {
        groups.sort_by(|a, b| a.min_age.total_cmp(&b.min_age));
        Self { groups }
    }

    pub fn groups(&self) -> &[AgeGroup] {
        &self.groups
    }

    /// Resolve an age; absent, negative and non-finite ages resolve to nothing
    pub fn resolve(&self, age: Option<f64>) -> Option<&AgeGroup> {
        let age = match age {
            Some(age) if age.is_finite() && age >= 0.0 => age,
            Some(age) => {
                tracing::warn!("Invalid age {}; no age group assigned", age);
                return None;
            }
            None => return None,
        };

        let group = self.groups.iter().find(|g| g.contains(age));
        if group.is_none() {
            tracing::warn!("No age group covers age {}", age);
        }
        group
    }

    pub fn coverage(&self, ages: &[f64]) -> AgeCoverage {
        let uncovered: Vec<f64> = ages
            .iter()
            .copied()
            .filter(|&age| !self.groups.iter().any(|g| g.contains(age)))
            .collect();
        let covered = ages.len() - uncovered.len();
        let coverage_rate = if ages.is_empty() {
            0.0
        } else {
            covered as f64 / ages.len() as f64
        };

        AgeCoverage {
            covered,
            uncovered,
            coverage_rate,
        }
    }
}

/// Definition problems in a set of age groups; empty when usable
pub fn validate_ranges(groups: &[AgeGroup]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for (i, group) in groups.iter().enumerate() {
        let prefix = format!("Age group {}", i + 1);

        if group.id.trim().is_empty() {
            errors.push(format!("{}: Name must be a non-empty string", prefix));
        } else if !seen.insert(group.id.as_str()) {
            errors.push(format!("{}: Duplicate age group name '{}'", prefix, group.id));
        }

        if !group.min_age.is_finite() || !group.max_age.is_finite() {
            errors.push(format!("{}: Age values must be numeric", prefix));
            continue;
        }
        if group.min_age < 0.0 || group.max_age < 0.0 {
            errors.push(format!("{}: Age values cannot be negative", prefix));
        }
        if group.min_age >= group.max_age {
            errors.push(format!("{}: min_age must be less than max_age", prefix));
        }
        if group.max_age > MAX_REALISTIC_AGE {
            errors.push(format!("{}: Age values seem unrealistic (>120 years)", prefix));
        }
    }

    let mut sorted: Vec<&AgeGroup> = groups.iter().filter(|g| g.min_age.is_finite()).collect();
    sorted.sort_by(|a, b| a.min_age.total_cmp(&b.min_age));
    for pair in sorted.windows(2) {
        if pair[0].max_age > pair[1].min_age {
            errors.push(format!(
                "Overlapping age ranges: '{}' and '{}'",
                pair[0].id, pair[1].id
            ));
        }
    }

    errors
}
