//! MRIQC Image Quality Metrics
//!
//! The closed set of metrics the scorer understands, and the typed container
//! holding one subject's raw values. Every consumer iterates `Metric::ALL`, so
//! normalization, classification and scoring all see the same key order.
//!
//! Anatomical metrics: snr, cnr, fber, efc, fwhm_*, qi1, qi2, cjv, wm2max
//! Functional metrics: dvars, fd_mean, fd_num, fd_perc, gcor, gsr_x, gsr_y
//! Derived: outlier_fraction

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One MRIQC quality metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Snr,
    Cnr,
    Fber,
    Efc,
    FwhmAvg,
    FwhmX,
    FwhmY,
    FwhmZ,
    Qi1,
    Qi2,
    Cjv,
    Wm2max,
    Dvars,
    FdMean,
    FdNum,
    FdPerc,
    Gcor,
    GsrX,
    GsrY,
    OutlierFraction,
}

impl Metric {
    pub const COUNT: usize = 20;

    pub const ALL: [Metric; Metric::COUNT] = [
        Metric::Snr,
        Metric::Cnr,
        Metric::Fber,
        Metric::Efc,
        Metric::FwhmAvg,
        Metric::FwhmX,
        Metric::FwhmY,
        Metric::FwhmZ,
        Metric::Qi1,
        Metric::Qi2,
        Metric::Cjv,
        Metric::Wm2max,
        Metric::Dvars,
        Metric::FdMean,
        Metric::FdNum,
        Metric::FdPerc,
        Metric::Gcor,
        Metric::GsrX,
        Metric::GsrY,
        Metric::OutlierFraction,
    ];

    /// Metrics whose failure fails the whole scan
    pub const CRITICAL: [Metric; 3] = [Metric::Snr, Metric::Cnr, Metric::Efc];

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Snr => "snr",
            Metric::Cnr => "cnr",
            Metric::Fber => "fber",
            Metric::Efc => "efc",
            Metric::FwhmAvg => "fwhm_avg",
            Metric::FwhmX => "fwhm_x",
            Metric::FwhmY => "fwhm_y",
            Metric::FwhmZ => "fwhm_z",
            Metric::Qi1 => "qi1",
            Metric::Qi2 => "qi2",
            Metric::Cjv => "cjv",
            Metric::Wm2max => "wm2max",
            Metric::Dvars => "dvars",
            Metric::FdMean => "fd_mean",
            Metric::FdNum => "fd_num",
            Metric::FdPerc => "fd_perc",
            Metric::Gcor => "gcor",
            Metric::GsrX => "gsr_x",
            Metric::GsrY => "gsr_y",
            Metric::OutlierFraction => "outlier_fraction",
        }
    }

    /// Position in `Metric::ALL`
    fn index(self) -> usize {
        self as usize
    }

    /// Physically valid value range, inclusive
    pub fn valid_range(self) -> Option<(f64, f64)> {
        match self {
            Metric::Snr => Some((0.0, 1000.0)),
            Metric::Cnr => Some((0.0, 100.0)),
            Metric::Fber => Some((0.0, 100_000.0)),
            Metric::Efc => Some((0.0, 1.0)),
            Metric::FwhmAvg | Metric::FwhmX | Metric::FwhmY | Metric::FwhmZ => Some((0.0, 20.0)),
            Metric::Qi1 | Metric::Qi2 => Some((0.0, 1.0)),
            Metric::Cjv => Some((0.0, 10.0)),
            Metric::Wm2max => Some((0.0, 1.0)),
            Metric::Dvars => Some((0.0, 1000.0)),
            Metric::FdMean => Some((0.0, 10.0)),
            Metric::FdNum => Some((0.0, f64::MAX)),
            Metric::FdPerc => Some((0.0, 100.0)),
            Metric::Gcor => Some((-1.0, 1.0)),
            Metric::GsrX | Metric::GsrY => None,
            Metric::OutlierFraction => Some((0.0, 1.0)),
        }
    }

    /// Fixed composite-score weight; `None` for metrics outside the core set
    pub fn composite_weight(self) -> Option<f64> {
        match self {
            Metric::Snr => Some(0.20),
            Metric::Cnr => Some(0.18),
            Metric::Fber => Some(0.15),
            Metric::Efc => Some(0.15),
            Metric::FwhmAvg => Some(0.12),
            Metric::Qi1 => Some(0.10),
            Metric::Cjv => Some(0.10),
            _ => None,
        }
    }

    pub fn is_critical(self) -> bool {
        Metric::CRITICAL.contains(&self)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("Unknown metric: {}", s))
    }
}

/// Raw metric values for one scan
///
/// Absent, null and non-finite values are all stored as `None` and skipped
/// by every downstream stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, Option<f64>>",
    into = "BTreeMap<String, f64>"
)]
pub struct RawMetrics {
    values: [Option<f64>; Metric::COUNT],
}

impl RawMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter
    pub fn with(mut self, metric: Metric, value: f64) -> Self {
        self.set(metric, Some(value));
        self
    }

    pub fn set(&mut self, metric: Metric, value: Option<f64>) {
        self.values[metric.index()] = value.filter(|v| v.is_finite());
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.values[metric.index()]
    }

    /// Present metrics in `Metric::ALL` order
    pub fn iter(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        Metric::ALL
            .iter()
            .filter_map(move |&m| self.get(m).map(|v| (m, v)))
    }

    pub fn len(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Range and consistency problems; empty when the metrics are usable
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        for (metric, value) in self.iter() {
            if let Some((min, max)) = metric.valid_range() {
                if value < min || value > max {
                    issues.push(format!(
                        "{} = {} outside valid range [{}, {}]",
                        metric, value, min, max
                    ));
                }
            }
        }

        // FWHM average must agree with its components
        if let (Some(avg), Some(x), Some(y), Some(z)) = (
            self.get(Metric::FwhmAvg),
            self.get(Metric::FwhmX),
            self.get(Metric::FwhmY),
            self.get(Metric::FwhmZ),
        ) {
            let calculated = (x + y + z) / 3.0;
            if (calculated - avg).abs() > 0.5 {
                issues.push(format!(
                    "fwhm_avg = {} inconsistent with component mean {:.3}",
                    avg, calculated
                ));
            }
        }

        if let (Some(fd_num), Some(fd_perc)) = (self.get(Metric::FdNum), self.get(Metric::FdPerc)) {
            if fd_num == 0.0 && fd_perc > 0.0 {
                issues.push("fd_num is 0 but fd_perc is positive".to_string());
            }
        }

        issues
    }
}

impl From<BTreeMap<String, Option<f64>>> for RawMetrics {
    fn from(map: BTreeMap<String, Option<f64>>) -> Self {
        let mut metrics = RawMetrics::default();
        for (name, value) in map {
            match name.parse::<Metric>() {
                Ok(metric) => metrics.set(metric, value),
                Err(_) => tracing::debug!("Ignoring unrecognised metric column '{}'", name),
            }
        }
        metrics
    }
}

impl From<RawMetrics> for BTreeMap<String, f64> {
    fn from(metrics: RawMetrics) -> Self {
        metrics
            .iter()
            .map(|(m, v)| (m.as_str().to_string(), v))
            .collect()
    }
}
