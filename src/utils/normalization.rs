//! Normalization Utilities
//!
//! Converts raw metric values to percentiles against an age group's normative
//! distribution, either through the normal CDF or by interpolating between
//! the published percentile anchors.

/// Percentile positions of the normative anchor table
pub const ANCHOR_PERCENTILES: [f64; 5] = [5.0, 25.0, 50.0, 75.0, 95.0];

/// Standard normal cumulative distribution function
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + libm::erf(z / std::f64::consts::SQRT_2))
}

/// Z-score against (mean, std); `None` when std is not positive
pub fn z_score(value: f64, mean: f64, std: f64) -> Option<f64> {
    if std > 0.0 {
        Some((value - mean) / std)
    } else {
        None
    }
}

/// Percentile from a z-score, clamped to [0, 100]
pub fn percentile_from_z(z: f64) -> f64 {
    (normal_cdf(z) * 100.0).clamp(0.0, 100.0)
}

/// (percentile, z) of `value` under N(mean, std)
///
/// A degenerate distribution (std ≤ 0) places every value at the median:
/// percentile 50.0, z 0.0.
pub fn percentile_from_distribution(value: f64, mean: f64, std: f64) -> (f64, f64) {
    match z_score(value, mean, std) {
        Some(z) => (percentile_from_z(z), z),
        None => (50.0, 0.0),
    }
}

/// Percentile by linear interpolation between anchor values
///
/// Algorithm:
/// 1. Values at or below the 5th-percentile anchor map to 5.0; at or above
///    the 95th map to 95.0
/// 2. Otherwise find the bracketing anchors [a_i, a_i+1] with a_i <= value <= a_i+1
/// 3. percentile = P_i + fraction × (P_i+1 - P_i)
pub fn percentile_from_anchors(value: f64, anchors: &[f64; 5]) -> f64 {
    if value <= anchors[0] {
        return ANCHOR_PERCENTILES[0];
    }
    if value >= anchors[4] {
        return ANCHOR_PERCENTILES[4];
    }

    for i in 0..4 {
        if anchors[i] <= value && value <= anchors[i + 1] {
            let fraction = if anchors[i + 1] - anchors[i] > 0.0 {
                (value - anchors[i]) / (anchors[i + 1] - anchors[i])
            } else {
                0.0
            };

            return ANCHOR_PERCENTILES[i]
                + fraction * (ANCHOR_PERCENTILES[i + 1] - ANCHOR_PERCENTILES[i]);
        }
    }

    // Only reachable with non-monotonic anchors
    50.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_normal_cdf_reference_points() {
        assert_relative_eq!(normal_cdf(0.0), 0.5, epsilon = 1e-12);
        assert_relative_eq!(normal_cdf(1.96), 0.975, epsilon = 1e-4);
        assert_relative_eq!(normal_cdf(-1.0), 0.158655, epsilon = 1e-5);
    }

    #[test]
    fn test_distribution_percentile() {
        // snr 20 against young adults (mean 18.5, std 2.7)
        let (percentile, z) = percentile_from_distribution(20.0, 18.5, 2.7);
        assert_relative_eq!(z, 0.5555556, epsilon = 1e-6);
        assert_relative_eq!(percentile, 71.07, epsilon = 0.01);
    }

    #[test]
    fn test_degenerate_distribution_is_median() {
        assert_eq!(percentile_from_distribution(10.0, 20.0, 0.0), (50.0, 0.0));
        assert_eq!(percentile_from_distribution(10.0, 20.0, -1.0), (50.0, 0.0));
    }

    #[test]
    fn test_extreme_z_stays_in_bounds() {
        assert_eq!(percentile_from_z(50.0), 100.0);
        assert_eq!(percentile_from_z(-50.0), 0.0);
    }

    #[test]
    fn test_anchor_interpolation_edge_cases() {
        let anchors = [14.2, 16.8, 18.4, 20.3, 23.2];

        // Below p5 and above p95
        assert_relative_eq!(percentile_from_anchors(10.0, &anchors), 5.0);
        assert_relative_eq!(percentile_from_anchors(30.0, &anchors), 95.0);

        // Exactly on the median anchor
        assert_relative_eq!(percentile_from_anchors(18.4, &anchors), 50.0, epsilon = 1e-9);

        // Halfway between p25 and p50
        assert_relative_eq!(percentile_from_anchors(17.6, &anchors), 37.5, epsilon = 1e-9);
    }

    #[test]
    fn test_anchor_interpolation_flat_segment() {
        let anchors = [1.0, 2.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(percentile_from_anchors(2.0, &anchors), 25.0, epsilon = 1e-9);
    }
}
