//! Progress curves for envelope segments
//!
//! Reshapes a linear progress value `t` in [0, 1] before it is used to
//! interpolate between two levels.
//!
//! - Exponential: slow start, fast finish (`t^p`)
//! - Logarithmic: fast start, slow finish (`1 - (1 - t)^p`)
//!
//! The exponent is derived from a per-segment curvature `k` as `p = 1 + 5k`.

use serde::{Deserialize, Serialize};

/// Curve applied to a segment's progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveShape {
    /// Straight line
    Linear,
    /// Slow start, fast end
    #[default]
    Exponential,
    /// Fast start, slow end
    Logarithmic,
}

impl CurveShape {
    /// Curvature used for the decay segment
    pub fn decay_k(self) -> f64 {
        match self {
            CurveShape::Linear => 0.0,
            CurveShape::Exponential => 0.30,
            CurveShape::Logarithmic => 0.45,
        }
    }

    /// Curvature used for the release segment
    pub fn release_k(self) -> f64 {
        match self {
            CurveShape::Linear => 0.0,
            CurveShape::Exponential => 0.35,
            CurveShape::Logarithmic => 0.50,
        }
    }

    /// Shape a progress value with curvature `k`
    ///
    /// Input is clamped to [0, 1]; the endpoints are preserved for every shape.
    pub fn apply(self, t: f64, k: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        if k <= 0.0 {
            return t;
        }

        let p = 1.0 + 5.0 * k;
        match self {
            CurveShape::Linear => t,
            CurveShape::Exponential => t.powf(p),
            CurveShape::Logarithmic => 1.0 - (1.0 - t).powf(p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curve_endpoints() {
        for shape in [CurveShape::Linear, CurveShape::Exponential, CurveShape::Logarithmic] {
            assert_eq!(shape.apply(0.0, 0.4), 0.0);
            assert!((shape.apply(1.0, 0.4) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_exponential_below_linear() {
        // Slow start: midpoint lands well under 0.5
        let mid = CurveShape::Exponential.apply(0.5, CurveShape::Exponential.decay_k());
        assert!(mid < 0.5, "Expected < 0.5, got {}", mid);
    }

    #[test]
    fn test_logarithmic_above_linear() {
        let mid = CurveShape::Logarithmic.apply(0.5, CurveShape::Logarithmic.release_k());
        assert!(mid > 0.5, "Expected > 0.5, got {}", mid);
    }

    #[test]
    fn test_zero_k_is_linear() {
        assert_eq!(CurveShape::Exponential.apply(0.25, 0.0), 0.25);
        assert_eq!(CurveShape::Linear.apply(0.25, CurveShape::Linear.decay_k()), 0.25);
    }

    #[test]
    fn test_exponent_from_k() {
        // k = 0.30 -> p = 2.5
        let v = CurveShape::Exponential.apply(0.5, 0.30);
        assert!((v - 0.5f64.powf(2.5)).abs() < 1e-12);
    }

    #[test]
    fn test_progress_clamped() {
        assert_eq!(CurveShape::Logarithmic.apply(-1.0, 0.5), 0.0);
        assert!((CurveShape::Logarithmic.apply(2.0, 0.5) - 1.0).abs() < 1e-12);
    }
}
