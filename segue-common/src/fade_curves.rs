//! Fade ramp curves
//!
//! A curve maps normalized ramp progress (0.0 start, 1.0 end) onto a volume
//! modifier. The engine drives its crossfades and stop fades with
//! [`FadeCurve::Linear`] and its pause fades with [`FadeCurve::InOutQuad`].

use serde::{Deserialize, Serialize};

/// Shape of a volume ramp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// v(t) = t
    #[default]
    Linear,

    /// Quadratic ease-in for the first half, ease-out for the second.
    /// Short pause fades sound less abrupt with it.
    InOutQuad,
}

impl FadeCurve {
    /// Volume multiplier for a fade-in at `progress` (clamped to 0.0..=1.0).
    pub fn fade_in(&self, progress: f64) -> f64 {
        let t = progress.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => t,
            FadeCurve::InOutQuad => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    let u = -2.0 * t + 2.0;
                    1.0 - u * u / 2.0
                }
            }
        }
    }

    /// Volume multiplier for a fade-out at `progress` (clamped to 0.0..=1.0).
    pub fn fade_out(&self, progress: f64) -> f64 {
        // Both curves are symmetric
        self.fade_in(1.0 - progress.clamp(0.0, 1.0))
    }

    /// Value between `from` and `to` at `progress` along this curve.
    ///
    /// Ramps are not always full-scale: a reversed pause fade starts at the
    /// level the fade-out had reached.
    pub fn interpolate(&self, from: f64, to: f64, progress: f64) -> f64 {
        from + (to - from) * self.fade_in(progress)
    }

    pub fn all_variants() -> &'static [FadeCurve] {
        &[FadeCurve::Linear, FadeCurve::InOutQuad]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_endpoints() {
        for curve in FadeCurve::all_variants() {
            assert!(curve.fade_in(0.0).abs() < EPS, "{:?} fade-in start", curve);
            assert!((curve.fade_in(1.0) - 1.0).abs() < EPS, "{:?} fade-in end", curve);
            assert!((curve.fade_out(0.0) - 1.0).abs() < EPS, "{:?} fade-out start", curve);
            assert!(curve.fade_out(1.0).abs() < EPS, "{:?} fade-out end", curve);
        }
    }

    #[test]
    fn test_progress_is_clamped() {
        assert_eq!(FadeCurve::Linear.fade_in(-0.5), 0.0);
        assert_eq!(FadeCurve::Linear.fade_in(1.5), 1.0);
        assert_eq!(FadeCurve::Linear.fade_out(2.0), 0.0);
    }

    #[test]
    fn test_in_out_quad_midpoint_and_shape() {
        let curve = FadeCurve::InOutQuad;
        assert!((curve.fade_in(0.5) - 0.5).abs() < EPS);
        // Slow start, slow finish
        assert!(curve.fade_in(0.1) < 0.1);
        assert!(curve.fade_in(0.9) > 0.9);
    }

    #[test]
    fn test_curves_are_monotonic() {
        for curve in FadeCurve::all_variants() {
            let mut prev = curve.fade_in(0.0);
            for step in 1..=100 {
                let value = curve.fade_in(step as f64 / 100.0);
                assert!(value >= prev - EPS, "{:?} not monotonic at {}", curve, step);
                prev = value;
            }
        }
    }

    #[test]
    fn test_interpolate_partial_ramp() {
        let curve = FadeCurve::Linear;
        assert!((curve.interpolate(0.4, 1.0, 0.5) - 0.7).abs() < EPS);
        assert!((curve.interpolate(1.0, 0.0, 0.25) - 0.75).abs() < EPS);
    }
}
