//! Interpolation kernels for point extraction.
//!
//! Stored missing values are decoded to NaN. Any NaN at a point that contributes to a result
//! makes the result `None`.

use ndarray::ArrayView2;

use crate::axis::AxisPosition;
use crate::models::SpatialInterpolation;

/// Grid points and weights used to evaluate a field at one location.
///
/// Only points with a non-zero weight are kept, so a location exactly on a grid point depends on
/// that point alone.
#[derive(Clone, Debug, PartialEq)]
pub struct Stencil {
    points: Vec<(usize, usize, f64)>,
}

impl Stencil {
    /// Build the stencil for a location using `method`.
    pub fn new(method: SpatialInterpolation, lat: AxisPosition, lon: AxisPosition) -> Self {
        match method {
            SpatialInterpolation::Bilinear => Self::bilinear(lat, lon),
            SpatialInterpolation::Nearest => Self::nearest(lat, lon),
        }
    }

    /// Bilinear interpolation over the four surrounding grid points.
    pub fn bilinear(lat: AxisPosition, lon: AxisPosition) -> Self {
        let (fy, fx) = (lat.fraction, lon.fraction);
        let points = [
            (lat.lower, lon.lower, (1.0 - fy) * (1.0 - fx)),
            (lat.lower, lon.upper, (1.0 - fy) * fx),
            (lat.upper, lon.lower, fy * (1.0 - fx)),
            (lat.upper, lon.upper, fy * fx),
        ]
        .into_iter()
        .filter(|(_, _, weight)| *weight != 0.0)
        .collect();
        Stencil { points }
    }

    /// The nearest grid point.
    pub fn nearest(lat: AxisPosition, lon: AxisPosition) -> Self {
        Stencil {
            points: vec![(lat.nearest(), lon.nearest(), 1.0)],
        }
    }

    /// Evaluate a `[latitude, longitude]` field.
    pub fn apply(&self, field: ArrayView2<f64>) -> Option<f64> {
        let mut sum = 0.0;
        for &(row, col, weight) in &self.points {
            let value = field[[row, col]];
            if value.is_nan() {
                return None;
            }
            sum += weight * value;
        }
        Some(sum)
    }
}

/// Linear interpolation between two values at `fraction` of the way from `a` to `b`.
pub fn linear(a: Option<f64>, b: Option<f64>, fraction: f64) -> Option<f64> {
    if fraction == 0.0 {
        return a;
    }
    if fraction == 1.0 {
        return b;
    }
    Some(a? * (1.0 - fraction) + b? * fraction)
}
