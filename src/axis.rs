//! Coordinate axes of a gridded dataset.
//!
//! Latitude and longitude are regular axes described by a start, a (possibly negative) step and
//! a count. Valid times are an explicit, strictly ascending list.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use validator::ValidationError;

/// Fractional indices closer than this to a grid point snap to it.
const SNAP_TOLERANCE: f64 = 1e-9;

/// A regular coordinate axis.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RegularAxis {
    /// Coordinate of the first point
    pub start: f64,
    /// Distance between consecutive points
    pub step: f64,
    /// Number of points
    pub count: usize,
}

/// Position of a coordinate between two neighbouring axis points.
///
/// The coordinate lies at `lower + fraction` in index space; `upper` is `lower + 1`, except on
/// the last point of an axis (where `fraction` is zero) and across the seam of a periodic axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisPosition {
    pub lower: usize,
    pub upper: usize,
    pub fraction: f64,
}

impl AxisPosition {
    fn exact(index: usize) -> Self {
        AxisPosition {
            lower: index,
            upper: index,
            fraction: 0.0,
        }
    }

    /// Index of the nearest axis point. Halfway positions go to `upper`.
    pub fn nearest(&self) -> usize {
        if self.fraction < 0.5 {
            self.lower
        } else {
            self.upper
        }
    }
}

impl RegularAxis {
    /// Return a new RegularAxis.
    pub fn new(start: f64, step: f64, count: usize) -> Self {
        RegularAxis { start, step, count }
    }

    /// Check that the axis describes at least one point with a finite, non-zero step.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.count == 0 {
            return Err(ValidationError::new("axis must have at least one point"));
        }
        if !self.start.is_finite() || !self.step.is_finite() || self.step == 0.0 {
            let mut error = ValidationError::new("axis start and step must be finite, step non-zero");
            error.add_param("start".into(), &self.start);
            error.add_param("step".into(), &self.step);
            return Err(error);
        }
        Ok(())
    }

    /// Coordinate of point `index`.
    pub fn value(&self, index: usize) -> f64 {
        self.start + self.step * index as f64
    }

    /// Smallest coordinate on the axis.
    pub fn min(&self) -> f64 {
        self.start.min(self.value(self.count - 1))
    }

    /// Largest coordinate on the axis.
    pub fn max(&self) -> f64 {
        self.start.max(self.value(self.count - 1))
    }

    /// Whether the axis wraps around a full circle (a global longitude axis).
    pub fn is_periodic(&self) -> bool {
        (self.step.abs() * self.count as f64 - 360.0).abs() < SNAP_TOLERANCE * 360.0
    }

    /// Fractional index of `value`, unbounded.
    fn fractional_index(&self, value: f64) -> f64 {
        let index = (value - self.start) / self.step;
        let rounded = index.round();
        if (index - rounded).abs() < SNAP_TOLERANCE {
            rounded
        } else {
            index
        }
    }

    /// Locate `value` on a bounded axis.
    ///
    /// Values on the first or last point are accepted. Returns `None` outside the axis.
    pub fn locate(&self, value: f64) -> Option<AxisPosition> {
        let index = self.fractional_index(value);
        let last = (self.count - 1) as f64;
        if !(0.0..=last).contains(&index) {
            return None;
        }
        let lower = index.floor() as usize;
        if lower + 1 >= self.count {
            return Some(AxisPosition::exact(self.count - 1));
        }
        Some(AxisPosition {
            lower,
            upper: lower + 1,
            fraction: index - lower as f64,
        })
    }

    /// Locate `value` on a periodic axis, wrapping across the seam.
    pub fn locate_periodic(&self, value: f64) -> AxisPosition {
        let count = self.count as f64;
        let mut index = self.fractional_index(value).rem_euclid(count);
        if count - index < SNAP_TOLERANCE {
            index = 0.0;
        }
        let lower = (index.floor() as usize).min(self.count - 1);
        let fraction = index - lower as f64;
        if fraction == 0.0 {
            return AxisPosition::exact(lower);
        }
        AxisPosition {
            lower,
            upper: (lower + 1) % self.count,
            fraction,
        }
    }

    /// Locate a longitude in [-180, 180) on this axis, whatever its convention.
    ///
    /// Longitude axes may run over [0, 360) or [-180, 180); the longitude is shifted by a full
    /// turn where that brings it onto the axis.
    pub fn locate_longitude(&self, longitude: f64) -> Option<AxisPosition> {
        if self.is_periodic() {
            return Some(self.locate_periodic(longitude));
        }
        [longitude, longitude + 360.0, longitude - 360.0]
            .into_iter()
            .find_map(|candidate| self.locate(candidate))
    }
}

/// Position of a valid time on a time axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimePosition {
    /// The time is axis point `index`
    Exact(usize),
    /// The time lies strictly between axis points `lower` and `lower + 1`
    Between { lower: usize, fraction: f64 },
}

/// Check that a time axis is non-empty and strictly ascending.
pub fn validate_time_axis(times: &[NaiveDateTime]) -> Result<(), ValidationError> {
    if times.is_empty() {
        return Err(ValidationError::new("time axis must not be empty"));
    }
    if times.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(ValidationError::new("time axis must be strictly ascending"));
    }
    Ok(())
}

/// Locate `time` on an ascending time axis. Returns `None` outside the axis span.
pub fn locate_time(times: &[NaiveDateTime], time: &NaiveDateTime) -> Option<TimePosition> {
    match times.binary_search(time) {
        Ok(index) => Some(TimePosition::Exact(index)),
        Err(0) => None,
        Err(insert) if insert >= times.len() => None,
        Err(insert) => {
            let lower = insert - 1;
            let span = (times[insert] - times[lower]).num_milliseconds() as f64;
            let offset = (*time - times[lower]).num_milliseconds() as f64;
            Some(TimePosition::Between {
                lower,
                fraction: offset / span,
            })
        }
    }
}
