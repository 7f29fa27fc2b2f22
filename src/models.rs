//! Data types and associated functions and methods

use chrono::{DateTime, Duration, NaiveDateTime};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum_macros::Display;
use validator::{Validate, ValidationError};

use crate::error::WxError;

/// Format used for all timestamps written by openwx.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parse an ISO-8601 timestamp.
///
/// Timestamps without an offset are taken to be UTC. Timestamps with an offset are converted to
/// UTC.
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, WxError> {
    let value = value.trim();
    if let Ok(naive) = NaiveDateTime::from_str(value) {
        return Ok(naive);
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.naive_utc())
        .map_err(|_| WxError::InvalidTimestamp(value.to_string()))
}

/// Format a timestamp as ISO-8601 without an offset.
pub fn format_timestamp(value: &NaiveDateTime) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

/// (De)serialise a [NaiveDateTime] using [parse_timestamp] and [format_timestamp].
pub mod timestamp {
    use chrono::NaiveDateTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_timestamp(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let value = String::deserialize(d)?;
        super::parse_timestamp(&value).map_err(de::Error::custom)
    }

    /// The same for a sequence of timestamps.
    pub mod vec {
        use chrono::NaiveDateTime;
        use serde::{de, ser::SerializeSeq, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            values: &[NaiveDateTime],
            s: S,
        ) -> Result<S::Ok, S::Error> {
            let mut seq = s.serialize_seq(Some(values.len()))?;
            for value in values {
                seq.serialize_element(&super::super::format_timestamp(value))?;
            }
            seq.end()
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Vec<NaiveDateTime>, D::Error> {
            Vec::<String>::deserialize(d)?
                .iter()
                .map(|value| super::super::parse_timestamp(value).map_err(de::Error::custom))
                .collect()
        }
    }
}

/// A model run, identified by its initialisation time.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct ModelRun(#[serde(with = "timestamp")] NaiveDateTime);

impl ModelRun {
    /// Return a new ModelRun initialised at `init_time`.
    pub fn new(init_time: NaiveDateTime) -> Self {
        ModelRun(init_time)
    }

    /// Initialisation time of the run.
    pub fn init_time(&self) -> NaiveDateTime {
        self.0
    }

    /// Lead time of `valid_time` relative to this run.
    pub fn lead_time(&self, valid_time: NaiveDateTime) -> Duration {
        valid_time - self.0
    }
}

impl fmt::Display for ModelRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_timestamp(&self.0))
    }
}

impl FromStr for ModelRun {
    type Err = WxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_timestamp(s).map(ModelRun)
    }
}

/// An inclusive range of valid times.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TimeRange {
    /// First valid time
    #[serde(with = "timestamp")]
    pub start: NaiveDateTime,
    /// Last valid time
    #[serde(with = "timestamp")]
    pub end: NaiveDateTime,
}

impl TimeRange {
    /// Return a new TimeRange.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        TimeRange { start, end }
    }

    /// Whether `time` falls inside the range.
    pub fn contains(&self, time: &NaiveDateTime) -> bool {
        self.start <= *time && *time <= self.end
    }

    /// Whether the range shares at least one instant with `[first, last]`.
    pub fn intersects(&self, first: &NaiveDateTime, last: &NaiveDateTime) -> bool {
        self.start <= *last && *first <= self.end
    }

    /// Returns `start`, `start + interval`, ... up to and including `end`.
    ///
    /// Mirrors hourly stepping through a forecast window.
    pub fn steps(&self, interval: Duration) -> Vec<NaiveDateTime> {
        let mut times = vec![];
        if interval <= Duration::zero() {
            return times;
        }
        let mut time = self.start;
        while time <= self.end {
            times.push(time);
            match time.checked_add_signed(interval) {
                Some(next) => time = next,
                None => break,
            }
        }
        times
    }
}

/// A geographic point in decimal degrees.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Point {
    /// Latitude in [-90, 90]
    pub latitude: f64,
    /// Longitude in any convention
    pub longitude: f64,
}

impl Point {
    /// Return a new Point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Point {
            latitude,
            longitude,
        }
    }

    /// Returns the point with its longitude normalised to [-180, 180).
    pub fn normalised(&self) -> Self {
        Point {
            latitude: self.latitude,
            longitude: normalise_longitude(self.longitude),
        }
    }
}

/// Normalise a longitude to [-180, 180).
pub fn normalise_longitude(longitude: f64) -> f64 {
    (longitude + 180.0).rem_euclid(360.0) - 180.0
}

/// Supported numerical data types
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// [i32]
    Int32,
    /// [i64]
    Int64,
    /// [u32]
    Uint32,
    /// [u64]
    Uint64,
    /// [f32]
    Float32,
    /// [f64]
    Float64,
}

impl DType {
    /// Returns the size of the associated type in bytes.
    pub fn size_of(self) -> usize {
        match self {
            Self::Int32 => std::mem::size_of::<i32>(),
            Self::Int64 => std::mem::size_of::<i64>(),
            Self::Uint32 => std::mem::size_of::<u32>(),
            Self::Uint64 => std::mem::size_of::<u64>(),
            Self::Float32 => std::mem::size_of::<f32>(),
            Self::Float64 => std::mem::size_of::<f64>(),
        }
    }
}

/// Array ordering
///
/// Defines an ordering for multi-dimensional arrays.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum Order {
    /// Row-major (C) ordering
    #[default]
    C,
    /// Column-major (Fortran) ordering
    F,
}

/// Compression algorithm
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "id")]
pub enum Compression {
    /// Gzip
    Gzip,
    /// Zlib
    Zlib,
}

/// Filter algorithm
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "id")]
pub enum Filter {
    /// Byte shuffle
    Shuffle { element_size: usize },
}

/// How values are selected between two time axis points.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Display, Eq, PartialEq, Serialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TimeInterpolation {
    /// Linear interpolation between the bounding axis points
    #[default]
    Linear,
    /// The nearest axis point, the earlier one on a tie
    Nearest,
}

/// How values are selected between grid points.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Display, Eq, PartialEq, Serialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SpatialInterpolation {
    /// Bilinear interpolation over the four surrounding grid points
    #[default]
    Bilinear,
    /// The nearest grid point
    Nearest,
}

/// Why a value could not be determined.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NoDataReason {
    /// No dataset file covers the parameter at this time
    NoCoverage,
    /// The parameter name is unknown or has no variable in the covering file
    UnknownParameter,
    /// The coordinate lies outside the covering file's grid
    OutOfBounds,
    /// The covering file could not be read
    CorruptFile,
    /// The stored value at a needed grid point is a missing-value sentinel
    MissingValue,
    /// Decoding the covering file's variable would exceed the memory limit
    ResourceLimit,
}

/// A query for parameter values at a point over a range of valid times.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_query_request"))]
pub struct QueryRequest {
    /// Model run to query
    pub model_run: ModelRun,
    /// First valid time
    #[serde(with = "timestamp")]
    pub valid_time_start: NaiveDateTime,
    /// Last valid time
    #[serde(with = "timestamp")]
    pub valid_time_end: NaiveDateTime,
    /// Parameter names in the order results should be returned
    #[validate(length(min = 1, message = "parameters must not be empty"))]
    pub parameters: Vec<String>,
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    /// Optional step between requested valid times, in hours
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, message = "interval must be greater than 0"))]
    pub interval_hours: Option<i64>,
}

impl QueryRequest {
    /// Return a QueryRequest with no time step.
    pub fn new(
        model_run: ModelRun,
        valid_time_start: NaiveDateTime,
        valid_time_end: NaiveDateTime,
        parameters: Vec<String>,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        QueryRequest {
            model_run,
            valid_time_start,
            valid_time_end,
            parameters,
            latitude,
            longitude,
            interval_hours: None,
        }
    }

    /// Requested valid time range.
    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.valid_time_start, self.valid_time_end)
    }

    /// Requested point with longitude normalised to [-180, 180).
    pub fn point(&self) -> Point {
        Point::new(self.latitude, self.longitude).normalised()
    }

    /// Requested parameters with duplicates removed, keeping the first occurrence.
    pub fn unique_parameters(&self) -> Vec<String> {
        let mut seen = hashbrown::HashSet::new();
        self.parameters
            .iter()
            .filter(|parameter| seen.insert(parameter.as_str()))
            .cloned()
            .collect()
    }
}

/// Validate request data
fn validate_query_request(request: &QueryRequest) -> Result<(), ValidationError> {
    // Validation of multiple fields in QueryRequest.
    if request.valid_time_end < request.valid_time_start {
        let mut error =
            ValidationError::new("valid_time_end must not be earlier than valid_time_start");
        error.add_param(
            "valid_time_start".into(),
            &format_timestamp(&request.valid_time_start),
        );
        error.add_param(
            "valid_time_end".into(),
            &format_timestamp(&request.valid_time_end),
        );
        return Err(error);
    }
    if !request.latitude.is_finite() || !request.longitude.is_finite() {
        return Err(ValidationError::new("coordinates must be finite"));
    }
    if !(-90.0..=90.0).contains(&request.latitude) {
        let mut error = ValidationError::new("latitude must be within [-90, 90]");
        error.add_param("latitude".into(), &request.latitude);
        return Err(error);
    }
    if let Some(hours) = request.interval_hours {
        if Duration::try_hours(hours).is_none() {
            let mut error = ValidationError::new("interval is too large");
            error.add_param("interval_hours".into(), &hours);
            return Err(error);
        }
    }
    if request.parameters.iter().any(|parameter| parameter.is_empty()) {
        return Err(ValidationError::new("parameter names must not be empty"));
    }
    Ok(())
}
