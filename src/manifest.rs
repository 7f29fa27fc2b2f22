//! On-disk dataset file format.
//!
//! A dataset file is a JSON manifest (`*.grid.json`) describing the axes of a forecast grid and
//! where each variable's `[time, latitude, longitude]` array lives in a binary payload file. The
//! manifest is small enough to read while indexing; payloads are only read on extraction.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use validator::{Validate, ValidationError};

use crate::axis::{self, RegularAxis};
use crate::error::WxError;
use crate::models::{timestamp, Compression, DType, Filter, ModelRun, Order};
use crate::types::{ByteOrder, DValue, Missing};

/// Suffix identifying manifest files.
pub const MANIFEST_SUFFIX: &str = ".grid.json";

/// Storage of one variable within the payload file.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VariableEncoding {
    /// Data type
    pub dtype: DType,
    /// Byte order of data. Native if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_order: Option<ByteOrder>,
    /// Offset in bytes of the variable within the payload file
    pub offset: u64,
    /// Size in bytes of the stored (possibly compressed) variable
    pub size: u64,
    /// Order of the multi-dimensional array
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
    /// Compression filter name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<Compression>,
    /// List of filters, in the order they were applied when writing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<Filter>>,
    /// Missing data description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing: Option<Missing<DValue>>,
}

/// Header of one gridded dataset file.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_manifest"))]
pub struct GridManifest {
    /// Model run the file belongs to
    pub model_run: ModelRun,
    /// Product identifier, used to map parameters onto variable names
    pub product: String,
    /// Valid times of the time axis, strictly ascending
    #[serde(with = "timestamp::vec")]
    pub valid_times: Vec<NaiveDateTime>,
    /// Latitude axis
    pub latitude: RegularAxis,
    /// Longitude axis
    pub longitude: RegularAxis,
    /// Payload file, relative to the manifest
    pub data_file: PathBuf,
    /// Variables stored in the payload file
    pub variables: BTreeMap<String, VariableEncoding>,
}

impl GridManifest {
    /// Read and validate the manifest at `path`.
    ///
    /// Any failure is reported as [WxError::CorruptFile].
    pub fn read(path: &Path) -> Result<Self, WxError> {
        let contents = std::fs::read(path).map_err(|err| WxError::corrupt(path, &WxError::Io(err)))?;
        let manifest: GridManifest = serde_json::from_slice(&contents)
            .map_err(|err| WxError::corrupt(path, &WxError::Json(err)))?;
        manifest
            .validate()
            .map_err(|err| WxError::corrupt(path, &err))?;
        Ok(manifest)
    }

    /// Shape of every variable: `[time, latitude, longitude]`.
    pub fn shape(&self) -> [usize; 3] {
        [
            self.valid_times.len(),
            self.latitude.count,
            self.longitude.count,
        ]
    }

    /// Number of elements of every variable.
    ///
    /// Saturates for grids too large to address; such manifests fail validation.
    pub fn len(&self) -> usize {
        self.checked_len().unwrap_or(usize::MAX)
    }

    /// Number of elements of every variable, or `None` on overflow.
    pub fn checked_len(&self) -> Option<usize> {
        self.shape()
            .iter()
            .try_fold(1usize, |len, count| len.checked_mul(*count))
    }

    /// Whether the variables hold no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Path of the payload file for a manifest read from `manifest_path`.
    pub fn data_path(&self, manifest_path: &Path) -> PathBuf {
        match manifest_path.parent() {
            Some(dir) => dir.join(&self.data_file),
            None => self.data_file.clone(),
        }
    }

    /// End of the last variable in the payload file.
    pub fn payload_len(&self) -> u64 {
        self.variables
            .values()
            .map(|variable| variable.offset.saturating_add(variable.size))
            .max()
            .unwrap_or(0)
    }
}

/// Validate a variable against the shape of its manifest.
fn validate_variable(
    name: &str,
    variable: &VariableEncoding,
    len: usize,
) -> Result<(), ValidationError> {
    let with_name = |mut error: ValidationError| {
        error.add_param("variable".into(), &name);
        error
    };
    let dtype_size = variable.dtype.size_of();
    if variable.size == 0 {
        return Err(with_name(ValidationError::new(
            "variable size must be greater than 0",
        )));
    }
    if variable.offset.checked_add(variable.size).is_none() {
        let mut error = with_name(ValidationError::new(
            "variable must end within the addressable payload",
        ));
        error.add_param("offset".into(), &variable.offset);
        error.add_param("size".into(), &variable.size);
        return Err(error);
    }
    let decoded_size = len
        .checked_mul(dtype_size)
        .and_then(|size| u64::try_from(size).ok())
        .ok_or_else(|| with_name(ValidationError::new("variable is too large to decode")))?;
    // Compressed sizes can only be checked once decoded.
    if variable.compression.is_none() {
        let expected_size = decoded_size;
        if variable.size != expected_size {
            let mut error = with_name(ValidationError::new(
                "variable size must cover every valid time and grid point",
            ));
            error.add_param("size".into(), &variable.size);
            error.add_param("expected size".into(), &expected_size);
            return Err(error);
        }
    }
    for filter in variable.filters.iter().flatten() {
        match filter {
            Filter::Shuffle { element_size } if *element_size != dtype_size => {
                let mut error = with_name(ValidationError::new(
                    "shuffle element size must equal dtype size",
                ));
                error.add_param("element_size".into(), element_size);
                return Err(error);
            }
            Filter::Shuffle { .. } => (),
        }
    }
    if let Some(missing) = &variable.missing {
        missing.validate(variable.dtype).map_err(with_name)?;
    }
    Ok(())
}

/// Validate a manifest
fn validate_manifest(manifest: &GridManifest) -> Result<(), ValidationError> {
    axis::validate_time_axis(&manifest.valid_times)?;
    manifest.latitude.validate()?;
    manifest.longitude.validate()?;
    if manifest.latitude.min() < -90.0 || manifest.latitude.max() > 90.0 {
        return Err(ValidationError::new("latitude axis must lie within [-90, 90]"));
    }
    if manifest.product.is_empty() {
        return Err(ValidationError::new("product must not be empty"));
    }
    let len = manifest
        .checked_len()
        .ok_or_else(|| ValidationError::new("grid holds too many elements"))?;
    for (name, variable) in &manifest.variables {
        validate_variable(name, variable, len)?;
    }
    Ok(())
}
