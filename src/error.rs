//! Error handling.

use ndarray::ShapeError;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::AcquireError;
use zune_inflate::errors::InflateDecodeErrors;

use crate::models::{ModelRun, NoDataReason};
use crate::types::DValue;

/// openwx error type
///
/// This type encapsulates the various errors that may occur while indexing, decoding and querying
/// gridded data. Only some of them abort a query; see [WxError::no_data_reason].
#[derive(Debug, Error)]
pub enum WxError {
    /// No dataset files are registered for the model run
    #[error("unknown model run {0}")]
    UnknownModelRun(ModelRun),

    /// No dataset file intersects the requested time range and parameters
    #[error("no dataset file of model run {model_run} covers {parameters}")]
    NoCoverage {
        model_run: ModelRun,
        parameters: String,
    },

    /// The parameter is not in the parameter table or has no variable in the file
    #[error("unknown parameter {0}")]
    UnknownParameter(String),

    /// The coordinate lies outside the spatial extent of the file
    #[error("coordinate ({latitude}, {longitude}) is outside the grid")]
    OutOfBounds { latitude: f64, longitude: f64 },

    /// The dataset file could not be opened or its metadata is unreadable
    #[error("dataset file {} is corrupt: {reason}", path.display())]
    CorruptFile { path: PathBuf, reason: String },

    /// Error decompressing data
    #[error("failed to decompress data")]
    DecompressionFlate2(#[source] std::io::Error),

    /// Error decompressing data
    #[error("failed to decompress data")]
    DecompressionZune(#[from] InflateDecodeErrors),

    /// Error converting from bytes to a type
    #[error("failed to convert from bytes to {type_name}")]
    FromBytes { type_name: &'static str },

    /// Incompatible missing data descriptor
    #[error("Incompatible value {0} for missing")]
    IncompatibleMissing(DValue),

    /// Insufficient memory to decode a variable
    #[error("Insufficient memory to process request ({requested} > {total})")]
    InsufficientMemory { requested: usize, total: usize },

    /// Invalid command line or environment configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Timestamp could not be parsed
    #[error("invalid timestamp {0}")]
    InvalidTimestamp(String),

    /// Error reading from the filesystem
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// Error (de)serialising JSON
    #[error("invalid JSON")]
    Json(#[from] serde_json::Error),

    /// Error validating a QueryRequest (single error)
    #[error("query request is not valid")]
    RequestValidationSingle(#[from] validator::ValidationError),

    /// Error validating a QueryRequest (multiple errors)
    #[error("query request is not valid")]
    RequestValidation(#[from] validator::ValidationErrors),

    /// Error acquiring a semaphore
    #[error("error acquiring resources")]
    SemaphoreAcquireError(#[from] AcquireError),

    /// Error creating ndarray Array from Shape
    #[error("failed to create array from shape")]
    ShapeInvalid(#[from] ShapeError),

    /// A blocking task panicked or was cancelled
    #[error("background task failed")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// The query did not complete in time
    #[error("query timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),

    /// Error converting between integer types
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),
}

impl WxError {
    /// Returns a [WxError::CorruptFile] for `path` describing `error` and its causes.
    pub fn corrupt<E>(path: impl Into<PathBuf>, error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        let body = ErrorBody::new(error);
        let reason = match body.caused_by {
            Some(causes) => format!("{}: {}", body.message, causes.join(": ")),
            None => body.message,
        };
        WxError::CorruptFile {
            path: path.into(),
            reason,
        }
    }

    /// Returns the no-data marker this error degrades to within a query result.
    ///
    /// Returns `None` for errors that abort the whole query.
    pub fn no_data_reason(&self) -> Option<NoDataReason> {
        match self {
            WxError::UnknownModelRun(_)
            | WxError::Config(_)
            | WxError::InvalidTimestamp(_)
            | WxError::RequestValidationSingle(_)
            | WxError::RequestValidation(_)
            | WxError::SemaphoreAcquireError(_)
            | WxError::Timeout(_) => None,
            WxError::NoCoverage { .. } => Some(NoDataReason::NoCoverage),
            WxError::UnknownParameter(_) => Some(NoDataReason::UnknownParameter),
            WxError::OutOfBounds { .. } => Some(NoDataReason::OutOfBounds),
            WxError::InsufficientMemory { .. } => Some(NoDataReason::ResourceLimit),
            // Anything else went wrong reading a particular file.
            _ => Some(NoDataReason::CorruptFile),
        }
    }
}

/// Body of an error report
///
/// Implements serde (de)serialise.
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorBody {
    /// Main error message
    pub message: String,

    /// Optional list of causes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caused_by: Option<Vec<String>>,
}

impl ErrorBody {
    /// Return a new ErrorBody
    ///
    /// # Arguments
    ///
    /// * `error`: The error that occurred
    pub fn new<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        let message = error.to_string();
        let mut caused_by = None;
        let mut current = error.source();
        while let Some(source) = current {
            let mut causes: Vec<String> = caused_by.unwrap_or_default();
            causes.push(source.to_string());
            caused_by = Some(causes);
            current = source.source();
        }
        // Remove duplicate entries.
        if let Some(caused_by) = caused_by.as_mut() {
            caused_by.dedup()
        }
        ErrorBody { message, caused_by }
    }
}

/// A report printed by the command line interface in error cases
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorReport {
    /// Process exit code
    #[serde(skip)]
    pub exit_code: i32,

    /// Report body
    pub error: ErrorBody,
}

impl From<WxError> for ErrorReport {
    fn from(error: WxError) -> Self {
        let exit_code = match &error {
            WxError::UnknownModelRun(_) => 2,
            WxError::Config(_)
            | WxError::InvalidTimestamp(_)
            | WxError::RequestValidationSingle(_)
            | WxError::RequestValidation(_) => 3,
            WxError::Timeout(_) => 4,
            _ => 1,
        };
        ErrorReport {
            exit_code,
            error: ErrorBody::new(&error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::NaiveDate;

    // Jump through hoops to get an Elapsed error.
    async fn elapsed() -> tokio::time::error::Elapsed {
        tokio::time::timeout(
            std::time::Duration::from_millis(1),
            std::future::pending::<()>(),
        )
        .await
        .unwrap_err()
    }

    fn test_wx_error(
        error: WxError,
        exit_code: i32,
        message: &'static str,
        caused_by: Option<Vec<&'static str>>,
    ) {
        let report = ErrorReport::from(error);
        assert_eq!(exit_code, report.exit_code);
        assert_eq!(message.to_string(), report.error.message);
        // Map Vec items from str to String
        let caused_by = caused_by.map(|cb| cb.iter().map(|s| s.to_string()).collect());
        assert_eq!(caused_by, report.error.caused_by);
    }

    fn model_run() -> ModelRun {
        ModelRun::new(
            NaiveDate::from_ymd_opt(1999, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        )
    }

    #[test]
    fn unknown_model_run() {
        let error = WxError::UnknownModelRun(model_run());
        assert_eq!(None, error.no_data_reason());
        test_wx_error(error, 2, "unknown model run 1999-01-01T00:00:00", None);
    }

    #[test]
    fn no_coverage() {
        let error = WxError::NoCoverage {
            model_run: model_run(),
            parameters: "relative_humidity".to_string(),
        };
        assert_eq!(Some(NoDataReason::NoCoverage), error.no_data_reason());
        test_wx_error(
            error,
            1,
            "no dataset file of model run 1999-01-01T00:00:00 covers relative_humidity",
            None,
        );
    }

    #[test]
    fn unknown_parameter() {
        let error = WxError::UnknownParameter("foo".to_string());
        assert_eq!(Some(NoDataReason::UnknownParameter), error.no_data_reason());
        test_wx_error(error, 1, "unknown parameter foo", None);
    }

    #[test]
    fn out_of_bounds() {
        let error = WxError::OutOfBounds {
            latitude: 45.0,
            longitude: -100.5,
        };
        assert_eq!(Some(NoDataReason::OutOfBounds), error.no_data_reason());
        test_wx_error(error, 1, "coordinate (45, -100.5) is outside the grid", None);
    }

    #[test]
    fn corrupt_file_from_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let error = WxError::corrupt("/data/a.grid.json", &WxError::Io(io_error));
        assert_eq!(Some(NoDataReason::CorruptFile), error.no_data_reason());
        test_wx_error(
            error,
            1,
            "dataset file /data/a.grid.json is corrupt: I/O error: short read",
            None,
        );
    }

    #[test]
    fn decompression_flate2_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::InvalidInput, "decompression error");
        let error = WxError::DecompressionFlate2(io_error);
        assert_eq!(Some(NoDataReason::CorruptFile), error.no_data_reason());
        test_wx_error(
            error,
            1,
            "failed to decompress data",
            Some(vec!["decompression error"]),
        );
    }

    #[test]
    fn from_bytes_error() {
        let error = WxError::FromBytes { type_name: "foo" };
        test_wx_error(error, 1, "failed to convert from bytes to foo", None);
    }

    #[test]
    fn incompatible_missing() {
        let value = 32.into();
        let error = WxError::IncompatibleMissing(value);
        test_wx_error(error, 1, "Incompatible value 32 for missing", None);
    }

    #[test]
    fn insufficient_memory() {
        let error = WxError::InsufficientMemory {
            requested: 2,
            total: 1,
        };
        assert_eq!(Some(NoDataReason::ResourceLimit), error.no_data_reason());
        test_wx_error(
            error,
            1,
            "Insufficient memory to process request (2 > 1)",
            None,
        );
    }

    #[test]
    fn config() {
        let error = WxError::Config("memory limit 12 parsecs".to_string());
        assert_eq!(None, error.no_data_reason());
        test_wx_error(
            error,
            3,
            "invalid configuration: memory limit 12 parsecs",
            None,
        );
    }

    #[test]
    fn invalid_timestamp() {
        let error = WxError::InvalidTimestamp("yesterday".to_string());
        assert_eq!(None, error.no_data_reason());
        test_wx_error(error, 3, "invalid timestamp yesterday", None);
    }

    #[test]
    fn request_validation_single() {
        let validation_error = validator::ValidationError::new("foo");
        let error = WxError::RequestValidationSingle(validation_error);
        test_wx_error(
            error,
            3,
            "query request is not valid",
            Some(vec!["Validation error: foo [{}]"]),
        );
    }

    #[test]
    fn request_validation() {
        let mut validation_errors = validator::ValidationErrors::new();
        let validation_error = validator::ValidationError::new("foo");
        validation_errors.add("bar", validation_error);
        let error = WxError::RequestValidation(validation_errors);
        test_wx_error(
            error,
            3,
            "query request is not valid",
            Some(vec!["bar: Validation error: foo [{}]"]),
        );
    }

    #[tokio::test]
    async fn timeout() {
        let error = WxError::Timeout(elapsed().await);
        assert_eq!(None, error.no_data_reason());
        test_wx_error(
            error,
            4,
            "query timed out",
            Some(vec!["deadline has elapsed"]),
        );
    }

    #[tokio::test]
    async fn semaphore_acquire_error() {
        let sem = tokio::sync::Semaphore::new(1);
        sem.close();
        let error = WxError::SemaphoreAcquireError(sem.acquire().await.unwrap_err());
        test_wx_error(
            error,
            1,
            "error acquiring resources",
            Some(vec!["semaphore closed"]),
        );
    }

    #[test]
    fn shape_error() {
        let error = WxError::ShapeInvalid(ShapeError::from_kind(ndarray::ErrorKind::OutOfBounds));
        let message = "failed to create array from shape";
        let caused_by = Some(vec!["ShapeError/OutOfBounds: out of bounds indexing"]);
        test_wx_error(error, 1, message, caused_by);
    }

    #[test]
    fn try_from_int_error() {
        let error = WxError::TryFromInt(u8::try_from(-1_i8).unwrap_err());
        let message = "out of range integral type conversion attempted";
        test_wx_error(error, 1, message, None);
    }
}
