//! Request-level error taxonomy.
//!
//! Every failure a request can hit ends up as a [`ScalerError`]. None of them
//! is fatal to the process: the facade logs the error, the transport renders
//! an [`ErrorReport`], and the next request is served normally.
//!
//! | Kind | Raised by | Status |
//! |---|---|---|
//! | `AssetNotFound` | pyramid lookup, asset without a MIME type | 404 |
//! | `MissingMetadata` | absolute scale without source or display DPI | 400 |
//! | `InvalidGeometry` | degenerate sampling area, crop out of bounds | 400 |
//! | `BadRequest` | unparseable parameter values | 400 |
//! | `DecodeError` | pixel pipeline: unreadable source | 500 |
//! | `UnsupportedFormat` | pixel pipeline: output type not encodable | 500 |
//! | `TransformError` | pixel pipeline: scale/rotate produced nothing | 500 |
//! | `Io` | file access, output sink | 500 |
//! | `ServiceOverloaded` | admission controller | 503 |

use crate::imaging::PipelineError;
use crate::params::ParamError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScalerError {
    #[error("Asset not found: {0}")]
    AssetNotFound(String),
    #[error("Missing metadata: {0}")]
    MissingMetadata(String),
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Transform error: {0}")]
    Transform(String),
    #[error("Service overloaded: all {capacity} job slots are busy")]
    ServiceOverloaded { capacity: usize },
    #[error("Invalid parameter: {0}")]
    Param(#[from] ParamError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PipelineError> for ScalerError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Io(e) => ScalerError::Io(e),
            PipelineError::Decode(msg) => ScalerError::Decode(msg),
            PipelineError::NotLoaded => ScalerError::Decode("no image loaded".into()),
            PipelineError::UnsupportedFormat(msg) => ScalerError::UnsupportedFormat(msg),
            PipelineError::InvalidGeometry(msg) => ScalerError::InvalidGeometry(msg),
            PipelineError::Transform(msg) => ScalerError::Transform(msg),
        }
    }
}

/// Caller-visible classification of a [`ScalerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AssetNotFound,
    MissingMetadata,
    InvalidGeometry,
    BadRequest,
    DecodeError,
    UnsupportedFormat,
    TransformError,
    Io,
    ServiceOverloaded,
}

impl ErrorKind {
    /// HTTP status a transport should answer with.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::AssetNotFound => 404,
            ErrorKind::MissingMetadata | ErrorKind::InvalidGeometry | ErrorKind::BadRequest => {
                400
            }
            ErrorKind::DecodeError
            | ErrorKind::UnsupportedFormat
            | ErrorKind::TransformError
            | ErrorKind::Io => 500,
            ErrorKind::ServiceOverloaded => 503,
        }
    }
}

impl ScalerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScalerError::AssetNotFound(_) => ErrorKind::AssetNotFound,
            ScalerError::MissingMetadata(_) => ErrorKind::MissingMetadata,
            ScalerError::InvalidGeometry(_) => ErrorKind::InvalidGeometry,
            ScalerError::Decode(_) => ErrorKind::DecodeError,
            ScalerError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            ScalerError::Transform(_) => ErrorKind::TransformError,
            ScalerError::ServiceOverloaded { .. } => ErrorKind::ServiceOverloaded,
            ScalerError::Param(_) => ErrorKind::BadRequest,
            ScalerError::Io(_) => ErrorKind::Io,
        }
    }

    pub fn report(&self) -> ErrorReport {
        let kind = self.kind();
        ErrorReport {
            kind,
            status: kind.status_code(),
            message: self.to_string(),
        }
    }
}

/// Structured failure handed back to the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub status: u16,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overload_maps_to_503() {
        let err = ScalerError::ServiceOverloaded { capacity: 2 };
        assert_eq!(err.kind(), ErrorKind::ServiceOverloaded);
        assert_eq!(err.report().status, 503);
    }

    #[test]
    fn pipeline_errors_keep_their_kind() {
        let err: ScalerError = PipelineError::UnsupportedFormat("image/bmp".into()).into();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);

        let err: ScalerError = PipelineError::InvalidGeometry("crop".into()).into();
        assert_eq!(err.kind(), ErrorKind::InvalidGeometry);
        assert_eq!(err.kind().status_code(), 400);
    }

    #[test]
    fn report_serializes_kind_in_snake_case() {
        let report = ScalerError::AssetNotFound("a/b.jpg".into()).report();
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"kind\":\"asset_not_found\""));
        assert!(json.contains("\"status\":404"));
        assert!(json.contains("a/b.jpg"));
    }
}
