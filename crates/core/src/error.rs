//! Error types for changedet

use thiserror::Error;

/// Main error type for change-detection operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch { er: usize, ec: usize, ar: usize, ac: usize },

    #[error("Band count mismatch: expected {expected}, got {actual}")]
    BandCountMismatch { expected: usize, actual: usize },

    #[error("Geotransform mismatch: images are not on the same pixel grid")]
    TransformMismatch,

    #[error("CRS mismatch: {0} vs {1}")]
    CrsMismatch(String, String),

    #[error("Unknown band: {0}")]
    UnknownBand(String),

    #[error("Region does not intersect the raster extent")]
    EmptyRegion,

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Insufficient data: {what} requires at least {required}, got {actual}")]
    InsufficientData {
        what: &'static str,
        required: usize,
        actual: usize,
    },

    #[error("Singular matrix: {what}")]
    SingularMatrix { what: String },

    #[error("Insufficient invariant pixels in band {band}: {count} < {required}")]
    InsufficientSamples {
        band: usize,
        count: usize,
        required: usize,
    },

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("{0}")]
    Other(String),
}

/// Coarse classification of [`Error`] for callers deciding how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Inputs or parameters violate a precondition; fix the call.
    Precondition,
    /// The computation itself failed (singular statistics, too few samples).
    /// Retrying with a larger region or time window may help.
    Numerical,
    /// Not enough images or time steps were supplied.
    InsufficientData,
    /// Reading or writing files failed.
    Io,
}

impl Error {
    /// Which error category this is.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::UnsupportedDataType(_) => ErrorKind::Io,
            Error::InvalidDimensions { .. }
            | Error::IndexOutOfBounds { .. }
            | Error::SizeMismatch { .. }
            | Error::BandCountMismatch { .. }
            | Error::TransformMismatch
            | Error::CrsMismatch(..)
            | Error::UnknownBand(_)
            | Error::EmptyRegion
            | Error::InvalidParameter { .. } => ErrorKind::Precondition,
            Error::InsufficientData { .. } => ErrorKind::InsufficientData,
            Error::SingularMatrix { .. }
            | Error::InsufficientSamples { .. }
            | Error::Algorithm(_)
            | Error::Other(_) => ErrorKind::Numerical,
        }
    }

    /// Shorthand for an [`Error::InvalidParameter`].
    pub fn invalid_parameter(
        name: &'static str,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Error::InvalidParameter {
            name,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for changedet operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::TransformMismatch.kind(), ErrorKind::Precondition);
        assert_eq!(
            Error::SingularMatrix { what: "S11".into() }.kind(),
            ErrorKind::Numerical
        );
        assert_eq!(
            Error::InsufficientData { what: "omnibus", required: 2, actual: 1 }.kind(),
            ErrorKind::InsufficientData
        );
        assert_eq!(
            Error::invalid_parameter("iterations", 0, "must be positive").kind(),
            ErrorKind::Precondition
        );
    }

    #[test]
    fn test_error_messages() {
        let e = Error::InsufficientSamples { band: 2, count: 5, required: 30 };
        assert_eq!(e.to_string(), "Insufficient invariant pixels in band 2: 5 < 30");
    }
}
