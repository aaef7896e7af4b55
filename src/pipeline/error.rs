//! Failure taxonomy for the page pipeline
//!
//! Failures are contained per input reference, per job reroute or per page.
//! None of them aborts an ingestion run.

use std::io;

use super::format::DocumentFormat;
use super::tiff_probe::TiffStructureError;

/// The bytes of an input reference could not be classified
#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error("document {locator} is empty")]
    Empty { locator: String },

    #[error("unrecognised document format for {locator}")]
    UnknownFormat { locator: String },

    #[error("malformed TIFF structure: {0}")]
    Tiff(#[from] TiffStructureError),

    #[error("{format} page count could not be determined")]
    PageCount { format: DocumentFormat },
}

/// Transport failure while fetching an input reference
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("fetch cancelled")]
    Cancelled,

    #[error("failed to read {locator}: {source}")]
    Io {
        locator: String,
        #[source]
        source: io::Error,
    },

    #[error("unsupported locator scheme: {locator}")]
    UnsupportedScheme { locator: String },

    #[error("HTTP fetch of {locator} failed: {detail}")]
    Http { locator: String, detail: String },

    #[error("loader stopped before fetching {locator}")]
    LoaderStopped { locator: String },
}

/// Terminal per-page decode failure
#[derive(Debug, thiserror::Error)]
pub enum DecodeFailure {
    /// The decoder recognised a sub-case it cannot handle; another
    /// decoder (the fallback path) may still succeed
    #[error("unsupported: {detail}")]
    Unsupported { detail: String },

    #[error("corrupt document: {detail}")]
    Corrupt { detail: String },

    #[error("page {page} out of range ({count} pages)")]
    PageOutOfRange { page: u32, count: u32 },

    #[error("image: {0}")]
    Image(#[from] image::ImageError),

    #[error("no decoder available for {format}")]
    NoDecoder { format: DocumentFormat },

    #[error("{detail}")]
    Engine { detail: String },
}

impl DecodeFailure {
    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::Corrupt {
            detail: detail.into(),
        }
    }

    pub fn unsupported(detail: impl Into<String>) -> Self {
        Self::Unsupported {
            detail: detail.into(),
        }
    }

    pub fn engine(detail: impl Into<String>) -> Self {
        Self::Engine {
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

impl From<tiff::TiffError> for DecodeFailure {
    fn from(err: tiff::TiffError) -> Self {
        match err {
            tiff::TiffError::UnsupportedError(e) => Self::unsupported(e.to_string()),
            tiff::TiffError::FormatError(e) => Self::corrupt(e.to_string()),
            other => Self::engine(other.to_string()),
        }
    }
}

#[cfg(feature = "pdf")]
impl From<mupdf::error::Error> for DecodeFailure {
    fn from(err: mupdf::error::Error) -> Self {
        Self::engine(format!("PDF engine: {err}"))
    }
}

/// Failure reported for a batch held by an execution unit
#[derive(Debug, thiserror::Error)]
pub enum UnitFault {
    /// The unit itself went away (thread exited, channel closed)
    #[error("execution unit {slot} transport fault: {detail}")]
    Transport { slot: usize, detail: String },

    /// The unit answered with an error message for its assignment
    #[error("execution unit {slot} could not process its batch: {reason}")]
    Application { slot: usize, reason: String },
}

/// The input list is unusable before the session starts
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("input list is empty")]
    Empty,

    #[error("owner index {index} is used by more than one input")]
    DuplicateIndex { index: usize },

    #[error("pattern count must be at least 1")]
    EmptyPattern,
}
