use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Analyzer error types
#[derive(Error, Debug)]
pub enum AnalyzerError {
    /// Unrecognized container magic/version or a record that violates the format
    #[error("format error at byte {offset}: {message}")]
    Format { offset: u64, message: String },

    /// The source ended in the middle of a header or record
    #[error("truncated capture at byte {offset}: {message}")]
    Truncated { offset: u64, message: String },

    /// The capture declares a link-layer type the decoder cannot interpret
    #[error("unsupported link-layer type {link_type}")]
    UnsupportedLinkType { link_type: u32, offset: u64 },

    /// Error from I/O operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from JSON parsing, such as an unreadable config file
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The caller abandoned the analysis
    #[error("analysis cancelled after {packets} packets")]
    Cancelled { packets: u64 },
}

/// Machine-readable tag for an [`AnalyzerError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    FormatError,
    TruncatedError,
    UnsupportedLinkType,
    IoError,
    JsonError,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::FormatError => "FormatError",
            ErrorKind::TruncatedError => "TruncatedError",
            ErrorKind::UnsupportedLinkType => "UnsupportedLinkType",
            ErrorKind::IoError => "IoError",
            ErrorKind::JsonError => "JsonError",
            ErrorKind::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// Serializable form of a fatal error, as handed to whatever sits in front of the analyzer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl AnalyzerError {
    pub(crate) fn format(offset: u64, message: impl Into<String>) -> Self {
        AnalyzerError::Format {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn truncated(offset: u64, message: impl Into<String>) -> Self {
        AnalyzerError::Truncated {
            offset,
            message: message.into(),
        }
    }

    /// Get the machine-readable kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalyzerError::Format { .. } => ErrorKind::FormatError,
            AnalyzerError::Truncated { .. } => ErrorKind::TruncatedError,
            AnalyzerError::UnsupportedLinkType { .. } => ErrorKind::UnsupportedLinkType,
            AnalyzerError::Io(_) => ErrorKind::IoError,
            AnalyzerError::Json(_) => ErrorKind::JsonError,
            AnalyzerError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Byte offset of the failure, where it is known
    pub fn offset(&self) -> Option<u64> {
        match self {
            AnalyzerError::Format { offset, .. }
            | AnalyzerError::Truncated { offset, .. }
            | AnalyzerError::UnsupportedLinkType { offset, .. } => Some(*offset),
            AnalyzerError::Io(_) | AnalyzerError::Json(_) | AnalyzerError::Cancelled { .. } => None,
        }
    }

    /// Convert into the serializable boundary form
    pub fn to_report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
            offset: self.offset(),
        }
    }
}

/// Result type for the analyzer
pub type AnalyzerResult<T> = Result<T, AnalyzerError>;
