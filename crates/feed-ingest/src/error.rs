//! Error types for the ingest engine
//!
//! Stages record failures through these variants; the runner converts them
//! into state transitions and journal rows. Errors never cross the runner
//! boundary as panics.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Failure taxonomy carried through the pipeline
#[derive(Error, Debug)]
pub enum IngestError {
    /// A filesystem or subprocess operation failed
    #[error("Operation failed: {operation}: {detail}")]
    OperationFailed {
        operation: String,
        file: Option<String>,
        detail: String,
    },

    /// A structural expectation on the SIP failed
    #[error("Bad value for {field} in {file}")]
    BadField {
        field: String,
        file: String,
        actual: Option<String>,
    },

    /// A required SIP artifact (MARC, METS, checksum, filegroup) is absent
    #[error("Missing {field}")]
    MissingField { field: String, file: Option<String> },

    /// Factory lookup missed
    #[error("Unknown {kind} '{identifier}'")]
    UnknownSubclass { kind: String, identifier: String },

    /// The repository copy of the METS carries unusable PREMIS
    #[error("Invalid PREMIS in repository METS: {0}")]
    InvalidRepositoryPremis(String),

    /// The source METS carries unusable PREMIS
    #[error("Invalid PREMIS in source METS: {0}")]
    InvalidSourcePremis(String),

    /// The assembled METS failed validation
    #[error("Invalid METS at {path}: {detail}")]
    InvalidMets { path: PathBuf, detail: String },

    /// Configuration is missing or unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// XML parsing errors
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Zip archive errors
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// YAML parsing errors
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// Errors from the shared helpers (checksums, pairtree)
    #[error(transparent)]
    Common(#[from] feed_common::CommonError),

    /// Generic anyhow wrapper for top-level orchestration
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IngestError {
    /// Create an operation failure without an associated file
    pub fn operation_failed(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            file: None,
            detail: detail.into(),
        }
    }

    /// Create an operation failure for a specific file
    pub fn operation_failed_on(
        operation: impl Into<String>,
        file: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            file: Some(file.into()),
            detail: detail.into(),
        }
    }

    /// Create a bad field error
    pub fn bad_field(field: impl Into<String>, file: impl Into<String>) -> Self {
        Self::BadField {
            field: field.into(),
            file: file.into(),
            actual: None,
        }
    }

    /// Create a bad field error recording the observed value
    pub fn bad_field_actual(
        field: impl Into<String>,
        file: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::BadField {
            field: field.into(),
            file: file.into(),
            actual: Some(actual.into()),
        }
    }

    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
            file: None,
        }
    }

    /// Create a missing field error naming the file that should carry it
    pub fn missing_field_in(field: impl Into<String>, file: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
            file: Some(file.into()),
        }
    }

    /// Create an unknown subclass error
    pub fn unknown_subclass(kind: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::UnknownSubclass {
            kind: kind.into(),
            identifier: identifier.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Short code for the error journal's `operation` column
    pub fn code(&self) -> &'static str {
        match self {
            Self::OperationFailed { .. } => "OperationFailed",
            Self::BadField { .. } => "BadField",
            Self::MissingField { .. } => "MissingField",
            Self::UnknownSubclass { .. } => "UnknownSubclass",
            Self::InvalidRepositoryPremis(_) => "InvalidRepositoryPREMIS",
            Self::InvalidSourcePremis(_) => "InvalidSourcePREMIS",
            Self::InvalidMets { .. } => "InvalidMETS",
            Self::Config(_) => "Config",
            Self::Io(_) => "IO",
            Self::Database(_) => "Database",
            Self::Xml(_) => "XML",
            Self::Zip(_) => "Zip",
            Self::YamlParse(_) => "YAML",
            Self::Common(_) => "Checksum",
            Self::Other(_) => "Other",
        }
    }

    /// The file the error is about, when one is known
    pub fn file(&self) -> Option<&str> {
        match self {
            Self::OperationFailed { file, .. } => file.as_deref(),
            Self::BadField { file, .. } => Some(file),
            Self::MissingField { file, .. } => file.as_deref(),
            Self::InvalidMets { path, .. } => path.to_str(),
            _ => None,
        }
    }

    /// The structural field the error is about, when one is known
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::BadField { field, .. } | Self::MissingField { field, .. } => Some(field),
            _ => None,
        }
    }
}
