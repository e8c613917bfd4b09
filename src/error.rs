use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PrepError {
    #[error("configuration error: {0}")]
    #[diagnostic(code(bidsprep::configuration))]
    Configuration(String),

    #[error("conversion failed ({status}): {command}")]
    #[diagnostic(
        code(bidsprep::conversion),
        help("the remaining manifest rows were not converted")
    )]
    Conversion { command: String, status: String },

    #[error("invalid BIDS dataset at {root}: {reason}")]
    #[diagnostic(code(bidsprep::dataset))]
    Dataset { root: String, reason: String },

    #[error("fieldmap sidecar {path}: {message}")]
    #[diagnostic(code(bidsprep::sidecar))]
    SidecarIo { path: String, message: String },

    #[error("failed to read manifest at {0}")]
    ManifestRead(PathBuf),

    #[error("failed to parse manifest: {0}")]
    ManifestParse(String),

    #[error("invalid subject label: {0}")]
    InvalidSubjectLabel(String),

    #[error("invalid session label: {0}")]
    InvalidSessionLabel(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("fMRIPrep failed ({status}): {command}")]
    Preprocessing { command: String, status: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl PrepError {
    pub fn sidecar(path: impl ToString, message: impl ToString) -> Self {
        PrepError::SidecarIo {
            path: path.to_string(),
            message: message.to_string(),
        }
    }

    pub fn dataset(root: impl ToString, reason: impl ToString) -> Self {
        PrepError::Dataset {
            root: root.to_string(),
            reason: reason.to_string(),
        }
    }
}
