//! Error types for layout/policy loading and matrix resolution

use std::path::PathBuf;
use thiserror::Error;

/// Downmix ontology and resolution errors
///
/// Display strings are stable: the QA engine copies them into issue messages.
#[derive(Error, Debug)]
pub enum DownmixError {
    #[error("Failed to read {path}: {error}")]
    Read {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("Invalid YAML in {path}: {error}")]
    Yaml {
        path: String,
        #[source]
        error: serde_yml::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Layout {0} missing channel_order list")]
    EmptyLayout(String),

    #[error("Unknown policy_id: {0}")]
    UnknownPolicy(String),

    #[error("Policy {0} missing file path")]
    MissingPolicyFile(String),

    #[error("Policy pack {path} policy_id mismatch: {found} != {expected}")]
    PolicyMismatch {
        path: String,
        found: String,
        expected: String,
    },

    #[error("Matrix not found: {0}")]
    MatrixNotFound(String),

    #[error("Matrix not found for step: {0}")]
    StepMatrixNotFound(String),

    #[error("Unknown source layout: {0}")]
    UnknownSourceLayout(String),

    #[error("Unknown target layout: {0}")]
    UnknownTargetLayout(String),

    #[error("Unknown target speaker {speaker} in {matrix_id}")]
    UnknownTargetSpeaker { speaker: String, matrix_id: String },

    #[error("Unknown source speaker {speaker} in {matrix_id}")]
    UnknownSourceSpeaker { speaker: String, matrix_id: String },

    #[error("Matrix composition requires matching mid speaker order")]
    MidSpeakerMismatch,

    #[error("Matrix composition requires non-empty speaker lists")]
    EmptySpeakerList,

    #[error("No default policy for source layout {0}")]
    NoDefaultPolicy(String),

    #[error("No conversion or composition path for {from} -> {to}")]
    NoConversionPath { from: String, to: String },

    #[error("Composition path missing steps")]
    EmptyComposition,

    #[error("Step {matrix_id} {side} layout mismatch")]
    StepLayoutMismatch {
        matrix_id: String,
        side: &'static str,
    },

    #[error("Invalid matrix: {0}")]
    InvalidMatrix(String),

    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),
}

/// Result type for downmix operations
pub type DownmixResult<T> = Result<T, DownmixError>;
