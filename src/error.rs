//! Error types for the STANDS generator crate

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, StandsError>;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum StandsError {
    /// Invalid model or runtime configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Tensor shapes do not satisfy an operation's precondition
    #[error("Shape mismatch in {context}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<i64>,
        got: Vec<i64>,
    },

    /// Graph block, gene features and patches disagree on the number of entities
    #[error("Entity count mismatch: graph={graph:?}, features={features}, patches={patches:?}")]
    EntityCountMismatch {
        graph: Option<i64>,
        features: i64,
        patches: Option<i64>,
    },

    /// Forward mode not served by the constructed extractor
    #[error("Forward mode {mode} is not supported by a {modality} generator")]
    UnsupportedMode {
        mode: &'static str,
        modality: &'static str,
    },

    /// An operation received a batch with no entities
    #[error("Empty batch in {0}")]
    EmptyBatch(&'static str),

    /// Batch ids outside the range the style block was built for
    #[error("Batch ids must lie in [0, {n_batch}), got range [{lo}, {hi}]")]
    BatchIdOutOfRange { n_batch: i64, lo: i64, hi: i64 },

    /// A batch is missing a piece the selected mode needs
    #[error("Missing input: {0}")]
    MissingInput(&'static str),

    /// Device string could not be parsed
    #[error("Invalid device: {0}")]
    InvalidDevice(String),

    /// Pretrained weights could not be merged into the model
    #[error("Failed to load weights from {}: {reason}", path.display())]
    WeightLoad { path: PathBuf, reason: String },

    /// Invalid graph structure
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    /// libtorch error
    #[error("Torch error: {0}")]
    Tch(#[from] tch::TchError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// ndarray shape error
    #[error("Array shape error: {0}")]
    Array(#[from] ndarray::ShapeError),
}

impl StandsError {
    /// Build a shape mismatch error from two tensor sizes
    pub fn shape(context: &'static str, expected: &[i64], got: &[i64]) -> Self {
        StandsError::ShapeMismatch {
            context,
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }
}
