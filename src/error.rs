//! Error taxonomy for the valuation engine.
//!
//! Training and prediction failures are deliberately kept distinct:
//! a request made before any model exists (`ModelUnavailable`) must be
//! distinguishable from a computation failure, which the service recovers
//! from via the rule-based fallback estimator.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The historical sales dataset is absent. Fatal for a training run,
    /// never for the process.
    #[error("dataset not found at {path}: cannot train without historical sales data")]
    DatasetMissing { path: String },

    /// A training run is already active; concurrent runs are rejected,
    /// not queued.
    #[error("a training run is already in progress")]
    TrainingInProgress,

    /// Prediction requested before any model has been trained or loaded.
    #[error("no trained model available; train models before requesting predictions")]
    ModelUnavailable,

    /// A persisted artifact exists on disk but cannot be trusted
    /// (unparsable metadata, truncated or placeholder parameter file).
    #[error("model artifact {name} is corrupt or a placeholder: {reason}")]
    ArtifactCorrupt { name: String, reason: String },

    /// Feature construction or model invocation failed. The prediction
    /// service converts this into a fallback estimate; it never reaches
    /// the caller of `predict_price`.
    #[error("prediction computation failed: {0}")]
    Prediction(String),

    /// Request was missing a required field.
    #[error("invalid valuation request: {0}")]
    InvalidRequest(String),

    #[error("dataset is empty after cleaning; nothing to train on")]
    EmptyDataset,

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl Error {
    /// True for conditions that should be reported to the caller as a
    /// structured failure rather than recovered from.
    pub fn is_model_unavailable(&self) -> bool {
        matches!(self, Error::ModelUnavailable)
    }
}
