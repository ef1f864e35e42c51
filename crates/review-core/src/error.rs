//! Error taxonomy for the review pipeline.
//!
//! Anything that would corrupt classification is fatal and propagates out of
//! [`crate::Review::run`]. [`ReviewError::CiQuery`] is the exception: it is
//! produced per target and absorbed by the cross-referencer.

use nix_build_backend::NixError;

/// Review pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    /// Evaluation, dry-run parsing or build invocation failed.
    #[error(transparent)]
    Nix(#[from] NixError),

    #[error("filter stage `{stage}` failed: {message}")]
    FilterStage { stage: String, message: String },

    #[error("CI status query for {attr} failed: {message}")]
    CiQuery { attr: String, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReviewError {
    pub(crate) fn filter_stage(stage: &str, message: impl ToString) -> Self {
        ReviewError::FilterStage {
            stage: stage.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn ci_query(attr: &str, message: impl ToString) -> Self {
        ReviewError::CiQuery {
            attr: attr.to_string(),
            message: message.to_string(),
        }
    }
}

/// Result type for review operations.
pub type Result<T> = std::result::Result<T, ReviewError>;
