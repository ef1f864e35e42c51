//! Error types for nix-build-backend

use thiserror::Error;

/// Errors that can occur while driving the Nix build backend
#[derive(Error, Debug)]
pub enum NixError {
    /// Nix command not found
    #[error("Nix is not installed or not in PATH")]
    NixNotFound,

    /// Batch evaluation of the requested attributes failed.
    ///
    /// `input` is the attribute list that was handed to the evaluator; it is
    /// kept on disk for inspection.
    #[error("evaluation failed: `{command}` ({message}); input kept at {input}")]
    Evaluation {
        command: String,
        input: String,
        message: String,
    },

    /// Dry-run output contained a line the plan grammar does not know
    #[error("dry-run parsing failed: '{line}'")]
    PlanParse { line: String },

    /// The build step itself could not be started
    #[error("failed to invoke build: {0}")]
    BuildInvocation(String),

    /// A nix command ran but exited unsuccessfully
    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}
