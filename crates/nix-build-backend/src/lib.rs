//! nix-build-backend: the build tool behind nix-review
//!
//! This crate owns everything that talks to nix or interprets its text:
//! batch evaluation of attribute names, the review build expression,
//! dry-run planning, `--keep-going` builds, store path verification and
//! build logs.
//!
//! The [`BuildBackend`] trait is the seam the review pipeline depends on;
//! [`NixBackend`] implements it on top of the nix command line.

pub mod backend;
pub mod diagnostics;
pub mod error;
pub mod expression;
pub mod log;
pub mod nix;
pub mod plan;

pub use backend::{BuildBackend, BuildOutput, EvaluatedAttr};
pub use diagnostics::{correlate_diagnostics, store_path_token, BuildDiagnostics};
pub use error::NixError;
pub use expression::{escape_attr, render_build_expression, EVAL_ATTRS_NIX};
pub use log::{strip_ansi_colors, truncate_log};
pub use nix::{is_nix_available, parse_eval_output, NixBackend};
pub use plan::{parse_dry_run, DryRunPlan, STORE_PREFIX};

/// Result type for nix-build-backend operations
pub type Result<T> = std::result::Result<T, NixError>;
