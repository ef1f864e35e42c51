//! The build backend seam
//!
//! The review pipeline only consumes these capabilities; [`crate::NixBackend`]
//! provides them by shelling out to nix, tests provide them in memory.

use crate::plan::DryRunPlan;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Evaluation facts for one requested attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatedAttr {
    /// Requested attribute name
    pub name: String,
    /// Whether the name resolves at all
    pub exists: bool,
    /// Marked unbuildable by meta or failed to evaluate
    pub broken: bool,
    /// Output store path
    pub path: Option<String>,
    /// Derivation store path
    #[serde(rename = "drvPath")]
    pub drv_path: Option<String>,
    /// Absolute `file:line` of the definition
    pub position: Option<String>,
}

/// Outcome of a `--keep-going` build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutput {
    /// Exit code (0 = every target built)
    pub exit_code: i32,
    /// Combined diagnostic text
    pub stderr: String,
}

impl BuildOutput {
    /// Whether every selected target built.
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Capabilities the review pipeline needs from a build tool.
#[async_trait]
pub trait BuildBackend: Send + Sync {
    /// Evaluate all `names` against `nixpkgs` in one batch.
    async fn evaluate(&self, names: &[String], nixpkgs: &Path) -> Result<Vec<EvaluatedAttr>>;

    /// Report what building `expression` would fetch and build.
    async fn dry_run(&self, expression: &Path) -> Result<DryRunPlan>;

    /// Build `expression`, continuing past individual failures.
    ///
    /// Failing targets are reported through [`BuildOutput`]; an error means
    /// the build could not be started at all.
    async fn build(&self, expression: &Path, extra_args: &[String]) -> Result<BuildOutput>;

    /// Whether `path` is valid, intact store content.
    fn verify_path(&self, path: &str) -> bool;

    /// Build log for a derivation, falling back to its output path.
    async fn build_log(&self, drv_path: &str, out_path: Option<&str>) -> Option<String>;
}
