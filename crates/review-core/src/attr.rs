//! The review target model.
//!
//! An [`Attr`] is one named buildable unit. Evaluation facts are set once by
//! the resolver; annotation fields are written by filter stages and the build
//! invoker. The serialized form is the wire format of the filter stage
//! protocol, so field names follow that protocol (`path`, `drv_path`, ...).

use nix_build_backend::BuildBackend;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// One review target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attr {
    /// Attribute name, unique within a resolution pass
    pub name: String,

    /// Whether the name resolves at all
    pub exists: bool,

    /// Marked unbuildable by meta
    pub broken: bool,

    /// Excluded by the policy denylist
    #[serde(default)]
    pub blacklisted: bool,

    /// Set by filter stages
    #[serde(default)]
    pub skipped: bool,

    /// Output store path
    #[serde(rename = "path")]
    pub output_path: Option<String>,

    /// Derivation store path
    #[serde(rename = "drv_path")]
    pub recipe_id: Option<String>,

    /// `file:line` relative to the checkout root
    #[serde(rename = "position")]
    pub source_position: Option<String>,

    /// Where the build log was published
    #[serde(default)]
    pub log_url: Option<String>,

    /// Advisories contributed by filter stages
    #[serde(default)]
    pub check_report: Vec<String>,

    /// Other names that share this output
    #[serde(default)]
    pub aliases: Vec<String>,

    #[serde(default)]
    pub timed_out: bool,

    #[serde(default, rename = "build_err_msg")]
    pub build_error_text: Option<String>,

    #[serde(skip)]
    path_verified: OnceLock<bool>,
}

impl Attr {
    /// An existing, unannotated target with no store paths yet.
    pub fn new(name: impl Into<String>) -> Self {
        Attr {
            name: name.into(),
            exists: true,
            ..Default::default()
        }
    }

    /// Set the output and derivation store paths
    pub fn with_store_paths(mut self, output_path: &str, recipe_id: &str) -> Self {
        self.output_path = Some(output_path.to_string());
        self.recipe_id = Some(recipe_id.to_string());
        self
    }

    /// Whether the build invoker should select this target.
    pub fn is_buildable(&self) -> bool {
        self.exists && !(self.broken || self.blacklisted || self.skipped)
    }

    /// Whether this is a system-level test.
    pub fn is_test(&self, prefix: &str) -> bool {
        self.name.starts_with(prefix)
    }

    /// Whether the output actually landed in the store.
    ///
    /// Asks the backend once and memoizes the answer. A target without an
    /// output path, or one a filter skipped, was never built.
    pub fn was_built(&self, backend: &dyn BuildBackend) -> bool {
        let Some(path) = self.output_path.as_deref() else {
            return false;
        };
        if self.skipped {
            return false;
        }
        *self.path_verified.get_or_init(|| backend.verify_path(path))
    }
}
