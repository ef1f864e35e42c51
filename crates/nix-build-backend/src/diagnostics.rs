//! Correlation of `nix build` diagnostics with derivations
//!
//! `nix build --keep-going` reports failures as free text. Two kinds of line
//! matter for classification: timeouts and dependency failures. Both carry
//! the derivation path as a (possibly quoted) token.

use crate::log::strip_ansi_colors;
use crate::plan::STORE_PREFIX;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Trigger for a derivation that exceeded the build timeout
pub const TIMEOUT_TRIGGER: &str = "timed out after";

/// Trigger for a derivation whose inputs failed to build
pub const FAILED_DEPENDENCIES_TRIGGER: &str = "dependencies couldn't be built";

const TOKEN_PUNCTUATION: &[char] = &['\'', '"', '`', ':', ',', '\u{2018}', '\u{2019}'];

/// Failures extracted from one build's diagnostic stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDiagnostics {
    /// Derivation path -> the diagnostic line that reported the timeout
    pub timed_out: BTreeMap<String, String>,
    /// Derivations reported as having failed dependencies, in order
    pub failed_dependencies: Vec<String>,
}

impl BuildDiagnostics {
    /// Whether any derivation in the run timed out.
    pub fn any_timeout(&self) -> bool {
        !self.timed_out.is_empty()
    }
}

/// Extract the first store path token from a diagnostic line.
pub fn store_path_token(line: &str) -> Option<String> {
    line.split_whitespace()
        .find(|token| token.contains(STORE_PREFIX))
        .map(|token| token.trim_matches(TOKEN_PUNCTUATION).to_string())
        .filter(|token| token.starts_with(STORE_PREFIX))
}

/// Scan build diagnostics for timeouts and dependency failures.
pub fn correlate_diagnostics(stderr: &str) -> BuildDiagnostics {
    let mut diagnostics = BuildDiagnostics::default();

    for raw in stderr.lines() {
        let line = strip_ansi_colors(raw);
        if line.contains(FAILED_DEPENDENCIES_TRIGGER) {
            if let Some(drv) = store_path_token(&line) {
                diagnostics.failed_dependencies.push(drv);
            }
        }
        if line.contains(TIMEOUT_TRIGGER) {
            if let Some(drv) = store_path_token(&line) {
                diagnostics.timed_out.insert(drv, line.trim().to_string());
            }
        }
    }

    diagnostics
}
