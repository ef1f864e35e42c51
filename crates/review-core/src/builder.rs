//! Build invocation and diagnostic correlation.

use crate::attr::Attr;
use crate::Result;
use nix_build_backend::{
    correlate_diagnostics, render_build_expression, BuildBackend, BuildDiagnostics, DryRunPlan,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// File name of the rendered build expression inside the work directory.
pub const BUILD_EXPRESSION: &str = "build.nix";

/// Everything a build run produced.
#[derive(Debug, Clone, Default)]
pub struct BuildRun {
    /// All targets, annotated with timeout and failure evidence
    pub attrs: Vec<Attr>,
    /// Dry-run plan for the selected targets
    pub plan: DryRunPlan,
}

/// Drives the backend for the targets that survived the pre-build filters.
pub struct BuildInvoker {
    backend: Arc<dyn BuildBackend>,
    nixpkgs: PathBuf,
    work_dir: PathBuf,
    extra_args: Vec<String>,
    timeout_heuristic: bool,
}

impl BuildInvoker {
    /// `work_dir` receives the rendered build expression.
    pub fn new(backend: Arc<dyn BuildBackend>, nixpkgs: PathBuf, work_dir: PathBuf) -> Self {
        Self {
            backend,
            nixpkgs,
            work_dir,
            extra_args: Vec::new(),
            timeout_heuristic: true,
        }
    }

    /// Extra arguments appended to the build command
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Toggle the "any timeout explains dependency failures" guess
    pub fn with_timeout_heuristic(mut self, enabled: bool) -> Self {
        self.timeout_heuristic = enabled;
        self
    }

    /// Plan and build every buildable target.
    ///
    /// Targets that are not selected pass through untouched. Individual
    /// build failures are recorded on the targets; only a failure to run the
    /// backend at all is an error.
    pub async fn run(&self, mut attrs: Vec<Attr>) -> Result<BuildRun> {
        let selected: Vec<String> = attrs
            .iter()
            .filter(|a| a.is_buildable())
            .map(|a| a.name.clone())
            .collect();

        if selected.is_empty() {
            info!("Nothing to be built.");
            return Ok(BuildRun {
                attrs,
                ..Default::default()
            });
        }

        tokio::fs::create_dir_all(&self.work_dir).await?;
        let expression = self.work_dir.join(BUILD_EXPRESSION);
        tokio::fs::write(&expression, render_build_expression(&self.nixpkgs, &selected)).await?;

        let plan = self.backend.dry_run(&expression).await?;
        info!(
            selected = selected.len(),
            to_build = plan.to_build.len(),
            to_fetch = plan.to_fetch.len(),
            "Dry run complete"
        );

        let output = self.backend.build(&expression, &self.extra_args).await?;
        if !output.succeeded() {
            warn!(exit_code = output.exit_code, "Build finished with failures");
        }

        let diagnostics = correlate_diagnostics(&output.stderr);
        apply_diagnostics(&mut attrs, &diagnostics, &output.stderr, self.timeout_heuristic);

        Ok(BuildRun {
            attrs,
            plan,
        })
    }
}

/// Record timeouts and dependency failures on the targets that own them.
///
/// A timed-out derivation gets its diagnostic line; a derivation with
/// failed dependencies gets the whole diagnostic text. With `heuristic` on,
/// a dependency failure in a run that saw any timeout is also marked as
/// timed out: without walking the build graph the timeout is the likely
/// cause, but it is only a guess.
pub fn apply_diagnostics(
    attrs: &mut [Attr],
    diagnostics: &BuildDiagnostics,
    stderr: &str,
    heuristic: bool,
) {
    let by_recipe: HashMap<String, usize> = attrs
        .iter()
        .enumerate()
        .filter_map(|(i, a)| a.recipe_id.clone().map(|r| (r, i)))
        .collect();

    for (drv, line) in &diagnostics.timed_out {
        if let Some(&i) = by_recipe.get(drv) {
            let attr = &mut attrs[i];
            attr.timed_out = true;
            attr.build_error_text = Some(line.clone());
        }
    }

    for drv in &diagnostics.failed_dependencies {
        if let Some(&i) = by_recipe.get(drv) {
            let attr = &mut attrs[i];
            attr.build_error_text = Some(stderr.to_string());
            if heuristic && diagnostics.any_timeout() {
                attr.timed_out = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STDERR: &str = "error: build of '/nix/store/xxx.drv' timed out after 3600 seconds\n\
error: cannot build derivation '/nix/store/yyy.drv': 1 dependencies couldn't be built\n";

    fn attrs() -> Vec<Attr> {
        vec![
            Attr::new("slow").with_store_paths("/nix/store/xxx", "/nix/store/xxx.drv"),
            Attr::new("downstream").with_store_paths("/nix/store/yyy", "/nix/store/yyy.drv"),
            Attr::new("fine").with_store_paths("/nix/store/zzz", "/nix/store/zzz.drv"),
        ]
    }

    #[test]
    fn test_timeout_is_attributed_by_recipe() {
        let mut attrs = attrs();
        let diagnostics = correlate_diagnostics(STDERR);
        apply_diagnostics(&mut attrs, &diagnostics, STDERR, true);

        assert!(attrs[0].timed_out);
        assert_eq!(
            attrs[0].build_error_text.as_deref(),
            Some("error: build of '/nix/store/xxx.drv' timed out after 3600 seconds")
        );
        assert!(!attrs[2].timed_out);
        assert!(attrs[2].build_error_text.is_none());
    }

    #[test]
    fn test_heuristic_marks_dependency_failure_as_timeout() {
        let mut attrs = attrs();
        let diagnostics = correlate_diagnostics(STDERR);
        apply_diagnostics(&mut attrs, &diagnostics, STDERR, true);

        assert!(attrs[1].timed_out);
        assert_eq!(attrs[1].build_error_text.as_deref(), Some(STDERR));
    }

    #[test]
    fn test_heuristic_disabled() {
        let mut attrs = attrs();
        let diagnostics = correlate_diagnostics(STDERR);
        apply_diagnostics(&mut attrs, &diagnostics, STDERR, false);

        assert!(attrs[0].timed_out);
        assert!(!attrs[1].timed_out);
        assert!(attrs[1].build_error_text.is_some());
    }

    #[test]
    fn test_dependency_failure_without_timeout() {
        let stderr = "error: cannot build derivation '/nix/store/yyy.drv': 1 dependencies couldn't be built\n";
        let mut attrs = attrs();
        apply_diagnostics(&mut attrs, &correlate_diagnostics(stderr), stderr, true);

        assert!(!attrs[1].timed_out);
        assert!(attrs[1].build_error_text.is_some());
    }

    #[test]
    fn test_unknown_recipe_is_ignored() {
        let stderr = "error: build of '/nix/store/other.drv' timed out after 10 seconds\n";
        let mut attrs = attrs();
        apply_diagnostics(&mut attrs, &correlate_diagnostics(stderr), stderr, true);
        assert!(attrs.iter().all(|a| !a.timed_out));
    }
}
