//! End-to-end review of one change on one system.
//!
//! Resolver → pre-build filters → build → post-build filters → logs →
//! CI cross-reference → report.

use crate::artifacts::{link_results, write_logs, ArtifactDirs};
use crate::builder::BuildInvoker;
use crate::config::ReviewPolicy;
use crate::crossref::CrossReferencer;
use crate::filter::FilterPipeline;
use crate::report::{Report, ReportCompiler, ReviewContext};
use crate::resolver::AttrResolver;
use crate::Result;
use nix_build_backend::BuildBackend;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument};

/// Per-run inputs.
#[derive(Debug, Clone)]
pub struct ReviewOptions {
    /// Checkout to evaluate and build against
    pub nixpkgs: PathBuf,
    /// Scratch directory for rendered expressions
    pub work_dir: PathBuf,
    pub system: String,
    /// Base branch of the change; selects the CI channel
    pub base_branch: Option<String>,
    pub extra_build_args: Vec<String>,
    /// Where logs and result links go; nothing is written when unset
    pub output: Option<ArtifactDirs>,
    /// Where `report.md` and `report.json` go
    pub report_dir: Option<PathBuf>,
    pub context: ReviewContext,
}

impl ReviewOptions {
    pub fn new(
        nixpkgs: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        system: impl Into<String>,
    ) -> Self {
        ReviewOptions {
            nixpkgs: nixpkgs.into(),
            work_dir: work_dir.into(),
            system: system.into(),
            base_branch: None,
            extra_build_args: Vec::new(),
            output: None,
            report_dir: None,
            context: ReviewContext::default(),
        }
    }

    /// Write logs, links and the report below `root`.
    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        self.output = Some(ArtifactDirs::under(&root));
        self.report_dir = Some(root);
        self
    }
}

/// The review pipeline, wired against one backend.
pub struct Review {
    backend: Arc<dyn BuildBackend>,
    policy: ReviewPolicy,
    pre_build: FilterPipeline,
    post_build: FilterPipeline,
    cross_referencer: Option<CrossReferencer>,
}

impl Review {
    pub fn new(backend: Arc<dyn BuildBackend>, policy: ReviewPolicy) -> Self {
        Self {
            backend,
            policy,
            pre_build: FilterPipeline::default(),
            post_build: FilterPipeline::default(),
            cross_referencer: None,
        }
    }

    /// Stages run before and after building
    pub fn with_filters(mut self, pre_build: FilterPipeline, post_build: FilterPipeline) -> Self {
        self.pre_build = pre_build;
        self.post_build = post_build;
        self
    }

    pub fn with_cross_referencer(mut self, cross_referencer: CrossReferencer) -> Self {
        self.cross_referencer = Some(cross_referencer);
        self
    }

    /// Run the whole pipeline for `names`.
    ///
    /// Fatal errors (evaluation, plan parsing, filter stages, build
    /// invocation) abort the run. CI lookups never do.
    #[instrument(skip_all, fields(system = %opts.system, count = names.len()))]
    pub async fn run(&self, names: &BTreeSet<String>, opts: &ReviewOptions) -> Result<Report> {
        let resolver = AttrResolver::new(Arc::clone(&self.backend), self.policy.denylist.clone());
        let attrs = resolver.resolve(names, &opts.nixpkgs).await?;

        let attrs = self.pre_build.run(attrs, None).await?;

        let invoker = BuildInvoker::new(
            Arc::clone(&self.backend),
            opts.nixpkgs.clone(),
            opts.work_dir.clone(),
        )
        .with_extra_args(opts.extra_build_args.clone())
        .with_timeout_heuristic(self.policy.timeout_heuristic);
        let build = invoker.run(attrs).await?;

        let mut attrs = self
            .post_build
            .run(build.attrs, Some(&build.plan.to_build))
            .await?;

        if let Some(dirs) = &opts.output {
            write_logs(&mut attrs, self.backend.as_ref(), dirs).await?;
        }

        let mut compiler = ReportCompiler::new(Arc::clone(&self.backend), self.policy.clone());
        if let Some(xref) = &self.cross_referencer {
            compiler = compiler.with_cross_referencer(xref.clone());
        }
        let channel = self.policy.channel(opts.base_branch.as_deref());
        let report = compiler
            .compile(&opts.system, channel, attrs, opts.context.clone())
            .await;

        if let Some(dir) = &opts.report_dir {
            report.write(dir).await?;
        }
        if let Some(dirs) = &opts.output {
            link_results(&report, dirs).await?;
        }

        info!(succeeded = report.succeeded(), "Review complete");
        Ok(report)
    }
}
