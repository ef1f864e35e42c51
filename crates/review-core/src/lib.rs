//! nix-review core library
//!
//! The review pipeline: resolve requested attributes, run filter stages,
//! build, cross-reference failures with Hydra and compile a report.
//! Talking to nix is delegated to [`nix_build_backend`].

pub mod artifacts;
pub mod attr;
pub mod builder;
pub mod config;
pub mod crossref;
pub mod error;
pub mod filter;
pub mod hydra;
pub mod report;
pub mod resolver;
pub mod review;
pub mod telemetry;

pub use artifacts::{link_results, write_logs, ArtifactDirs};
pub use attr::Attr;
pub use builder::{apply_diagnostics, BuildInvoker, BuildRun, BUILD_EXPRESSION};
pub use config::{
    parse_stage_list, FilterConfig, HydraConfig, ReviewPolicy, SuccessCriteria, DEFAULT_DENYLIST,
    HYDRA_URL_ENV, POST_BUILD_CHECKS_ENV, PRE_BUILD_FILTER_ENV,
};
pub use crossref::{partition_failures, CiPartition, CrossReferencer, DEFAULT_CONCURRENCY};
pub use error::{Result, ReviewError};
pub use filter::{parse_stage_output, CommandStage, FilterPipeline, FilterStage, FnStage, StageInput};
pub use hydra::{guess_jobset, parse_build_page, BuildStatus, BuildStatusProvider, HydraClient};
pub use report::{
    classify, Bucket, Report, ReportArtifact, ReportCompiler, ReviewContext, REPORT_JSON,
    REPORT_MARKDOWN,
};
pub use resolver::{dedup_by_output, AttrResolver};
pub use review::{Review, ReviewOptions};
pub use telemetry::{init_tracing, LOG_FILTER_ENV};

pub use nix_build_backend::{BuildBackend, NixBackend, NixError};
