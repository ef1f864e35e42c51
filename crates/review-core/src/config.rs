//! Review policy and environment configuration.
//!
//! Policy data (denylist, default channel, success criteria) is injected
//! rather than read from globals so the pipeline stays testable.

use crate::crossref::DEFAULT_CONCURRENCY;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Environment variable listing pre-build filter stages (colon-separated).
pub const PRE_BUILD_FILTER_ENV: &str = "NIX_REVIEW_PRE_BUILD_FILTER";

/// Environment variable listing post-build check stages (colon-separated).
pub const POST_BUILD_CHECKS_ENV: &str = "NIX_REVIEW_CHECKS";

/// Environment variable overriding the Hydra base URL.
pub const HYDRA_URL_ENV: &str = "HYDRA_URL";

/// Attributes known to break evaluation-driven review builds.
pub const DEFAULT_DENYLIST: [&str; 4] = [
    "tests.nixos-functions.nixos-test",
    "tests.nixos-functions.nixosTest-test",
    "tests.writers",
    "appimage-run-tests",
];

/// Which failure buckets count against a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessCriteria {
    /// Any failure, new or pre-existing, fails the report
    #[default]
    Strict,
    /// Only failures introduced by the change fail the report
    Lenient,
}

/// Policy knobs for a review run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewPolicy {
    /// Attribute names that are never built
    pub denylist: BTreeSet<String>,
    /// Channel used for CI lookups when the change has no base branch
    pub default_channel: String,
    /// Attribute prefix identifying system-level tests
    pub test_prefix: String,
    /// Success predicate for the report
    pub success: SuccessCriteria,
    /// Treat dependency failures as timeouts when any build timed out
    pub timeout_heuristic: bool,
    /// Names shown for long buckets (broken, skipped) before eliding
    pub show_limit: usize,
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        ReviewPolicy {
            denylist: DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(),
            default_channel: "unstable".to_string(),
            test_prefix: "nixosTests.".to_string(),
            success: SuccessCriteria::Strict,
            timeout_heuristic: true,
            show_limit: 10,
        }
    }
}

impl ReviewPolicy {
    /// Channel for CI lookups, preferring the change's base branch.
    pub fn channel<'a>(&'a self, base_branch: Option<&'a str>) -> &'a str {
        base_branch
            .filter(|b| !b.is_empty())
            .unwrap_or(self.default_channel.as_str())
    }
}

/// Split a colon-separated stage list, dropping empty entries.
pub fn parse_stage_list(value: &str) -> Vec<String> {
    value
        .split(':')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// External filter stages, in the order they run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Stages run before building
    pub pre_build: Vec<String>,
    /// Stages run after building
    pub post_build: Vec<String>,
}

impl FilterConfig {
    /// Read stage lists from the environment.
    pub fn from_env() -> Self {
        FilterConfig {
            pre_build: std::env::var(PRE_BUILD_FILTER_ENV)
                .map(|v| parse_stage_list(&v))
                .unwrap_or_default(),
            post_build: std::env::var(POST_BUILD_CHECKS_ENV)
                .map(|v| parse_stage_list(&v))
                .unwrap_or_default(),
        }
    }
}

/// Hydra connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HydraConfig {
    /// Hydra base URL
    pub base_url: String,
    /// Maximum requests in flight
    pub concurrency: usize,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for HydraConfig {
    fn default() -> Self {
        HydraConfig {
            base_url: "https://hydra.nixos.org".to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            request_timeout: Duration::from_secs(20),
        }
    }
}

impl HydraConfig {
    /// Defaults, with the base URL taken from `HYDRA_URL` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(HYDRA_URL_ENV) {
            if !url.is_empty() {
                config.base_url = url.trim_end_matches('/').to_string();
            }
        }
        config
    }

    /// Set the number of concurrent requests
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}
