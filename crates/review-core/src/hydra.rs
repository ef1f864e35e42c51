//! Hydra build status lookups.
//!
//! Hydra has no JSON endpoint for "latest build of job X", so the job page
//! is fetched and its result table read. A page without a table means the
//! job was not evaluated upstream (unfree, removed, ...); its alert text is
//! kept as the status.

use crate::config::HydraConfig;
use crate::error::ReviewError;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

const UNKNOWN_HYDRA_ERROR: &str =
    "Unknown Hydra Error, check the package with --url to find out what went wrong";

/// Latest upstream result for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStatus {
    /// Whether the upstream build succeeded
    pub success: bool,
    /// Hydra's status text ("Succeeded", "Failed", alert text, ...)
    pub status: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub build_id: Option<String>,
    pub build_url: Option<String>,
    /// Job name as shown by Hydra
    pub name: Option<String>,
    pub arch: Option<String>,
}

impl BuildStatus {
    fn not_evaluated(status: String) -> Self {
        BuildStatus {
            success: false,
            status,
            timestamp: None,
            build_id: None,
            build_url: None,
            name: None,
            arch: None,
        }
    }
}

/// Source of upstream CI status.
#[async_trait]
pub trait BuildStatusProvider: Send + Sync {
    /// Latest status of `attr` on `system` in `jobset`.
    ///
    /// `Ok(None)` means the provider has no data (e.g. non-200 response).
    async fn build_status(
        &self,
        jobset: &str,
        attr: &str,
        system: &str,
    ) -> Result<Option<BuildStatus>>;
}

/// Map a channel or branch name to a Hydra jobset.
pub fn guess_jobset(channel: &str) -> String {
    match channel {
        "master" => "nixpkgs/trunk".to_string(),
        "unstable" => "nixos/trunk-combined".to_string(),
        "staging" => "nixos/staging".to_string(),
        c if c.starts_with(|ch: char| ch.is_ascii_digit()) => format!("nixos/release-{c}"),
        c => c.to_string(),
    }
}

macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect("static regex is valid"))
        }
    };
}

static_regex!(tbody_re, r"(?is)<tbody[^>]*>(.*?)</tbody>");
static_regex!(row_re, r"(?is)<tr[^>]*>(.*?)</tr>");
static_regex!(cell_re, r"(?is)<td[^>]*>(.*?)</td>");
static_regex!(alert_re, r#"(?is)<div[^>]*class="[^"]*\balert\b[^"]*"[^>]*>(.*?)</div>"#);
static_regex!(tag_re, r"(?s)<[^>]*>");
static_regex!(title_re, r#"(?i)title="([^"]*)""#);
static_regex!(link_re, r#"(?is)<a[^>]*href="([^"]*)"[^>]*>(.*?)</a>"#);
static_regex!(href_re, r#"(?i)href="([^"]*)""#);
static_regex!(datetime_re, r#"(?i)datetime="([^"]*)""#);
static_regex!(tt_re, r"(?is)<tt[^>]*>(.*?)</tt>");

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn inner_text(html: &str) -> String {
    decode_entities(&tag_re().replace_all(html, ""))
}

fn capture<'a>(re: &Regex, haystack: &'a str, group: usize) -> Option<&'a str> {
    re.captures(haystack)
        .and_then(|c| c.get(group))
        .map(|m| m.as_str())
}

/// Read the latest result out of a Hydra job page.
///
/// Errors describe why the page could not be understood.
pub fn parse_build_page(html: &str) -> std::result::Result<BuildStatus, String> {
    let Some(tbody) = capture(tbody_re(), html, 1) else {
        let alert = capture(alert_re(), html, 1)
            .map(|a| inner_text(a).replace('\n', " ").trim().to_string())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| UNKNOWN_HYDRA_ERROR.to_string());
        return Ok(BuildStatus::not_evaluated(alert));
    };

    for row in row_re().captures_iter(tbody) {
        let row = row.get(1).map(|m| m.as_str()).unwrap_or_default();
        let cells: Vec<&str> = cell_re()
            .captures_iter(row)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();

        let [status, build, timestamp, name, arch] = cells.as_slice() else {
            let navigation = cells
                .first()
                .and_then(|c| capture(href_re(), c, 1))
                .is_some_and(|href| href.ends_with("/all"));
            if navigation {
                continue;
            }
            return Err(format!("unexpected result row with {} cells", cells.len()));
        };

        let status = capture(title_re(), status, 1)
            .map(decode_entities)
            .ok_or("result row without status")?;
        let (build_url, build_id) = match link_re().captures(build) {
            Some(c) => (
                c.get(1).map(|m| decode_entities(m.as_str())),
                c.get(2).map(|m| inner_text(m.as_str()).trim().to_string()),
            ),
            None => (None, None),
        };
        let timestamp = capture(datetime_re(), timestamp, 1)
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc));
        let arch = capture(tt_re(), arch, 1).map(|a| inner_text(a).trim().to_string());

        return Ok(BuildStatus {
            success: status == "Succeeded",
            status,
            timestamp,
            build_id,
            build_url,
            name: Some(inner_text(name).trim().to_string()),
            arch,
        });
    }

    Err("result table has no rows".to_string())
}

/// Hydra HTTP client
pub struct HydraClient {
    config: HydraConfig,
    http_client: reqwest::Client,
}

impl HydraClient {
    pub fn new(config: HydraConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("nix-review/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        HydraClient {
            config,
            http_client,
        }
    }

    pub fn config(&self) -> &HydraConfig {
        &self.config
    }

    /// URL of the job page for an attribute.
    pub fn job_url(&self, jobset: &str, attr: &str, system: &str) -> String {
        format!(
            "{}/job/{}/nixpkgs.{}.{}",
            self.config.base_url.trim_end_matches('/'),
            jobset,
            attr,
            system
        )
    }
}

#[async_trait]
impl BuildStatusProvider for HydraClient {
    async fn build_status(
        &self,
        jobset: &str,
        attr: &str,
        system: &str,
    ) -> Result<Option<BuildStatus>> {
        let url = self.job_url(jobset, attr, system);
        debug!(%url, "Querying Hydra");

        let response = self
            .http_client
            .get(&url)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| ReviewError::ci_query(attr, e))?;

        if response.status() != reqwest::StatusCode::OK {
            debug!(%url, status = %response.status(), "No Hydra data");
            return Ok(None);
        }

        let body = response
            .text()
            .await
            .map_err(|e| ReviewError::ci_query(attr, e))?;
        parse_build_page(&body)
            .map(Some)
            .map_err(|e| ReviewError::ci_query(attr, e))
    }
}
