//! Outcome classification and report rendering.
//!
//! Every target lands in exactly one [`Bucket`], chosen by a fixed priority
//! chain. A [`Report`] is assembled once and never mutated; rendering is a
//! pure function of it, so the Markdown is stable across repeated renders.

use crate::attr::Attr;
use crate::config::{ReviewPolicy, SuccessCriteria};
use crate::crossref::{partition_failures, CiPartition, CrossReferencer};
use crate::hydra::BuildStatus;
use crate::Result;
use chrono::{DateTime, Utc};
use nix_build_backend::BuildBackend;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Markdown report file name.
pub const REPORT_MARKDOWN: &str = "report.md";
/// Machine-readable report file name.
pub const REPORT_JSON: &str = "report.json";

/// Mutually exclusive outcome categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Broken,
    Blacklisted,
    Skipped,
    TimedOut,
    NonExistent,
    Tests,
    FailedNew,
    FailedExisting,
    Built,
}

impl Bucket {
    /// All buckets, in classification priority order.
    pub const ALL: [Bucket; 9] = [
        Bucket::Broken,
        Bucket::Blacklisted,
        Bucket::Skipped,
        Bucket::TimedOut,
        Bucket::NonExistent,
        Bucket::Tests,
        Bucket::FailedNew,
        Bucket::FailedExisting,
        Bucket::Built,
    ];

    /// Section order of the persisted report.
    pub const MARKDOWN_ORDER: [Bucket; 9] = [
        Bucket::Broken,
        Bucket::NonExistent,
        Bucket::FailedNew,
        Bucket::FailedExisting,
        Bucket::Blacklisted,
        Bucket::Skipped,
        Bucket::TimedOut,
        Bucket::Tests,
        Bucket::Built,
    ];

    /// Section order of the console summary.
    pub const CONSOLE_ORDER: [Bucket; 9] = [
        Bucket::Broken,
        Bucket::NonExistent,
        Bucket::Blacklisted,
        Bucket::Skipped,
        Bucket::TimedOut,
        Bucket::FailedNew,
        Bucket::FailedExisting,
        Bucket::Tests,
        Bucket::Built,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::Broken => "broken",
            Bucket::Blacklisted => "blacklisted",
            Bucket::Skipped => "skipped",
            Bucket::TimedOut => "timed_out",
            Bucket::NonExistent => "non_existent",
            Bucket::Tests => "tests",
            Bucket::FailedNew => "failed_new",
            Bucket::FailedExisting => "failed_existing",
            Bucket::Built => "built",
        }
    }

    fn message(self) -> &'static str {
        match self {
            Bucket::Broken => "marked as broken and skipped",
            Bucket::Blacklisted => "blacklisted",
            Bucket::Skipped => "skipped due to time constraints",
            Bucket::TimedOut => "timed out",
            Bucket::NonExistent => {
                "present in ofBorgs evaluation, but not found in the checkout"
            }
            Bucket::Tests | Bucket::Built => "built",
            Bucket::FailedNew => "failed to build (new failures)",
            Bucket::FailedExisting => "failed to build (existing failures)",
        }
    }

    fn what(self) -> &'static str {
        match self {
            Bucket::Tests => "test",
            _ => "package",
        }
    }

    fn is_elided(self) -> bool {
        matches!(self, Bucket::Broken | Bucket::Skipped)
    }

    fn heading(self, count: usize) -> String {
        let plural = if count == 1 { "" } else { "s" };
        format!("{} {}{} {}", count, self.what(), plural, self.message())
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify one target.
///
/// First match wins. A target that was not built classifies as
/// [`Bucket::FailedNew`]; the cross-referencer may move it to
/// [`Bucket::FailedExisting`].
pub fn classify(attr: &Attr, test_prefix: &str, backend: &dyn BuildBackend) -> Bucket {
    if attr.broken {
        Bucket::Broken
    } else if attr.blacklisted {
        Bucket::Blacklisted
    } else if attr.skipped {
        Bucket::Skipped
    } else if attr.timed_out {
        Bucket::TimedOut
    } else if !attr.exists {
        Bucket::NonExistent
    } else if attr.is_test(test_prefix) {
        Bucket::Tests
    } else if !attr.was_built(backend) {
        Bucket::FailedNew
    } else {
        Bucket::Built
    }
}

/// Where a report came from, for its header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewContext {
    /// Command shown in the header
    pub command: String,
    /// Commit the change was reviewed at
    pub head_sha: Option<String>,
    /// Link to the change under review
    pub pr_url: Option<String>,
}

impl Default for ReviewContext {
    fn default() -> Self {
        ReviewContext {
            command: "nix-review".to_string(),
            head_sha: None,
            pr_url: None,
        }
    }
}

/// Serialized form of a report (`report.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportArtifact {
    pub system: String,
    pub generated_at: DateTime<Utc>,
    pub succeeded: bool,
    pub success_criteria: SuccessCriteria,
    /// Target names per bucket; empty buckets are omitted
    pub buckets: BTreeMap<String, Vec<String>>,
    pub check_reports: Vec<String>,
    pub ci_statuses: BTreeMap<String, BuildStatus>,
}

/// Classified outcome of one review run on one system.
#[derive(Debug, Clone)]
pub struct Report {
    system: String,
    attrs: Vec<Attr>,
    buckets: BTreeMap<Bucket, Vec<usize>>,
    check_reports: BTreeSet<String>,
    statuses: BTreeMap<String, BuildStatus>,
    success: SuccessCriteria,
    show_limit: usize,
    context: ReviewContext,
}

impl Report {
    /// Assemble a report from provisional classes and a CI partition.
    ///
    /// Each target is paired with its [`classify`] result. Targets
    /// classified as failed are placed by name according to `partition`;
    /// a failed target the partition does not mention stays new.
    pub fn new(
        system: impl Into<String>,
        classified: Vec<(Attr, Bucket)>,
        partition: CiPartition,
        policy: &ReviewPolicy,
        context: ReviewContext,
    ) -> Self {
        let existing: BTreeSet<&str> = partition
            .failed_existing
            .iter()
            .map(String::as_str)
            .collect();

        let (attrs, classes): (Vec<Attr>, Vec<Bucket>) = classified.into_iter().unzip();
        let mut buckets: BTreeMap<Bucket, Vec<usize>> =
            Bucket::ALL.iter().map(|b| (*b, Vec::new())).collect();
        for (i, (attr, class)) in attrs.iter().zip(&classes).enumerate() {
            let bucket = match class {
                Bucket::FailedNew | Bucket::FailedExisting if existing.contains(attr.name.as_str()) => {
                    Bucket::FailedExisting
                }
                Bucket::FailedExisting => Bucket::FailedNew,
                other => *other,
            };
            buckets.entry(bucket).or_default().push(i);
        }

        let check_reports = attrs
            .iter()
            .flat_map(|a| a.check_report.iter().cloned())
            .collect();

        Report {
            system: system.into(),
            attrs,
            buckets,
            check_reports,
            statuses: partition.statuses,
            success: policy.success,
            show_limit: policy.show_limit,
            context,
        }
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn attrs(&self) -> &[Attr] {
        &self.attrs
    }

    pub fn context(&self) -> &ReviewContext {
        &self.context
    }

    /// Targets in a bucket, in input order.
    pub fn bucket(&self, bucket: Bucket) -> Vec<&Attr> {
        self.buckets
            .get(&bucket)
            .map(|ids| ids.iter().map(|&i| &self.attrs[i]).collect())
            .unwrap_or_default()
    }

    /// Names of the targets in a bucket.
    pub fn names(&self, bucket: Bucket) -> Vec<&str> {
        self.bucket(bucket).into_iter().map(|a| a.name.as_str()).collect()
    }

    /// Bucket a target ended up in.
    pub fn bucket_of(&self, name: &str) -> Option<Bucket> {
        self.buckets.iter().find_map(|(bucket, ids)| {
            ids.iter()
                .any(|&i| self.attrs[i].name == name)
                .then_some(*bucket)
        })
    }

    /// Deduplicated, sorted advisories.
    pub fn check_reports(&self) -> &BTreeSet<String> {
        &self.check_reports
    }

    /// Upstream CI status for failed targets, where known.
    pub fn ci_statuses(&self) -> &BTreeMap<String, BuildStatus> {
        &self.statuses
    }

    pub fn built_packages(&self) -> Vec<String> {
        self.names(Bucket::Built)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Verdict under the policy's success criteria.
    pub fn succeeded(&self) -> bool {
        self.succeeded_with(self.success)
    }

    /// Verdict under explicit criteria.
    pub fn succeeded_with(&self, criteria: SuccessCriteria) -> bool {
        let new_ok = self.bucket(Bucket::FailedNew).is_empty();
        match criteria {
            SuccessCriteria::Strict => new_ok && self.bucket(Bucket::FailedExisting).is_empty(),
            SuccessCriteria::Lenient => new_ok,
        }
    }

    fn limit(&self, bucket: Bucket) -> Option<usize> {
        (bucket.is_elided() && self.show_limit > 0).then_some(self.show_limit)
    }

    /// Render the persisted Markdown document.
    pub fn markdown(&self) -> String {
        let mut out = format!("Result of `{}`", self.context.command);
        if let Some(sha) = &self.context.head_sha {
            let short: String = sha.chars().take(8).collect();
            let _ = write!(out, " at {short}");
        }
        let _ = writeln!(out, " run on {}", self.system);

        for bucket in Bucket::MARKDOWN_ORDER {
            let attrs = self.bucket(bucket);
            if attrs.is_empty() {
                continue;
            }
            out.push_str("<details>\n");
            let _ = writeln!(out, "  <summary>{}:</summary>", bucket.heading(attrs.len()));
            out.push_str("  <ul>\n");
            for (i, attr) in attrs.iter().enumerate() {
                if self.limit(bucket).is_some_and(|n| i >= n) {
                    out.push_str("    <li>...</li>\n");
                    break;
                }
                out.push_str("    <li>");
                match &attr.log_url {
                    Some(url) => {
                        let _ = write!(
                            out,
                            "<a href=\"{}\">{}</a>",
                            escape_html(url),
                            escape_html(&attr.name)
                        );
                    }
                    None => out.push_str(&escape_html(&attr.name)),
                }
                if !attr.aliases.is_empty() {
                    let _ = write!(out, " ({})", escape_html(&attr.aliases.join(", ")));
                }
                out.push_str("</li>\n");
            }
            out.push_str("  </ul>\n</details>\n");
        }

        if !self.check_reports.is_empty() {
            let count = self.check_reports.len();
            let plural = if count == 1 { "" } else { "s" };
            out.push_str("<details>\n");
            let _ = writeln!(out, "  <summary>{count} suggestion{plural}:</summary>");
            out.push_str("  <ul>\n");
            for report in &self.check_reports {
                let _ = writeln!(out, "    <li>{}</li>", escape_html(report));
            }
            out.push_str("  </ul>\n</details>\n");
        }

        out
    }

    /// Render the plain console summary.
    pub fn console(&self) -> String {
        let mut out = String::new();
        if let Some(url) = &self.context.pr_url {
            let _ = writeln!(out, "Link to currently reviewing PR:\n{url}\n");
        }

        for bucket in Bucket::CONSOLE_ORDER {
            let names = self.names(bucket);
            if names.is_empty() {
                continue;
            }
            let _ = writeln!(out, "{}:", bucket.heading(names.len()));
            match self.limit(bucket) {
                Some(n) if names.len() > n => {
                    let _ = writeln!(out, "{} ...", names[..n].join(" "));
                }
                _ => {
                    let _ = writeln!(out, "{}", names.join(" "));
                }
            }
            out.push('\n');
        }

        out
    }

    /// Structured form for `report.json`.
    pub fn artifact(&self) -> ReportArtifact {
        ReportArtifact {
            system: self.system.clone(),
            generated_at: Utc::now(),
            succeeded: self.succeeded(),
            success_criteria: self.success,
            buckets: Bucket::ALL
                .iter()
                .filter_map(|b| {
                    let names = self.names(*b);
                    (!names.is_empty()).then(|| {
                        (
                            b.as_str().to_string(),
                            names.into_iter().map(str::to_string).collect(),
                        )
                    })
                })
                .collect(),
            check_reports: self.check_reports.iter().cloned().collect(),
            ci_statuses: self.statuses.clone(),
        }
    }

    /// Persist `report.md` and `report.json` into `dir`.
    pub async fn write(&self, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let markdown = dir.join(REPORT_MARKDOWN);
        tokio::fs::write(&markdown, self.markdown()).await?;
        tokio::fs::write(
            dir.join(REPORT_JSON),
            serde_json::to_vec_pretty(&self.artifact())?,
        )
        .await?;
        info!(path = %markdown.display(), "Report written");
        Ok(markdown)
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

/// Classifies targets and cross-references failures into a [`Report`].
pub struct ReportCompiler {
    backend: Arc<dyn BuildBackend>,
    policy: ReviewPolicy,
    cross_referencer: Option<CrossReferencer>,
}

impl ReportCompiler {
    pub fn new(backend: Arc<dyn BuildBackend>, policy: ReviewPolicy) -> Self {
        Self {
            backend,
            policy,
            cross_referencer: None,
        }
    }

    /// Cross-reference failures; without one every failure is new.
    pub fn with_cross_referencer(mut self, cross_referencer: CrossReferencer) -> Self {
        self.cross_referencer = Some(cross_referencer);
        self
    }

    pub async fn compile(
        &self,
        system: &str,
        channel: &str,
        attrs: Vec<Attr>,
        context: ReviewContext,
    ) -> Report {
        let classified: Vec<(Attr, Bucket)> = attrs
            .into_iter()
            .map(|a| {
                let class = classify(&a, &self.policy.test_prefix, self.backend.as_ref());
                (a, class)
            })
            .collect();

        let failed: Vec<Attr> = classified
            .iter()
            .filter(|(_, class)| *class == Bucket::FailedNew)
            .map(|(a, _)| a.clone())
            .collect();

        let partition = match &self.cross_referencer {
            Some(xref) => xref.partition(&failed, system, channel).await,
            None => {
                let names: Vec<String> = failed.iter().map(|a| a.name.clone()).collect();
                partition_failures(&names, BTreeMap::new())
            }
        };

        let counts: HashMap<Bucket, usize> =
            classified.iter().fold(HashMap::new(), |mut acc, (_, b)| {
                *acc.entry(*b).or_default() += 1;
                acc
            });
        debug!(?counts, "Targets classified");

        Report::new(system, classified, partition, &self.policy, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nix_build_backend::{BuildOutput, DryRunPlan, EvaluatedAttr};
    use std::collections::HashSet;

    /// Reports every path under `/nix/store/ok-` as valid.
    struct StoreFake;

    #[async_trait]
    impl BuildBackend for StoreFake {
        async fn evaluate(
            &self,
            _names: &[String],
            _nixpkgs: &Path,
        ) -> nix_build_backend::Result<Vec<EvaluatedAttr>> {
            Ok(Vec::new())
        }

        async fn dry_run(&self, _expression: &Path) -> nix_build_backend::Result<DryRunPlan> {
            Ok(DryRunPlan::default())
        }

        async fn build(
            &self,
            _expression: &Path,
            _extra_args: &[String],
        ) -> nix_build_backend::Result<BuildOutput> {
            Ok(BuildOutput::default())
        }

        fn verify_path(&self, path: &str) -> bool {
            path.starts_with("/nix/store/ok-")
        }

        async fn build_log(&self, _drv_path: &str, _out_path: Option<&str>) -> Option<String> {
            None
        }
    }

    fn built(name: &str) -> Attr {
        Attr::new(name).with_store_paths(&format!("/nix/store/ok-{name}"), "/nix/store/x.drv")
    }

    fn failed(name: &str) -> Attr {
        Attr::new(name).with_store_paths(&format!("/nix/store/bad-{name}"), "/nix/store/y.drv")
    }

    fn sample() -> Vec<Attr> {
        let mut broken = built("broken-pkg");
        broken.broken = true;
        broken.exists = false;
        let mut skipped = failed("slow");
        skipped.skipped = true;
        skipped.check_report.push("slow is slow".to_string());
        let mut timed_out = failed("timeout");
        timed_out.timed_out = true;
        let mut missing = Attr::new("missing");
        missing.exists = false;
        let mut hello = built("hello");
        hello.aliases.push("hello-wrapped".to_string());
        hello.check_report.push("slow is slow".to_string());
        hello.check_report.push("hello has a <warning>".to_string());

        vec![
            broken,
            skipped,
            timed_out,
            missing,
            built("nixosTests.login"),
            failed("regressed"),
            failed("already-bad"),
            hello,
        ]
    }

    fn classify_all(attrs: Vec<Attr>, policy: &ReviewPolicy) -> Vec<(Attr, Bucket)> {
        attrs
            .into_iter()
            .map(|a| {
                let class = classify(&a, &policy.test_prefix, &StoreFake);
                (a, class)
            })
            .collect()
    }

    fn partition_with_existing(classified: &[(Attr, Bucket)], existing: &[&str]) -> CiPartition {
        let failed: Vec<String> = classified
            .iter()
            .filter(|(_, c)| *c == Bucket::FailedNew)
            .map(|(a, _)| a.name.clone())
            .collect();
        let statuses = existing
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    BuildStatus {
                        success: false,
                        status: "Failed".to_string(),
                        timestamp: None,
                        build_id: None,
                        build_url: None,
                        name: None,
                        arch: None,
                    },
                )
            })
            .collect();
        partition_failures(&failed, statuses)
    }

    fn report(policy: &ReviewPolicy, context: ReviewContext) -> Report {
        let classified = classify_all(sample(), policy);
        let partition = partition_with_existing(&classified, &["already-bad"]);
        Report::new("x86_64-linux", classified, partition, policy, context)
    }

    #[test]
    fn test_priority_order() {
        let report = report(&ReviewPolicy::default(), ReviewContext::default());

        assert_eq!(report.bucket_of("broken-pkg"), Some(Bucket::Broken));
        assert_eq!(report.bucket_of("slow"), Some(Bucket::Skipped));
        assert_eq!(report.bucket_of("timeout"), Some(Bucket::TimedOut));
        assert_eq!(report.bucket_of("missing"), Some(Bucket::NonExistent));
        assert_eq!(report.bucket_of("nixosTests.login"), Some(Bucket::Tests));
        assert_eq!(report.bucket_of("regressed"), Some(Bucket::FailedNew));
        assert_eq!(report.bucket_of("already-bad"), Some(Bucket::FailedExisting));
        assert_eq!(report.bucket_of("hello"), Some(Bucket::Built));
    }

    #[test]
    fn test_broken_and_blacklisted_outrank_everything() {
        let mut attr = failed("everything");
        attr.broken = true;
        attr.blacklisted = true;
        attr.skipped = true;
        attr.timed_out = true;
        attr.exists = false;
        assert_eq!(classify(&attr, "nixosTests.", &StoreFake), Bucket::Broken);

        attr.broken = false;
        assert_eq!(classify(&attr, "nixosTests.", &StoreFake), Bucket::Blacklisted);
    }

    #[test]
    fn test_every_target_in_exactly_one_bucket() {
        let report = report(&ReviewPolicy::default(), ReviewContext::default());

        let mut seen = HashSet::new();
        let mut total = 0;
        for bucket in Bucket::ALL {
            for name in report.names(bucket) {
                assert!(seen.insert(name.to_string()), "{name} classified twice");
                total += 1;
            }
        }
        assert_eq!(total, report.attrs().len());
        for attr in report.attrs() {
            assert!(report.bucket_of(&attr.name).is_some(), "{} has no bucket", attr.name);
        }
    }

    #[test]
    fn test_strict_and_lenient_success() {
        let report = report(&ReviewPolicy::default(), ReviewContext::default());
        assert!(!report.succeeded_with(SuccessCriteria::Strict));
        assert!(!report.succeeded_with(SuccessCriteria::Lenient));

        let policy = ReviewPolicy::default();
        let classified = classify_all(vec![built("hello"), failed("already-bad")], &policy);
        let partition = partition_with_existing(&classified, &["already-bad"]);
        let only_existing = Report::new(
            "x86_64-linux",
            classified,
            partition,
            &ReviewPolicy {
                success: SuccessCriteria::Lenient,
                ..ReviewPolicy::default()
            },
            ReviewContext::default(),
        );

        assert!(only_existing.succeeded());
        assert!(!only_existing.succeeded_with(SuccessCriteria::Strict));
    }

    #[test]
    fn test_markdown_is_idempotent() {
        let report = report(&ReviewPolicy::default(), ReviewContext::default());
        assert_eq!(report.markdown(), report.markdown());
    }

    #[test]
    fn test_markdown_header_and_sections() {
        let context = ReviewContext {
            command: "nix-review pr 1234".to_string(),
            head_sha: Some("0123456789abcdef".to_string()),
            pr_url: None,
        };
        let md = report(&ReviewPolicy::default(), context).markdown();

        assert!(md.starts_with("Result of `nix-review pr 1234` at 01234567 run on x86_64-linux\n"));
        assert!(md.contains("<summary>1 package failed to build (new failures):</summary>"));
        assert!(md.contains("<summary>1 test built:</summary>"));
        assert!(md.contains("    <li>hello (hello-wrapped)</li>\n"));
        assert!(md.contains("<summary>2 suggestions:</summary>"));
        assert!(md.contains("<li>hello has a &lt;warning&gt;</li>"));
        // Broken section precedes the built section.
        let broken = md.find("marked as broken").unwrap();
        let built = md.find("1 package built").unwrap();
        assert!(broken < built);
    }

    #[test]
    fn test_markdown_links_logs() {
        let policy = ReviewPolicy::default();
        let mut attr = failed("regressed");
        attr.log_url = Some("logs/regressed.log".to_string());
        let report = Report::new(
            "x86_64-linux",
            classify_all(vec![attr], &policy),
            CiPartition::default(),
            &policy,
            ReviewContext::default(),
        );

        assert!(report
            .markdown()
            .contains("<li><a href=\"logs/regressed.log\">regressed</a></li>"));
    }

    #[test]
    fn test_long_skipped_list_is_elided() {
        let policy = ReviewPolicy {
            show_limit: 2,
            ..ReviewPolicy::default()
        };
        let attrs: Vec<Attr> = (0..4)
            .map(|i| {
                let mut a = failed(&format!("slow{i}"));
                a.skipped = true;
                a
            })
            .collect();
        let report = Report::new(
            "x86_64-linux",
            classify_all(attrs, &policy),
            CiPartition::default(),
            &policy,
            ReviewContext::default(),
        );

        assert!(report.console().contains("slow0 slow1 ...\n"));
        let md = report.markdown();
        assert!(md.contains("<summary>4 packages skipped due to time constraints:</summary>"));
        assert!(md.contains("<li>slow1</li>\n    <li>...</li>\n"));
        assert!(!md.contains("slow2"));
    }

    #[test]
    fn test_console_summary() {
        let context = ReviewContext {
            pr_url: Some("https://github.com/NixOS/nixpkgs/pull/1234".to_string()),
            ..ReviewContext::default()
        };
        let console = report(&ReviewPolicy::default(), context).console();

        assert!(console.starts_with("Link to currently reviewing PR:\n"));
        assert!(console.contains("1 package failed to build (existing failures):\nalready-bad\n"));
        assert!(console.contains("1 package built:\nhello\n"));
    }

    #[tokio::test]
    async fn test_write_report_files() {
        let dir = tempfile::tempdir().unwrap();
        let report = report(&ReviewPolicy::default(), ReviewContext::default());

        let path = report.write(dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join(REPORT_MARKDOWN));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), report.markdown());

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(REPORT_JSON)).unwrap()).unwrap();
        assert_eq!(json["system"], "x86_64-linux");
        assert_eq!(json["succeeded"], false);
        assert_eq!(json["buckets"]["failed_existing"][0], "already-bad");
        assert!(json["buckets"].get("blacklisted").is_none());
    }

    #[tokio::test]
    async fn test_compiler_without_cross_referencer_marks_failures_new() {
        let compiler = ReportCompiler::new(Arc::new(StoreFake), ReviewPolicy::default());
        let report = compiler
            .compile(
                "x86_64-linux",
                "unstable",
                vec![built("hello"), failed("a"), failed("b")],
                ReviewContext::default(),
            )
            .await;

        assert_eq!(report.names(Bucket::FailedNew), vec!["a", "b"]);
        assert!(report.bucket(Bucket::FailedExisting).is_empty());
        assert_eq!(report.built_packages(), vec!["hello"]);
    }
}
