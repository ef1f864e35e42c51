//! Build log externalization and result links.

use crate::attr::Attr;
use crate::report::{Bucket, Report};
use crate::Result;
use nix_build_backend::{truncate_log, BuildBackend};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Output directories of a review run.
///
/// Directories are created on first write, so a run that produces no logs
/// leaves no empty `logs/`.
#[derive(Debug, Clone)]
pub struct ArtifactDirs {
    pub logs: PathBuf,
    /// Symlinks to built outputs
    pub results: PathBuf,
    /// Symlinks to derivations of failed targets
    pub failed_results: PathBuf,
    /// Prefix for `log_url`; defaults to the path relative to the output root
    pub log_url_prefix: Option<String>,
    /// Keep only the tail of larger logs
    pub max_log_bytes: Option<usize>,
}

impl ArtifactDirs {
    /// Standard layout below `root`.
    pub fn under(root: &Path) -> Self {
        ArtifactDirs {
            logs: root.join("logs"),
            results: root.join("results"),
            failed_results: root.join("failed_results"),
            log_url_prefix: None,
            max_log_bytes: None,
        }
    }

    fn log_url(&self, file_name: &str) -> String {
        match &self.log_url_prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), file_name),
            None => format!("logs/{file_name}"),
        }
    }
}

/// Attribute name as a flat file name.
fn file_stem(name: &str) -> String {
    name.replace('/', "_")
}

/// Write one log per target that has a recipe and set its `log_url`.
///
/// Returns how many logs were written. A target with neither a log nor
/// recorded error text gets nothing.
pub async fn write_logs(
    attrs: &mut [Attr],
    backend: &dyn BuildBackend,
    dirs: &ArtifactDirs,
) -> Result<usize> {
    let mut written = 0;
    let mut created = false;

    for attr in attrs.iter_mut() {
        let Some(drv_path) = attr.recipe_id.as_deref() else {
            continue;
        };

        let mut log = backend
            .build_log(drv_path, attr.output_path.as_deref())
            .await
            .unwrap_or_default();
        if let Some(error) = &attr.build_error_text {
            if !log.is_empty() && !log.ends_with('\n') {
                log.push('\n');
            }
            log.push_str(error);
        }
        if log.is_empty() {
            debug!(attr = %attr.name, "No log to write");
            continue;
        }
        if let Some(max) = dirs.max_log_bytes {
            log = truncate_log(&log, max);
        }

        if !created {
            tokio::fs::create_dir_all(&dirs.logs).await?;
            created = true;
        }
        let file_name = format!("{}.log", file_stem(&attr.name));
        tokio::fs::write(dirs.logs.join(&file_name), log).await?;
        attr.log_url = Some(dirs.log_url(&file_name));
        written += 1;
    }

    if written > 0 {
        info!(count = written, dir = %dirs.logs.display(), "Build logs written");
    }
    Ok(written)
}

/// Link built outputs into `results` and failed derivations into
/// `failed_results`.
#[cfg(unix)]
pub async fn link_results(report: &Report, dirs: &ArtifactDirs) -> Result<usize> {
    let mut linked = 0;

    let built = report.bucket(Bucket::Built);
    let failed: Vec<&Attr> = report
        .bucket(Bucket::FailedNew)
        .into_iter()
        .chain(report.bucket(Bucket::FailedExisting))
        .collect();

    for (dir, attrs, link_output) in [
        (&dirs.results, built, true),
        (&dirs.failed_results, failed, false),
    ] {
        let targets: Vec<(&str, &str)> = attrs
            .iter()
            .filter_map(|a| {
                let target = if link_output {
                    a.output_path.as_deref()
                } else {
                    a.recipe_id.as_deref()
                };
                target.map(|t| (a.name.as_str(), t))
            })
            .collect();
        if targets.is_empty() {
            continue;
        }

        tokio::fs::create_dir_all(dir).await?;
        for (name, target) in targets {
            let link = dir.join(file_stem(name));
            if tokio::fs::symlink_metadata(&link).await.is_ok() {
                tokio::fs::remove_file(&link).await?;
            }
            match tokio::fs::symlink(target, &link).await {
                Ok(()) => linked += 1,
                Err(e) => warn!(attr = %name, "could not link {}: {}", target, e),
            }
        }
    }

    Ok(linked)
}

#[cfg(not(unix))]
pub async fn link_results(_report: &Report, _dirs: &ArtifactDirs) -> Result<usize> {
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReviewPolicy;
    use crate::crossref::CiPartition;
    use crate::report::{classify, ReviewContext};
    use async_trait::async_trait;
    use nix_build_backend::{BuildOutput, DryRunPlan, EvaluatedAttr};

    struct LogFake;

    #[async_trait]
    impl BuildBackend for LogFake {
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
            path.ends_with("-ok")
        }

        async fn build_log(&self, drv_path: &str, _out_path: Option<&str>) -> Option<String> {
            (!drv_path.contains("quiet")).then(|| format!("building {drv_path}"))
        }
    }

    #[tokio::test]
    async fn test_write_logs_sets_urls_and_appends_errors() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = ArtifactDirs::under(dir.path());

        let mut failing = Attr::new("foo").with_store_paths("/nix/store/foo", "/nix/store/foo.drv");
        failing.build_error_text = Some("error: boom".to_string());
        let quiet = Attr::new("quiet").with_store_paths("/nix/store/quiet", "/nix/store/quiet.drv");
        let mut attrs = vec![failing, quiet, Attr::new("no-recipe")];

        let written = write_logs(&mut attrs, &LogFake, &dirs).await.unwrap();

        assert_eq!(written, 1);
        assert_eq!(attrs[0].log_url.as_deref(), Some("logs/foo.log"));
        assert!(attrs[1].log_url.is_none());
        assert_eq!(
            std::fs::read_to_string(dirs.logs.join("foo.log")).unwrap(),
            "building /nix/store/foo.drv\nerror: boom"
        );
    }

    #[tokio::test]
    async fn test_no_logs_no_directory() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = ArtifactDirs::under(dir.path());
        let mut attrs = vec![Attr::new("nothing")];

        assert_eq!(write_logs(&mut attrs, &LogFake, &dirs).await.unwrap(), 0);
        assert!(!dirs.logs.exists());
    }

    #[tokio::test]
    async fn test_log_url_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = ArtifactDirs {
            log_url_prefix: Some("https://logs.example.org/run-1/".to_string()),
            ..ArtifactDirs::under(dir.path())
        };
        let mut attrs = vec![Attr::new("foo").with_store_paths("/nix/store/foo", "/nix/store/foo.drv")];

        write_logs(&mut attrs, &LogFake, &dirs).await.unwrap();
        assert_eq!(
            attrs[0].log_url.as_deref(),
            Some("https://logs.example.org/run-1/foo.log")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_link_results() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = ArtifactDirs::under(dir.path());
        let policy = ReviewPolicy::default();

        let attrs = vec![
            Attr::new("hello").with_store_paths("/nix/store/hello-ok", "/nix/store/hello.drv"),
            Attr::new("broken").with_store_paths("/nix/store/broken", "/nix/store/broken.drv"),
        ];
        let classified: Vec<(Attr, Bucket)> = attrs
            .into_iter()
            .map(|a| {
                let class = classify(&a, &policy.test_prefix, &LogFake);
                (a, class)
            })
            .collect();
        let report = Report::new(
            "x86_64-linux",
            classified,
            CiPartition::default(),
            &policy,
            ReviewContext::default(),
        );

        assert_eq!(link_results(&report, &dirs).await.unwrap(), 2);
        assert_eq!(
            std::fs::read_link(dirs.results.join("hello")).unwrap(),
            PathBuf::from("/nix/store/hello-ok")
        );
        assert_eq!(
            std::fs::read_link(dirs.failed_results.join("broken")).unwrap(),
            PathBuf::from("/nix/store/broken.drv")
        );

        // Relinking replaces dangling links.
        assert_eq!(link_results(&report, &dirs).await.unwrap(), 2);
    }
}
