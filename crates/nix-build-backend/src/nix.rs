//! [`BuildBackend`] implementation backed by the nix command line

use crate::backend::{BuildBackend, BuildOutput, EvaluatedAttr};
use crate::error::NixError;
use crate::expression::{render_eval_expression, EVAL_ATTRS_NIX};
use crate::log::strip_ansi_colors;
use crate::plan::{parse_dry_run, DryRunPlan};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info, warn};

const NIX_COMMAND: [&str; 2] = ["--experimental-features", "nix-command"];

#[derive(Deserialize)]
struct EvalProps {
    exists: bool,
    broken: bool,
    path: Option<String>,
    #[serde(rename = "drvPath")]
    drv_path: Option<String>,
    position: Option<String>,
}

/// Parse the JSON object printed by the eval script.
///
/// Attributes come back ordered by name.
pub fn parse_eval_output(stdout: &[u8]) -> serde_json::Result<Vec<EvaluatedAttr>> {
    let props: BTreeMap<String, EvalProps> = serde_json::from_slice(stdout)?;
    Ok(props
        .into_iter()
        .map(|(name, p)| EvaluatedAttr {
            name,
            exists: p.exists,
            broken: p.broken,
            path: p.path,
            drv_path: p.drv_path,
            position: p.position,
        })
        .collect())
}

fn spawn_error(e: std::io::Error) -> NixError {
    if e.kind() == std::io::ErrorKind::NotFound {
        NixError::NixNotFound
    } else {
        NixError::Io(e)
    }
}

fn display_command(program: &Path, args: &[String]) -> String {
    std::iter::once(program.display().to_string())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build backend that drives `nix`, `nix-instantiate` and `nix-store`.
#[derive(Debug, Clone)]
pub struct NixBackend {
    nix: PathBuf,
    nix_instantiate: PathBuf,
    nix_store: PathBuf,
}

impl Default for NixBackend {
    fn default() -> Self {
        NixBackend {
            nix: PathBuf::from("nix"),
            nix_instantiate: PathBuf::from("nix-instantiate"),
            nix_store: PathBuf::from("nix-store"),
        }
    }
}

impl NixBackend {
    /// Create a backend using the tools on PATH
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the nix tools found in `dir` instead of PATH.
    pub fn with_bin_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        NixBackend {
            nix: dir.join("nix"),
            nix_instantiate: dir.join("nix-instantiate"),
            nix_store: dir.join("nix-store"),
        }
    }

    async fn evaluate_inner(
        &self,
        input: &Path,
        nixpkgs: &Path,
        command: &mut String,
    ) -> std::result::Result<Vec<EvaluatedAttr>, String> {
        let mut script = tempfile::Builder::new()
            .prefix("evalAttrs-")
            .suffix(".nix")
            .tempfile()
            .map_err(|e| e.to_string())?;
        script
            .write_all(EVAL_ATTRS_NIX.as_bytes())
            .map_err(|e| e.to_string())?;

        let mut args: Vec<String> = NIX_COMMAND.iter().map(|s| s.to_string()).collect();
        args.extend(["eval", "--json", "--impure", "--expr"].map(String::from));
        args.push(render_eval_expression(script.path(), input, nixpkgs));
        *command = display_command(&self.nix, &args);
        info!("$ {}", command);

        let output = Command::new(&self.nix)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| e.to_string())?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("{}: {}", output.status, stderr.trim()));
        }

        parse_eval_output(&output.stdout).map_err(|e| format!("malformed eval output: {e}"))
    }
}

#[async_trait]
impl BuildBackend for NixBackend {
    async fn evaluate(&self, names: &[String], nixpkgs: &Path) -> Result<Vec<EvaluatedAttr>> {
        let mut input = tempfile::Builder::new()
            .prefix("nix-review-attrs-")
            .suffix(".json")
            .tempfile()?;
        serde_json::to_writer(&mut input, names)?;
        input.flush()?;

        let mut command = String::from("nix eval");
        match self.evaluate_inner(input.path(), nixpkgs, &mut command).await {
            Ok(attrs) => {
                debug!(count = attrs.len(), "Evaluated attributes");
                Ok(attrs)
            }
            Err(message) => {
                let (_, kept) = input.keep().map_err(|e| NixError::Io(e.error))?;
                warn!(
                    "{} failed to run, {} was stored for inspection",
                    command,
                    kept.display()
                );
                Err(NixError::Evaluation {
                    command,
                    input: kept.display().to_string(),
                    message,
                })
            }
        }
    }

    async fn dry_run(&self, expression: &Path) -> Result<DryRunPlan> {
        let instantiate = vec![expression.to_string_lossy().to_string()];
        info!("$ {}", display_command(&self.nix_instantiate, &instantiate));
        let output = Command::new(&self.nix_instantiate)
            .args(&instantiate)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(spawn_error)?;
        if !output.status.success() {
            return Err(NixError::CommandFailed {
                command: display_command(&self.nix_instantiate, &instantiate),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let mut realize: Vec<String> = vec!["--realize".to_string(), "--dry-run".to_string()];
        realize.extend(
            String::from_utf8_lossy(&output.stdout)
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(|l| l.trim().to_string()),
        );
        info!("$ {}", display_command(&self.nix_store, &realize));
        let output = Command::new(&self.nix_store)
            .args(&realize)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(spawn_error)?;
        if !output.status.success() {
            return Err(NixError::CommandFailed {
                command: display_command(&self.nix_store, &realize),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        parse_dry_run(&String::from_utf8_lossy(&output.stderr))
    }

    async fn build(&self, expression: &Path, extra_args: &[String]) -> Result<BuildOutput> {
        let mut args: Vec<String> = NIX_COMMAND.iter().map(|s| s.to_string()).collect();
        args.extend(["build", "--no-link", "--keep-going", "-f"].map(String::from));
        args.push(expression.to_string_lossy().to_string());
        args.extend(extra_args.iter().cloned());
        let command = display_command(&self.nix, &args);
        info!("$ {}", command);

        let output = Command::new(&self.nix)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| NixError::BuildInvocation(format!("{command}: {e}")))?;

        Ok(BuildOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn verify_path(&self, path: &str) -> bool {
        let verify = || {
            std::process::Command::new(&self.nix_store)
                .args(["--verify-path", path])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false)
        };
        // block_in_place is only allowed on the multi-threaded scheduler
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(verify)
            }
            _ => verify(),
        }
    }

    async fn build_log(&self, drv_path: &str, out_path: Option<&str>) -> Option<String> {
        for path in std::iter::once(drv_path).chain(out_path) {
            let output = Command::new(&self.nix)
                .args(NIX_COMMAND)
                .args(["log", path])
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await;
            match output {
                Ok(o) if !o.stdout.is_empty() => {
                    return Some(strip_ansi_colors(&String::from_utf8_lossy(&o.stdout)));
                }
                Ok(_) => debug!(path, "No build log"),
                Err(e) => warn!(path, "nix log failed: {}", e),
            }
        }
        None
    }
}

/// Check whether nix is installed and on PATH
pub fn is_nix_available() -> bool {
    std::process::Command::new("nix")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
