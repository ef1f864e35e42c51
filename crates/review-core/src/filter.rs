//! Filter pipeline.
//!
//! Stages receive the current target list and return a replacement. They
//! may skip targets or annotate them (`check_report`, `skipped`, ...). The
//! pipeline trusts stage output once it deserializes; anything that does not
//! deserialize aborts the run.

use crate::attr::Attr;
use crate::error::ReviewError;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Document handed to a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageInput {
    pub attrs: Vec<Attr>,
    /// Derivations the build actually built; only set after building
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drvpaths_built: Option<Vec<String>>,
}

/// Stages may answer with `{"attrs": [...]}` or a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum StageOutput {
    Wrapped { attrs: Vec<Attr> },
    Bare(Vec<Attr>),
}

impl From<StageOutput> for Vec<Attr> {
    fn from(output: StageOutput) -> Self {
        match output {
            StageOutput::Wrapped { attrs } | StageOutput::Bare(attrs) => attrs,
        }
    }
}

/// Decode a stage's response.
pub fn parse_stage_output(stage: &str, bytes: &[u8]) -> Result<Vec<Attr>> {
    serde_json::from_slice::<StageOutput>(bytes)
        .map(Vec::from)
        .map_err(|e| ReviewError::filter_stage(stage, format!("undeserializable output: {e}")))
}

/// One transformation of the target list.
#[async_trait]
pub trait FilterStage: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Produce the replacement target list.
    async fn apply(&self, input: &StageInput) -> Result<Vec<Attr>>;
}

/// Stage implemented by an external executable speaking JSON over stdio.
pub struct CommandStage {
    program: String,
    cwd: PathBuf,
}

impl CommandStage {
    /// `program` runs with `cwd` as its working directory (the checkout).
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            cwd: cwd.into(),
        }
    }
}

#[async_trait]
impl FilterStage for CommandStage {
    fn name(&self) -> &str {
        &self.program
    }

    async fn apply(&self, input: &StageInput) -> Result<Vec<Attr>> {
        let payload = serde_json::to_vec(input)?;
        info!("$ {}", self.program);

        let mut child = Command::new(&self.program)
            .current_dir(&self.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| ReviewError::filter_stage(&self.program, format!("spawn failed: {e}")))?;

        // Feed stdin while stdout drains so large documents cannot deadlock.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ReviewError::filter_stage(&self.program, "stdin unavailable"))?;
        let writer = tokio::spawn(async move {
            let written = stdin.write_all(&payload).await;
            drop(stdin);
            written
        });

        let output = child.wait_with_output().await?;
        if let Ok(Err(e)) = writer.await {
            debug!(stage = %self.program, "stage closed stdin early: {}", e);
        }

        if !output.status.success() {
            return Err(ReviewError::filter_stage(
                &self.program,
                format!("exited with {}", output.status),
            ));
        }

        parse_stage_output(&self.program, &output.stdout)
    }
}

/// Stage implemented by an in-process function.
pub struct FnStage<F> {
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StageInput) -> Vec<Attr> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> FilterStage for FnStage<F>
where
    F: Fn(&StageInput) -> Vec<Attr> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, input: &StageInput) -> Result<Vec<Attr>> {
        Ok((self.func)(input))
    }
}

/// Ordered list of stages; each stage's output feeds the next.
#[derive(Clone, Default)]
pub struct FilterPipeline {
    stages: Vec<Arc<dyn FilterStage>>,
}

impl FilterPipeline {
    pub fn new(stages: Vec<Arc<dyn FilterStage>>) -> Self {
        Self { stages }
    }

    /// One [`CommandStage`] per program, run in the checkout.
    pub fn from_commands(programs: &[String], cwd: impl Into<PathBuf>) -> Self {
        let cwd = cwd.into();
        Self::new(
            programs
                .iter()
                .map(|p| Arc::new(CommandStage::new(p.clone(), cwd.clone())) as Arc<dyn FilterStage>)
                .collect(),
        )
    }

    /// Append a stage
    pub fn with_stage(mut self, stage: Arc<dyn FilterStage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order.
    pub async fn run(
        &self,
        mut attrs: Vec<Attr>,
        drvpaths_built: Option<&[String]>,
    ) -> Result<Vec<Attr>> {
        for stage in &self.stages {
            let input = StageInput {
                attrs,
                drvpaths_built: drvpaths_built.map(<[String]>::to_vec),
            };
            attrs = stage.apply(&input).await?;
            debug!(stage = %stage.name(), count = attrs.len(), "Filter stage applied");
        }
        Ok(attrs)
    }
}
