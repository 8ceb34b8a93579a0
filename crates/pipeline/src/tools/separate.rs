//! demucs source separation.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use stemflow_core::artifacts::is_audio_file;
use stemflow_core::error::CoreError;
use stemflow_core::job::Job;
use stemflow_core::options::{self, SeparationOptions};
use stemflow_core::progress::{DemucsProgress, ProgressParser};
use stemflow_core::stage::Stage;

use super::{Finalized, StageTool, ToolProgram};
use crate::error::PipelineError;
use crate::layout::SubjectLayout;
use crate::subprocess::ToolCommand;

pub struct SeparationTool {
    program: ToolProgram,
    /// Extra environment for the child, e.g. `CUDA_VISIBLE_DEVICES`.
    env: Vec<(String, String)>,
}

impl SeparationTool {
    pub fn new(program: ToolProgram) -> Self {
        Self {
            program,
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl Default for SeparationTool {
    fn default() -> Self {
        Self::new(ToolProgram::new("python", ["-m", "demucs.separate"]))
    }
}

/// demucs writes `<out>/<model>/<input stem>/<source>.mp3`.
fn input_stem(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Options of a stored job, re-checked before they reach the filesystem.
fn job_options(job: &Job) -> Result<SeparationOptions, PipelineError> {
    let opts: SeparationOptions = options::decode(&job.options)?;
    opts.validate()?;
    Ok(opts)
}

/// `<subject>/<model>`, refusing anything that does not sit directly
/// under the subject directory.
fn model_dir(layout: &SubjectLayout, job: &Job, model: &str) -> Result<PathBuf, PipelineError> {
    let mut components = Path::new(model).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {
            Ok(layout.subject_dir(&job.subject_id).join(model))
        }
        _ => Err(PipelineError::Finalize(format!(
            "Refusing model directory outside the subject: {model}"
        ))),
    }
}

#[async_trait]
impl StageTool for SeparationTool {
    fn stage(&self) -> Stage {
        Stage::Separate
    }

    fn name(&self) -> &str {
        "demucs"
    }

    fn command(&self, job: &Job, layout: &SubjectLayout) -> Result<ToolCommand, PipelineError> {
        let opts = job_options(job)?;
        let input = Path::new(&job.input_ref);
        if !input.is_file() {
            return Err(CoreError::Validation(format!(
                "Input file not found: {}",
                job.input_ref
            ))
            .into());
        }

        let mut command = self
            .program
            .command()
            .arg("-n")
            .arg(&opts.model)
            .arg("--mp3")
            .arg("--mp3-bitrate")
            .arg(opts.mp3_bitrate.to_string());
        if opts.two_stems {
            command = command.args(["--two-stems", "vocals"]);
        }
        command = command
            .arg("-o")
            .arg(layout.subject_dir(&job.subject_id).to_string_lossy());
        if let Some(device) = &opts.device {
            command = command.arg("--device").arg(device);
        }
        command = command.arg(&job.input_ref);

        for (key, value) in &self.env {
            command = command.env(key, value);
        }
        Ok(command)
    }

    fn parser(&self) -> &dyn ProgressParser {
        &DemucsProgress
    }

    /// Move the stems into `<subject>/stems` and drop the model directory.
    async fn finalize(&self, job: &Job, layout: &SubjectLayout) -> Result<Finalized, PipelineError> {
        let opts = job_options(job)?;
        let model_dir = model_dir(layout, job, &opts.model)?;
        let source_dir = model_dir.join(input_stem(Path::new(&job.input_ref)));

        if !tokio::fs::try_exists(&source_dir).await.unwrap_or(false) {
            return Err(PipelineError::Finalize(format!(
                "Separation output not found: {}",
                source_dir.display()
            )));
        }

        let stems_dir = layout.stems_dir(&job.subject_id);
        tokio::fs::create_dir_all(&stems_dir).await?;

        let mut stems = Vec::new();
        let mut entries = tokio::fs::read_dir(&source_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.metadata().await?.is_file() {
                continue;
            }
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            tokio::fs::rename(&path, stems_dir.join(&name)).await?;
            if is_audio_file(&path) {
                stems.push(name);
            }
        }
        stems.sort();

        if let Err(e) = tokio::fs::remove_dir_all(&model_dir).await {
            tracing::warn!(path = %model_dir.display(), error = %e, "Failed to remove demucs output dir");
        }

        if stems.is_empty() {
            return Err(PipelineError::Finalize(
                "Separation produced no audio stems".to_string(),
            ));
        }

        Ok(Finalized {
            output_ref: stems_dir.to_string_lossy().into_owned(),
            result: Some(serde_json::json!({ "model": opts.model, "stems": stems })),
        })
    }
}
