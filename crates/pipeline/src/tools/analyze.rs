//! Audio analysis script.

use async_trait::async_trait;
use stemflow_core::job::Job;
use stemflow_core::progress::{PercentMarker, ProgressParser};
use stemflow_core::stage::Stage;

use super::{Finalized, StageTool, ToolProgram};
use crate::error::PipelineError;
use crate::layout::SubjectLayout;
use crate::subprocess::ToolCommand;

pub struct AnalysisTool {
    program: ToolProgram,
}

impl AnalysisTool {
    pub fn new(program: ToolProgram) -> Self {
        Self { program }
    }
}

impl Default for AnalysisTool {
    fn default() -> Self {
        Self::new(ToolProgram::new("python", ["analyzer.py"]))
    }
}

#[async_trait]
impl StageTool for AnalysisTool {
    fn stage(&self) -> Stage {
        Stage::Analyze
    }

    fn name(&self) -> &str {
        "analyzer"
    }

    /// `<program> <input> <subject dir> <job id> <output json>`
    fn command(&self, job: &Job, layout: &SubjectLayout) -> Result<ToolCommand, PipelineError> {
        Ok(self
            .program
            .command()
            .arg(&job.input_ref)
            .arg(layout.subject_dir(&job.subject_id).to_string_lossy())
            .arg(job.id.to_string())
            .arg(layout.analysis_path(&job.subject_id).to_string_lossy()))
    }

    fn parser(&self) -> &dyn ProgressParser {
        &PercentMarker
    }

    async fn finalize(&self, job: &Job, layout: &SubjectLayout) -> Result<Finalized, PipelineError> {
        let path = layout.analysis_path(&job.subject_id);
        let missing =
            || PipelineError::Finalize("No analysis result found after successful analysis".into());

        let bytes = tokio::fs::read(&path).await.map_err(|_| missing())?;
        let result: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Analysis output is not valid JSON");
            missing()
        })?;

        Ok(Finalized {
            output_ref: path.to_string_lossy().into_owned(),
            result: Some(result),
        })
    }
}
