//! Adapters for the external programs each stage runs.
//!
//! A [`StageTool`] knows how to build the command line for a job, which
//! parser understands the program's progress output, and how to turn what
//! the program left on disk into the job's `outputRef` (and `result`).

pub mod analyze;
pub mod download;
pub mod separate;

use async_trait::async_trait;
use stemflow_core::job::Job;
use stemflow_core::progress::{ProgressParser, ProgressScale};
use stemflow_core::stage::Stage;

use crate::error::PipelineError;
use crate::layout::SubjectLayout;
use crate::subprocess::ToolCommand;

pub use analyze::AnalysisTool;
pub use download::DownloadTool;
pub use separate::SeparationTool;

/// Program plus leading arguments, e.g. `python -m spotdl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolProgram {
    pub program: String,
    pub base_args: Vec<String>,
}

impl ToolProgram {
    pub fn new<I, S>(program: impl Into<String>, base_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            base_args: base_args.into_iter().map(Into::into).collect(),
        }
    }

    /// Start a command with the program and its leading arguments.
    pub fn command(&self) -> ToolCommand {
        ToolCommand::new(&self.program).args(self.base_args.iter().cloned())
    }
}

/// What a successful finalisation produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Finalized {
    pub output_ref: String,
    pub result: Option<serde_json::Value>,
}

#[async_trait]
pub trait StageTool: Send + Sync {
    fn stage(&self) -> Stage;

    /// Short program name used in logs and error messages.
    fn name(&self) -> &str;

    fn command(&self, job: &Job, layout: &SubjectLayout) -> Result<ToolCommand, PipelineError>;

    fn parser(&self) -> &dyn ProgressParser;

    fn scale(&self) -> ProgressScale {
        ProgressScale::for_stage(self.stage())
    }

    /// Runs after a zero exit status.
    async fn finalize(&self, job: &Job, layout: &SubjectLayout) -> Result<Finalized, PipelineError>;
}
