use stemflow_core::error::CoreError;
use stemflow_db::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool ran and exited unsuccessfully. `stderr` is the tail of
    /// what it wrote.
    #[error("{tool} exited with code {exit_code}: {stderr}")]
    ToolFailed {
        tool: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("{0}")]
    Finalize(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
