//! Stage execution for stemflow.
//!
//! - [`subprocess`]: streaming child-process runner.
//! - [`tools`]: spotdl, demucs and analyzer adapters behind [`StageTool`].
//! - [`StageWorker`]: runs one job to a terminal state.
//! - [`StageService`]: validates requests, creates jobs, starts workers.
//! - [`StageOrchestrator`]: auto-advances subjects along a chain link.
//! - [`RetentionSweeper`]: deletes superseded jobs.
//! - [`notify`]: best-effort direct notifications.

pub mod error;
pub mod layout;
pub mod notify;
pub mod orchestrator;
pub mod retention;
pub mod service;
pub mod subprocess;
pub mod tools;
pub mod worker;

pub use error::PipelineError;
pub use layout::SubjectLayout;
pub use notify::{Delivery, HttpNotifier, NoopNotifier, NotificationPort, NotifyError};
pub use orchestrator::StageOrchestrator;
pub use retention::RetentionSweeper;
pub use service::{StageService, SubmitRequest, Submitted};
pub use tools::{StageTool, ToolProgram};
pub use worker::StageWorker;
