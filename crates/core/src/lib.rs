//! Domain types shared by every stemflow crate.
//!
//! Nothing in here performs I/O: the job state machine, progress scaling,
//! tool output parsers, stage options and subject settings are all pure so
//! that the store, pipeline and API layers can agree on them.

pub mod artifacts;
pub mod error;
pub mod job;
pub mod job_events;
pub mod options;
pub mod progress;
pub mod retention;
pub mod stage;
pub mod subject;
pub mod types;
