//! Which superseded jobs may be deleted.

use crate::job::Job;
use crate::types::JobId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep every job forever.
    #[default]
    KeepAll,
    /// Keep the newest `n` jobs per (subject, stage). `0` is read as `1` so
    /// the current job always survives.
    KeepLatest(usize),
}

impl RetentionPolicy {
    /// Build from a configured count; `None` keeps everything.
    pub fn from_keep(keep: Option<usize>) -> Self {
        match keep {
            Some(n) => RetentionPolicy::KeepLatest(n.max(1)),
            None => RetentionPolicy::KeepAll,
        }
    }

    /// Ids from `jobs` (oldest first, as listed by the store) that may be
    /// removed. Only terminal jobs are ever returned.
    pub fn prunable(&self, jobs: &[Job]) -> Vec<JobId> {
        let keep = match self {
            RetentionPolicy::KeepAll => return Vec::new(),
            RetentionPolicy::KeepLatest(n) => (*n).max(1),
        };
        let cutoff = jobs.len().saturating_sub(keep);
        jobs[..cutoff]
            .iter()
            .filter(|job| job.status.is_terminal())
            .map(|job| job.id)
            .collect()
    }
}
