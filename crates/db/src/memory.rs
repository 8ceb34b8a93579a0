//! In-process store backed by hash maps.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use stemflow_core::job::{Job, JobUpdate, NewJob};
use stemflow_core::stage::Stage;
use stemflow_core::subject::SubjectSettings;
use stemflow_core::types::JobId;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{JobStore, SubjectStore};

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    by_subject: HashMap<(String, Stage), Vec<JobId>>,
    subjects: HashMap<String, SubjectSettings>,
}

/// Single-node store with read-after-write consistency.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    pub async fn job_count(&self) -> usize {
        self.inner.read().await.jobs.len()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create(&self, new_job: NewJob) -> Result<Job, StoreError> {
        let job = new_job.into_job(Uuid::new_v4(), Utc::now());
        let mut inner = self.inner.write().await;
        inner
            .by_subject
            .entry((job.subject_id.clone(), job.stage))
            .or_default()
            .push(job.id);
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.inner.read().await.jobs.get(&id).cloned())
    }

    async fn update(&self, id: JobId, update: JobUpdate) -> Result<Job, StoreError> {
        let mut inner = self.inner.write().await;
        let job = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        update.apply_to(job);
        Ok(job.clone())
    }

    async fn list_job_ids(
        &self,
        subject_id: &str,
        stage: Stage,
    ) -> Result<Vec<JobId>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_subject
            .get(&(subject_id.to_string(), stage))
            .cloned()
            .unwrap_or_default())
    }

    async fn remove(&self, id: JobId) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(job) = inner.jobs.remove(&id) else {
            return Ok(false);
        };
        let key = (job.subject_id, job.stage);
        if let Some(ids) = inner.by_subject.get_mut(&key) {
            ids.retain(|existing| *existing != id);
            if ids.is_empty() {
                inner.by_subject.remove(&key);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl SubjectStore for MemoryStore {
    async fn settings(&self, subject_id: &str) -> Result<SubjectSettings, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .subjects
            .get(subject_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn put_settings(
        &self,
        subject_id: &str,
        settings: SubjectSettings,
    ) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .subjects
            .insert(subject_id.to_string(), settings);
        Ok(())
    }

    async fn set_auto_advance(
        &self,
        subject_id: &str,
        stage: Stage,
        enabled: bool,
    ) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .subjects
            .entry(subject_id.to_string())
            .or_default()
            .set_auto_advance(stage, enabled);
        Ok(())
    }

    async fn set_default_options(
        &self,
        subject_id: &str,
        stage: Stage,
        options: serde_json::Value,
    ) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .subjects
            .entry(subject_id.to_string())
            .or_default()
            .set_default_options(stage, options);
        Ok(())
    }
}
