//! PostgreSQL store.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use stemflow_core::job::{Job, JobStatus, JobUpdate, NewJob};
use stemflow_core::stage::Stage;
use stemflow_core::subject::SubjectSettings;
use stemflow_core::types::{JobId, Timestamp};
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{JobStore, SubjectStore};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, subject_id, stage, status, progress, \
    created_at, started_at, completed_at, \
    input_ref, output_ref, options, error, result";

/// A row from the `jobs` table.
#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    subject_id: String,
    stage: String,
    status: String,
    progress: i16,
    created_at: Timestamp,
    started_at: Option<Timestamp>,
    completed_at: Option<Timestamp>,
    input_ref: String,
    output_ref: Option<String>,
    options: serde_json::Value,
    error: Option<String>,
    result: Option<serde_json::Value>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |what: &str, e: &dyn std::fmt::Display| {
            StoreError::Corrupt(format!("job {id}: bad {what}: {e}"))
        };
        let stage = row.stage.parse::<Stage>().map_err(|e| corrupt("stage", &e))?;
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|e| corrupt("status", &e))?;
        let progress = u8::try_from(row.progress).map_err(|e| corrupt("progress", &e))?;
        Ok(Job {
            id,
            subject_id: row.subject_id,
            stage,
            status,
            progress,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            input_ref: row.input_ref,
            output_ref: row.output_ref,
            options: row.options,
            error: row.error,
            result: row.result,
        })
    }
}

#[derive(Debug, FromRow)]
struct SettingsRow {
    auto_advance: serde_json::Value,
    default_options: serde_json::Value,
}

/// Store backed by the `jobs` and `subject_settings` tables.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn create(&self, new_job: NewJob) -> Result<Job, StoreError> {
        let query = format!(
            "INSERT INTO jobs (id, subject_id, stage, status, progress, input_ref, options) \
             VALUES ($1, $2, $3, 'queued', 0, $4, $5) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(Uuid::new_v4())
            .bind(&new_job.subject_id)
            .bind(new_job.stage.as_str())
            .bind(&new_job.input_ref)
            .bind(&new_job.options)
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    async fn update(&self, id: JobId, update: JobUpdate) -> Result<Job, StoreError> {
        let query = format!(
            "UPDATE jobs SET \
                status = COALESCE($2, status), \
                progress = COALESCE($3, progress), \
                started_at = COALESCE($4, started_at), \
                completed_at = COALESCE($5, completed_at), \
                output_ref = COALESCE($6, output_ref), \
                error = COALESCE($7, error), \
                result = COALESCE($8, result) \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .bind(update.status.map(|s| s.as_str()))
            .bind(update.progress.map(i16::from))
            .bind(update.started_at)
            .bind(update.completed_at)
            .bind(update.output_ref.as_deref())
            .bind(update.error.as_deref())
            .bind(update.result.as_ref())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        row.try_into()
    }

    async fn list_job_ids(
        &self,
        subject_id: &str,
        stage: Stage,
    ) -> Result<Vec<JobId>, StoreError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM jobs WHERE subject_id = $1 AND stage = $2 ORDER BY seq ASC",
        )
        .bind(subject_id)
        .bind(stage.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn remove(&self, id: JobId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SubjectStore for PgStore {
    async fn settings(&self, subject_id: &str) -> Result<SubjectSettings, StoreError> {
        let row = sqlx::query_as::<_, SettingsRow>(
            "SELECT auto_advance, default_options FROM subject_settings WHERE subject_id = $1",
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(SubjectSettings::default());
        };
        Ok(SubjectSettings {
            auto_advance: serde_json::from_value(row.auto_advance)?,
            default_options: serde_json::from_value(row.default_options)?,
        })
    }

    async fn put_settings(
        &self,
        subject_id: &str,
        settings: SubjectSettings,
    ) -> Result<(), StoreError> {
        let auto_advance = serde_json::to_value(&settings.auto_advance)?;
        let default_options = serde_json::to_value(&settings.default_options)?;
        sqlx::query(
            "INSERT INTO subject_settings (subject_id, auto_advance, default_options) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (subject_id) DO UPDATE \
             SET auto_advance = EXCLUDED.auto_advance, \
                 default_options = EXCLUDED.default_options, \
                 updated_at = NOW()",
        )
        .bind(subject_id)
        .bind(&auto_advance)
        .bind(&default_options)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_auto_advance(
        &self,
        subject_id: &str,
        stage: Stage,
        enabled: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO subject_settings (subject_id, auto_advance) \
             VALUES ($1, jsonb_build_object($2::text, $3::boolean)) \
             ON CONFLICT (subject_id) DO UPDATE \
             SET auto_advance = subject_settings.auto_advance || EXCLUDED.auto_advance, \
                 updated_at = NOW()",
        )
        .bind(subject_id)
        .bind(stage.as_str())
        .bind(enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_default_options(
        &self,
        subject_id: &str,
        stage: Stage,
        options: serde_json::Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO subject_settings (subject_id, default_options) \
             VALUES ($1, jsonb_build_object($2::text, $3::jsonb)) \
             ON CONFLICT (subject_id) DO UPDATE \
             SET default_options = subject_settings.default_options || EXCLUDED.default_options, \
                 updated_at = NOW()",
        )
        .bind(subject_id)
        .bind(stage.as_str())
        .bind(&options)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
