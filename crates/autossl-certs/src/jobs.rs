//! Lifecycle records for long running certificate operations.
//!
//! A job moves `queued -> running -> success | failed`. Callers poll it by id;
//! nothing here retries.

use async_trait::async_trait;
use autossl_core::UtcDateTime;
use autossl_database::DbConnection;
use autossl_entities::jobs;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job {0} not found")]
    NotFound(i32),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: i32,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sea_orm::DbErr> for JobError {
    fn from(err: sea_orm::DbErr) -> Self {
        JobError::Database(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            other => Err(JobError::Database(format!("unknown job status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Renew,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Renew => "renew",
        }
    }
}

/// Terminal outcome passed to [`JobTracker::finish`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failed,
}

impl From<JobOutcome> for JobStatus {
    fn from(outcome: JobOutcome) -> Self {
        match outcome {
            JobOutcome::Success => JobStatus::Success,
            JobOutcome::Failed => JobStatus::Failed,
        }
    }
}

/// Polling projection of a job
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: i32,
    pub site_id: i32,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    pub message: Option<String>,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub started_at: Option<UtcDateTime>,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub finished_at: Option<UtcDateTime>,
}

impl TryFrom<jobs::Model> for Job {
    type Error = JobError;

    fn try_from(model: jobs::Model) -> Result<Self, Self::Error> {
        Ok(Job {
            id: model.id,
            site_id: model.site_id,
            job_type: model.job_type,
            status: model.status.parse()?,
            message: model.message,
            started_at: model.started_at,
            finished_at: model.finished_at,
        })
    }
}

/// Sole writer of job records
pub struct JobTracker {
    db: Arc<DbConnection>,
}

impl JobTracker {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    pub async fn create(&self, site_id: i32, job_type: JobType) -> Result<Job, JobError> {
        let job = jobs::ActiveModel {
            site_id: Set(site_id),
            job_type: Set(job_type.as_str().to_string()),
            status: Set(JobStatus::Queued.as_str().to_string()),
            message: Set(None),
            started_at: Set(None),
            finished_at: Set(None),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;

        debug!("Created {} job {} for site {}", job_type.as_str(), job.id, site_id);
        job.try_into()
    }

    pub async fn get(&self, job_id: i32) -> Result<Job, JobError> {
        self.load(job_id).await?.try_into()
    }

    pub async fn start(&self, job_id: i32) -> Result<Job, JobError> {
        let model = self.load(job_id).await?;
        let status: JobStatus = model.status.parse()?;
        if status != JobStatus::Queued {
            return Err(JobError::InvalidTransition {
                job_id,
                from: status,
                to: JobStatus::Running,
            });
        }

        let now = Utc::now();
        let result = jobs::Entity::update_many()
            .col_expr(jobs::Column::Status, Expr::value(JobStatus::Running.as_str()))
            .col_expr(jobs::Column::StartedAt, Expr::value(now))
            .col_expr(jobs::Column::UpdatedAt, Expr::value(now))
            .filter(jobs::Column::Id.eq(job_id))
            .filter(jobs::Column::Status.eq(JobStatus::Queued.as_str()))
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected == 0 {
            return Err(self.lost_transition(job_id, JobStatus::Running).await);
        }

        info!("Job {} started", job_id);
        self.get(job_id).await
    }

    /// Replaces the progress message of a running job.
    pub async fn update_message(&self, job_id: i32, message: &str) -> Result<(), JobError> {
        let result = jobs::Entity::update_many()
            .col_expr(jobs::Column::Message, Expr::value(message.to_string()))
            .col_expr(jobs::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(jobs::Column::Id.eq(job_id))
            .filter(jobs::Column::Status.eq(JobStatus::Running.as_str()))
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected == 0 {
            return Err(self.lost_transition(job_id, JobStatus::Running).await);
        }

        debug!("Job {}: {}", job_id, message);
        Ok(())
    }

    /// Terminal transition. `finished_at` is stamped exactly once.
    ///
    /// Only a running job can succeed. A queued job may still fail, which
    /// records errors raised before the work started.
    pub async fn finish(
        &self,
        job_id: i32,
        outcome: JobOutcome,
        message: Option<String>,
    ) -> Result<Job, JobError> {
        let target = JobStatus::from(outcome);
        let allowed: &[JobStatus] = match outcome {
            JobOutcome::Success => &[JobStatus::Running],
            JobOutcome::Failed => &[JobStatus::Queued, JobStatus::Running],
        };

        let model = self.load(job_id).await?;
        let status: JobStatus = model.status.parse()?;
        if !allowed.contains(&status) {
            return Err(JobError::InvalidTransition {
                job_id,
                from: status,
                to: target,
            });
        }

        let now = Utc::now();
        let mut update = jobs::Entity::update_many()
            .col_expr(jobs::Column::Status, Expr::value(target.as_str()))
            .col_expr(jobs::Column::FinishedAt, Expr::value(now))
            .col_expr(jobs::Column::UpdatedAt, Expr::value(now));
        if let Some(message) = message {
            update = update.col_expr(jobs::Column::Message, Expr::value(message));
        }
        let result = update
            .filter(jobs::Column::Id.eq(job_id))
            .filter(jobs::Column::Status.is_in(allowed.iter().map(|s| s.as_str())))
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected == 0 {
            return Err(self.lost_transition(job_id, target).await);
        }

        let job = self.get(job_id).await?;
        match outcome {
            JobOutcome::Success => info!("Job {} succeeded", job_id),
            JobOutcome::Failed => warn!(
                "Job {} failed: {}",
                job_id,
                job.message.as_deref().unwrap_or("no message")
            ),
        }
        Ok(job)
    }

    /// Fails every queued or running job in one statement. Used when the
    /// process stops and in-flight work is abandoned.
    pub async fn fail_unfinished(&self, message: &str) -> Result<u64, JobError> {
        let now = Utc::now();
        let result = jobs::Entity::update_many()
            .col_expr(jobs::Column::Status, Expr::value(JobStatus::Failed.as_str()))
            .col_expr(jobs::Column::Message, Expr::value(message.to_string()))
            .col_expr(jobs::Column::FinishedAt, Expr::value(now))
            .col_expr(jobs::Column::UpdatedAt, Expr::value(now))
            .filter(
                jobs::Column::Status
                    .is_in([JobStatus::Queued.as_str(), JobStatus::Running.as_str()]),
            )
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected > 0 {
            warn!("Marked {} unfinished jobs as failed", result.rows_affected);
        }
        Ok(result.rows_affected)
    }

    /// Error for a guarded update that matched no row: the job is gone or
    /// another writer moved it first.
    async fn lost_transition(&self, job_id: i32, to: JobStatus) -> JobError {
        match self.load(job_id).await {
            Ok(model) => match model.status.parse::<JobStatus>() {
                Ok(from) => JobError::InvalidTransition { job_id, from, to },
                Err(e) => e,
            },
            Err(e) => e,
        }
    }

    async fn load(&self, job_id: i32) -> Result<jobs::Model, JobError> {
        jobs::Entity::find_by_id(job_id)
            .one(self.db.as_ref())
            .await?
            .ok_or(JobError::NotFound(job_id))
    }
}

/// Receives human readable progress while an operation runs
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, message: &str);
}

/// Forwards progress to a running job's message
pub struct JobProgress<'a> {
    tracker: &'a JobTracker,
    job_id: i32,
}

impl<'a> JobProgress<'a> {
    pub fn new(tracker: &'a JobTracker, job_id: i32) -> Self {
        Self { tracker, job_id }
    }
}

#[async_trait]
impl ProgressSink for JobProgress<'_> {
    async fn report(&self, message: &str) {
        if let Err(e) = self.tracker.update_message(self.job_id, message).await {
            warn!("Failed to record progress for job {}: {}", self.job_id, e);
        }
    }
}
