use super::types::CertsAppState;
use crate::jobs::{Job, JobError, JobStatus};
use autossl_core::error_builder::{conflict, internal_server_error, not_found};
use autossl_core::problemdetails::Problem;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use utoipa::OpenApi;

impl From<JobError> for Problem {
    fn from(error: JobError) -> Self {
        match error {
            JobError::NotFound(id) => not_found()
                .title("Job Not Found")
                .detail(format!("Job {} not found", id))
                .build(),
            e @ JobError::InvalidTransition { .. } => conflict().detail(e.to_string()).build(),
            JobError::Database(msg) => internal_server_error()
                .title("Database Error")
                .detail(msg)
                .build(),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(get_job),
    components(schemas(Job, JobStatus)),
    tags((name = "Jobs", description = "Progress of long running operations"))
)]
pub struct JobApiDoc;

/// Poll a job
#[utoipa::path(
    get,
    path = "/jobs/{id}",
    responses(
        (status = 200, description = "Job state", body = Job),
        (status = 404, description = "Job not found")
    ),
    params(("id" = i32, Path, description = "Job ID")),
    tag = "Jobs"
)]
async fn get_job(
    State(app_state): State<Arc<CertsAppState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    let job = app_state.jobs.get(id).await?;
    Ok(Json(job))
}

pub fn configure_routes() -> Router<Arc<CertsAppState>> {
    Router::new().route("/jobs/{id}", get(get_job))
}
