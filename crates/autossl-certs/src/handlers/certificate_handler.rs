use super::types::{CertsAppState, IssueCertificateRequest, IssueMode, IssueQuery, JobAccepted};
use crate::tls::{Certificate, IssuerError, RepositoryError};
use autossl_core::error_builder::{
    bad_gateway, bad_request, conflict, internal_server_error, not_found, ErrorBuilder,
};
use autossl_core::problemdetails::Problem;
use autossl_core::ProblemDetails;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::OpenApi;

impl From<RepositoryError> for Problem {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::NotFound(msg) => not_found().detail(msg).build(),
            RepositoryError::InvalidData(msg) => ErrorBuilder::new(StatusCode::BAD_REQUEST)
                .title("Invalid Data")
                .detail(msg)
                .build(),
            RepositoryError::Database(msg) => internal_server_error()
                .title("Database Error")
                .detail(msg)
                .build(),
            RepositoryError::Vault(e) => internal_server_error()
                .title("Encryption Error")
                .detail(e.to_string())
                .build(),
        }
    }
}

impl From<IssuerError> for Problem {
    fn from(error: IssuerError) -> Self {
        match error {
            IssuerError::SiteNotFound(id) => not_found()
                .detail(format!("Site {} not found", id))
                .build(),
            IssuerError::IssuanceInProgress(id) => conflict()
                .title("Issuance In Progress")
                .detail(format!("An issuance for site {} is already running", id))
                .value("site_id", id)
                .build(),
            IssuerError::Configuration(msg) => bad_request()
                .title("Configuration Error")
                .detail(msg)
                .build(),
            IssuerError::Protocol(msg) => bad_gateway()
                .title("ACME Error")
                .detail(msg)
                .build(),
            IssuerError::Challenge(e) => Problem::from(e),
            IssuerError::Repository(e) => Problem::from(e),
            IssuerError::Job(e) => Problem::from(e),
            IssuerError::Vault(e) => internal_server_error()
                .title("Encryption Error")
                .detail(e.to_string())
                .build(),
            IssuerError::CertificateGeneration(msg) => internal_server_error()
                .title("Certificate Generation Error")
                .detail(msg)
                .build(),
            IssuerError::Internal(msg) => internal_server_error().detail(msg).build(),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(issue_certificate, list_certificates, get_latest_certificate),
    components(schemas(
        IssueCertificateRequest,
        JobAccepted,
        Certificate,
        IssueMode,
        ProblemDetails
    )),
    tags((name = "Certificates", description = "Certificate issuance and history"))
)]
pub struct CertificateApiDoc;

/// Issue a certificate for a site
///
/// Let's Encrypt sites go through ACME with the tenant's challenge policy;
/// `self_signed` sites are signed locally. Progress is recorded on a job.
#[utoipa::path(
    post,
    path = "/certificates/issue",
    request_body = IssueCertificateRequest,
    params(IssueQuery),
    responses(
        (status = 201, description = "Certificate issued (sync mode)", body = Certificate),
        (status = 202, description = "Issuance queued (async mode)", body = JobAccepted),
        (status = 400, description = "Configuration error"),
        (status = 404, description = "Site not found"),
        (status = 409, description = "Issuance already in progress for the site"),
        (status = 502, description = "ACME or provider failure")
    ),
    tag = "Certificates"
)]
async fn issue_certificate(
    State(app_state): State<Arc<CertsAppState>>,
    Query(query): Query<IssueQuery>,
    Json(request): Json<IssueCertificateRequest>,
) -> Result<impl IntoResponse, Problem> {
    match query.mode {
        IssueMode::Async => {
            let job = app_state
                .certificates
                .clone()
                .issue_async(request.site_id)
                .await?;
            info!("Queued issuance job {} for site {}", job.id, request.site_id);
            Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id: job.id })).into_response())
        }
        IssueMode::Sync => {
            let outcome = app_state
                .certificates
                .issue(request.site_id)
                .await
                .map_err(|e| {
                    error!("Issuance for site {} failed: {}", request.site_id, e);
                    e
                })?;
            Ok((StatusCode::CREATED, Json(outcome.certificate)).into_response())
        }
    }
}

/// List certificates of a site, newest first
#[utoipa::path(
    get,
    path = "/sites/{site_id}/certificates",
    responses(
        (status = 200, description = "Certificate summaries", body = Vec<Certificate>),
        (status = 404, description = "Site not found")
    ),
    params(("site_id" = i32, Path, description = "Site ID")),
    tag = "Certificates"
)]
async fn list_certificates(
    State(app_state): State<Arc<CertsAppState>>,
    Path(site_id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    let certificates = app_state.certificates.list_for_site(site_id).await?;
    Ok(Json(certificates))
}

/// Latest certificate of a site
#[utoipa::path(
    get,
    path = "/sites/{site_id}/certificates/latest",
    responses(
        (status = 200, description = "Latest certificate", body = Certificate),
        (status = 404, description = "Site not found or no certificate issued yet")
    ),
    params(("site_id" = i32, Path, description = "Site ID")),
    tag = "Certificates"
)]
async fn get_latest_certificate(
    State(app_state): State<Arc<CertsAppState>>,
    Path(site_id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    match app_state.certificates.latest_for_site(site_id).await? {
        Some(certificate) => Ok(Json(certificate)),
        None => Err(not_found()
            .detail(format!("Site {} has no certificate yet", site_id))
            .build()),
    }
}

pub fn configure_routes() -> Router<Arc<CertsAppState>> {
    Router::new()
        .route("/certificates/issue", post(issue_certificate))
        .route("/sites/{site_id}/certificates", get(list_certificates))
        .route(
            "/sites/{site_id}/certificates/latest",
            get(get_latest_certificate),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{Job, JobStatus};
    use crate::testing::{seed_site, TestContext};
    use autossl_providers::test_utils::MockCdnDeployer;
    use axum_test::TestServer;
    use serde_json::{json, Value};

    fn server(ctx: &TestContext) -> TestServer {
        let state = ctx.app_state(Arc::new(MockCdnDeployer::new()));
        TestServer::new(configure_routes().with_state(state)).expect("Failed to create test server")
    }

    #[tokio::test]
    async fn test_issue_sync_returns_certificate() {
        let ctx = TestContext::new().await;
        let site = seed_site(ctx.db.connection(), "cdn.example.com", "self_signed").await;
        let server = server(&ctx);

        let response = server
            .post("/certificates/issue")
            .add_query_param("mode", "sync")
            .json(&json!({ "siteId": site.id }))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);

        let certificate: Certificate = response.json();
        assert_eq!(certificate.site_id, site.id);
        assert_eq!(certificate.sans, vec!["cdn.example.com"]);

        let response = server
            .get(&format!("/sites/{}/certificates/latest", site.id))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.json::<Certificate>().id, certificate.id);
    }

    #[tokio::test]
    async fn test_issue_async_returns_job() {
        let ctx = TestContext::new().await;
        let site = seed_site(ctx.db.connection(), "cdn.example.com", "self_signed").await;
        let server = server(&ctx);

        let response = server
            .post("/certificates/issue")
            .json(&json!({ "siteId": site.id }))
            .await;
        assert_eq!(response.status_code(), StatusCode::ACCEPTED);
        let body: Value = response.json();
        let job_id = body["jobId"].as_i64().unwrap() as i32;

        let mut job: Job = ctx.jobs.get(job_id).await.unwrap();
        for _ in 0..200 {
            if job.status.is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            job = ctx.jobs.get(job_id).await.unwrap();
        }
        assert_eq!(job.status, JobStatus::Success);

        let response = server
            .get(&format!("/sites/{}/certificates", site.id))
            .await;
        assert_eq!(response.json::<Vec<Certificate>>().len(), 1);
    }

    #[tokio::test]
    async fn test_issue_error_statuses() {
        let ctx = TestContext::new().await;
        let site = seed_site(ctx.db.connection(), "cdn.example.com", "self_signed").await;
        let server = server(&ctx);

        let response = server
            .post("/certificates/issue")
            .add_query_param("mode", "sync")
            .json(&json!({ "siteId": 4242 }))
            .await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(response.header("content-type"), "application/problem+json");

        let _held = ctx.certificates.locks().try_acquire(site.id).unwrap();
        let response = server
            .post("/certificates/issue")
            .json(&json!({ "siteId": site.id }))
            .await;
        assert_eq!(response.status_code(), StatusCode::CONFLICT);
        let body: Value = response.json();
        assert_eq!(body["title"], "Issuance In Progress");
    }

    #[tokio::test]
    async fn test_acme_failure_is_bad_gateway() {
        let ctx = TestContext::with_failing_acme("ACME error: rate limited").await;
        let site = seed_site(ctx.db.connection(), "cdn.example.com", "letsencrypt").await;
        let server = server(&ctx);

        let response = server
            .post("/certificates/issue")
            .add_query_param("mode", "sync")
            .json(&json!({ "siteId": site.id }))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
        let body: Value = response.json();
        assert_eq!(body["detail"], "ACME error: rate limited");
    }

    #[tokio::test]
    async fn test_latest_without_certificate_is_not_found() {
        let ctx = TestContext::new().await;
        let site = seed_site(ctx.db.connection(), "cdn.example.com", "self_signed").await;
        let server = server(&ctx);

        let response = server
            .get(&format!("/sites/{}/certificates/latest", site.id))
            .await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

        let response = server.get("/sites/4242/certificates").await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    }
}
