use super::types::{CertsAppState, CreateDeploymentRequest};
use crate::deployment::{DeploymentError, DeploymentRecord, DeploymentStatus};
use autossl_core::error_builder::{bad_gateway, bad_request, internal_server_error, not_found};
use autossl_core::problemdetails::Problem;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::error;
use utoipa::OpenApi;

impl From<DeploymentError> for Problem {
    fn from(error: DeploymentError) -> Self {
        match error {
            DeploymentError::SiteNotFound(id) => not_found()
                .detail(format!("Site {} not found", id))
                .build(),
            DeploymentError::CertificateNotFound(msg) => not_found()
                .title("Certificate Not Found")
                .detail(msg)
                .build(),
            e @ DeploymentError::MissingCredential(_) => bad_request()
                .title("Missing Provider Credential")
                .detail(e.to_string())
                .build(),
            DeploymentError::Provider {
                deployment_id,
                source,
            } => bad_gateway()
                .title("Deployment Failed")
                .detail(source.to_string())
                .value("deployment_id", deployment_id)
                .build(),
            DeploymentError::Repository(e) => Problem::from(e),
            DeploymentError::Service(e) => Problem::from(e),
            DeploymentError::Database(msg) => internal_server_error()
                .title("Database Error")
                .detail(msg)
                .build(),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(create_deployment, list_deployments),
    components(schemas(CreateDeploymentRequest, DeploymentRecord, DeploymentStatus)),
    tags((name = "Deployments", description = "Pushing certificates to CDN providers"))
)]
pub struct DeploymentApiDoc;

/// Deploy a certificate to the site's CDN
///
/// Every attempt is recorded. A vendor failure is recorded as `failed` and
/// answered with 502 carrying the `deployment_id`.
#[utoipa::path(
    post,
    path = "/deployments",
    request_body = CreateDeploymentRequest,
    responses(
        (status = 201, description = "Certificate deployed", body = DeploymentRecord),
        (status = 400, description = "Site has no provider credential"),
        (status = 404, description = "Site or certificate not found"),
        (status = 502, description = "Provider rejected the deployment")
    ),
    tag = "Deployments"
)]
async fn create_deployment(
    State(app_state): State<Arc<CertsAppState>>,
    Json(request): Json<CreateDeploymentRequest>,
) -> Result<impl IntoResponse, Problem> {
    let record = app_state
        .deployments
        .deploy_for_site(request.site_id, request.certificate_id)
        .await
        .map_err(|e| {
            error!("Deployment for site {} failed: {}", request.site_id, e);
            e
        })?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// List deployments of a site, newest first
#[utoipa::path(
    get,
    path = "/sites/{site_id}/deployments",
    responses(
        (status = 200, description = "Deployment records", body = Vec<DeploymentRecord>),
        (status = 404, description = "Site not found")
    ),
    params(("site_id" = i32, Path, description = "Site ID")),
    tag = "Deployments"
)]
async fn list_deployments(
    State(app_state): State<Arc<CertsAppState>>,
    Path(site_id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    let records = app_state.deployments.list_for_site(site_id).await?;
    Ok(Json(records))
}

pub fn configure_routes() -> Router<Arc<CertsAppState>> {
    Router::new()
        .route("/deployments", post(create_deployment))
        .route("/sites/{site_id}/deployments", get(list_deployments))
}
