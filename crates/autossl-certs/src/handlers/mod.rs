pub(crate) mod certificate_handler;
pub(crate) mod challenge_handler;
pub(crate) mod deployment_handler;
pub(crate) mod job_handler;
pub(crate) mod settings_handler;
pub(crate) mod site_handler;
pub(crate) mod types;

pub use types::{
    create_certs_app_state, CertsAppState, CreateDeploymentRequest, IssueCertificateRequest,
    IssueMode, JobAccepted,
};

use axum::Router;
use std::sync::Arc;
use utoipa::OpenApi;

pub fn configure_routes() -> Router<Arc<CertsAppState>> {
    Router::new()
        .merge(challenge_handler::configure_routes())
        .merge(certificate_handler::configure_routes())
        .merge(job_handler::configure_routes())
        .merge(deployment_handler::configure_routes())
        .merge(settings_handler::configure_routes())
        .merge(site_handler::configure_routes())
}

/// OpenAPI document covering every route in [`configure_routes`]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = certificate_handler::CertificateApiDoc::openapi();
    for other in [
        challenge_handler::ChallengeApiDoc::openapi(),
        job_handler::JobApiDoc::openapi(),
        deployment_handler::DeploymentApiDoc::openapi(),
        settings_handler::SettingsApiDoc::openapi(),
        site_handler::SiteApiDoc::openapi(),
    ] {
        doc.merge(other);
    }
    doc.info.title = "AutoSSL API".to_string();
    doc.info.description =
        Some("Certificate issuance, deployment and renewal for CDN sites".to_string());
    doc
}
