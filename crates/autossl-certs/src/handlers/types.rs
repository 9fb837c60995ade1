use crate::challenges::ChallengeCoordinator;
use crate::deployment::DeploymentDispatcher;
use crate::jobs::JobTracker;
use crate::provider_sync::ProviderSyncService;
use crate::scheduler::RenewalScheduler;
use crate::settings::SettingsService;
use crate::sites::{CredentialService, SiteService};
use crate::tls::CertificateService;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

pub struct CertsAppState {
    pub certificates: Arc<CertificateService>,
    pub jobs: Arc<JobTracker>,
    pub deployments: Arc<DeploymentDispatcher>,
    pub settings: Arc<SettingsService>,
    pub sites: Arc<SiteService>,
    pub credentials: Arc<CredentialService>,
    pub provider_sync: Arc<ProviderSyncService>,
    pub coordinator: Arc<ChallengeCoordinator>,
    pub scheduler: RenewalScheduler,
}

#[allow(clippy::too_many_arguments)]
pub fn create_certs_app_state(
    certificates: Arc<CertificateService>,
    jobs: Arc<JobTracker>,
    deployments: Arc<DeploymentDispatcher>,
    settings: Arc<SettingsService>,
    sites: Arc<SiteService>,
    credentials: Arc<CredentialService>,
    provider_sync: Arc<ProviderSyncService>,
    coordinator: Arc<ChallengeCoordinator>,
    scheduler: RenewalScheduler,
) -> Arc<CertsAppState> {
    Arc::new(CertsAppState {
        certificates,
        jobs,
        deployments,
        settings,
        sites,
        credentials,
        provider_sync,
        coordinator,
        scheduler,
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum IssueMode {
    Sync,
    #[default]
    Async,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct IssueQuery {
    /// `async` (default) answers 202 with a job id, `sync` waits for the certificate
    #[serde(default)]
    pub mode: IssueMode,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssueCertificateRequest {
    pub site_id: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobAccepted {
    pub job_id: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeploymentRequest {
    pub site_id: i32,
    /// Latest certificate of the site when absent
    pub certificate_id: Option<i32>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ChallengePolicyQuery {
    /// Hostname to resolve the challenge policy for
    pub domain: String,
}
