use autossl_certs::challenges::{InMemoryDnsRecordStore, InMemoryHttpChallengeStore};
use autossl_certs::{
    configure_routes, create_certs_app_state, openapi, AcmeIssuer, CertificateRepository,
    CertificateService, ChallengeCoordinator, CredentialService, DefaultCertificateRepository,
    DeploymentDispatcher, JobTracker, ProviderSyncService, RenewalScheduler, SelfSignedIssuer,
    SettingsService, SiteService,
};
use autossl_core::{AppConfig, CredentialVault};
use autossl_database::DbConnection;
use autossl_providers::{CdnDeployerRegistry, DefaultDnsProviderFactory};
use axum::{routing::get, Json, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Everything `serve` needs to run and later tear down
pub struct AutosslServer {
    pub router: Router,
    pub scheduler: RenewalScheduler,
    pub jobs: Arc<JobTracker>,
    pub deployments: Arc<DeploymentDispatcher>,
}

/// Wires services over `db` and builds the HTTP router. The scheduler is
/// returned unstarted.
pub fn build_server(db: Arc<DbConnection>, config: &AppConfig) -> anyhow::Result<AutosslServer> {
    let vault = Arc::new(CredentialVault::new(&config.data_encryption_key)?);

    let jobs = Arc::new(JobTracker::new(db.clone()));
    let sites = Arc::new(SiteService::new(db.clone()));
    let credentials = Arc::new(CredentialService::new(db.clone(), vault.clone()));
    let settings = Arc::new(SettingsService::new(
        db.clone(),
        config.acme.clone(),
        config.renewal.clone(),
    ));
    let repository: Arc<dyn CertificateRepository> =
        Arc::new(DefaultCertificateRepository::new(db.clone(), vault));

    let coordinator = Arc::new(ChallengeCoordinator::new(
        Arc::new(InMemoryHttpChallengeStore::new()),
        Arc::new(InMemoryDnsRecordStore::new()),
        Arc::new(DefaultDnsProviderFactory),
    ));

    let certificates = Arc::new(CertificateService::new(
        repository.clone(),
        jobs.clone(),
        sites.clone(),
        credentials.clone(),
        settings.clone(),
        Arc::new(AcmeIssuer::new(repository.clone(), coordinator.clone())),
        Arc::new(SelfSignedIssuer::new()),
    ));

    let registry = Arc::new(CdnDeployerRegistry::with_defaults()?);
    let provider_sync = Arc::new(ProviderSyncService::new(
        db.clone(),
        credentials.clone(),
        registry.clone(),
    ));
    let deployments = Arc::new(DeploymentDispatcher::new(
        db,
        repository,
        sites.clone(),
        credentials.clone(),
        registry,
    ));

    let scheduler = RenewalScheduler::new(
        sites.clone(),
        settings.clone(),
        certificates.clone(),
        deployments.clone(),
        config.sweep_concurrency,
    );

    let state = create_certs_app_state(
        certificates,
        jobs.clone(),
        deployments.clone(),
        settings,
        sites,
        credentials,
        provider_sync,
        coordinator,
        scheduler.clone(),
    );

    let doc = Arc::new(openapi());
    let router = configure_routes()
        .with_state(state)
        .route(
            "/openapi.json",
            get(move || {
                let doc = doc.clone();
                async move { Json(doc.as_ref().clone()) }
            }),
        )
        .layer(TraceLayer::new_for_http());
    debug!("HTTP routes configured");

    Ok(AutosslServer {
        router,
        scheduler,
        jobs,
        deployments,
    })
}
