//! Certificate lifecycle orchestration for CDN sites

pub mod challenges;
pub mod deployment;
pub mod handlers;
pub mod jobs;
pub mod provider_sync;
pub mod scheduler;
pub mod settings;
pub mod sites;
pub mod tls;

pub use challenges::{ChallengeCoordinator, ChallengeError, ChallengeType, DnsCredential};
pub use deployment::{DeploymentDispatcher, DeploymentError, DeploymentRecord, DeploymentStatus};
pub use jobs::{Job, JobError, JobStatus, JobTracker, JobType, ProgressSink};
pub use provider_sync::{ProviderSyncService, SyncError, SyncReport};
pub use scheduler::{RenewalScheduler, SchedulerError, SweepReport};
pub use settings::{RenewalSettings, SettingsError, SettingsService};
pub use sites::{CredentialService, SiteService};
pub use tls::{
    AcmeIssuer, Certificate, CertificateIssuer, CertificateRepository, CertificateService,
    DefaultCertificateRepository, IssuerError, SelfSignedIssuer,
};

pub use handlers::{configure_routes, create_certs_app_state, openapi, CertsAppState};
