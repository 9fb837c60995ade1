//! Runs issuance for a site under a job and stores the result.

use autossl_core::ServiceError;
use autossl_entities::sites;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use super::errors::IssuerError;
use super::issuer::CertificateIssuer;
use super::models::{Certificate, CertificateSource, ChallengePlan, IssueRequest};
use super::repository::CertificateRepository;
use crate::challenges::{ChallengeType, DnsCredential};
use crate::jobs::{Job, JobOutcome, JobProgress, JobTracker, JobType, ProgressSink};
use crate::settings::{RenewalSettings, SettingsService};
use crate::sites::{CredentialService, SiteService};

/// In-process advisory locks, one per site with an issuance in flight
#[derive(Clone, Default)]
pub struct SiteLocks {
    held: Arc<Mutex<HashSet<i32>>>,
}

impl SiteLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when another issuance already holds the site.
    pub fn try_acquire(&self, site_id: i32) -> Option<SiteGuard> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(site_id) {
            return None;
        }
        Some(SiteGuard {
            held: self.held.clone(),
            site_id,
        })
    }

    pub fn is_locked(&self, site_id: i32) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&site_id)
    }
}

/// Releases the site when dropped
pub struct SiteGuard {
    held: Arc<Mutex<HashSet<i32>>>,
    site_id: i32,
}

impl Drop for SiteGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.site_id);
    }
}

/// Result of a synchronous issuance
#[derive(Debug, Clone)]
pub struct IssueOutcome {
    pub job_id: i32,
    pub certificate: Certificate,
}

pub struct CertificateService {
    repository: Arc<dyn CertificateRepository>,
    jobs: Arc<JobTracker>,
    sites: Arc<SiteService>,
    credentials: Arc<CredentialService>,
    settings: Arc<SettingsService>,
    acme: Arc<dyn CertificateIssuer>,
    self_signed: Arc<dyn CertificateIssuer>,
    locks: SiteLocks,
}

impl CertificateService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<dyn CertificateRepository>,
        jobs: Arc<JobTracker>,
        sites: Arc<SiteService>,
        credentials: Arc<CredentialService>,
        settings: Arc<SettingsService>,
        acme: Arc<dyn CertificateIssuer>,
        self_signed: Arc<dyn CertificateIssuer>,
    ) -> Self {
        Self {
            repository,
            jobs,
            sites,
            credentials,
            settings,
            acme,
            self_signed,
            locks: SiteLocks::new(),
        }
    }

    pub fn locks(&self) -> &SiteLocks {
        &self.locks
    }

    async fn load_site(&self, site_id: i32) -> Result<sites::Model, IssuerError> {
        match self.sites.get_site(site_id).await {
            Ok(site) => Ok(site),
            Err(ServiceError::NotFound { .. }) => Err(IssuerError::SiteNotFound(site_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Locks the site and records a queued job for it.
    async fn prepare(&self, site_id: i32) -> Result<(SiteGuard, sites::Model, Job), IssuerError> {
        let site = self.load_site(site_id).await?;
        let guard = self
            .locks
            .try_acquire(site_id)
            .ok_or(IssuerError::IssuanceInProgress(site_id))?;
        let job = self.jobs.create(site_id, JobType::Renew).await?;
        Ok((guard, site, job))
    }

    /// Issues a certificate and waits for the result.
    pub async fn issue(&self, site_id: i32) -> Result<IssueOutcome, IssuerError> {
        let (guard, site, job) = self.prepare(site_id).await?;
        let certificate = self.run_job(guard, &site, job.id, None).await?;
        Ok(IssueOutcome {
            job_id: job.id,
            certificate,
        })
    }

    /// Like [`issue`](Self::issue), with settings the caller already resolved
    /// for the site's tenant.
    pub async fn issue_with_settings(
        &self,
        site_id: i32,
        settings: &RenewalSettings,
    ) -> Result<IssueOutcome, IssuerError> {
        let (guard, site, job) = self.prepare(site_id).await?;
        let certificate = self.run_job(guard, &site, job.id, Some(settings)).await?;
        Ok(IssueOutcome {
            job_id: job.id,
            certificate,
        })
    }

    /// Queues issuance in the background and returns the job to poll.
    pub async fn issue_async(self: Arc<Self>, site_id: i32) -> Result<Job, IssuerError> {
        let (guard, site, job) = self.prepare(site_id).await?;
        let job_id = job.id;

        tokio::spawn(async move {
            // the outcome is already recorded on the job
            let _ = self.run_job(guard, &site, job_id, None).await;
        });

        Ok(job)
    }

    async fn run_job(
        &self,
        _guard: SiteGuard,
        site: &sites::Model,
        job_id: i32,
        settings: Option<&RenewalSettings>,
    ) -> Result<Certificate, IssuerError> {
        let result = match self.jobs.start(job_id).await {
            Ok(_) => self.issue_for_site(site, job_id, settings).await,
            Err(e) => Err(e.into()),
        };

        let finished = match &result {
            Ok(certificate) => {
                info!(
                    "Issued certificate {} for site {} ({})",
                    certificate.id, site.id, site.domain
                );
                self.jobs
                    .finish(
                        job_id,
                        JobOutcome::Success,
                        Some(format!("issued certificate {}", certificate.id)),
                    )
                    .await
            }
            Err(e) => {
                error!("Issuance for site {} ({}) failed: {}", site.id, site.domain, e);
                self.jobs
                    .finish(job_id, JobOutcome::Failed, Some(e.to_string()))
                    .await
            }
        };
        if let Err(e) = finished {
            warn!("Failed to finish job {}: {}", job_id, e);
        }

        result
    }

    async fn issue_for_site(
        &self,
        site: &sites::Model,
        job_id: i32,
        settings: Option<&RenewalSettings>,
    ) -> Result<Certificate, IssuerError> {
        let progress = JobProgress::new(&self.jobs, job_id);
        let source: CertificateSource = site
            .certificate_source
            .parse()
            .map_err(IssuerError::Configuration)?;
        let acme = match settings {
            Some(settings) => settings.acme.clone(),
            None => {
                self.settings
                    .resolve_renewal_settings(site.tenant_id)
                    .await?
                    .acme
            }
        };

        let issued = match source {
            CertificateSource::SelfSigned => {
                let request = IssueRequest::new(&site.domain, acme, ChallengePlan::Http01);
                self.self_signed.issue(&request, &progress).await?
            }
            CertificateSource::LetsEncrypt => {
                let plan = self.challenge_plan(site).await?;
                let request = IssueRequest::new(&site.domain, acme, plan);
                self.acme.issue(&request, &progress).await?
            }
        };

        progress.report("saving certificate").await;
        Ok(self.repository.save_certificate(site.id, &issued).await?)
    }

    /// Resolves the challenge for the site's apex; dns-01 needs a usable DNS credential.
    async fn challenge_plan(&self, site: &sites::Model) -> Result<ChallengePlan, IssuerError> {
        let policy = self
            .settings
            .resolve_challenge_policy(site.tenant_id, &site.domain)
            .await?;
        if policy.challenge_type == ChallengeType::Http01 {
            return Ok(ChallengePlan::Http01);
        }

        let missing = || {
            IssuerError::Configuration(format!(
                "DNS-01 challenge for {} requires a DNS provider credential",
                policy.apex_domain
            ))
        };

        let credential_id = policy.dns_credential_id.ok_or_else(missing)?;
        let credential = match self.credentials.get(credential_id).await {
            Ok(credential) if credential.tenant_id == site.tenant_id => credential,
            Ok(_) | Err(ServiceError::NotFound { .. }) => return Err(missing()),
            Err(e) => return Err(e.into()),
        };
        let provider_type = CredentialService::provider_type(&credential)
            .ok()
            .filter(|t| t.is_dns_capable())
            .ok_or_else(missing)?;
        let config = self.credentials.decrypt_config(&credential)?;

        Ok(ChallengePlan::Dns01 {
            credential: DnsCredential {
                provider_type,
                config,
            },
        })
    }

    async fn ensure_site(&self, site_id: i32) -> Result<(), IssuerError> {
        self.load_site(site_id).await.map(|_| ())
    }

    pub async fn latest_for_site(&self, site_id: i32) -> Result<Option<Certificate>, IssuerError> {
        self.ensure_site(site_id).await?;
        Ok(self.repository.find_latest_certificate(site_id).await?)
    }

    pub async fn list_for_site(&self, site_id: i32) -> Result<Vec<Certificate>, IssuerError> {
        self.ensure_site(site_id).await?;
        Ok(self.repository.list_certificates(site_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobStatus;
    use crate::sites::UpdateSiteRequest;
    use crate::testing::{seed_credential, seed_site, seed_site_in, TestContext};
    use autossl_entities::{domain_settings, jobs};
    use chrono::{Duration, Utc};
    use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};

    #[tokio::test]
    async fn test_self_signed_end_to_end() {
        let ctx = TestContext::new().await;
        let site = seed_site(ctx.db.connection(), "cdn.example.com", "self_signed").await;

        let outcome = ctx.certificates.issue(site.id).await.unwrap();
        let certificate = outcome.certificate;
        assert_eq!(certificate.sans, vec!["cdn.example.com"]);
        assert_eq!(certificate.common_name, "cdn.example.com");
        assert_eq!(certificate.status, "issued");

        let window = certificate.expires_at - certificate.issued_at;
        assert!(window > Duration::days(89) && window <= Duration::days(90));
        assert_eq!(ctx.acme.calls(), 0);

        let job = ctx.jobs.get(outcome.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Success);
        assert!(job.finished_at.is_some());

        let listed = ctx.certificates.list_for_site(site.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(!ctx.certificates.locks().is_locked(site.id));
    }

    #[tokio::test]
    async fn test_sequential_issues_latest_is_newer() {
        let ctx = TestContext::new().await;
        let site = seed_site(ctx.db.connection(), "cdn.example.com", "self_signed").await;

        let first = ctx.certificates.issue(site.id).await.unwrap().certificate;
        let second = ctx.certificates.issue(site.id).await.unwrap().certificate;
        assert_ne!(first.id, second.id);

        let latest = ctx
            .certificates
            .latest_for_site(site.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, second.id);
    }

    #[tokio::test]
    async fn test_letsencrypt_site_uses_acme_issuer() {
        let ctx = TestContext::new().await;
        let site = seed_site(ctx.db.connection(), "cdn.example.com", "letsencrypt").await;

        let outcome = ctx.certificates.issue(site.id).await.unwrap();
        assert_eq!(ctx.acme.calls(), 1);
        assert_eq!(outcome.certificate.sans, vec!["cdn.example.com"]);
    }

    #[tokio::test]
    async fn test_dns01_without_credential_fails_before_acme() {
        let ctx = TestContext::new().await;
        let site = seed_site(ctx.db.connection(), "cdn.example.com", "letsencrypt").await;
        domain_settings::ActiveModel {
            tenant_id: Set(site.tenant_id),
            apex_domain: Set("example.com".to_string()),
            challenge_type: Set("dns-01".to_string()),
            dns_credential_id: Set(None),
            ..Default::default()
        }
        .insert(ctx.db.connection())
        .await
        .unwrap();

        let err = ctx.certificates.issue(site.id).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "DNS-01 challenge for example.com requires a DNS provider credential"
        );
        assert!(matches!(err, IssuerError::Configuration(_)));
        assert_eq!(ctx.acme.calls(), 0);

        let job = jobs::Entity::find().one(ctx.db.connection()).await.unwrap().unwrap();
        assert_eq!(job.status, "failed");
        assert_eq!(
            job.message.as_deref(),
            Some("DNS-01 challenge for example.com requires a DNS provider credential")
        );
    }

    #[tokio::test]
    async fn test_dns01_with_cdn_only_credential_is_rejected() {
        let ctx = TestContext::new().await;
        let site = seed_site(ctx.db.connection(), "cdn.example.com", "letsencrypt").await;
        let cdn = seed_credential(ctx.db.connection(), site.tenant_id, "tencent").await;
        domain_settings::ActiveModel {
            tenant_id: Set(site.tenant_id),
            apex_domain: Set("example.com".to_string()),
            challenge_type: Set("dns-01".to_string()),
            dns_credential_id: Set(Some(cdn.id)),
            ..Default::default()
        }
        .insert(ctx.db.connection())
        .await
        .unwrap();

        let err = ctx.certificates.issue(site.id).await.unwrap_err();
        assert!(matches!(err, IssuerError::Configuration(_)));
        assert_eq!(ctx.acme.calls(), 0);
    }

    #[tokio::test]
    async fn test_dns01_plan_reaches_issuer() {
        let ctx = TestContext::new().await;
        let site = seed_site(ctx.db.connection(), "cdn.example.com", "letsencrypt").await;
        let dns = seed_credential(ctx.db.connection(), site.tenant_id, "tencent_dns").await;
        domain_settings::ActiveModel {
            tenant_id: Set(site.tenant_id),
            apex_domain: Set("example.com".to_string()),
            challenge_type: Set("dns-01".to_string()),
            dns_credential_id: Set(Some(dns.id)),
            ..Default::default()
        }
        .insert(ctx.db.connection())
        .await
        .unwrap();

        ctx.certificates.issue(site.id).await.unwrap();
        assert_eq!(ctx.acme.last_challenge().await, Some(ChallengeType::Dns01));
    }

    #[tokio::test]
    async fn test_sibling_dns01_site_sets_challenge() {
        let ctx = TestContext::new().await;
        let db = ctx.db.connection();
        let cdn = seed_site(db, "cdn.example.com", "letsencrypt").await;
        let img = seed_site_in(db, cdn.tenant_id, "img.example.com", "letsencrypt").await;
        let dns = seed_credential(db, cdn.tenant_id, "tencent_dns").await;

        ctx.sites
            .update_site(
                cdn.id,
                UpdateSiteRequest {
                    acme_challenge_type: Some("dns-01".to_string()),
                    dns_credential_id: Some(dns.id),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        ctx.certificates.issue(img.id).await.unwrap();
        assert_eq!(ctx.acme.last_challenge().await, Some(ChallengeType::Dns01));
    }

    #[tokio::test]
    async fn test_issue_with_resolved_settings() {
        let ctx = TestContext::new().await;
        let site = seed_site(ctx.db.connection(), "cdn.example.com", "letsencrypt").await;

        let mut settings = ctx
            .settings
            .resolve_renewal_settings(site.tenant_id)
            .await
            .unwrap();
        settings.acme.directory_url = "https://acme.internal.test/directory".to_string();

        let outcome = ctx
            .certificates
            .issue_with_settings(site.id, &settings)
            .await
            .unwrap();
        assert_eq!(
            ctx.acme.last_directory().await.as_deref(),
            Some("https://acme.internal.test/directory")
        );
        assert_eq!(
            ctx.jobs.get(outcome.job_id).await.unwrap().status,
            JobStatus::Success
        );

        ctx.certificates.issue(site.id).await.unwrap();
        assert_eq!(
            ctx.acme.last_directory().await.as_deref(),
            Some(autossl_core::LETS_ENCRYPT_STAGING_DIRECTORY)
        );
    }

    #[tokio::test]
    async fn test_concurrent_issue_is_rejected_without_job() {
        let ctx = TestContext::new().await;
        let site = seed_site(ctx.db.connection(), "cdn.example.com", "self_signed").await;

        let _held = ctx.certificates.locks().try_acquire(site.id).unwrap();
        let err = ctx.certificates.issue(site.id).await.unwrap_err();
        assert!(matches!(err, IssuerError::IssuanceInProgress(id) if id == site.id));

        let count = jobs::Entity::find().count(ctx.db.connection()).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_issuer_failure_marks_job_failed() {
        let ctx = TestContext::with_failing_acme("ACME error: rate limited").await;
        let site = seed_site(ctx.db.connection(), "cdn.example.com", "letsencrypt").await;

        let err = ctx.certificates.issue(site.id).await.unwrap_err();
        assert_eq!(err.to_string(), "ACME error: rate limited");

        let job = jobs::Entity::find().one(ctx.db.connection()).await.unwrap().unwrap();
        assert_eq!(job.status, "failed");
        assert_eq!(job.message.as_deref(), Some("ACME error: rate limited"));
        assert!(ctx.certificates.list_for_site(site.id).await.unwrap().is_empty());
        assert!(!ctx.certificates.locks().is_locked(site.id));
    }

    #[tokio::test]
    async fn test_issue_async_completes_job() {
        let ctx = TestContext::new().await;
        let site = seed_site(ctx.db.connection(), "cdn.example.com", "self_signed").await;

        let job = ctx.certificates.clone().issue_async(site.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);

        let deadline = Utc::now() + Duration::seconds(10);
        let job = loop {
            let job = ctx.jobs.get(job.id).await.unwrap();
            if job.status.is_terminal() || Utc::now() > deadline {
                break job;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        };
        assert_eq!(job.status, JobStatus::Success);
        assert!(ctx
            .certificates
            .latest_for_site(site.id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_unknown_site() {
        let ctx = TestContext::new().await;
        assert!(matches!(
            ctx.certificates.issue(4242).await,
            Err(IssuerError::SiteNotFound(4242))
        ));
        assert!(matches!(
            ctx.certificates.latest_for_site(4242).await,
            Err(IssuerError::SiteNotFound(4242))
        ));
    }
}
