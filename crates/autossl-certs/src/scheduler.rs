//! Daily per-tenant renewal sweeps.
//!
//! Each tenant gets one timer task that sleeps until its next renewal time
//! (UTC), runs a sweep over the tenant's sites and goes back to sleep.

use autossl_core::{ServiceError, UtcDateTime};
use autossl_entities::sites;
use chrono::Utc;
use cron::Schedule;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use crate::deployment::DeploymentDispatcher;
use crate::settings::{RenewalSettings, SettingsError, SettingsService};
use crate::sites::{SiteService, SiteStatus};
use crate::tls::{CertificateService, IssuerError};

/// Pause before a tenant task retries after its next run could not be computed
pub const SCHEDULE_RETRY_INTERVAL: Duration = Duration::from_secs(60);
/// Upper bound for the doubling retry delay
pub const SCHEDULE_RETRY_MAX: Duration = Duration::from_secs(3600);

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("{0}")]
    Service(#[from] ServiceError),

    #[error("Invalid renewal schedule: {0}")]
    InvalidSchedule(String),
}

/// Renewal decision for one site.
///
/// Sites with auto-renew off never renew; sites without a certificate always do;
/// otherwise renew once the latest certificate expires within the threshold.
pub fn should_renew(
    auto_renew: bool,
    latest_expiry: Option<UtcDateTime>,
    threshold_days: u32,
    now: UtcDateTime,
) -> bool {
    if !auto_renew {
        return false;
    }
    match latest_expiry {
        None => true,
        Some(expires_at) => expires_at - now <= chrono::Duration::days(i64::from(threshold_days)),
    }
}

/// First daily `hour:minute` (UTC) strictly after `after`.
pub fn next_trigger(hour: u32, minute: u32, after: UtcDateTime) -> Result<UtcDateTime, SchedulerError> {
    let expression = format!("0 {} {} * * *", minute, hour);
    let schedule = Schedule::from_str(&expression)
        .map_err(|e| SchedulerError::InvalidSchedule(format!("{}: {}", expression, e)))?;
    schedule
        .after(&after)
        .next()
        .ok_or_else(|| SchedulerError::InvalidSchedule(format!("{} never fires", expression)))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub checked: usize,
    pub renewed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub deployed: usize,
}

#[derive(Default)]
struct SweepCounters {
    renewed: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    deployed: AtomicUsize,
}

struct TenantTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    sites: Arc<SiteService>,
    settings: Arc<SettingsService>,
    certificates: Arc<CertificateService>,
    deployments: Arc<DeploymentDispatcher>,
    concurrency: usize,
    retry_interval: Duration,
    tasks: Mutex<HashMap<i32, TenantTask>>,
    started: AtomicBool,
}

/// Owns one renewal timer per tenant
#[derive(Clone)]
pub struct RenewalScheduler {
    inner: Arc<Inner>,
}

impl RenewalScheduler {
    pub fn new(
        sites: Arc<SiteService>,
        settings: Arc<SettingsService>,
        certificates: Arc<CertificateService>,
        deployments: Arc<DeploymentDispatcher>,
        concurrency: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sites,
                settings,
                certificates,
                deployments,
                concurrency: concurrency.max(1),
                retry_interval: SCHEDULE_RETRY_INTERVAL,
                tasks: Mutex::new(HashMap::new()),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Overrides [`SCHEDULE_RETRY_INTERVAL`]. Only valid before the scheduler is shared.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.retry_interval = interval;
        }
        self
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Registers a timer for every tenant. A second call does nothing.
    pub async fn start(&self) -> Result<usize, SchedulerError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            debug!("Renewal scheduler already started");
            return Ok(0);
        }

        let tenants = self.inner.sites.list_tenants().await?;
        let mut tasks = self.inner.tasks.lock().await;
        for tenant in &tenants {
            if let Some(previous) = tasks.insert(tenant.id, self.spawn_tenant(tenant.id)) {
                previous.token.cancel();
            }
        }

        info!("Renewal scheduler started for {} tenant(s)", tenants.len());
        Ok(tenants.len())
    }

    /// Reschedules one tenant after its settings changed. Returns false when not started.
    pub async fn refresh(&self, tenant_id: i32) -> bool {
        if !self.is_started() {
            return false;
        }

        let mut tasks = self.inner.tasks.lock().await;
        // stop() may have drained the registry while we waited for the lock
        if !self.is_started() {
            return false;
        }
        if let Some(previous) = tasks.remove(&tenant_id) {
            previous.token.cancel();
        }
        tasks.insert(tenant_id, self.spawn_tenant(tenant_id));
        debug!("Rescheduled renewal for tenant {}", tenant_id);
        true
    }

    /// Cancels every timer and waits for running tasks to wind down.
    pub async fn stop(&self) {
        self.inner.started.store(false, Ordering::SeqCst);

        let drained: Vec<TenantTask> = {
            let mut tasks = self.inner.tasks.lock().await;
            tasks.drain().map(|(_, task)| task).collect()
        };
        for task in &drained {
            task.token.cancel();
        }
        for task in drained {
            if let Err(e) = task.handle.await {
                if !e.is_cancelled() {
                    warn!("Renewal task ended abnormally: {}", e);
                }
            }
        }
        info!("Renewal scheduler stopped");
    }

    /// Tenants whose timer task is still alive
    pub async fn scheduled_tenants(&self) -> Vec<i32> {
        let mut tenants: Vec<i32> = self
            .inner
            .tasks
            .lock()
            .await
            .iter()
            .filter(|(_, task)| !task.handle.is_finished())
            .map(|(tenant_id, _)| *tenant_id)
            .collect();
        tenants.sort_unstable();
        tenants
    }

    fn spawn_tenant(&self, tenant_id: i32) -> TenantTask {
        let token = CancellationToken::new();
        let scheduler = self.clone();
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            let mut retry = scheduler.inner.retry_interval;
            loop {
                let next = match scheduler.next_run(tenant_id).await {
                    Ok(next) => {
                        retry = scheduler.inner.retry_interval;
                        next
                    }
                    Err(SchedulerError::Settings(SettingsError::NotFound(_))) => {
                        info!("Tenant {} no longer exists, dropping its renewal timer", tenant_id);
                        return;
                    }
                    Err(e) => {
                        error!(
                            "Cannot schedule renewal for tenant {}, retrying in {:?}: {}",
                            tenant_id, retry, e
                        );
                        let wait = retry;
                        retry = retry.saturating_mul(2).min(SCHEDULE_RETRY_MAX);
                        tokio::select! {
                            _ = cancelled.cancelled() => return,
                            _ = tokio::time::sleep(wait) => continue,
                        }
                    }
                };
                let wait = (next - Utc::now()).to_std().unwrap_or_default();
                debug!("Next renewal sweep for tenant {} at {}", tenant_id, next);

                tokio::select! {
                    _ = cancelled.cancelled() => return,
                    _ = tokio::time::sleep(wait) => {}
                }

                match scheduler.run_sweep(tenant_id).await {
                    Ok(report) => info!("Renewal sweep for tenant {}: {:?}", tenant_id, report),
                    Err(e) => error!("Renewal sweep for tenant {} failed: {}", tenant_id, e),
                }
            }
        });

        TenantTask { token, handle }
    }

    async fn next_run(&self, tenant_id: i32) -> Result<UtcDateTime, SchedulerError> {
        let settings = self.inner.settings.resolve_renewal_settings(tenant_id).await?;
        next_trigger(settings.renewal_hour, settings.renewal_minute, Utc::now())
    }

    /// One sweep over the tenant's sites. Per-site failures are counted, not returned.
    pub async fn run_sweep(&self, tenant_id: i32) -> Result<SweepReport, SchedulerError> {
        let settings = self.inner.settings.resolve_renewal_settings(tenant_id).await?;
        let sites = self.inner.sites.list_sites(tenant_id).await?;
        let counters = SweepCounters::default();
        let checked = sites.len();

        stream::iter(sites)
            .for_each_concurrent(self.inner.concurrency, |site| {
                let settings = &settings;
                let counters = &counters;
                async move { self.process_site(site, settings, counters).await }
            })
            .await;

        Ok(SweepReport {
            checked,
            renewed: counters.renewed.load(Ordering::SeqCst),
            skipped: counters.skipped.load(Ordering::SeqCst),
            failed: counters.failed.load(Ordering::SeqCst),
            deployed: counters.deployed.load(Ordering::SeqCst),
        })
    }

    async fn process_site(
        &self,
        site: sites::Model,
        settings: &RenewalSettings,
        counters: &SweepCounters,
    ) {
        if site.status == SiteStatus::Paused.as_str() {
            debug!("Site {} ({}) is paused", site.id, site.domain);
            counters.skipped.fetch_add(1, Ordering::SeqCst);
            return;
        }

        let threshold_days = site.renew_days_before.map_or(settings.threshold_days, |days| {
            u32::try_from(days).unwrap_or(settings.threshold_days)
        });

        let latest = match self.inner.certificates.latest_for_site(site.id).await {
            Ok(latest) => latest,
            Err(e) => {
                error!("Cannot read certificates of site {}: {}", site.id, e);
                counters.failed.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };

        let expiry = latest.as_ref().map(|c| c.expires_at);
        if !should_renew(site.auto_renew, expiry, threshold_days, Utc::now()) {
            debug!("Site {} ({}) does not need renewal", site.id, site.domain);
            counters.skipped.fetch_add(1, Ordering::SeqCst);
            return;
        }

        info!("Renewing certificate for site {} ({})", site.id, site.domain);
        let outcome = match self
            .inner
            .certificates
            .issue_with_settings(site.id, settings)
            .await
        {
            Ok(outcome) => outcome,
            Err(IssuerError::IssuanceInProgress(_)) => {
                info!("Site {} is already being issued, skipping", site.id);
                counters.skipped.fetch_add(1, Ordering::SeqCst);
                return;
            }
            Err(e) => {
                error!("Renewal of site {} ({}) failed: {}", site.id, site.domain, e);
                counters.failed.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };
        counters.renewed.fetch_add(1, Ordering::SeqCst);

        if !settings.auto_deploy || site.provider_credential_id.is_none() {
            return;
        }
        match self
            .inner
            .deployments
            .deploy_for_site(site.id, Some(outcome.certificate.id))
            .await
        {
            Ok(_) => {
                counters.deployed.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => error!("Auto-deploy for site {} failed: {}", site.id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::UpdateRenewalSettings;
    use crate::testing::{
        attach_credential, seed_credential, seed_site, seed_site_in, seed_tenant, TestContext,
    };
    use autossl_providers::test_utils::MockCdnDeployer;
    use autossl_providers::{CdnDeployerRegistry, ProviderType};
    use autossl_entities::jobs;
    use chrono::{Duration, TimeZone};
    use sea_orm::{
        ActiveModelTrait, ConnectionTrait, EntityTrait, IntoActiveModel, QueryOrder, Set,
    };

    fn scheduler(ctx: &TestContext, deployer: Arc<MockCdnDeployer>) -> RenewalScheduler {
        scheduler_with(ctx, deployer, 2)
    }

    fn scheduler_with(
        ctx: &TestContext,
        deployer: Arc<MockCdnDeployer>,
        concurrency: usize,
    ) -> RenewalScheduler {
        let mut registry = CdnDeployerRegistry::new();
        registry.register(ProviderType::Tencent, deployer);
        let deployments = Arc::new(DeploymentDispatcher::new(
            ctx.db.connection_arc(),
            ctx.repository.clone(),
            ctx.sites.clone(),
            ctx.credentials.clone(),
            Arc::new(registry),
        ));
        RenewalScheduler::new(
            ctx.sites.clone(),
            ctx.settings.clone(),
            ctx.certificates.clone(),
            deployments,
            concurrency,
        )
    }

    #[test]
    fn test_should_renew_truth_table() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 3, 0, 0).unwrap();

        assert!(!should_renew(false, None, 30, now));
        assert!(!should_renew(false, Some(now), 30, now));
        assert!(should_renew(true, None, 30, now));
        assert!(should_renew(true, Some(now - Duration::days(1)), 30, now));
        assert!(should_renew(true, Some(now + Duration::days(30)), 30, now));
        assert!(!should_renew(true, Some(now + Duration::days(31)), 30, now));
        assert!(!should_renew(
            true,
            Some(now + Duration::days(30) + Duration::seconds(1)),
            30,
            now
        ));
    }

    #[test]
    fn test_next_trigger() {
        let before = Utc.with_ymd_and_hms(2025, 6, 1, 2, 0, 0).unwrap();
        assert_eq!(
            next_trigger(3, 0, before).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 1, 3, 0, 0).unwrap()
        );

        let at = Utc.with_ymd_and_hms(2025, 6, 1, 3, 0, 0).unwrap();
        assert_eq!(
            next_trigger(3, 0, at).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 2, 3, 0, 0).unwrap()
        );

        let late = Utc.with_ymd_and_hms(2025, 12, 31, 23, 50, 0).unwrap();
        assert_eq!(
            next_trigger(22, 15, late).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 1, 22, 15, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_sweep_renews_skips_and_deploys() {
        let ctx = TestContext::new().await;
        let deployer = Arc::new(MockCdnDeployer::new());
        let scheduler = scheduler(&ctx, deployer.clone());
        let db = ctx.db.connection();

        let tenant = seed_tenant(db).await;
        let fresh = seed_site_in(db, tenant.id, "fresh.example.com", "self_signed").await;
        let manual = seed_site_in(db, tenant.id, "manual.example.com", "self_signed").await;
        let missing = seed_site_in(db, tenant.id, "new.example.com", "self_signed").await;

        let credential = seed_credential(db, tenant.id, "tencent").await;
        attach_credential(db, missing.id, credential.id).await;

        // a 90 day certificate is outside the 30 day threshold
        ctx.certificates.issue(fresh.id).await.unwrap();

        let mut active = manual.into_active_model();
        active.auto_renew = Set(false);
        active.update(db).await.unwrap();

        let report = scheduler.run_sweep(tenant.id).await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                checked: 3,
                renewed: 1,
                skipped: 2,
                failed: 0,
                deployed: 1,
            }
        );

        let calls = deployer.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].domain, "new.example.com");
        assert_eq!(ctx.certificates.list_for_site(fresh.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_respects_auto_deploy_off() {
        let ctx = TestContext::new().await;
        let deployer = Arc::new(MockCdnDeployer::new());
        let scheduler = scheduler(&ctx, deployer.clone());
        let db = ctx.db.connection();

        let tenant = seed_tenant(db).await;
        let site = seed_site_in(db, tenant.id, "cdn.example.com", "self_signed").await;
        let credential = seed_credential(db, tenant.id, "tencent").await;
        attach_credential(db, site.id, credential.id).await;
        ctx.settings
            .update_renewal_settings(
                tenant.id,
                UpdateRenewalSettings {
                    auto_deploy: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let report = scheduler.run_sweep(tenant.id).await.unwrap();
        assert_eq!(report.renewed, 1);
        assert_eq!(report.deployed, 0);
        assert!(deployer.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_counts_failures_and_conflicts() {
        let ctx = TestContext::with_failing_acme("ACME error: connection refused").await;
        let scheduler = scheduler(&ctx, Arc::new(MockCdnDeployer::new()));
        let db = ctx.db.connection();

        let tenant = seed_tenant(db).await;
        seed_site_in(db, tenant.id, "acme.example.com", "letsencrypt").await;
        let busy = seed_site_in(db, tenant.id, "busy.example.com", "self_signed").await;
        let _held = ctx.certificates.locks().try_acquire(busy.id).unwrap();

        let report = scheduler.run_sweep(tenant.id).await.unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.renewed, 0);
    }

    #[tokio::test]
    async fn test_start_refresh_stop() {
        let ctx = TestContext::new().await;
        let scheduler = scheduler(&ctx, Arc::new(MockCdnDeployer::new()));
        let first = seed_tenant(ctx.db.connection()).await;
        let second = seed_tenant(ctx.db.connection()).await;

        assert!(!scheduler.refresh(first.id).await);
        assert!(scheduler.scheduled_tenants().await.is_empty());

        assert_eq!(scheduler.start().await.unwrap(), 2);
        assert_eq!(scheduler.start().await.unwrap(), 0);
        assert_eq!(scheduler.scheduled_tenants().await, vec![first.id, second.id]);

        assert!(scheduler.refresh(first.id).await);
        assert_eq!(scheduler.scheduled_tenants().await.len(), 2);

        scheduler.stop().await;
        assert!(!scheduler.is_started());
        assert!(scheduler.scheduled_tenants().await.is_empty());
    }

    #[tokio::test]
    async fn test_sequential_sweep_keeps_site_order() {
        let ctx = TestContext::new().await;
        let deployer = Arc::new(MockCdnDeployer::new());
        let scheduler = scheduler_with(&ctx, deployer.clone(), 1);
        let db = ctx.db.connection();

        let tenant = seed_tenant(db).await;
        let credential = seed_credential(db, tenant.id, "tencent").await;
        let mut site_ids = Vec::new();
        for domain in ["a.example.com", "b.example.com", "c.example.com"] {
            let site = seed_site_in(db, tenant.id, domain, "self_signed").await;
            attach_credential(db, site.id, credential.id).await;
            site_ids.push(site.id);
        }

        let report = scheduler.run_sweep(tenant.id).await.unwrap();
        assert_eq!(report.renewed, 3);
        assert_eq!(report.deployed, 3);

        let domains: Vec<String> = deployer.calls().await.into_iter().map(|c| c.domain).collect();
        assert_eq!(domains, vec!["a.example.com", "b.example.com", "c.example.com"]);

        let jobs = jobs::Entity::find()
            .order_by_asc(jobs::Column::Id)
            .all(db)
            .await
            .unwrap();
        let job_sites: Vec<i32> = jobs.iter().map(|j| j.site_id).collect();
        assert_eq!(job_sites, site_ids);
        for pair in jobs.windows(2) {
            let finished = pair[0].finished_at.unwrap();
            let started = pair[1].started_at.unwrap();
            assert!(finished <= started, "job {} overlapped job {}", pair[0].id, pair[1].id);
        }
    }

    #[tokio::test]
    async fn test_site_threshold_overrides_tenant_setting() {
        let ctx = TestContext::new().await;
        let scheduler = scheduler(&ctx, Arc::new(MockCdnDeployer::new()));
        let db = ctx.db.connection();

        let tenant = seed_tenant(db).await;
        let eager = seed_site_in(db, tenant.id, "eager.example.com", "self_signed").await;
        let relaxed = seed_site_in(db, tenant.id, "relaxed.example.com", "self_signed").await;
        ctx.certificates.issue(eager.id).await.unwrap();
        ctx.certificates.issue(relaxed.id).await.unwrap();

        // the 90 day certificate falls inside a 90 day window
        let mut active = eager.into_active_model();
        active.renew_days_before = Set(Some(90));
        active.update(db).await.unwrap();

        let report = scheduler.run_sweep(tenant.id).await.unwrap();
        assert_eq!(report.renewed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(ctx.certificates.list_for_site(relaxed.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_paused_site_is_not_renewed() {
        let ctx = TestContext::new().await;
        let scheduler = scheduler(&ctx, Arc::new(MockCdnDeployer::new()));
        let db = ctx.db.connection();

        let site = seed_site(db, "paused.example.com", "self_signed").await;
        let mut active = site.clone().into_active_model();
        active.status = Set(SiteStatus::Paused.as_str().to_string());
        active.update(db).await.unwrap();

        let report = scheduler.run_sweep(site.tenant_id).await.unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.renewed, 0);
        assert!(ctx.certificates.list_for_site(site.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_failure_is_retried() {
        let ctx = TestContext::new().await;
        let scheduler = scheduler(&ctx, Arc::new(MockCdnDeployer::new()))
            .with_retry_interval(std::time::Duration::from_millis(20));
        let db = ctx.db.connection();
        let tenant = seed_tenant(db).await;

        db.execute_unprepared("ALTER TABLE tenant_settings RENAME TO tenant_settings_offline")
            .await
            .unwrap();
        scheduler.start().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(scheduler.scheduled_tenants().await, vec![tenant.id]);

        db.execute_unprepared("ALTER TABLE tenant_settings_offline RENAME TO tenant_settings")
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(scheduler.scheduled_tenants().await, vec![tenant.id]);

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_timer_for_missing_tenant_ends() {
        let ctx = TestContext::new().await;
        let scheduler = scheduler(&ctx, Arc::new(MockCdnDeployer::new()))
            .with_retry_interval(std::time::Duration::from_millis(20));
        scheduler.start().await.unwrap();

        assert!(scheduler.refresh(4242).await);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(scheduler.scheduled_tenants().await.is_empty());

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_refresh_waiting_on_stop_does_not_rearm() {
        let ctx = TestContext::new().await;
        let scheduler = scheduler(&ctx, Arc::new(MockCdnDeployer::new()));
        let tenant = seed_tenant(ctx.db.connection()).await;
        scheduler.start().await.unwrap();

        let registry = scheduler.inner.tasks.lock().await;
        let refreshing = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.refresh(tenant.id).await }
        });
        // let refresh pass its first check and block on the registry
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        scheduler.inner.started.store(false, Ordering::SeqCst);
        drop(registry);

        assert!(!refreshing.await.unwrap());
        scheduler.stop().await;
        assert!(scheduler.scheduled_tenants().await.is_empty());
    }
}
