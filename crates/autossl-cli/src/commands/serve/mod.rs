mod server;
mod shutdown;

use autossl_core::{
    parse_daily_time, AcmeDefaults, AppConfig, RenewalDefaults, DEFAULT_CRON_SCHEDULE,
    LETS_ENCRYPT_STAGING_DIRECTORY,
};
use clap::{ArgAction, Args};
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info};

use server::build_server;
use shutdown::ShutdownCleanup;

#[derive(Args)]
pub struct ServeCommand {
    /// Address to bind the HTTP API to
    #[arg(long, default_value = "127.0.0.1:3000", env = "AUTOSSL_ADDRESS")]
    pub address: String,

    /// Database connection URL (postgres:// or sqlite:)
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Secret the credential vault derives its key from
    #[arg(long, env = "DATA_ENCRYPTION_KEY", hide_env_values = true)]
    pub data_encryption_key: String,

    /// ACME directory used when a tenant has no override
    #[arg(long, default_value = LETS_ENCRYPT_STAGING_DIRECTORY, env = "ACME_DIRECTORY_URL")]
    pub acme_directory_url: String,

    /// Contact email for ACME accounts when a tenant has none
    #[arg(long, env = "ACME_ACCOUNT_EMAIL")]
    pub acme_account_email: Option<String>,

    /// Skip fetching HTTP-01 tokens locally before asking the CA to validate
    #[arg(long, default_value_t = false, action = ArgAction::Set, env = "ACME_SKIP_LOCAL_VERIFY")]
    pub acme_skip_local_verify: bool,

    /// Port used by the local HTTP-01 check
    #[arg(long, default_value_t = 80, env = "ACME_LOCAL_VERIFY_PORT")]
    pub acme_local_verify_port: u16,

    /// Seconds to wait for DNS-01 TXT records to propagate
    #[arg(long, default_value_t = 30, env = "ACME_DNS_WAIT_SECONDS")]
    pub acme_dns_wait_seconds: u64,

    /// TTL of DNS-01 TXT records
    #[arg(long, default_value_t = 600, env = "ACME_DNS_TTL")]
    pub acme_dns_ttl: u32,

    /// Renew certificates expiring within this many days
    #[arg(long, default_value_t = 30, env = "RENEWAL_THRESHOLD_DAYS")]
    pub renewal_threshold_days: u32,

    /// Daily renewal time as a cron expression (`minute hour * * *`, UTC)
    #[arg(long, default_value = DEFAULT_CRON_SCHEDULE, env = "CRON_SCHEDULE")]
    pub cron_schedule: String,

    /// Deploy renewed certificates to the CDN automatically
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "AUTO_DEPLOY")]
    pub auto_deploy: bool,

    /// Sites renewed at once within a tenant sweep
    #[arg(long, default_value_t = 1, env = "AUTOSSL_SWEEP_CONCURRENCY")]
    pub sweep_concurrency: usize,

    /// Seconds allowed for cleanup after Ctrl+C
    #[arg(long, default_value_t = 10, env = "AUTOSSL_SHUTDOWN_TIMEOUT")]
    pub shutdown_timeout_seconds: u64,
}

impl ServeCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let config = self.app_config()?;

        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.serve(config))
    }

    fn app_config(&self) -> anyhow::Result<AppConfig> {
        if parse_daily_time(&self.cron_schedule).is_none() {
            anyhow::bail!(
                "CRON_SCHEDULE '{}' must start with numeric minute and hour fields",
                self.cron_schedule
            );
        }

        let mut config = AppConfig::new(self.data_encryption_key.clone());
        config.acme = AcmeDefaults {
            account_email: self
                .acme_account_email
                .clone()
                .filter(|email| !email.trim().is_empty()),
            directory_url: self.acme_directory_url.clone(),
            skip_local_verify: self.acme_skip_local_verify,
            local_verify_port: self.acme_local_verify_port,
            dns_wait_seconds: self.acme_dns_wait_seconds,
            dns_ttl: self.acme_dns_ttl,
        };
        config.renewal = RenewalDefaults::from_cron(
            &self.cron_schedule,
            self.renewal_threshold_days,
            self.auto_deploy,
        );
        config.sweep_concurrency = self.sweep_concurrency;
        config.validate()?;
        Ok(config)
    }

    async fn serve(self, config: AppConfig) -> anyhow::Result<()> {
        debug!("Initializing database connection...");
        let db = autossl_database::establish_connection(&self.database_url).await?;

        let server = build_server(db.clone(), &config)?;
        let tenants = server.scheduler.start().await?;
        info!(
            "Renewal scheduler armed for {} tenant(s) at {:02}:{:02} UTC",
            tenants, config.renewal.hour, config.renewal.minute
        );

        let listener = TcpListener::bind(&self.address).await?;
        info!("AutoSSL API listening on {}", self.address);

        axum::serve(listener, server.router.clone())
            .with_graceful_shutdown(shutdown::ctrl_c())
            .await?;

        ShutdownCleanup::new(
            Duration::from_secs(self.shutdown_timeout_seconds),
            server,
            db,
        )
        .run()
        .await;
        info!("AutoSSL server exited");
        Ok(())
    }
}
