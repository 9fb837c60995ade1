//! Process-wide defaults sourced from the environment by the binary.

use crate::error::{ServiceError, ServiceResult};

pub const LETS_ENCRYPT_STAGING_DIRECTORY: &str =
    "https://acme-staging-v02.api.letsencrypt.org/directory";
pub const LETS_ENCRYPT_PRODUCTION_DIRECTORY: &str =
    "https://acme-v02.api.letsencrypt.org/directory";

pub const DEFAULT_CRON_SCHEDULE: &str = "0 3 * * *";
pub const DEFAULT_RENEWAL_HOUR: u32 = 3;
pub const DEFAULT_RENEWAL_MINUTE: u32 = 0;
pub const DEFAULT_THRESHOLD_DAYS: u32 = 30;
pub const DEFAULT_DNS_WAIT_SECONDS: u64 = 30;
pub const DEFAULT_DNS_TTL: u32 = 600;

/// ACME defaults, overridable per tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcmeDefaults {
    pub account_email: Option<String>,
    pub directory_url: String,
    pub skip_local_verify: bool,
    /// Port used when checking an HTTP-01 token locally before asking the CA
    pub local_verify_port: u16,
    pub dns_wait_seconds: u64,
    pub dns_ttl: u32,
}

impl Default for AcmeDefaults {
    fn default() -> Self {
        Self {
            account_email: None,
            directory_url: LETS_ENCRYPT_STAGING_DIRECTORY.to_string(),
            skip_local_verify: false,
            local_verify_port: 80,
            dns_wait_seconds: DEFAULT_DNS_WAIT_SECONDS,
            dns_ttl: DEFAULT_DNS_TTL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalDefaults {
    pub hour: u32,
    pub minute: u32,
    pub threshold_days: u32,
    pub auto_deploy: bool,
}

impl Default for RenewalDefaults {
    fn default() -> Self {
        Self {
            hour: DEFAULT_RENEWAL_HOUR,
            minute: DEFAULT_RENEWAL_MINUTE,
            threshold_days: DEFAULT_THRESHOLD_DAYS,
            auto_deploy: true,
        }
    }
}

impl RenewalDefaults {
    /// Builds defaults from a five field cron expression (`minute hour * * *`).
    /// Unparseable expressions fall back to 03:00.
    pub fn from_cron(expression: &str, threshold_days: u32, auto_deploy: bool) -> Self {
        let (hour, minute) = parse_daily_time(expression)
            .unwrap_or((DEFAULT_RENEWAL_HOUR, DEFAULT_RENEWAL_MINUTE));
        Self {
            hour,
            minute,
            threshold_days,
            auto_deploy,
        }
    }
}

/// Extracts `(hour, minute)` from the leading fields of a cron expression.
pub fn parse_daily_time(expression: &str) -> Option<(u32, u32)> {
    let mut fields = expression.split_whitespace();
    let minute: u32 = fields.next()?.parse().ok()?;
    let hour: u32 = fields.next()?.parse().ok()?;
    // the day fields must follow
    fields.next()?;

    if minute > 59 || hour > 23 {
        return None;
    }
    Some((hour, minute))
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_encryption_key: String,
    pub acme: AcmeDefaults,
    pub renewal: RenewalDefaults,
    /// Number of sites processed at once within one tenant sweep
    pub sweep_concurrency: usize,
}

impl AppConfig {
    pub fn new(data_encryption_key: impl Into<String>) -> Self {
        Self {
            data_encryption_key: data_encryption_key.into(),
            acme: AcmeDefaults::default(),
            renewal: RenewalDefaults::default(),
            sweep_concurrency: 1,
        }
    }

    pub fn validate(&self) -> ServiceResult<()> {
        if self.data_encryption_key.trim().len() < 8 {
            return Err(ServiceError::Configuration {
                message: "DATA_ENCRYPTION_KEY must be at least 8 characters".to_string(),
            });
        }
        if !(1..=90).contains(&self.renewal.threshold_days) {
            return Err(ServiceError::Configuration {
                message: format!(
                    "renewal threshold must be between 1 and 90 days, got {}",
                    self.renewal.threshold_days
                ),
            });
        }
        if self.sweep_concurrency == 0 {
            return Err(ServiceError::Configuration {
                message: "sweep concurrency must be at least 1".to_string(),
            });
        }
        if self.acme.directory_url.trim().is_empty() {
            return Err(ServiceError::Configuration {
                message: "ACME directory URL is empty".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_daily_time() {
        assert_eq!(parse_daily_time("0 3 * * *"), Some((3, 0)));
        assert_eq!(parse_daily_time("45 23 * * *"), Some((23, 45)));
        assert_eq!(parse_daily_time("*/5 3 * * *"), None);
        assert_eq!(parse_daily_time("60 3 * * *"), None);
        assert_eq!(parse_daily_time("0 24 * * *"), None);
        assert_eq!(parse_daily_time("0 3"), None);
    }

    #[test]
    fn test_renewal_defaults_fallback() {
        let defaults = RenewalDefaults::from_cron("garbage", 14, false);
        assert_eq!(defaults.hour, 3);
        assert_eq!(defaults.minute, 0);
        assert_eq!(defaults.threshold_days, 14);
        assert!(!defaults.auto_deploy);
    }

    #[test]
    fn test_validate() {
        assert!(AppConfig::new("change-me-please").validate().is_ok());
        assert!(AppConfig::new("short").validate().is_err());

        let mut config = AppConfig::new("change-me-please");
        config.renewal.threshold_days = 91;
        assert!(config.validate().is_err());

        let mut config = AppConfig::new("change-me-please");
        config.sweep_concurrency = 0;
        assert!(config.validate().is_err());
    }
}
