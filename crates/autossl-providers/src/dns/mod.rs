//! DNS zone providers used to publish DNS-01 TXT records

pub mod dnspod;

use async_trait::async_trait;
use std::sync::Arc;

use crate::credentials::{ProviderType, TencentConfig};
use crate::errors::ProviderError;
pub use dnspod::DnsPodProvider;

pub const ACME_CHALLENGE_LABEL: &str = "_acme-challenge";

/// Minimal zone API needed to answer a DNS-01 challenge
#[async_trait]
pub trait DnsZoneProvider: Send + Sync {
    /// Names of the zones the credential can manage
    async fn list_zones(&self) -> Result<Vec<String>, ProviderError>;

    /// Creates a TXT record and returns the provider's record id
    async fn create_txt_record(
        &self,
        zone: &str,
        sub_domain: &str,
        value: &str,
        ttl: u32,
    ) -> Result<String, ProviderError>;

    async fn delete_record(&self, zone: &str, record_id: &str) -> Result<(), ProviderError>;
}

/// Picks the longest zone that is `domain` itself or one of its parents.
pub fn find_best_zone(domain: &str, zones: &[String]) -> Option<String> {
    let name = autossl_core::normalize_domain(domain);
    zones
        .iter()
        .map(|zone| autossl_core::normalize_domain(zone))
        .filter(|zone| !zone.is_empty())
        .filter(|zone| name == *zone || name.ends_with(&format!(".{}", zone)))
        .max_by_key(|zone| zone.len())
}

/// Relative record name for the challenge of `domain` inside `zone`.
pub fn challenge_sub_domain(domain: &str, zone: &str) -> String {
    let name = autossl_core::normalize_domain(domain);
    let zone = autossl_core::normalize_domain(zone);
    match name.strip_suffix(&format!(".{}", zone)) {
        Some(prefix) if !prefix.is_empty() => format!("{}.{}", ACME_CHALLENGE_LABEL, prefix),
        _ => ACME_CHALLENGE_LABEL.to_string(),
    }
}

/// Builds zone providers from decrypted credential configs
pub trait DnsProviderFactory: Send + Sync {
    fn create(
        &self,
        provider_type: ProviderType,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn DnsZoneProvider>, ProviderError>;
}

#[derive(Debug, Default, Clone)]
pub struct DefaultDnsProviderFactory;

impl DnsProviderFactory for DefaultDnsProviderFactory {
    fn create(
        &self,
        provider_type: ProviderType,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn DnsZoneProvider>, ProviderError> {
        match provider_type {
            ProviderType::TencentDns => {
                let config = TencentConfig::from_value(config)?;
                Ok(Arc::new(DnsPodProvider::new(config)?))
            }
            other => Err(ProviderError::Unsupported(
                other.to_string(),
                "DNS-01 challenges",
            )),
        }
    }
}
