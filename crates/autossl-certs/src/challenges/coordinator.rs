use autossl_providers::{
    challenge_sub_domain, find_best_zone, DnsProviderFactory, ProviderType,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::store::{DnsChallengeRecord, DnsRecordRef, DnsRecordStore, HttpChallengeStore};
use super::ChallengeError;

/// Decrypted DNS provider credential
#[derive(Clone)]
pub struct DnsCredential {
    pub provider_type: ProviderType,
    pub config: serde_json::Value,
}

impl fmt::Debug for DnsCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsCredential")
            .field("provider_type", &self.provider_type)
            .finish_non_exhaustive()
    }
}

/// Holds and serves ACME challenge proofs for this process.
pub struct ChallengeCoordinator {
    http: Arc<dyn HttpChallengeStore>,
    dns: Arc<dyn DnsRecordStore>,
    dns_providers: Arc<dyn DnsProviderFactory>,
}

impl ChallengeCoordinator {
    pub fn new(
        http: Arc<dyn HttpChallengeStore>,
        dns: Arc<dyn DnsRecordStore>,
        dns_providers: Arc<dyn DnsProviderFactory>,
    ) -> Self {
        Self {
            http,
            dns,
            dns_providers,
        }
    }

    pub async fn set_http_challenge(&self, token: &str, key_authorization: &str) {
        debug!("Serving HTTP-01 token {}", token);
        self.http.set(token, key_authorization).await;
    }

    pub async fn get_http_challenge(&self, token: &str) -> Option<String> {
        self.http.get(token).await
    }

    pub async fn remove_http_challenge(&self, token: &str) {
        self.http.remove(token).await;
    }

    /// Publishes `value` as the DNS-01 TXT record for `domain` and remembers it under `token`.
    pub async fn create_dns_challenge(
        &self,
        token: &str,
        domain: &str,
        value: &str,
        credential: &DnsCredential,
        ttl: u32,
    ) -> Result<DnsRecordRef, ChallengeError> {
        let provider = self
            .dns_providers
            .create(credential.provider_type, &credential.config)?;

        let zones = provider.list_zones().await?;
        let zone = find_best_zone(domain, &zones)
            .ok_or_else(|| ChallengeError::ZoneNotFound(domain.to_string()))?;
        let sub_domain = challenge_sub_domain(domain, &zone);

        let record_id = provider
            .create_txt_record(&zone, &sub_domain, value, ttl)
            .await?;

        let record = DnsRecordRef {
            zone,
            record_id,
            sub_domain,
        };
        info!(
            "Published DNS-01 record {}.{} for {}",
            record.sub_domain, record.zone, domain
        );

        self.dns
            .set(
                token,
                DnsChallengeRecord {
                    record: record.clone(),
                    provider,
                },
            )
            .await;
        Ok(record)
    }

    pub async fn wait_for_propagation(seconds: u64) {
        if seconds > 0 {
            debug!("Waiting {}s for DNS propagation", seconds);
            tokio::time::sleep(Duration::from_secs(seconds)).await;
        }
    }

    /// Deletes the record stored under `token`. Failures are logged, never returned.
    pub async fn remove_dns_challenge(&self, token: &str) {
        let Some(stored) = self.dns.take(token).await else {
            return;
        };

        let DnsChallengeRecord { record, provider } = stored;
        match provider.delete_record(&record.zone, &record.record_id).await {
            Ok(()) => debug!(
                "Removed DNS-01 record {}.{}",
                record.sub_domain, record.zone
            ),
            Err(e) => warn!(
                "Failed to remove DNS-01 record {} in {}: {}",
                record.record_id, record.zone, e
            ),
        }
    }
}
