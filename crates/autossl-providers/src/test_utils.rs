//! In-memory providers for exercising challenge and deployment flows

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::cdn::{CdnDeployer, CdnDomain};
use crate::credentials::ProviderType;
use crate::dns::{DnsProviderFactory, DnsZoneProvider};
use crate::errors::ProviderError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtRecord {
    pub id: String,
    pub zone: String,
    pub sub_domain: String,
    pub value: String,
    pub ttl: u32,
}

/// Zone provider that keeps TXT records in memory
#[derive(Default)]
pub struct MockDnsProvider {
    zones: Vec<String>,
    records: Mutex<Vec<TxtRecord>>,
    deleted: Mutex<Vec<String>>,
    fail_delete: bool,
}

impl MockDnsProvider {
    pub fn new(zones: &[&str]) -> Self {
        Self {
            zones: zones.iter().map(|z| z.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Makes every `delete_record` call fail
    pub fn failing_delete(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    pub async fn records(&self) -> Vec<TxtRecord> {
        self.records.lock().await.clone()
    }

    pub async fn deleted(&self) -> Vec<String> {
        self.deleted.lock().await.clone()
    }
}

#[async_trait]
impl DnsZoneProvider for MockDnsProvider {
    async fn list_zones(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self.zones.clone())
    }

    async fn create_txt_record(
        &self,
        zone: &str,
        sub_domain: &str,
        value: &str,
        ttl: u32,
    ) -> Result<String, ProviderError> {
        let mut records = self.records.lock().await;
        let id = (records.len() + 1).to_string();
        records.push(TxtRecord {
            id: id.clone(),
            zone: zone.to_string(),
            sub_domain: sub_domain.to_string(),
            value: value.to_string(),
            ttl,
        });
        Ok(id)
    }

    async fn delete_record(&self, zone: &str, record_id: &str) -> Result<(), ProviderError> {
        if self.fail_delete {
            return Err(ProviderError::Api {
                provider: "mock",
                code: "InternalError".to_string(),
                message: format!("cannot delete {} in {}", record_id, zone),
            });
        }
        self.records.lock().await.retain(|r| r.id != record_id);
        self.deleted.lock().await.push(record_id.to_string());
        Ok(())
    }
}

/// Factory handing out a shared [`MockDnsProvider`] and counting calls
pub struct MockDnsProviderFactory {
    pub provider: Arc<MockDnsProvider>,
    calls: AtomicUsize,
}

impl MockDnsProviderFactory {
    pub fn new(provider: Arc<MockDnsProvider>) -> Self {
        Self {
            provider,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DnsProviderFactory for MockDnsProviderFactory {
    fn create(
        &self,
        provider_type: ProviderType,
        _config: &serde_json::Value,
    ) -> Result<Arc<dyn DnsZoneProvider>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !provider_type.is_dns_capable() {
            return Err(ProviderError::Unsupported(
                provider_type.to_string(),
                "DNS-01 challenges",
            ));
        }
        Ok(self.provider.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployCall {
    pub domain: String,
    pub cert_pem: String,
    pub key_pem: String,
}

/// Deployer that records its calls and optionally fails
#[derive(Default)]
pub struct MockCdnDeployer {
    calls: Mutex<Vec<DeployCall>>,
    domains: Vec<CdnDomain>,
    error: Option<String>,
}

impl MockCdnDeployer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Domains returned by `list_domains`
    pub fn with_domains(mut self, domains: Vec<CdnDomain>) -> Self {
        self.domains = domains;
        self
    }

    fn failure(&self, code: &str) -> Result<(), ProviderError> {
        match &self.error {
            Some(message) => Err(ProviderError::Api {
                provider: "mock",
                code: code.to_string(),
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    pub async fn calls(&self) -> Vec<DeployCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl CdnDeployer for MockCdnDeployer {
    async fn deploy(
        &self,
        domain: &str,
        cert_pem: &str,
        key_pem: &str,
        _config: &serde_json::Value,
    ) -> Result<(), ProviderError> {
        self.calls.lock().await.push(DeployCall {
            domain: domain.to_string(),
            cert_pem: cert_pem.to_string(),
            key_pem: key_pem.to_string(),
        });
        self.failure("DeployFailed")
    }

    async fn list_domains(
        &self,
        _config: &serde_json::Value,
    ) -> Result<Vec<CdnDomain>, ProviderError> {
        self.failure("ListFailed")?;
        Ok(self.domains.clone())
    }
}
