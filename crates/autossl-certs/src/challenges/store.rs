use async_trait::async_trait;
use autossl_providers::DnsZoneProvider;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// token -> key authorization for HTTP-01
#[async_trait]
pub trait HttpChallengeStore: Send + Sync {
    async fn set(&self, token: &str, key_authorization: &str);
    async fn get(&self, token: &str) -> Option<String>;
    async fn remove(&self, token: &str);
}

/// Location of a published DNS-01 TXT record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsRecordRef {
    pub zone: String,
    pub record_id: String,
    pub sub_domain: String,
}

/// A published record plus the provider able to delete it
#[derive(Clone)]
pub struct DnsChallengeRecord {
    pub record: DnsRecordRef,
    pub provider: Arc<dyn DnsZoneProvider>,
}

impl fmt::Debug for DnsChallengeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsChallengeRecord")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait DnsRecordStore: Send + Sync {
    async fn set(&self, token: &str, record: DnsChallengeRecord);
    /// Removes and returns the record stored under `token`
    async fn take(&self, token: &str) -> Option<DnsChallengeRecord>;
}

#[derive(Default)]
pub struct InMemoryHttpChallengeStore {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryHttpChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpChallengeStore for InMemoryHttpChallengeStore {
    async fn set(&self, token: &str, key_authorization: &str) {
        self.entries
            .write()
            .await
            .insert(token.to_string(), key_authorization.to_string());
    }

    async fn get(&self, token: &str) -> Option<String> {
        self.entries.read().await.get(token).cloned()
    }

    async fn remove(&self, token: &str) {
        self.entries.write().await.remove(token);
    }
}

#[derive(Default)]
pub struct InMemoryDnsRecordStore {
    entries: RwLock<HashMap<String, DnsChallengeRecord>>,
}

impl InMemoryDnsRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DnsRecordStore for InMemoryDnsRecordStore {
    async fn set(&self, token: &str, record: DnsChallengeRecord) {
        self.entries.write().await.insert(token.to_string(), record);
    }

    async fn take(&self, token: &str) -> Option<DnsChallengeRecord> {
        self.entries.write().await.remove(token)
    }
}
