//! CDN deployers that upload a certificate and bind it to a domain

pub mod qiniu;
pub mod tencent;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::credentials::ProviderType;
use crate::errors::ProviderError;
pub use qiniu::QiniuCdnDeployer;
pub use tencent::TencentCdnDeployer;

/// A domain as the CDN vendor reports it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CdnDomain {
    pub domain: String,
    /// Vendor serving state, e.g. `online` or `offline`
    pub status: Option<String>,
    /// `on`/`off` for HTTPS
    pub https: Option<String>,
    pub cert_name: Option<String>,
    pub cert_expires_at: Option<String>,
    pub cert_deploy_at: Option<String>,
}

#[async_trait]
pub trait CdnDeployer: Send + Sync {
    /// Uploads `cert_pem`/`key_pem` and switches `domain` to serve them over HTTPS.
    async fn deploy(
        &self,
        domain: &str,
        cert_pem: &str,
        key_pem: &str,
        config: &serde_json::Value,
    ) -> Result<(), ProviderError>;

    /// Every domain configured on the account, across all pages.
    async fn list_domains(&self, config: &serde_json::Value)
        -> Result<Vec<CdnDomain>, ProviderError>;
}

/// Certificate alias used on vendors that require a unique name per upload
pub(crate) fn upload_alias(domain: &str) -> String {
    format!(
        "auto-ssl-{}-{}",
        domain,
        chrono::Utc::now().timestamp_millis()
    )
}

/// Deployers keyed by provider type
#[derive(Clone, Default)]
pub struct CdnDeployerRegistry {
    deployers: HashMap<ProviderType, Arc<dyn CdnDeployer>>,
}

impl CdnDeployerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the production Tencent and Qiniu deployers
    pub fn with_defaults() -> Result<Self, ProviderError> {
        let mut registry = Self::new();
        registry.register(ProviderType::Tencent, Arc::new(TencentCdnDeployer::new()?));
        registry.register(ProviderType::Qiniu, Arc::new(QiniuCdnDeployer::new()?));
        Ok(registry)
    }

    pub fn register(&mut self, provider_type: ProviderType, deployer: Arc<dyn CdnDeployer>) {
        self.deployers.insert(provider_type, deployer);
    }

    pub fn get(&self, provider_type: ProviderType) -> Result<Arc<dyn CdnDeployer>, ProviderError> {
        if !provider_type.is_cdn_capable() {
            return Err(ProviderError::Unsupported(
                provider_type.to_string(),
                "CDN deployment",
            ));
        }
        self.deployers.get(&provider_type).cloned().ok_or_else(|| {
            ProviderError::Unsupported(provider_type.to_string(), "CDN deployment")
        })
    }
}
