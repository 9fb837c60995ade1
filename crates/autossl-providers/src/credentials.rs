use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::ProviderError;

/// Vendor integrations a provider credential can belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// Tencent Cloud CDN
    Tencent,
    /// Qiniu CDN
    Qiniu,
    /// Tencent Cloud DNSPod
    TencentDns,
}

impl ProviderType {
    pub const ALL: [ProviderType; 3] = [
        ProviderType::Tencent,
        ProviderType::Qiniu,
        ProviderType::TencentDns,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Tencent => "tencent",
            ProviderType::Qiniu => "qiniu",
            ProviderType::TencentDns => "tencent_dns",
        }
    }

    /// Whether credentials of this type can manage DNS zones for DNS-01
    pub fn is_dns_capable(&self) -> bool {
        matches!(self, ProviderType::TencentDns)
    }

    /// Whether certificates can be pushed to a CDN with this type
    pub fn is_cdn_capable(&self) -> bool {
        matches!(self, ProviderType::Tencent | ProviderType::Qiniu)
    }

    /// Checks that `config` has the shape this provider expects
    pub fn validate_config(&self, config: &serde_json::Value) -> Result<(), ProviderError> {
        match self {
            ProviderType::Tencent | ProviderType::TencentDns => {
                TencentConfig::from_value(config).map(|_| ())
            }
            ProviderType::Qiniu => QiniuConfig::from_value(config).map(|_| ()),
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ProviderError::InvalidConfig(format!("unknown provider type '{}'", s)))
    }
}

const MIN_SECRET_LENGTH: usize = 8;

fn require_secret(name: &str, value: &str) -> Result<(), ProviderError> {
    if value.trim().len() < MIN_SECRET_LENGTH {
        return Err(ProviderError::InvalidConfig(format!(
            "{} must be at least {} characters",
            name, MIN_SECRET_LENGTH
        )));
    }
    Ok(())
}

/// Tencent Cloud API key pair, shared by CDN and DNSPod credentials
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TencentConfig {
    pub secret_id: String,
    pub secret_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl fmt::Debug for TencentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TencentConfig")
            .field("secret_id", &self.secret_id)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl TencentConfig {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ProviderError> {
        let config: TencentConfig = serde_json::from_value(value.clone())
            .map_err(|e| ProviderError::InvalidConfig(format!("Tencent credentials: {}", e)))?;
        require_secret("secretId", &config.secret_id)?;
        require_secret("secretKey", &config.secret_key)?;
        Ok(config)
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QiniuConfig {
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for QiniuConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QiniuConfig")
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

impl QiniuConfig {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ProviderError> {
        let config: QiniuConfig = serde_json::from_value(value.clone())
            .map_err(|e| ProviderError::InvalidConfig(format!("Qiniu credentials: {}", e)))?;
        require_secret("accessKey", &config.access_key)?;
        require_secret("secretKey", &config.secret_key)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_type_roundtrip() {
        for provider_type in ProviderType::ALL {
            assert_eq!(
                provider_type.as_str().parse::<ProviderType>().unwrap(),
                provider_type
            );
        }
        assert!("cloudflare".parse::<ProviderType>().is_err());
    }

    #[test]
    fn test_capabilities() {
        assert!(ProviderType::TencentDns.is_dns_capable());
        assert!(!ProviderType::TencentDns.is_cdn_capable());
        assert!(ProviderType::Tencent.is_cdn_capable());
        assert!(!ProviderType::Qiniu.is_dns_capable());
    }

    #[test]
    fn test_validate_config() {
        let tencent = json!({"secretId": "AKIDxxxxxxxx", "secretKey": "secretsecret"});
        assert!(ProviderType::Tencent.validate_config(&tencent).is_ok());
        assert!(ProviderType::TencentDns.validate_config(&tencent).is_ok());
        assert!(ProviderType::Qiniu.validate_config(&tencent).is_err());

        let short = json!({"secretId": "short", "secretKey": "secretsecret"});
        assert!(ProviderType::Tencent.validate_config(&short).is_err());

        let qiniu = json!({"accessKey": "accesskey1", "secretKey": "secretkey1"});
        assert!(ProviderType::Qiniu.validate_config(&qiniu).is_ok());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = TencentConfig {
            secret_id: "AKID123456".to_string(),
            secret_key: "super-secret".to_string(),
            region: None,
        };
        assert!(!format!("{:?}", config).contains("super-secret"));
    }
}
