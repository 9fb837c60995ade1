//! Tencent Cloud CDN: upload to SSL Certificates, then bind on the CDN domain

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{upload_alias, CdnDeployer, CdnDomain};
use crate::credentials::TencentConfig;
use crate::errors::ProviderError;
use crate::tencent::TencentCloudClient;

const SSL_SERVICE: &str = "ssl";
const SSL_VERSION: &str = "2019-12-05";
const CDN_SERVICE: &str = "cdn";
const CDN_VERSION: &str = "2018-06-06";
const DESCRIBE_PAGE_SIZE: u32 = 100;

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct UploadCertificateRequest<'a> {
    certificate_public_key: &'a str,
    certificate_private_key: &'a str,
    certificate_type: &'a str,
    alias: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UploadCertificateResponse {
    certificate_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct UpdateDomainConfigRequest<'a> {
    domain: &'a str,
    https: HttpsConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct HttpsConfig {
    switch: &'static str,
    http2: &'static str,
    ocsp_stapling: &'static str,
    cert_info: CertInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CertInfo {
    cert_id: String,
}

#[derive(Debug, Deserialize)]
struct Acknowledged {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeDomainsConfigRequest {
    offset: u32,
    limit: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeDomainsConfigResponse {
    #[serde(default)]
    domains: Vec<DomainDetail>,
    #[serde(default)]
    total_number: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DomainDetail {
    domain: String,
    status: Option<String>,
    https: Option<DomainHttps>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DomainHttps {
    switch: Option<String>,
    cert_info: Option<DomainCertInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DomainCertInfo {
    cert_name: Option<String>,
    expire_time: Option<String>,
    deploy_time: Option<String>,
}

impl From<DomainDetail> for CdnDomain {
    fn from(detail: DomainDetail) -> Self {
        let https = detail.https;
        let cert = https.as_ref().and_then(|h| h.cert_info.as_ref());
        Self {
            domain: detail.domain,
            status: detail.status,
            https: https.as_ref().and_then(|h| h.switch.clone()),
            cert_name: cert.and_then(|c| c.cert_name.clone()),
            cert_expires_at: cert.and_then(|c| c.expire_time.clone()),
            cert_deploy_at: cert.and_then(|c| c.deploy_time.clone()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TencentCdnDeployer {
    ssl_base_url: Option<String>,
    cdn_base_url: Option<String>,
}

impl TencentCdnDeployer {
    pub fn new() -> Result<Self, ProviderError> {
        Ok(Self::default())
    }

    pub fn with_base_urls(ssl_base_url: impl Into<String>, cdn_base_url: impl Into<String>) -> Self {
        Self {
            ssl_base_url: Some(ssl_base_url.into()),
            cdn_base_url: Some(cdn_base_url.into()),
        }
    }

    fn client(
        &self,
        service: &'static str,
        version: &'static str,
        base_url: Option<&String>,
        config: &TencentConfig,
    ) -> Result<TencentCloudClient, ProviderError> {
        match base_url {
            Some(url) => TencentCloudClient::with_base_url(service, version, config.clone(), url),
            None => TencentCloudClient::new(service, version, config.clone()),
        }
    }
}

#[async_trait]
impl CdnDeployer for TencentCdnDeployer {
    async fn deploy(
        &self,
        domain: &str,
        cert_pem: &str,
        key_pem: &str,
        config: &serde_json::Value,
    ) -> Result<(), ProviderError> {
        let config = TencentConfig::from_value(config)?;

        let ssl = self.client(SSL_SERVICE, SSL_VERSION, self.ssl_base_url.as_ref(), &config)?;
        let uploaded: UploadCertificateResponse = ssl
            .call(
                "UploadCertificate",
                &UploadCertificateRequest {
                    certificate_public_key: cert_pem,
                    certificate_private_key: key_pem,
                    certificate_type: "SVR",
                    alias: upload_alias(domain),
                },
            )
            .await?;
        info!(
            "Uploaded certificate for {} to Tencent Cloud as {}",
            domain, uploaded.certificate_id
        );

        let cdn = self.client(CDN_SERVICE, CDN_VERSION, self.cdn_base_url.as_ref(), &config)?;
        let _: Acknowledged = cdn
            .call(
                "UpdateDomainConfig",
                &UpdateDomainConfigRequest {
                    domain,
                    https: HttpsConfig {
                        switch: "on",
                        http2: "on",
                        ocsp_stapling: "on",
                        cert_info: CertInfo {
                            cert_id: uploaded.certificate_id,
                        },
                    },
                },
            )
            .await?;

        info!("Bound certificate to Tencent CDN domain {}", domain);
        Ok(())
    }

    async fn list_domains(
        &self,
        config: &serde_json::Value,
    ) -> Result<Vec<CdnDomain>, ProviderError> {
        let config = TencentConfig::from_value(config)?;
        let cdn = self.client(CDN_SERVICE, CDN_VERSION, self.cdn_base_url.as_ref(), &config)?;

        let mut domains = Vec::new();
        loop {
            let page: DescribeDomainsConfigResponse = cdn
                .call(
                    "DescribeDomainsConfig",
                    &DescribeDomainsConfigRequest {
                        offset: domains.len() as u32,
                        limit: DESCRIBE_PAGE_SIZE,
                    },
                )
                .await?;
            let fetched = page.domains.len();
            domains.extend(page.domains.into_iter().map(CdnDomain::from));
            if fetched == 0 || domains.len() as u32 >= page.total_number {
                break;
            }
        }

        info!("Tencent CDN lists {} domains", domains.len());
        Ok(domains)
    }
}
