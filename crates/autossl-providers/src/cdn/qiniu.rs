//! Qiniu CDN: upload to the certificate store, then enable HTTPS on the domain

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use std::time::Duration;
use tracing::{debug, info};

use super::{upload_alias, CdnDeployer, CdnDomain};
use crate::credentials::QiniuConfig;
use crate::errors::ProviderError;

const PROVIDER: &str = "qiniu";
const QINIU_API_ENDPOINT: &str = "https://api.qiniu.com";
const LIST_PAGE_SIZE: u32 = 100;

type HmacSha1 = Hmac<Sha1>;

/// QBox management token over the request path and query.
fn qbox_token(access_key: &str, secret_key: &str, path_and_query: &str) -> Result<String, ProviderError> {
    let mut mac = HmacSha1::new_from_slice(secret_key.as_bytes())
        .map_err(|e| ProviderError::Signing(e.to_string()))?;
    mac.update(path_and_query.as_bytes());
    mac.update(b"\n");
    let signature = URL_SAFE.encode(mac.finalize().into_bytes());
    Ok(format!("QBox {}:{}", access_key, signature))
}

#[derive(Debug, Serialize)]
struct UploadCertRequest<'a> {
    name: String,
    common_name: &'a str,
    pri: &'a str,
    ca: &'a str,
}

#[derive(Debug, Deserialize)]
struct UploadCertResponse {
    #[serde(rename = "certID")]
    cert_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HttpsConfRequest {
    cert_id: String,
    force_https: bool,
    http2_enable: bool,
}

#[derive(Debug, Deserialize)]
struct DomainListResponse {
    #[serde(default)]
    marker: String,
    #[serde(default)]
    domains: Vec<DomainEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DomainEntry {
    name: String,
    operating_state: Option<String>,
    protocol: Option<String>,
}

impl From<DomainEntry> for CdnDomain {
    fn from(entry: DomainEntry) -> Self {
        let https = entry
            .protocol
            .map(|p| if p == "https" { "on" } else { "off" }.to_string());
        Self {
            domain: entry.name,
            status: entry.operating_state,
            https,
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct QiniuErrorBody {
    error: String,
}

#[derive(Debug, Clone)]
pub struct QiniuCdnDeployer {
    client: Client,
    base_url: String,
}

impl QiniuCdnDeployer {
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_base_url(QINIU_API_ENDPOINT)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn authorized(
        &self,
        method: Method,
        path_and_query: &str,
        config: &QiniuConfig,
    ) -> Result<RequestBuilder, ProviderError> {
        let token = qbox_token(&config.access_key, &config.secret_key, path_and_query)?;

        debug!("Qiniu API request: {} {}", method, path_and_query);

        Ok(self
            .client
            .request(method, format!("{}{}", self.base_url, path_and_query))
            .header("Authorization", token))
    }

    async fn request<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        config: &QiniuConfig,
    ) -> Result<String, ProviderError> {
        let request = self.authorized(method, path, config)?.json(body);
        Self::execute(request).await
    }

    async fn execute(request: RequestBuilder) -> Result<String, ProviderError> {
        let response = request.send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<QiniuErrorBody>(&text)
                .map(|body| body.error)
                .unwrap_or(text);
            return Err(ProviderError::Api {
                provider: PROVIDER,
                code: status.as_u16().to_string(),
                message,
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl CdnDeployer for QiniuCdnDeployer {
    async fn deploy(
        &self,
        domain: &str,
        cert_pem: &str,
        key_pem: &str,
        config: &serde_json::Value,
    ) -> Result<(), ProviderError> {
        let config = QiniuConfig::from_value(config)?;

        let body = self
            .request(
                Method::POST,
                "/sslcert",
                &UploadCertRequest {
                    name: upload_alias(domain),
                    common_name: domain,
                    pri: key_pem,
                    ca: cert_pem,
                },
                &config,
            )
            .await?;
        let uploaded: UploadCertResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::InvalidResponse {
                provider: PROVIDER,
                message: format!("unexpected sslcert response: {}", e),
            })?;
        info!(
            "Uploaded certificate for {} to Qiniu as {}",
            domain, uploaded.cert_id
        );

        self.request(
            Method::PUT,
            &format!("/domain/{}/httpsconf", domain),
            &HttpsConfRequest {
                cert_id: uploaded.cert_id,
                force_https: false,
                http2_enable: true,
            },
            &config,
        )
        .await?;

        info!("Enabled HTTPS on Qiniu domain {}", domain);
        Ok(())
    }

    async fn list_domains(
        &self,
        config: &serde_json::Value,
    ) -> Result<Vec<CdnDomain>, ProviderError> {
        let config = QiniuConfig::from_value(config)?;

        let mut domains = Vec::new();
        let mut marker = String::new();
        loop {
            let mut path = format!("/domain?limit={}", LIST_PAGE_SIZE);
            if !marker.is_empty() {
                path.push_str("&marker=");
                path.push_str(&marker);
            }
            let body = Self::execute(self.authorized(Method::GET, &path, &config)?).await?;
            let page: DomainListResponse =
                serde_json::from_str(&body).map_err(|e| ProviderError::InvalidResponse {
                    provider: PROVIDER,
                    message: format!("unexpected domain list response: {}", e),
                })?;

            domains.extend(page.domains.into_iter().map(CdnDomain::from));
            if page.marker.is_empty() {
                break;
            }
            marker = page.marker;
        }

        info!("Qiniu lists {} domains", domains.len());
        Ok(domains)
    }
}
