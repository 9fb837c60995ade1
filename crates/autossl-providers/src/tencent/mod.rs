//! Tencent Cloud API v3 client shared by the DNSPod, SSL and CDN integrations.

use chrono::Utc;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::credentials::TencentConfig;
use crate::errors::ProviderError;

const PROVIDER: &str = "tencent";
const CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// TC3-HMAC-SHA256 request signing
mod tc3_signing {
    use chrono::{DateTime, Utc};
    use hmac::{Hmac, Mac};
    use sha2::{Digest, Sha256};

    use super::CONTENT_TYPE;
    use crate::errors::ProviderError;

    type HmacSha256 = Hmac<Sha256>;

    pub fn authorization(
        secret_id: &str,
        secret_key: &str,
        service: &str,
        host: &str,
        payload: &str,
        now: DateTime<Utc>,
    ) -> Result<String, ProviderError> {
        let timestamp = now.timestamp();
        let date = now.format("%Y-%m-%d").to_string();

        let canonical_request = format!(
            "POST\n/\n\ncontent-type:{}\nhost:{}\n\ncontent-type;host\n{}",
            CONTENT_TYPE,
            host,
            hex::encode(Sha256::digest(payload.as_bytes()))
        );

        let credential_scope = format!("{}/{}/tc3_request", date, service);
        let string_to_sign = format!(
            "TC3-HMAC-SHA256\n{}\n{}\n{}",
            timestamp,
            credential_scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let k_date = hmac_sha256(format!("TC3{}", secret_key).as_bytes(), &date)?;
        let k_service = hmac_sha256(&k_date, service)?;
        let k_signing = hmac_sha256(&k_service, "tc3_request")?;
        let signature = hex::encode(hmac_sha256(&k_signing, &string_to_sign)?);

        Ok(format!(
            "TC3-HMAC-SHA256 Credential={}/{}, SignedHeaders=content-type;host, Signature={}",
            secret_id, credential_scope, signature
        ))
    }

    fn hmac_sha256(key: &[u8], data: &str) -> Result<Vec<u8>, ProviderError> {
        let mut mac =
            HmacSha256::new_from_slice(key).map_err(|e| ProviderError::Signing(e.to_string()))?;
        mac.update(data.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Response")]
    response: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message")]
    message: String,
}

/// Signed JSON client for a single Tencent Cloud product endpoint
#[derive(Clone)]
pub struct TencentCloudClient {
    client: Client,
    credentials: TencentConfig,
    service: &'static str,
    version: &'static str,
    host: String,
    base_url: String,
}

impl TencentCloudClient {
    pub fn new(
        service: &'static str,
        version: &'static str,
        credentials: TencentConfig,
    ) -> Result<Self, ProviderError> {
        let host = format!("{}.tencentcloudapi.com", service);
        let base_url = format!("https://{}", host);
        Self::build(service, version, credentials, host, base_url)
    }

    /// Points the client at another endpoint while still signing for the real host
    pub fn with_base_url(
        service: &'static str,
        version: &'static str,
        credentials: TencentConfig,
        base_url: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let host = format!("{}.tencentcloudapi.com", service);
        Self::build(service, version, credentials, host, base_url.into())
    }

    fn build(
        service: &'static str,
        version: &'static str,
        credentials: TencentConfig,
        host: String,
        base_url: String,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            credentials,
            service,
            version,
            host,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Invokes `action` and deserializes the `Response` object.
    pub async fn call<B, T>(&self, action: &str, body: &B) -> Result<T, ProviderError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = serde_json::to_string(body).map_err(|e| ProviderError::InvalidResponse {
            provider: PROVIDER,
            message: format!("failed to encode {} request: {}", action, e),
        })?;

        let now = Utc::now();
        let authorization = tc3_signing::authorization(
            &self.credentials.secret_id,
            &self.credentials.secret_key,
            self.service,
            &self.host,
            &payload,
            now,
        )?;

        let mut request = self
            .client
            .post(format!("{}/", self.base_url))
            .header("Authorization", authorization)
            .header("Content-Type", CONTENT_TYPE)
            .header("X-TC-Action", action)
            .header("X-TC-Timestamp", now.timestamp().to_string())
            .header("X-TC-Version", self.version);

        if let Some(region) = self.credentials.region.as_deref() {
            request = request.header("X-TC-Region", region);
        }

        debug!("Tencent Cloud API request: {} {}", self.service, action);

        let response = request.body(payload).send().await?;
        let status = response.status();
        let text = response.text().await?;

        let envelope: Envelope =
            serde_json::from_str(&text).map_err(|e| ProviderError::InvalidResponse {
                provider: PROVIDER,
                message: format!("{} returned status {}: {} ({})", action, status, text, e),
            })?;

        if let Some(error) = envelope.response.get("Error") {
            let error: ApiError = serde_json::from_value(error.clone()).map_err(|e| {
                ProviderError::InvalidResponse {
                    provider: PROVIDER,
                    message: format!("malformed error from {}: {}", action, e),
                }
            })?;
            return Err(ProviderError::Api {
                provider: PROVIDER,
                code: error.code,
                message: error.message,
            });
        }

        if !status.is_success() {
            return Err(ProviderError::Api {
                provider: PROVIDER,
                code: status.as_u16().to_string(),
                message: text,
            });
        }

        serde_json::from_value(envelope.response).map_err(|e| ProviderError::InvalidResponse {
            provider: PROVIDER,
            message: format!("unexpected {} response: {}", action, e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::matchers::{header, header_exists, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> TencentConfig {
        TencentConfig {
            secret_id: "AKIDz8krbsJ5yKBZQpn74WFkmLPx3EXAMPLE".to_string(),
            secret_key: "Gu5t9xGARNpq86cd98joQYCN3EXAMPLE".to_string(),
            region: None,
        }
    }

    #[test]
    fn test_signature_known_answer() {
        let payload =
            r#"{"Limit": 1, "Filters": [{"Values": ["\u672a\u547d\u540d"], "Name": "instance-name"}]}"#;
        let now = Utc.timestamp_opt(1551113065, 0).unwrap();

        let creds = credentials();
        let authorization = tc3_signing::authorization(
            &creds.secret_id,
            &creds.secret_key,
            "cvm",
            "cvm.tencentcloudapi.com",
            payload,
            now,
        )
        .unwrap();

        assert_eq!(
            authorization,
            "TC3-HMAC-SHA256 Credential=AKIDz8krbsJ5yKBZQpn74WFkmLPx3EXAMPLE/2019-02-25/cvm/tc3_request, \
             SignedHeaders=content-type;host, \
             Signature=72e494ea809ad7a8c8f7a4507b9bddcbaa8e581f516e8da2f66e2c5a96525168"
        );
    }

    #[tokio::test]
    async fn test_call_sends_action_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("X-TC-Action", "DescribeDomainList"))
            .and(header("X-TC-Version", "2021-03-23"))
            .and(header_exists("Authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Response": {"TotalCount": 3, "RequestId": "req-1"}
            })))
            .mount(&server)
            .await;

        let client =
            TencentCloudClient::with_base_url("dnspod", "2021-03-23", credentials(), server.uri())
                .unwrap();

        #[derive(Deserialize)]
        struct Counted {
            #[serde(rename = "TotalCount")]
            total_count: u32,
        }

        let counted: Counted = client.call("DescribeDomainList", &json!({})).await.unwrap();
        assert_eq!(counted.total_count, 3);
    }

    #[tokio::test]
    async fn test_call_maps_error_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Response": {
                    "Error": {"Code": "AuthFailure.SignatureFailure", "Message": "bad signature"},
                    "RequestId": "req-2"
                }
            })))
            .mount(&server)
            .await;

        let client =
            TencentCloudClient::with_base_url("cdn", "2018-06-06", credentials(), server.uri())
                .unwrap();

        let err = client
            .call::<_, serde_json::Value>("UpdateDomainConfig", &json!({}))
            .await
            .unwrap_err();

        match err {
            ProviderError::Api { code, message, .. } => {
                assert_eq!(code, "AuthFailure.SignatureFailure");
                assert_eq!(message, "bad signature");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
