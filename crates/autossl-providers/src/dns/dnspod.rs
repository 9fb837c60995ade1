//! DNSPod (Tencent Cloud DNS) zone provider

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::DnsZoneProvider;
use crate::credentials::TencentConfig;
use crate::errors::ProviderError;
use crate::tencent::TencentCloudClient;

const SERVICE: &str = "dnspod";
const VERSION: &str = "2021-03-23";
const PAGE_SIZE: u64 = 100;
const DEFAULT_RECORD_LINE: &str = "默认";
const NO_DOMAINS: &str = "ResourceNotFound.NoDataOfDomain";

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeDomainListRequest {
    offset: u64,
    limit: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeDomainListResponse {
    #[serde(default)]
    domain_list: Vec<DomainListItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DomainListItem {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateTxtRecordRequest<'a> {
    domain: &'a str,
    sub_domain: &'a str,
    record_line: &'a str,
    value: &'a str,
    #[serde(rename = "TTL")]
    ttl: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateTxtRecordResponse {
    record_id: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct DeleteRecordRequest<'a> {
    domain: &'a str,
    record_id: u64,
}

#[derive(Debug, Deserialize)]
struct Acknowledged {}

pub struct DnsPodProvider {
    client: TencentCloudClient,
}

impl DnsPodProvider {
    pub fn new(config: TencentConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: TencentCloudClient::new(SERVICE, VERSION, config)?,
        })
    }

    pub fn with_base_url(
        config: TencentConfig,
        base_url: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: TencentCloudClient::with_base_url(SERVICE, VERSION, config, base_url)?,
        })
    }
}

#[async_trait]
impl DnsZoneProvider for DnsPodProvider {
    async fn list_zones(&self) -> Result<Vec<String>, ProviderError> {
        let mut zones = Vec::new();
        let mut offset = 0;

        loop {
            let request = DescribeDomainListRequest {
                offset,
                limit: PAGE_SIZE,
            };
            let page: DescribeDomainListResponse =
                match self.client.call("DescribeDomainList", &request).await {
                    Ok(page) => page,
                    // an account without zones answers with an error instead of an empty list
                    Err(ProviderError::Api { code, .. }) if code == NO_DOMAINS => break,
                    Err(e) => return Err(e),
                };

            let fetched = page.domain_list.len() as u64;
            zones.extend(page.domain_list.into_iter().map(|d| d.name));
            if fetched < PAGE_SIZE {
                break;
            }
            offset += fetched;
        }

        debug!("DNSPod returned {} zones", zones.len());
        Ok(zones)
    }

    async fn create_txt_record(
        &self,
        zone: &str,
        sub_domain: &str,
        value: &str,
        ttl: u32,
    ) -> Result<String, ProviderError> {
        let request = CreateTxtRecordRequest {
            domain: zone,
            sub_domain,
            record_line: DEFAULT_RECORD_LINE,
            value,
            ttl,
        };
        let response: CreateTxtRecordResponse =
            self.client.call("CreateTXTRecord", &request).await?;

        info!(
            "Created TXT record {}.{} (id {})",
            sub_domain, zone, response.record_id
        );
        Ok(response.record_id.to_string())
    }

    async fn delete_record(&self, zone: &str, record_id: &str) -> Result<(), ProviderError> {
        let record_id: u64 = record_id.parse().map_err(|_| {
            ProviderError::InvalidConfig(format!("invalid DNSPod record id '{}'", record_id))
        })?;
        let request = DeleteRecordRequest {
            domain: zone,
            record_id,
        };
        let _: Acknowledged = self.client.call("DeleteRecord", &request).await?;

        info!("Deleted DNS record {} in {}", record_id, zone);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> TencentConfig {
        TencentConfig {
            secret_id: "AKIDtestsecretid".to_string(),
            secret_key: "testsecretkey".to_string(),
            region: None,
        }
    }

    async fn provider(server: &MockServer) -> DnsPodProvider {
        DnsPodProvider::with_base_url(config(), server.uri()).unwrap()
    }

    #[tokio::test]
    async fn test_list_zones() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("X-TC-Action", "DescribeDomainList"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Response": {
                    "DomainCountInfo": {"AllTotal": 2},
                    "DomainList": [
                        {"DomainId": 1, "Name": "example.com"},
                        {"DomainId": 2, "Name": "example.org"}
                    ],
                    "RequestId": "req"
                }
            })))
            .mount(&server)
            .await;

        let zones = provider(&server).await.list_zones().await.unwrap();
        assert_eq!(zones, vec!["example.com", "example.org"]);
    }

    #[tokio::test]
    async fn test_list_zones_empty_account() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Response": {
                    "Error": {"Code": "ResourceNotFound.NoDataOfDomain", "Message": "no domains"},
                    "RequestId": "req"
                }
            })))
            .mount(&server)
            .await;

        let zones = provider(&server).await.list_zones().await.unwrap();
        assert!(zones.is_empty());
    }

    #[tokio::test]
    async fn test_create_txt_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("X-TC-Action", "CreateTXTRecord"))
            .and(body_partial_json(json!({
                "Domain": "example.com",
                "SubDomain": "_acme-challenge.cdn",
                "RecordLine": "默认",
                "Value": "txt-value",
                "TTL": 600
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Response": {"RecordId": 162, "RequestId": "req"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let record_id = provider(&server)
            .await
            .create_txt_record("example.com", "_acme-challenge.cdn", "txt-value", 600)
            .await
            .unwrap();
        assert_eq!(record_id, "162");
    }

    #[tokio::test]
    async fn test_delete_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("X-TC-Action", "DeleteRecord"))
            .and(body_partial_json(json!({"Domain": "example.com", "RecordId": 162})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Response": {"RequestId": "req"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dns = provider(&server).await;
        dns.delete_record("example.com", "162").await.unwrap();
        assert!(matches!(
            dns.delete_record("example.com", "not-a-number").await,
            Err(ProviderError::InvalidConfig(_))
        ));
    }
}
