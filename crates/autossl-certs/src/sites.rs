//! Tenants, their CDN sites and the provider credentials attached to them.

use autossl_core::{normalize_domain, CredentialVault, ServiceError, ServiceResult, UtcDateTime};
use autossl_database::DbConnection;
use autossl_entities::{provider_credentials, sites, tenants};
use autossl_providers::ProviderType;
use sea_orm::sea_query::Expr;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

use crate::challenges::ChallengeType;
use crate::tls::CertificateSource;

/// Longest renewal window a site may ask for
pub const MAX_RENEW_DAYS_BEFORE: i32 = 90;

fn db_error(err: DbErr) -> ServiceError {
    ServiceError::Database(err.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: i32,
    pub name: String,
    pub email: Option<String>,
    #[schema(value_type = String, format = DateTime)]
    pub created_at: UtcDateTime,
}

impl From<tenants::Model> for Tenant {
    fn from(model: tenants::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            email: model.email,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    Active,
    Paused,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteStatus::Active => "active",
            SiteStatus::Paused => "paused",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: i32,
    pub tenant_id: i32,
    pub name: String,
    pub domain: String,
    pub provider_credential_id: Option<i32>,
    pub dns_credential_id: Option<i32>,
    pub certificate_source: String,
    pub acme_challenge_type: String,
    pub auto_renew: bool,
    /// Tenant threshold applies when absent
    pub renew_days_before: Option<i32>,
    pub status: String,
    pub provider_status: Option<String>,
    pub provider_https: Option<String>,
    pub provider_cert_name: Option<String>,
    pub provider_cert_expires_at: Option<String>,
    pub provider_cert_deploy_at: Option<String>,
}

impl From<sites::Model> for Site {
    fn from(model: sites::Model) -> Self {
        Self {
            id: model.id,
            tenant_id: model.tenant_id,
            name: model.name,
            domain: model.domain,
            provider_credential_id: model.provider_credential_id,
            dns_credential_id: model.dns_credential_id,
            certificate_source: model.certificate_source,
            acme_challenge_type: model.acme_challenge_type,
            auto_renew: model.auto_renew,
            renew_days_before: model.renew_days_before,
            status: model.status,
            provider_status: model.provider_status,
            provider_https: model.provider_https,
            provider_cert_name: model.provider_cert_name,
            provider_cert_expires_at: model.provider_cert_expires_at,
            provider_cert_deploy_at: model.provider_cert_deploy_at,
        }
    }
}

/// Credential summary; the decrypted config never leaves the service
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCredential {
    pub id: i32,
    pub tenant_id: i32,
    pub name: String,
    pub provider_type: String,
}

impl From<provider_credentials::Model> for ProviderCredential {
    fn from(model: provider_credentials::Model) -> Self {
        Self {
            id: model.id,
            tenant_id: model.tenant_id,
            name: model.name,
            provider_type: model.provider_type,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateTenantRequest {
    pub name: String,
    pub email: Option<String>,
}

fn default_source() -> String {
    CertificateSource::LetsEncrypt.as_str().to_string()
}

fn default_true() -> bool {
    true
}

fn default_challenge() -> String {
    ChallengeType::Http01.as_str().to_string()
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSiteRequest {
    pub name: String,
    pub domain: String,
    pub provider_credential_id: Option<i32>,
    /// `letsencrypt` (default) or `self_signed`
    #[serde(default = "default_source")]
    pub certificate_source: String,
    #[serde(default = "default_true")]
    pub auto_renew: bool,
    /// `http-01` (default) or `dns-01`
    #[serde(default = "default_challenge")]
    pub acme_challenge_type: String,
    /// Required for Let's Encrypt sites that use dns-01
    pub dns_credential_id: Option<i32>,
    /// 1 to 90 days; the tenant threshold applies when absent
    pub renew_days_before: Option<i32>,
}

/// Partial update; absent fields keep their stored value
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSiteRequest {
    pub name: Option<String>,
    pub domain: Option<String>,
    pub provider_credential_id: Option<i32>,
    pub dns_credential_id: Option<i32>,
    pub certificate_source: Option<String>,
    pub acme_challenge_type: Option<String>,
    pub auto_renew: Option<bool>,
    pub renew_days_before: Option<i32>,
    pub status: Option<SiteStatus>,
}

/// Partial update of a credential; a new config replaces the stored one
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCredentialRequest {
    pub name: Option<String>,
    pub provider_type: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub config: Option<serde_json::Value>,
}

/// Site options checked together on create and update
struct SiteOptions {
    source: CertificateSource,
    challenge: ChallengeType,
    provider_credential_id: Option<i32>,
    dns_credential_id: Option<i32>,
    renew_days_before: Option<i32>,
}

fn valid_domain(raw: &str) -> ServiceResult<String> {
    let domain = normalize_domain(raw);
    if domain.is_empty() || !domain.contains('.') {
        return Err(ServiceError::validation(format!(
            "'{}' is not a valid domain",
            raw
        )));
    }
    Ok(domain)
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCredentialRequest {
    pub name: String,
    /// `tencent`, `qiniu` or `tencent_dns`
    pub provider_type: String,
    #[schema(value_type = Object)]
    pub config: serde_json::Value,
}

pub struct SiteService {
    db: Arc<DbConnection>,
}

impl SiteService {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    pub async fn create_tenant(&self, request: CreateTenantRequest) -> ServiceResult<Tenant> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ServiceError::validation("tenant name is required"));
        }

        let tenant = tenants::ActiveModel {
            name: Set(name.to_string()),
            email: Set(request.email.filter(|e| !e.trim().is_empty())),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .map_err(db_error)?;

        info!("Created tenant {} ({})", tenant.id, tenant.name);
        Ok(tenant.into())
    }

    pub async fn get_tenant(&self, tenant_id: i32) -> ServiceResult<Tenant> {
        tenants::Entity::find_by_id(tenant_id)
            .one(self.db.as_ref())
            .await
            .map_err(db_error)?
            .map(Tenant::from)
            .ok_or_else(|| ServiceError::not_found(format!("tenant {}", tenant_id)))
    }

    pub async fn list_tenants(&self) -> ServiceResult<Vec<Tenant>> {
        Ok(tenants::Entity::find()
            .order_by_asc(tenants::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(db_error)?
            .into_iter()
            .map(Tenant::from)
            .collect())
    }

    pub async fn create_site(
        &self,
        tenant_id: i32,
        request: CreateSiteRequest,
    ) -> ServiceResult<Site> {
        self.get_tenant(tenant_id).await?;

        let domain = valid_domain(&request.domain)?;
        let options = SiteOptions {
            source: request
                .certificate_source
                .parse()
                .map_err(ServiceError::validation)?,
            challenge: request
                .acme_challenge_type
                .parse()
                .map_err(ServiceError::validation)?,
            provider_credential_id: request.provider_credential_id,
            dns_credential_id: request.dns_credential_id,
            renew_days_before: request.renew_days_before,
        };
        self.validate_options(tenant_id, &options).await?;

        let name = if request.name.trim().is_empty() {
            domain.clone()
        } else {
            request.name.trim().to_string()
        };

        let site = sites::ActiveModel {
            tenant_id: Set(tenant_id),
            name: Set(name),
            domain: Set(domain),
            provider_credential_id: Set(options.provider_credential_id),
            dns_credential_id: Set(options.dns_credential_id),
            certificate_source: Set(options.source.as_str().to_string()),
            acme_challenge_type: Set(options.challenge.as_str().to_string()),
            auto_renew: Set(request.auto_renew),
            renew_days_before: Set(options.renew_days_before),
            status: Set(SiteStatus::Active.as_str().to_string()),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .map_err(db_error)?;

        info!("Created site {} for {}", site.id, site.domain);
        Ok(site.into())
    }

    pub async fn update_site(
        &self,
        site_id: i32,
        request: UpdateSiteRequest,
    ) -> ServiceResult<Site> {
        let site = self.get_site(site_id).await?;

        let source = match &request.certificate_source {
            Some(raw) => raw.parse().map_err(ServiceError::validation)?,
            None => site
                .certificate_source
                .parse()
                .map_err(ServiceError::validation)?,
        };
        let challenge = match &request.acme_challenge_type {
            Some(raw) => raw.parse().map_err(ServiceError::validation)?,
            None => site
                .acme_challenge_type
                .parse()
                .map_err(ServiceError::validation)?,
        };
        let options = SiteOptions {
            source,
            challenge,
            provider_credential_id: request
                .provider_credential_id
                .or(site.provider_credential_id),
            dns_credential_id: request.dns_credential_id.or(site.dns_credential_id),
            renew_days_before: request.renew_days_before.or(site.renew_days_before),
        };
        self.validate_options(site.tenant_id, &options).await?;

        let mut active: sites::ActiveModel = site.into();
        if let Some(domain) = &request.domain {
            active.domain = Set(valid_domain(domain)?);
        }
        if let Some(name) = request.name.filter(|n| !n.trim().is_empty()) {
            active.name = Set(name.trim().to_string());
        }
        if let Some(auto_renew) = request.auto_renew {
            active.auto_renew = Set(auto_renew);
        }
        if let Some(status) = request.status {
            active.status = Set(status.as_str().to_string());
        }
        active.certificate_source = Set(options.source.as_str().to_string());
        active.acme_challenge_type = Set(options.challenge.as_str().to_string());
        active.provider_credential_id = Set(options.provider_credential_id);
        active.dns_credential_id = Set(options.dns_credential_id);
        active.renew_days_before = Set(options.renew_days_before);

        let site = active.update(self.db.as_ref()).await.map_err(db_error)?;
        info!("Updated site {} ({})", site.id, site.domain);
        Ok(site.into())
    }

    /// Removes the site with its certificates, jobs and deployments.
    pub async fn delete_site(&self, site_id: i32) -> ServiceResult<()> {
        let result = sites::Entity::delete_by_id(site_id)
            .exec(self.db.as_ref())
            .await
            .map_err(db_error)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::not_found(format!("site {}", site_id)));
        }
        info!("Deleted site {}", site_id);
        Ok(())
    }

    async fn validate_options(&self, tenant_id: i32, options: &SiteOptions) -> ServiceResult<()> {
        if let Some(days) = options.renew_days_before {
            if !(1..=MAX_RENEW_DAYS_BEFORE).contains(&days) {
                return Err(ServiceError::validation(format!(
                    "renewDaysBefore must be between 1 and {}",
                    MAX_RENEW_DAYS_BEFORE
                )));
            }
        }

        if let Some(credential_id) = options.provider_credential_id {
            self.owned_credential(tenant_id, credential_id).await?;
        }

        match options.dns_credential_id {
            Some(credential_id) => {
                let credential = self.owned_credential(tenant_id, credential_id).await?;
                let dns_capable = credential
                    .provider_type
                    .parse::<ProviderType>()
                    .map(|t| t.is_dns_capable())
                    .unwrap_or(false);
                if !dns_capable {
                    return Err(ServiceError::validation(format!(
                        "provider type {} cannot manage DNS records",
                        credential.provider_type
                    )));
                }
            }
            None if options.source == CertificateSource::LetsEncrypt
                && options.challenge == ChallengeType::Dns01 =>
            {
                return Err(ServiceError::validation(
                    "dns-01 sites need a DNS credential",
                ));
            }
            None => {}
        }
        Ok(())
    }

    async fn owned_credential(
        &self,
        tenant_id: i32,
        credential_id: i32,
    ) -> ServiceResult<provider_credentials::Model> {
        provider_credentials::Entity::find_by_id(credential_id)
            .filter(provider_credentials::Column::TenantId.eq(tenant_id))
            .one(self.db.as_ref())
            .await
            .map_err(db_error)?
            .ok_or_else(|| {
                ServiceError::validation(format!(
                    "provider credential {} does not belong to tenant {}",
                    credential_id, tenant_id
                ))
            })
    }

    pub async fn get_site(&self, site_id: i32) -> ServiceResult<sites::Model> {
        sites::Entity::find_by_id(site_id)
            .one(self.db.as_ref())
            .await
            .map_err(db_error)?
            .ok_or_else(|| ServiceError::not_found(format!("site {}", site_id)))
    }

    pub async fn list_sites(&self, tenant_id: i32) -> ServiceResult<Vec<sites::Model>> {
        sites::Entity::find()
            .filter(sites::Column::TenantId.eq(tenant_id))
            .order_by_asc(sites::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(db_error)
    }
}

/// Stores provider configs encrypted and hands them back decrypted
pub struct CredentialService {
    db: Arc<DbConnection>,
    vault: Arc<CredentialVault>,
}

impl CredentialService {
    pub fn new(db: Arc<DbConnection>, vault: Arc<CredentialVault>) -> Self {
        Self { db, vault }
    }

    pub async fn create(
        &self,
        tenant_id: i32,
        request: CreateCredentialRequest,
    ) -> ServiceResult<ProviderCredential> {
        tenants::Entity::find_by_id(tenant_id)
            .one(self.db.as_ref())
            .await
            .map_err(db_error)?
            .ok_or_else(|| ServiceError::not_found(format!("tenant {}", tenant_id)))?;

        let provider_type: ProviderType = request
            .provider_type
            .parse()
            .map_err(|e: autossl_providers::ProviderError| ServiceError::validation(e.to_string()))?;
        provider_type
            .validate_config(&request.config)
            .map_err(|e| ServiceError::validation(e.to_string()))?;

        let encrypted_config = self
            .vault
            .encrypt_json(&request.config)?;

        let credential = provider_credentials::ActiveModel {
            tenant_id: Set(tenant_id),
            name: Set(request.name.trim().to_string()),
            provider_type: Set(provider_type.as_str().to_string()),
            encrypted_config: Set(encrypted_config),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .map_err(db_error)?;

        info!(
            "Stored {} credential {} for tenant {}",
            credential.provider_type, credential.id, tenant_id
        );
        Ok(credential.into())
    }

    pub async fn get(&self, credential_id: i32) -> ServiceResult<provider_credentials::Model> {
        provider_credentials::Entity::find_by_id(credential_id)
            .one(self.db.as_ref())
            .await
            .map_err(db_error)?
            .ok_or_else(|| ServiceError::not_found(format!("provider credential {}", credential_id)))
    }

    pub async fn list(&self, tenant_id: i32) -> ServiceResult<Vec<ProviderCredential>> {
        Ok(provider_credentials::Entity::find()
            .filter(provider_credentials::Column::TenantId.eq(tenant_id))
            .order_by_asc(provider_credentials::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(db_error)?
            .into_iter()
            .map(ProviderCredential::from)
            .collect())
    }

    pub async fn update(
        &self,
        credential_id: i32,
        request: UpdateCredentialRequest,
    ) -> ServiceResult<ProviderCredential> {
        let credential = self.get(credential_id).await?;

        let provider_type: ProviderType = match &request.provider_type {
            Some(raw) => raw.parse().map_err(|e: autossl_providers::ProviderError| {
                ServiceError::validation(e.to_string())
            })?,
            None => Self::provider_type(&credential)?,
        };
        let config = match request.config {
            Some(config) => config,
            None => self.decrypt_config(&credential)?,
        };
        provider_type
            .validate_config(&config)
            .map_err(|e| ServiceError::validation(e.to_string()))?;

        let mut active: provider_credentials::ActiveModel = credential.into();
        if let Some(name) = request.name.filter(|n| !n.trim().is_empty()) {
            active.name = Set(name.trim().to_string());
        }
        active.provider_type = Set(provider_type.as_str().to_string());
        active.encrypted_config = Set(self.vault.encrypt_json(&config)?);

        let credential = active.update(self.db.as_ref()).await.map_err(db_error)?;
        info!("Updated {} credential {}", credential.provider_type, credential.id);
        Ok(credential.into())
    }

    /// Deletes the credential; sites and domain settings using it are detached.
    pub async fn delete(&self, credential_id: i32) -> ServiceResult<()> {
        let txn = self.db.begin().await.map_err(db_error)?;

        sites::Entity::update_many()
            .col_expr(sites::Column::DnsCredentialId, Expr::value(Option::<i32>::None))
            .filter(sites::Column::DnsCredentialId.eq(credential_id))
            .exec(&txn)
            .await
            .map_err(db_error)?;

        let result = provider_credentials::Entity::delete_by_id(credential_id)
            .exec(&txn)
            .await
            .map_err(db_error)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::not_found(format!(
                "provider credential {}",
                credential_id
            )));
        }

        txn.commit().await.map_err(db_error)?;
        info!("Deleted provider credential {}", credential_id);
        Ok(())
    }

    pub fn provider_type(credential: &provider_credentials::Model) -> ServiceResult<ProviderType> {
        credential
            .provider_type
            .parse()
            .map_err(|e: autossl_providers::ProviderError| ServiceError::Configuration {
                message: e.to_string(),
            })
    }

    pub fn decrypt_config(
        &self,
        credential: &provider_credentials::Model,
    ) -> ServiceResult<serde_json::Value> {
        Ok(self.vault.decrypt_json(&credential.encrypted_config)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autossl_database::test_utils::TestDatabase;
    use serde_json::json;

    async fn services() -> (TestDatabase, SiteService, CredentialService) {
        let db = TestDatabase::with_migrations().await.unwrap();
        let vault = Arc::new(CredentialVault::new("sites-test-key").unwrap());
        let sites = SiteService::new(db.connection_arc());
        let credentials = CredentialService::new(db.connection_arc(), vault);
        (db, sites, credentials)
    }

    fn tenant_request() -> CreateTenantRequest {
        CreateTenantRequest {
            name: "Acme Media".to_string(),
            email: Some("ops@acme-media.cn".to_string()),
        }
    }

    fn site_request(domain: &str) -> CreateSiteRequest {
        CreateSiteRequest {
            name: String::new(),
            domain: domain.to_string(),
            provider_credential_id: None,
            certificate_source: default_source(),
            auto_renew: true,
            acme_challenge_type: default_challenge(),
            dns_credential_id: None,
            renew_days_before: None,
        }
    }

    async fn credential(
        credentials: &CredentialService,
        tenant_id: i32,
        provider_type: &str,
    ) -> ProviderCredential {
        let config = match provider_type {
            "qiniu" => json!({"accessKey": "qiniu-access", "secretKey": "qiniu-secret"}),
            _ => json!({"secretId": "AKIDtestsecretid", "secretKey": "testsecretkey"}),
        };
        credentials
            .create(
                tenant_id,
                CreateCredentialRequest {
                    name: provider_type.to_string(),
                    provider_type: provider_type.to_string(),
                    config,
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_site_normalizes_domain() {
        let (_db, sites, _) = services().await;
        let tenant = sites.create_tenant(tenant_request()).await.unwrap();

        let site = sites
            .create_site(tenant.id, site_request("  CDN.Example.COM. "))
            .await
            .unwrap();
        assert_eq!(site.domain, "cdn.example.com");
        assert_eq!(site.name, "cdn.example.com");
        assert_eq!(site.certificate_source, "letsencrypt");

        let listed = sites.list_sites(tenant.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, site.id);
    }

    #[tokio::test]
    async fn test_create_site_rejects_bad_input() {
        let (_db, sites, _) = services().await;
        let tenant = sites.create_tenant(tenant_request()).await.unwrap();

        let mut request = site_request("cdn.example.com");
        request.certificate_source = "zerossl".to_string();
        assert!(matches!(
            sites.create_site(tenant.id, request).await,
            Err(ServiceError::Validation { .. })
        ));

        assert!(matches!(
            sites.create_site(tenant.id, site_request("localhost")).await,
            Err(ServiceError::Validation { .. })
        ));

        assert!(matches!(
            sites.create_site(999, site_request("cdn.example.com")).await,
            Err(ServiceError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_site_credential_must_belong_to_tenant() {
        let (_db, sites, credentials) = services().await;
        let owner = sites.create_tenant(tenant_request()).await.unwrap();
        let other = sites.create_tenant(tenant_request()).await.unwrap();

        let credential = credentials
            .create(
                owner.id,
                CreateCredentialRequest {
                    name: "qiniu".to_string(),
                    provider_type: "qiniu".to_string(),
                    config: json!({"accessKey": "qiniu-access", "secretKey": "qiniu-secret"}),
                },
            )
            .await
            .unwrap();

        let mut request = site_request("cdn.example.com");
        request.provider_credential_id = Some(credential.id);
        assert!(sites.create_site(other.id, request.clone()).await.is_err());
        assert!(sites.create_site(owner.id, request).await.is_ok());
    }

    #[tokio::test]
    async fn test_credential_config_is_encrypted() {
        let (_db, sites, credentials) = services().await;
        let tenant = sites.create_tenant(tenant_request()).await.unwrap();
        let config = json!({"secretId": "AKIDtestsecretid", "secretKey": "testsecretkey"});

        let created = credentials
            .create(
                tenant.id,
                CreateCredentialRequest {
                    name: "dnspod".to_string(),
                    provider_type: "tencent_dns".to_string(),
                    config: config.clone(),
                },
            )
            .await
            .unwrap();
        assert_eq!(created.provider_type, "tencent_dns");

        let model = credentials.get(created.id).await.unwrap();
        assert!(!model.encrypted_config.contains("testsecretkey"));
        assert_eq!(credentials.decrypt_config(&model).unwrap(), config);
        assert_eq!(
            CredentialService::provider_type(&model).unwrap(),
            ProviderType::TencentDns
        );

        let listed = credentials.list(tenant.id).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_credential_validation() {
        let (_db, sites, credentials) = services().await;
        let tenant = sites.create_tenant(tenant_request()).await.unwrap();

        let short_secret = credentials
            .create(
                tenant.id,
                CreateCredentialRequest {
                    name: "tencent".to_string(),
                    provider_type: "tencent".to_string(),
                    config: json!({"secretId": "short", "secretKey": "testsecretkey"}),
                },
            )
            .await;
        assert!(matches!(short_secret, Err(ServiceError::Validation { .. })));

        let unknown = credentials
            .create(
                tenant.id,
                CreateCredentialRequest {
                    name: "aliyun".to_string(),
                    provider_type: "aliyun".to_string(),
                    config: json!({}),
                },
            )
            .await;
        assert!(matches!(unknown, Err(ServiceError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_dns01_site_needs_dns_credential() {
        let (_db, sites, credentials) = services().await;
        let tenant = sites.create_tenant(tenant_request()).await.unwrap();
        let cdn = credential(&credentials, tenant.id, "qiniu").await;
        let dns = credential(&credentials, tenant.id, "tencent_dns").await;

        let mut request = site_request("cdn.example.com");
        request.acme_challenge_type = "dns-01".to_string();
        assert!(matches!(
            sites.create_site(tenant.id, request.clone()).await,
            Err(ServiceError::Validation { .. })
        ));

        // qiniu cannot publish TXT records
        request.dns_credential_id = Some(cdn.id);
        assert!(matches!(
            sites.create_site(tenant.id, request.clone()).await,
            Err(ServiceError::Validation { .. })
        ));

        request.dns_credential_id = Some(dns.id);
        let site = sites.create_site(tenant.id, request).await.unwrap();
        assert_eq!(site.acme_challenge_type, "dns-01");
        assert_eq!(site.dns_credential_id, Some(dns.id));

        // self-signed sites never run a challenge
        let mut self_signed = site_request("img.example.com");
        self_signed.certificate_source = "self_signed".to_string();
        self_signed.acme_challenge_type = "dns-01".to_string();
        assert!(sites.create_site(tenant.id, self_signed).await.is_ok());
    }

    #[tokio::test]
    async fn test_renew_days_before_bounds() {
        let (_db, sites, _) = services().await;
        let tenant = sites.create_tenant(tenant_request()).await.unwrap();

        for days in [0, 91] {
            let mut request = site_request("cdn.example.com");
            request.renew_days_before = Some(days);
            assert!(matches!(
                sites.create_site(tenant.id, request).await,
                Err(ServiceError::Validation { .. })
            ));
        }

        let mut request = site_request("cdn.example.com");
        request.renew_days_before = Some(90);
        let site = sites.create_site(tenant.id, request).await.unwrap();
        assert_eq!(site.renew_days_before, Some(90));
    }

    #[tokio::test]
    async fn test_update_site_merges_fields() {
        let (_db, sites, credentials) = services().await;
        let tenant = sites.create_tenant(tenant_request()).await.unwrap();
        let dns = credential(&credentials, tenant.id, "tencent_dns").await;
        let site = sites
            .create_site(tenant.id, site_request("cdn.example.com"))
            .await
            .unwrap();

        let updated = sites
            .update_site(
                site.id,
                UpdateSiteRequest {
                    name: Some("Images".to_string()),
                    domain: Some("IMG.Example.com".to_string()),
                    renew_days_before: Some(14),
                    status: Some(SiteStatus::Paused),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Images");
        assert_eq!(updated.domain, "img.example.com");
        assert_eq!(updated.renew_days_before, Some(14));
        assert_eq!(updated.status, "paused");
        assert_eq!(updated.certificate_source, "letsencrypt");
        assert!(updated.auto_renew);

        // switching to dns-01 is checked against the merged site
        let switch = UpdateSiteRequest {
            acme_challenge_type: Some("dns-01".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            sites.update_site(site.id, switch.clone()).await,
            Err(ServiceError::Validation { .. })
        ));
        let updated = sites
            .update_site(
                site.id,
                UpdateSiteRequest {
                    dns_credential_id: Some(dns.id),
                    ..switch
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.acme_challenge_type, "dns-01");
        assert_eq!(updated.renew_days_before, Some(14));

        assert!(matches!(
            sites.update_site(999, UpdateSiteRequest::default()).await,
            Err(ServiceError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_site() {
        let (_db, sites, _) = services().await;
        let tenant = sites.create_tenant(tenant_request()).await.unwrap();
        let site = sites
            .create_site(tenant.id, site_request("cdn.example.com"))
            .await
            .unwrap();

        sites.delete_site(site.id).await.unwrap();
        assert!(sites.list_sites(tenant.id).await.unwrap().is_empty());
        assert!(matches!(
            sites.delete_site(site.id).await,
            Err(ServiceError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_credential_reencrypts_config() {
        let (_db, sites, credentials) = services().await;
        let tenant = sites.create_tenant(tenant_request()).await.unwrap();
        let created = credential(&credentials, tenant.id, "tencent").await;

        let renamed = credentials
            .update(
                created.id,
                UpdateCredentialRequest {
                    name: Some("tencent prod".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "tencent prod");
        let model = credentials.get(created.id).await.unwrap();
        assert_eq!(
            credentials.decrypt_config(&model).unwrap()["secretKey"],
            "testsecretkey"
        );

        let rotated = json!({"secretId": "AKIDrotatedsecret", "secretKey": "rotatedkey"});
        credentials
            .update(
                created.id,
                UpdateCredentialRequest {
                    config: Some(rotated.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let model = credentials.get(created.id).await.unwrap();
        assert!(!model.encrypted_config.contains("rotatedkey"));
        assert_eq!(credentials.decrypt_config(&model).unwrap(), rotated);

        // the stored tencent config is not a qiniu config
        let retyped = credentials
            .update(
                created.id,
                UpdateCredentialRequest {
                    provider_type: Some("qiniu".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(retyped, Err(ServiceError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_delete_credential_detaches_sites() {
        let (_db, sites, credentials) = services().await;
        let tenant = sites.create_tenant(tenant_request()).await.unwrap();
        let dns = credential(&credentials, tenant.id, "tencent_dns").await;

        let mut request = site_request("cdn.example.com");
        request.acme_challenge_type = "dns-01".to_string();
        request.dns_credential_id = Some(dns.id);
        let site = sites.create_site(tenant.id, request).await.unwrap();

        credentials.delete(dns.id).await.unwrap();
        assert!(credentials.list(tenant.id).await.unwrap().is_empty());
        assert_eq!(sites.get_site(site.id).await.unwrap().dns_credential_id, None);
        assert!(matches!(
            credentials.delete(dns.id).await,
            Err(ServiceError::NotFound { .. })
        ));
    }
}
