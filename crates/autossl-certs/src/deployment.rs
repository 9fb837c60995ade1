//! Pushes issued certificates to CDN providers and records every attempt.

use autossl_core::{ServiceError, UtcDateTime};
use autossl_database::DbConnection;
use autossl_entities::{deployments, provider_credentials, sites};
use autossl_providers::{CdnDeployerRegistry, ProviderError, ProviderType};
use sea_orm::sea_query::Expr;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use utoipa::ToSchema;

use crate::sites::{CredentialService, SiteService};
use crate::tls::{CertificateRepository, RepositoryError};

#[derive(Error, Debug)]
pub enum DeploymentError {
    #[error("Site {0} not found")]
    SiteNotFound(i32),

    #[error("{0}")]
    CertificateNotFound(String),

    #[error("Site {0} has no provider credential to deploy with")]
    MissingCredential(i32),

    #[error("Deployment {deployment_id} failed: {source}")]
    Provider {
        deployment_id: i32,
        #[source]
        source: ProviderError,
    },

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("{0}")]
    Service(#[from] ServiceError),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<DbErr> for DeploymentError {
    fn from(err: DbErr) -> Self {
        DeploymentError::Database(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Running,
    Success,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Running => "running",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = DeploymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(DeploymentStatus::Running),
            "success" => Ok(DeploymentStatus::Success),
            "failed" => Ok(DeploymentStatus::Failed),
            other => Err(DeploymentError::Database(format!(
                "unknown deployment status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub id: i32,
    pub site_id: i32,
    pub certificate_id: i32,
    pub provider_credential_id: i32,
    pub status: DeploymentStatus,
    pub message: Option<String>,
    #[schema(value_type = String, format = DateTime)]
    pub created_at: UtcDateTime,
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: UtcDateTime,
}

impl TryFrom<deployments::Model> for DeploymentRecord {
    type Error = DeploymentError;

    fn try_from(model: deployments::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            site_id: model.site_id,
            certificate_id: model.certificate_id,
            provider_credential_id: model.provider_credential_id,
            status: model.status.parse()?,
            message: model.message,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

pub struct DeploymentDispatcher {
    db: Arc<DbConnection>,
    repository: Arc<dyn CertificateRepository>,
    sites: Arc<SiteService>,
    credentials: Arc<CredentialService>,
    registry: Arc<CdnDeployerRegistry>,
}

impl DeploymentDispatcher {
    pub fn new(
        db: Arc<DbConnection>,
        repository: Arc<dyn CertificateRepository>,
        sites: Arc<SiteService>,
        credentials: Arc<CredentialService>,
        registry: Arc<CdnDeployerRegistry>,
    ) -> Self {
        Self {
            db,
            repository,
            sites,
            credentials,
            registry,
        }
    }

    /// Deploys `certificate_id`, or the site's latest certificate, with the site's credential.
    pub async fn deploy_for_site(
        &self,
        site_id: i32,
        certificate_id: Option<i32>,
    ) -> Result<DeploymentRecord, DeploymentError> {
        let site = match self.sites.get_site(site_id).await {
            Ok(site) => site,
            Err(ServiceError::NotFound { .. }) => return Err(DeploymentError::SiteNotFound(site_id)),
            Err(e) => return Err(e.into()),
        };

        let credential_id = site
            .provider_credential_id
            .ok_or(DeploymentError::MissingCredential(site_id))?;
        let credential = match self.credentials.get(credential_id).await {
            Ok(credential) => credential,
            Err(ServiceError::NotFound { .. }) => {
                return Err(DeploymentError::MissingCredential(site_id))
            }
            Err(e) => return Err(e.into()),
        };

        let certificate = match certificate_id {
            Some(id) => self
                .repository
                .find_certificate(site_id, id)
                .await?
                .ok_or_else(|| {
                    DeploymentError::CertificateNotFound(format!(
                        "Certificate {} not found for site {}",
                        id, site_id
                    ))
                })?,
            None => self
                .repository
                .find_latest_certificate(site_id)
                .await?
                .ok_or_else(|| {
                    DeploymentError::CertificateNotFound(format!(
                        "Site {} has no certificate yet",
                        site_id
                    ))
                })?,
        };

        self.deploy(&site, certificate.id, &credential).await
    }

    /// One attempt. The record is left `success` or `failed`; a failure is also returned.
    pub async fn deploy(
        &self,
        site: &sites::Model,
        certificate_id: i32,
        credential: &provider_credentials::Model,
    ) -> Result<DeploymentRecord, DeploymentError> {
        let record = deployments::ActiveModel {
            site_id: Set(site.id),
            certificate_id: Set(certificate_id),
            provider_credential_id: Set(credential.id),
            status: Set(DeploymentStatus::Running.as_str().to_string()),
            message: Set(None),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;
        let deployment_id = record.id;

        info!(
            "Deploying certificate {} for {} via {} (deployment {})",
            certificate_id, site.domain, credential.provider_type, deployment_id
        );

        let outcome = async {
            let material = self.repository.load_material(certificate_id).await?;
            let config = self.credentials.decrypt_config(credential)?;
            let provider = |source| DeploymentError::Provider {
                deployment_id,
                source,
            };
            let provider_type: ProviderType = credential.provider_type.parse().map_err(provider)?;
            let deployer = self.registry.get(provider_type).map_err(provider)?;
            deployer
                .deploy(&site.domain, &material.cert_pem, &material.key_pem, &config)
                .await
                .map_err(provider)?;
            Ok::<_, DeploymentError>(provider_type)
        }
        .await;

        let (status, message) = match &outcome {
            Ok(provider_type) => (
                DeploymentStatus::Success,
                format!("deployed to {}", provider_type),
            ),
            Err(DeploymentError::Provider { source, .. }) => {
                (DeploymentStatus::Failed, source.to_string())
            }
            Err(e) => (DeploymentStatus::Failed, e.to_string()),
        };

        let mut active = record.into_active_model();
        active.status = Set(status.as_str().to_string());
        active.message = Set(Some(message.clone()));
        let updated = active.update(self.db.as_ref()).await?;

        match outcome {
            Ok(_) => {
                info!("Deployment {} for {} succeeded", deployment_id, site.domain);
                updated.try_into()
            }
            Err(e) => {
                error!(
                    "Deployment {} for {} failed: {}",
                    deployment_id, site.domain, message
                );
                Err(e)
            }
        }
    }

    /// Fails deployment records still marked `running`, e.g. after the
    /// process stopped mid-attempt.
    pub async fn fail_running(&self, message: &str) -> Result<u64, DeploymentError> {
        let result = deployments::Entity::update_many()
            .col_expr(
                deployments::Column::Status,
                Expr::value(DeploymentStatus::Failed.as_str()),
            )
            .col_expr(deployments::Column::Message, Expr::value(message.to_string()))
            .col_expr(deployments::Column::UpdatedAt, Expr::value(chrono::Utc::now()))
            .filter(deployments::Column::Status.eq(DeploymentStatus::Running.as_str()))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    /// Newest first
    pub async fn list_for_site(
        &self,
        site_id: i32,
    ) -> Result<Vec<DeploymentRecord>, DeploymentError> {
        if let Err(ServiceError::NotFound { .. }) = self.sites.get_site(site_id).await {
            return Err(DeploymentError::SiteNotFound(site_id));
        }

        deployments::Entity::find()
            .filter(deployments::Column::SiteId.eq(site_id))
            .order_by_desc(deployments::Column::CreatedAt)
            .order_by_desc(deployments::Column::Id)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(DeploymentRecord::try_from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{attach_credential, seed_credential, seed_site, TestContext};
    use autossl_providers::test_utils::MockCdnDeployer;

    fn dispatcher(ctx: &TestContext, deployer: Arc<MockCdnDeployer>) -> DeploymentDispatcher {
        let mut registry = CdnDeployerRegistry::new();
        registry.register(ProviderType::Tencent, deployer.clone());
        registry.register(ProviderType::Qiniu, deployer);
        DeploymentDispatcher::new(
            ctx.db.connection_arc(),
            ctx.repository.clone(),
            ctx.sites.clone(),
            ctx.credentials.clone(),
            Arc::new(registry),
        )
    }

    #[tokio::test]
    async fn test_deploy_latest_certificate() {
        let ctx = TestContext::new().await;
        let deployer = Arc::new(MockCdnDeployer::new());
        let dispatcher = dispatcher(&ctx, deployer.clone());

        let site = seed_site(ctx.db.connection(), "cdn.example.com", "self_signed").await;
        let credential = seed_credential(ctx.db.connection(), site.tenant_id, "tencent").await;
        attach_credential(ctx.db.connection(), site.id, credential.id).await;
        let issued = ctx.certificates.issue(site.id).await.unwrap().certificate;

        let record = dispatcher.deploy_for_site(site.id, None).await.unwrap();
        assert_eq!(record.status, DeploymentStatus::Success);
        assert_eq!(record.certificate_id, issued.id);
        assert_eq!(record.message.as_deref(), Some("deployed to tencent"));

        let calls = deployer.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].domain, "cdn.example.com");
        assert!(calls[0].cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(calls[0].key_pem.contains("PRIVATE KEY"));
    }

    #[tokio::test]
    async fn test_vendor_failure_is_recorded_and_returned() {
        let ctx = TestContext::new().await;
        let deployer = Arc::new(MockCdnDeployer::failing("domain is not on this account"));
        let dispatcher = dispatcher(&ctx, deployer);

        let site = seed_site(ctx.db.connection(), "cdn.example.com", "self_signed").await;
        let credential = seed_credential(ctx.db.connection(), site.tenant_id, "qiniu").await;
        attach_credential(ctx.db.connection(), site.id, credential.id).await;
        ctx.certificates.issue(site.id).await.unwrap();

        let err = dispatcher.deploy_for_site(site.id, None).await.unwrap_err();
        assert!(matches!(err, DeploymentError::Provider { .. }));

        let records = dispatcher.list_for_site(site.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, DeploymentStatus::Failed);
        assert!(records[0]
            .message
            .as_deref()
            .unwrap()
            .contains("domain is not on this account"));
    }

    #[tokio::test]
    async fn test_dns_only_credential_yields_failed_record() {
        let ctx = TestContext::new().await;
        let deployer = Arc::new(MockCdnDeployer::new());
        let dispatcher = dispatcher(&ctx, deployer.clone());

        let site = seed_site(ctx.db.connection(), "cdn.example.com", "self_signed").await;
        let credential = seed_credential(ctx.db.connection(), site.tenant_id, "tencent_dns").await;
        attach_credential(ctx.db.connection(), site.id, credential.id).await;
        ctx.certificates.issue(site.id).await.unwrap();

        assert!(dispatcher.deploy_for_site(site.id, None).await.is_err());
        assert!(deployer.calls().await.is_empty());

        let records = dispatcher.list_for_site(site.id).await.unwrap();
        assert_eq!(records[0].status, DeploymentStatus::Failed);
        assert_eq!(
            records[0].message.as_deref(),
            Some("Provider type tencent_dns does not support CDN deployment")
        );
    }

    #[tokio::test]
    async fn test_precondition_errors() {
        let ctx = TestContext::new().await;
        let dispatcher = dispatcher(&ctx, Arc::new(MockCdnDeployer::new()));
        let site = seed_site(ctx.db.connection(), "cdn.example.com", "self_signed").await;

        assert!(matches!(
            dispatcher.deploy_for_site(site.id, None).await,
            Err(DeploymentError::MissingCredential(_))
        ));
        assert!(matches!(
            dispatcher.deploy_for_site(999, None).await,
            Err(DeploymentError::SiteNotFound(999))
        ));

        let credential = seed_credential(ctx.db.connection(), site.tenant_id, "tencent").await;
        attach_credential(ctx.db.connection(), site.id, credential.id).await;
        assert!(matches!(
            dispatcher.deploy_for_site(site.id, None).await,
            Err(DeploymentError::CertificateNotFound(_))
        ));
        assert!(matches!(
            dispatcher.deploy_for_site(site.id, Some(77)).await,
            Err(DeploymentError::CertificateNotFound(_))
        ));
        assert!(dispatcher.list_for_site(site.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fail_running() {
        let ctx = TestContext::new().await;
        let dispatcher = dispatcher(&ctx, Arc::new(MockCdnDeployer::new()));
        let site = seed_site(ctx.db.connection(), "cdn.example.com", "self_signed").await;
        let credential = seed_credential(ctx.db.connection(), site.tenant_id, "tencent").await;
        attach_credential(ctx.db.connection(), site.id, credential.id).await;
        let certificate = ctx.certificates.issue(site.id).await.unwrap().certificate;
        dispatcher.deploy_for_site(site.id, None).await.unwrap();

        deployments::ActiveModel {
            site_id: Set(site.id),
            certificate_id: Set(certificate.id),
            provider_credential_id: Set(credential.id),
            status: Set(DeploymentStatus::Running.as_str().to_string()),
            message: Set(None),
            ..Default::default()
        }
        .insert(ctx.db.connection())
        .await
        .unwrap();

        assert_eq!(dispatcher.fail_running("server shutdown").await.unwrap(), 1);
        let records = dispatcher.list_for_site(site.id).await.unwrap();
        assert_eq!(records[0].status, DeploymentStatus::Failed);
        assert_eq!(records[0].message.as_deref(), Some("server shutdown"));
        assert_eq!(records[1].status, DeploymentStatus::Success);
    }
}
