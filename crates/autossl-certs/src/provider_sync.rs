//! Imports the domains a CDN account already serves as sites.

use autossl_core::{normalize_domain, ServiceError};
use autossl_database::DbConnection;
use autossl_entities::sites;
use autossl_providers::{CdnDeployerRegistry, CdnDomain, ProviderError};
use sea_orm::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::challenges::ChallengeType;
use crate::sites::{CredentialService, SiteStatus};
use crate::tls::CertificateSource;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Provider type {0} has no CDN domains to sync")]
    Unsupported(String),

    #[error("Listing CDN domains failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("{0}")]
    Service(#[from] ServiceError),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<DbErr> for SyncError {
    fn from(err: DbErr) -> Self {
        SyncError::Database(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub total: usize,
    pub created: usize,
    pub updated: usize,
}

pub struct ProviderSyncService {
    db: Arc<DbConnection>,
    credentials: Arc<CredentialService>,
    registry: Arc<CdnDeployerRegistry>,
}

impl ProviderSyncService {
    pub fn new(
        db: Arc<DbConnection>,
        credentials: Arc<CredentialService>,
        registry: Arc<CdnDeployerRegistry>,
    ) -> Self {
        Self {
            db,
            credentials,
            registry,
        }
    }

    /// Upserts one site per CDN domain of the credential's account.
    ///
    /// New sites start as Let's Encrypt with auto-renew off. Existing sites keep
    /// their settings; only the credential and the vendor-reported fields change.
    pub async fn sync_sites(&self, credential_id: i32) -> Result<SyncReport, SyncError> {
        let credential = self.credentials.get(credential_id).await?;
        let provider_type = CredentialService::provider_type(&credential)?;
        if !provider_type.is_cdn_capable() {
            return Err(SyncError::Unsupported(provider_type.to_string()));
        }

        let deployer = self.registry.get(provider_type)?;
        let config = self.credentials.decrypt_config(&credential)?;
        let listed = deployer.list_domains(&config).await?;

        let txn = self.db.begin().await?;
        let mut report = SyncReport::default();
        for item in listed {
            let domain = normalize_domain(&item.domain);
            if domain.is_empty() {
                continue;
            }
            report.total += 1;

            let existing = sites::Entity::find()
                .filter(sites::Column::TenantId.eq(credential.tenant_id))
                .filter(sites::Column::Domain.eq(domain.as_str()))
                .one(&txn)
                .await?;

            match existing {
                Some(site) => {
                    debug!("Refreshing site {} from {}", site.id, provider_type);
                    let mut active = site.into_active_model();
                    active.provider_credential_id = Set(Some(credential.id));
                    apply_vendor_state(&mut active, item);
                    active.update(&txn).await?;
                    report.updated += 1;
                }
                None => {
                    let mut active = sites::ActiveModel {
                        tenant_id: Set(credential.tenant_id),
                        name: Set(domain.clone()),
                        domain: Set(domain),
                        provider_credential_id: Set(Some(credential.id)),
                        dns_credential_id: Set(None),
                        certificate_source: Set(CertificateSource::LetsEncrypt.as_str().to_string()),
                        acme_challenge_type: Set(ChallengeType::Http01.as_str().to_string()),
                        auto_renew: Set(false),
                        renew_days_before: Set(None),
                        status: Set(SiteStatus::Active.as_str().to_string()),
                        ..Default::default()
                    };
                    apply_vendor_state(&mut active, item);
                    active.insert(&txn).await?;
                    report.created += 1;
                }
            }
        }
        txn.commit().await?;

        info!(
            "Synced {} {} domains for tenant {}: {} created, {} updated",
            report.total, provider_type, credential.tenant_id, report.created, report.updated
        );
        Ok(report)
    }
}

fn apply_vendor_state(active: &mut sites::ActiveModel, item: CdnDomain) {
    active.provider_status = Set(item.status);
    active.provider_https = Set(item.https);
    active.provider_cert_name = Set(item.cert_name);
    active.provider_cert_expires_at = Set(item.cert_expires_at);
    active.provider_cert_deploy_at = Set(item.cert_deploy_at);
}
