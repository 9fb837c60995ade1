//! Per-tenant renewal settings and per-domain challenge policy.
//!
//! Stored rows only hold overrides; every read resolves them against the
//! process defaults field by field.

use autossl_core::{apex_domain, normalize_domain, AcmeDefaults, RenewalDefaults};
use autossl_database::DbConnection;
use autossl_entities::{domain_settings, provider_credentials, sites, tenant_settings, tenants};
use autossl_providers::ProviderType;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::challenges::ChallengeType;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("{0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<DbErr> for SettingsError {
    fn from(err: DbErr) -> Self {
        SettingsError::Database(err.to_string())
    }
}

/// Resolved ACME options for one tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AcmeSettings {
    pub account_email: Option<String>,
    pub directory_url: String,
    pub skip_local_verify: bool,
    pub local_verify_port: u16,
    pub dns_wait_seconds: u64,
    pub dns_ttl: u32,
}

impl From<&AcmeDefaults> for AcmeSettings {
    fn from(defaults: &AcmeDefaults) -> Self {
        Self {
            account_email: defaults.account_email.clone(),
            directory_url: defaults.directory_url.clone(),
            skip_local_verify: defaults.skip_local_verify,
            local_verify_port: defaults.local_verify_port,
            dns_wait_seconds: defaults.dns_wait_seconds,
            dns_ttl: defaults.dns_ttl,
        }
    }
}

impl Default for AcmeSettings {
    fn default() -> Self {
        Self::from(&AcmeDefaults::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenewalSettings {
    pub renewal_hour: u32,
    pub renewal_minute: u32,
    pub threshold_days: u32,
    pub auto_deploy: bool,
    pub acme: AcmeSettings,
}

/// Body of `PUT /tenants/{id}/renewal-settings`. Absent fields inherit the default.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRenewalSettings {
    pub renewal_hour: Option<i32>,
    pub renewal_minute: Option<i32>,
    pub threshold_days: Option<i32>,
    pub auto_deploy: Option<bool>,
    pub acme_account_email: Option<String>,
    pub acme_directory_url: Option<String>,
    pub acme_skip_local_verify: Option<bool>,
    pub acme_dns_wait_seconds: Option<i32>,
    pub acme_dns_ttl: Option<i32>,
}

impl UpdateRenewalSettings {
    fn validate(&self) -> Result<(), SettingsError> {
        fn in_range(name: &str, value: Option<i32>, min: i32, max: i32) -> Result<(), SettingsError> {
            match value {
                Some(v) if v < min || v > max => Err(SettingsError::Validation(format!(
                    "{} must be between {} and {}, got {}",
                    name, min, max, v
                ))),
                _ => Ok(()),
            }
        }

        in_range("renewalHour", self.renewal_hour, 0, 23)?;
        in_range("renewalMinute", self.renewal_minute, 0, 59)?;
        in_range("thresholdDays", self.threshold_days, 1, 90)?;
        in_range("acmeDnsWaitSeconds", self.acme_dns_wait_seconds, 0, 3600)?;
        in_range("acmeDnsTtl", self.acme_dns_ttl, 1, 86400)?;

        if let Some(email) = self.acme_account_email.as_deref() {
            if !email.trim().is_empty() && !email.contains('@') {
                return Err(SettingsError::Validation(format!(
                    "'{}' is not an email address",
                    email
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DomainSettings {
    pub id: i32,
    pub tenant_id: i32,
    pub apex_domain: String,
    pub challenge_type: ChallengeType,
    pub dns_credential_id: Option<i32>,
}

impl TryFrom<domain_settings::Model> for DomainSettings {
    type Error = SettingsError;

    fn try_from(model: domain_settings::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            tenant_id: model.tenant_id,
            apex_domain: model.apex_domain,
            challenge_type: model
                .challenge_type
                .parse()
                .map_err(SettingsError::Database)?,
            dns_credential_id: model.dns_credential_id,
        })
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpsertDomainSettings {
    /// Any hostname under the apex; it is reduced to the apex before storing
    pub domain: String,
    pub challenge_type: ChallengeType,
    pub dns_credential_id: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PolicySource {
    Explicit,
    Sibling,
    Default,
}

/// Effective challenge choice for one hostname
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DomainChallengePolicy {
    pub apex_domain: String,
    pub challenge_type: ChallengeType,
    pub dns_credential_id: Option<i32>,
    pub source: PolicySource,
}

pub struct SettingsService {
    db: Arc<DbConnection>,
    acme: AcmeDefaults,
    renewal: RenewalDefaults,
}

impl SettingsService {
    pub fn new(db: Arc<DbConnection>, acme: AcmeDefaults, renewal: RenewalDefaults) -> Self {
        Self { db, acme, renewal }
    }

    async fn ensure_tenant(&self, tenant_id: i32) -> Result<(), SettingsError> {
        tenants::Entity::find_by_id(tenant_id)
            .one(self.db.as_ref())
            .await?
            .map(|_| ())
            .ok_or_else(|| SettingsError::NotFound(format!("tenant {}", tenant_id)))
    }

    pub async fn resolve_renewal_settings(
        &self,
        tenant_id: i32,
    ) -> Result<RenewalSettings, SettingsError> {
        self.ensure_tenant(tenant_id).await?;

        let row = tenant_settings::Entity::find()
            .filter(tenant_settings::Column::TenantId.eq(tenant_id))
            .one(self.db.as_ref())
            .await?;

        let mut resolved = RenewalSettings {
            renewal_hour: self.renewal.hour,
            renewal_minute: self.renewal.minute,
            threshold_days: self.renewal.threshold_days,
            auto_deploy: self.renewal.auto_deploy,
            acme: AcmeSettings::from(&self.acme),
        };

        let Some(row) = row else {
            return Ok(resolved);
        };

        // negative values cannot be written through the service; ignore them if present
        if let Some(hour) = row.renewal_hour.and_then(|v| u32::try_from(v).ok()) {
            resolved.renewal_hour = hour;
        }
        if let Some(minute) = row.renewal_minute.and_then(|v| u32::try_from(v).ok()) {
            resolved.renewal_minute = minute;
        }
        if let Some(days) = row.renewal_threshold_days.and_then(|v| u32::try_from(v).ok()) {
            resolved.threshold_days = days;
        }
        if let Some(auto_deploy) = row.auto_deploy {
            resolved.auto_deploy = auto_deploy;
        }
        if let Some(email) = row.acme_account_email.filter(|e| !e.trim().is_empty()) {
            resolved.acme.account_email = Some(email);
        }
        if let Some(url) = row.acme_directory_url.filter(|u| !u.trim().is_empty()) {
            resolved.acme.directory_url = url;
        }
        if let Some(skip) = row.acme_skip_local_verify {
            resolved.acme.skip_local_verify = skip;
        }
        if let Some(wait) = row.acme_dns_wait_seconds.and_then(|v| u64::try_from(v).ok()) {
            resolved.acme.dns_wait_seconds = wait;
        }
        if let Some(ttl) = row.acme_dns_ttl.and_then(|v| u32::try_from(v).ok()) {
            resolved.acme.dns_ttl = ttl;
        }

        Ok(resolved)
    }

    /// Replaces the tenant's overrides and returns the resolved result.
    pub async fn update_renewal_settings(
        &self,
        tenant_id: i32,
        update: UpdateRenewalSettings,
    ) -> Result<RenewalSettings, SettingsError> {
        self.ensure_tenant(tenant_id).await?;
        update.validate()?;

        let existing = tenant_settings::Entity::find()
            .filter(tenant_settings::Column::TenantId.eq(tenant_id))
            .one(self.db.as_ref())
            .await?;

        let mut active = match existing {
            Some(row) => row.into_active_model(),
            None => tenant_settings::ActiveModel {
                tenant_id: Set(tenant_id),
                ..Default::default()
            },
        };
        active.renewal_hour = Set(update.renewal_hour);
        active.renewal_minute = Set(update.renewal_minute);
        active.renewal_threshold_days = Set(update.threshold_days);
        active.auto_deploy = Set(update.auto_deploy);
        active.acme_account_email = Set(update.acme_account_email);
        active.acme_directory_url = Set(update.acme_directory_url);
        active.acme_skip_local_verify = Set(update.acme_skip_local_verify);
        active.acme_dns_wait_seconds = Set(update.acme_dns_wait_seconds);
        active.acme_dns_ttl = Set(update.acme_dns_ttl);
        active.save(self.db.as_ref()).await?;

        info!("Updated renewal settings for tenant {}", tenant_id);
        self.resolve_renewal_settings(tenant_id).await
    }

    pub async fn list_domain_settings(
        &self,
        tenant_id: i32,
    ) -> Result<Vec<DomainSettings>, SettingsError> {
        self.ensure_tenant(tenant_id).await?;

        domain_settings::Entity::find()
            .filter(domain_settings::Column::TenantId.eq(tenant_id))
            .order_by_asc(domain_settings::Column::ApexDomain)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(DomainSettings::try_from)
            .collect()
    }

    pub async fn upsert_domain_settings(
        &self,
        tenant_id: i32,
        request: UpsertDomainSettings,
    ) -> Result<DomainSettings, SettingsError> {
        self.ensure_tenant(tenant_id).await?;

        let apex = apex_domain(&request.domain);
        if apex.is_empty() {
            return Err(SettingsError::Validation("domain is required".to_string()));
        }

        if request.challenge_type == ChallengeType::Dns01 {
            let credential_id = request.dns_credential_id.ok_or_else(|| {
                SettingsError::Validation(format!(
                    "dns-01 for {} requires a DNS provider credential",
                    apex
                ))
            })?;
            self.require_dns_credential(tenant_id, credential_id).await?;
        }

        let existing = domain_settings::Entity::find()
            .filter(domain_settings::Column::TenantId.eq(tenant_id))
            .filter(domain_settings::Column::ApexDomain.eq(apex.as_str()))
            .one(self.db.as_ref())
            .await?;

        let mut active = match existing {
            Some(row) => row.into_active_model(),
            None => domain_settings::ActiveModel {
                tenant_id: Set(tenant_id),
                apex_domain: Set(apex.clone()),
                ..Default::default()
            },
        };
        active.challenge_type = Set(request.challenge_type.as_str().to_string());
        active.dns_credential_id = Set(request.dns_credential_id);
        let saved = active.save(self.db.as_ref()).await?;
        let model = saved.try_into_model()?;

        info!(
            "Domain {} of tenant {} now uses {}",
            apex, tenant_id, request.challenge_type
        );
        model.try_into()
    }

    async fn require_dns_credential(
        &self,
        tenant_id: i32,
        credential_id: i32,
    ) -> Result<(), SettingsError> {
        let credential = provider_credentials::Entity::find_by_id(credential_id)
            .filter(provider_credentials::Column::TenantId.eq(tenant_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| {
                SettingsError::Validation(format!(
                    "provider credential {} does not belong to tenant {}",
                    credential_id, tenant_id
                ))
            })?;

        let dns_capable = credential
            .provider_type
            .parse::<ProviderType>()
            .map(|t| t.is_dns_capable())
            .unwrap_or(false);
        if !dns_capable {
            return Err(SettingsError::Validation(format!(
                "provider type {} cannot manage DNS records",
                credential.provider_type
            )));
        }
        Ok(())
    }

    /// Explicit row for the apex, else the first site on the same apex that
    /// was configured for dns-01 with a DNS credential, else http-01.
    pub async fn resolve_challenge_policy(
        &self,
        tenant_id: i32,
        domain: &str,
    ) -> Result<DomainChallengePolicy, SettingsError> {
        let apex = apex_domain(domain);

        let explicit = domain_settings::Entity::find()
            .filter(domain_settings::Column::TenantId.eq(tenant_id))
            .filter(domain_settings::Column::ApexDomain.eq(apex.as_str()))
            .one(self.db.as_ref())
            .await?;
        if let Some(row) = explicit {
            let settings = DomainSettings::try_from(row)?;
            return Ok(DomainChallengePolicy {
                apex_domain: apex,
                challenge_type: settings.challenge_type,
                dns_credential_id: settings.dns_credential_id,
                source: PolicySource::Explicit,
            });
        }

        let sibling = sites::Entity::find()
            .filter(sites::Column::TenantId.eq(tenant_id))
            .filter(sites::Column::AcmeChallengeType.eq(ChallengeType::Dns01.as_str()))
            .filter(sites::Column::DnsCredentialId.is_not_null())
            .order_by_asc(sites::Column::Id)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .find(|site| apex_domain(&site.domain) == apex);

        if let Some(site) = sibling {
            debug!(
                "{} inherits dns-01 from site {} ({})",
                normalize_domain(domain),
                site.id,
                site.domain
            );
            return Ok(DomainChallengePolicy {
                apex_domain: apex,
                challenge_type: ChallengeType::Dns01,
                dns_credential_id: site.dns_credential_id,
                source: PolicySource::Sibling,
            });
        }

        Ok(DomainChallengePolicy {
            apex_domain: apex,
            challenge_type: ChallengeType::Http01,
            dns_credential_id: None,
            source: PolicySource::Default,
        })
    }
}
