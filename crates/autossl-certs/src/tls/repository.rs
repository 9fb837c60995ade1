use async_trait::async_trait;
use autossl_core::CredentialVault;
use autossl_database::DbConnection;
use autossl_entities::{acme_accounts, certificates};
use sea_orm::*;
use std::sync::Arc;

use super::errors::RepositoryError;
use super::models::*;

/// Persistence for issued certificates and ACME account keys.
///
/// Certificates are append-only; "latest" means the highest `issued_at`.
#[async_trait]
pub trait CertificateRepository: Send + Sync {
    async fn save_certificate(
        &self,
        site_id: i32,
        issued: &IssuedCertificate,
    ) -> Result<Certificate, RepositoryError>;

    async fn find_certificate(
        &self,
        site_id: i32,
        certificate_id: i32,
    ) -> Result<Option<Certificate>, RepositoryError>;

    async fn find_latest_certificate(
        &self,
        site_id: i32,
    ) -> Result<Option<Certificate>, RepositoryError>;

    /// Newest first
    async fn list_certificates(&self, site_id: i32) -> Result<Vec<Certificate>, RepositoryError>;

    async fn load_material(
        &self,
        certificate_id: i32,
    ) -> Result<CertificateMaterial, RepositoryError>;

    /// Serialized ACME account credentials for a contact on a directory
    async fn find_acme_account(
        &self,
        email: &str,
        directory_url: &str,
    ) -> Result<Option<String>, RepositoryError>;

    async fn save_acme_account(
        &self,
        email: &str,
        directory_url: &str,
        credentials: &str,
    ) -> Result<(), RepositoryError>;
}

pub struct DefaultCertificateRepository {
    db: Arc<DbConnection>,
    vault: Arc<CredentialVault>,
}

impl DefaultCertificateRepository {
    pub fn new(db: Arc<DbConnection>, vault: Arc<CredentialVault>) -> Self {
        Self { db, vault }
    }
}

#[async_trait]
impl CertificateRepository for DefaultCertificateRepository {
    async fn save_certificate(
        &self,
        site_id: i32,
        issued: &IssuedCertificate,
    ) -> Result<Certificate, RepositoryError> {
        if issued.expires_at <= issued.issued_at {
            return Err(RepositoryError::InvalidData(format!(
                "certificate for {} expires before it was issued",
                issued.common_name
            )));
        }

        let sans = serde_json::to_string(&issued.sans)
            .map_err(|e| RepositoryError::InvalidData(e.to_string()))?;

        let model = certificates::ActiveModel {
            site_id: Set(site_id),
            common_name: Set(issued.common_name.clone()),
            sans: Set(sans),
            status: Set(CertificateStatus::Issued.as_str().to_string()),
            issued_at: Set(issued.issued_at),
            expires_at: Set(issued.expires_at),
            encrypted_cert_pem: Set(self.vault.encrypt_string(&issued.cert_pem)?),
            encrypted_key_pem: Set(self.vault.encrypt_string(&issued.key_pem)?),
            encrypted_chain_pem: Set(self.vault.encrypt_string(&issued.chain_pem)?),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;

        model.try_into()
    }

    async fn find_certificate(
        &self,
        site_id: i32,
        certificate_id: i32,
    ) -> Result<Option<Certificate>, RepositoryError> {
        certificates::Entity::find_by_id(certificate_id)
            .filter(certificates::Column::SiteId.eq(site_id))
            .one(self.db.as_ref())
            .await?
            .map(Certificate::try_from)
            .transpose()
    }

    async fn find_latest_certificate(
        &self,
        site_id: i32,
    ) -> Result<Option<Certificate>, RepositoryError> {
        certificates::Entity::find()
            .filter(certificates::Column::SiteId.eq(site_id))
            .order_by_desc(certificates::Column::IssuedAt)
            .order_by_desc(certificates::Column::Id)
            .one(self.db.as_ref())
            .await?
            .map(Certificate::try_from)
            .transpose()
    }

    async fn list_certificates(&self, site_id: i32) -> Result<Vec<Certificate>, RepositoryError> {
        certificates::Entity::find()
            .filter(certificates::Column::SiteId.eq(site_id))
            .order_by_desc(certificates::Column::IssuedAt)
            .order_by_desc(certificates::Column::Id)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(Certificate::try_from)
            .collect()
    }

    async fn load_material(
        &self,
        certificate_id: i32,
    ) -> Result<CertificateMaterial, RepositoryError> {
        let model = certificates::Entity::find_by_id(certificate_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("certificate {}", certificate_id)))?;

        Ok(CertificateMaterial {
            cert_pem: self.vault.decrypt_string(&model.encrypted_cert_pem)?,
            key_pem: self.vault.decrypt_string(&model.encrypted_key_pem)?,
            chain_pem: self.vault.decrypt_string(&model.encrypted_chain_pem)?,
        })
    }

    async fn find_acme_account(
        &self,
        email: &str,
        directory_url: &str,
    ) -> Result<Option<String>, RepositoryError> {
        let account = acme_accounts::Entity::find()
            .filter(acme_accounts::Column::Email.eq(email))
            .filter(acme_accounts::Column::DirectoryUrl.eq(directory_url))
            .one(self.db.as_ref())
            .await?;

        match account {
            Some(account) => Ok(Some(
                self.vault.decrypt_string(&account.encrypted_credentials)?,
            )),
            None => Ok(None),
        }
    }

    async fn save_acme_account(
        &self,
        email: &str,
        directory_url: &str,
        credentials: &str,
    ) -> Result<(), RepositoryError> {
        let encrypted = self.vault.encrypt_string(credentials)?;

        let existing = acme_accounts::Entity::find()
            .filter(acme_accounts::Column::Email.eq(email))
            .filter(acme_accounts::Column::DirectoryUrl.eq(directory_url))
            .one(self.db.as_ref())
            .await?;

        match existing {
            Some(account) => {
                let mut active = account.into_active_model();
                active.encrypted_credentials = Set(encrypted);
                active.update(self.db.as_ref()).await?;
            }
            None => {
                acme_accounts::ActiveModel {
                    email: Set(email.to_string()),
                    directory_url: Set(directory_url.to_string()),
                    encrypted_credentials: Set(encrypted),
                    ..Default::default()
                }
                .insert(self.db.as_ref())
                .await?;
            }
        }
        Ok(())
    }
}

pub mod test_utils {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    /// Keeps certificates and material in memory, unencrypted
    #[derive(Default)]
    pub struct MockCertificateRepository {
        certificates: Arc<RwLock<Vec<(Certificate, CertificateMaterial)>>>,
        accounts: Arc<RwLock<HashMap<(String, String), String>>>,
    }

    impl MockCertificateRepository {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl CertificateRepository for MockCertificateRepository {
        async fn save_certificate(
            &self,
            site_id: i32,
            issued: &IssuedCertificate,
        ) -> Result<Certificate, RepositoryError> {
            if issued.expires_at <= issued.issued_at {
                return Err(RepositoryError::InvalidData(
                    "certificate expires before it was issued".to_string(),
                ));
            }
            let mut certificates = self.certificates.write().await;
            let certificate = Certificate {
                id: certificates.len() as i32 + 1,
                site_id,
                common_name: issued.common_name.clone(),
                sans: issued.sans.clone(),
                status: CertificateStatus::Issued.as_str().to_string(),
                issued_at: issued.issued_at,
                expires_at: issued.expires_at,
            };
            certificates.push((
                certificate.clone(),
                CertificateMaterial {
                    cert_pem: issued.cert_pem.clone(),
                    key_pem: issued.key_pem.clone(),
                    chain_pem: issued.chain_pem.clone(),
                },
            ));
            Ok(certificate)
        }

        async fn find_certificate(
            &self,
            site_id: i32,
            certificate_id: i32,
        ) -> Result<Option<Certificate>, RepositoryError> {
            let certificates = self.certificates.read().await;
            Ok(certificates
                .iter()
                .map(|(c, _)| c)
                .find(|c| c.id == certificate_id && c.site_id == site_id)
                .cloned())
        }

        async fn find_latest_certificate(
            &self,
            site_id: i32,
        ) -> Result<Option<Certificate>, RepositoryError> {
            Ok(self.list_certificates(site_id).await?.into_iter().next())
        }

        async fn list_certificates(
            &self,
            site_id: i32,
        ) -> Result<Vec<Certificate>, RepositoryError> {
            let certificates = self.certificates.read().await;
            let mut list: Vec<Certificate> = certificates
                .iter()
                .map(|(c, _)| c)
                .filter(|c| c.site_id == site_id)
                .cloned()
                .collect();
            list.sort_by(|a, b| b.issued_at.cmp(&a.issued_at).then(b.id.cmp(&a.id)));
            Ok(list)
        }

        async fn load_material(
            &self,
            certificate_id: i32,
        ) -> Result<CertificateMaterial, RepositoryError> {
            let certificates = self.certificates.read().await;
            certificates
                .iter()
                .find(|(c, _)| c.id == certificate_id)
                .map(|(_, m)| m.clone())
                .ok_or_else(|| RepositoryError::NotFound(format!("certificate {}", certificate_id)))
        }

        async fn find_acme_account(
            &self,
            email: &str,
            directory_url: &str,
        ) -> Result<Option<String>, RepositoryError> {
            let accounts = self.accounts.read().await;
            Ok(accounts
                .get(&(email.to_string(), directory_url.to_string()))
                .cloned())
        }

        async fn save_acme_account(
            &self,
            email: &str,
            directory_url: &str,
            credentials: &str,
        ) -> Result<(), RepositoryError> {
            self.accounts.write().await.insert(
                (email.to_string(), directory_url.to_string()),
                credentials.to_string(),
            );
            Ok(())
        }
    }
}
