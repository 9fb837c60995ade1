//! Locally signed certificates for sites that do not use a public CA.

use async_trait::async_trait;
use chrono::Utc;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use tracing::info;

use super::errors::IssuerError;
use super::issuer::{certificate_expiry, certificate_names, CertificateIssuer};
use super::models::{IssueRequest, IssuedCertificate};
use crate::jobs::ProgressSink;

pub const SELF_SIGNED_VALIDITY_DAYS: i64 = 90;

#[derive(Debug, Default, Clone)]
pub struct SelfSignedIssuer;

impl SelfSignedIssuer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CertificateIssuer for SelfSignedIssuer {
    async fn issue(
        &self,
        request: &IssueRequest,
        progress: &dyn ProgressSink,
    ) -> Result<IssuedCertificate, IssuerError> {
        let names = certificate_names(&request.domain, &request.extra_sans);
        let common_name = names
            .first()
            .cloned()
            .ok_or_else(|| IssuerError::Configuration("certificate has no domain".to_string()))?;

        progress.report("generating self-signed certificate").await;

        let mut params = CertificateParams::new(names.clone())?;
        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::CommonName, common_name.clone());
        params.distinguished_name = distinguished_name;

        let now = time::OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + time::Duration::days(SELF_SIGNED_VALIDITY_DAYS);

        let key_pair = KeyPair::generate()?;
        let certificate = params.self_signed(&key_pair)?;
        let cert_pem = certificate.pem();

        let issued_at = Utc::now();
        let expires_at = certificate_expiry(&cert_pem)?;

        info!(
            "Generated self-signed certificate for {} valid until {}",
            common_name, expires_at
        );

        Ok(IssuedCertificate {
            common_name,
            sans: names,
            chain_pem: cert_pem.clone(),
            cert_pem,
            key_pem: key_pair.serialize_pem(),
            issued_at,
            expires_at,
        })
    }
}
