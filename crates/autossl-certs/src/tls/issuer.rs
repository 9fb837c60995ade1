use async_trait::async_trait;
use autossl_core::UtcDateTime;
use chrono::{TimeZone, Utc};

use super::errors::IssuerError;
use super::models::{IssueRequest, IssuedCertificate};
use crate::jobs::ProgressSink;

#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    async fn issue(
        &self,
        request: &IssueRequest,
        progress: &dyn ProgressSink,
    ) -> Result<IssuedCertificate, IssuerError>;
}

/// `[domain] ++ extra_sans`, normalized and deduplicated in order.
pub fn certificate_names(domain: &str, extra_sans: &[String]) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(extra_sans.len() + 1);
    for name in std::iter::once(domain).chain(extra_sans.iter().map(String::as_str)) {
        let name = name.trim().to_lowercase();
        let name = name.strip_suffix('.').unwrap_or(&name).to_string();
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// notAfter of the first certificate in `pem`
pub fn certificate_expiry(pem: &str) -> Result<UtcDateTime, IssuerError> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(pem.as_bytes()).map_err(|e| {
        IssuerError::CertificateGeneration(format!("Failed to parse PEM: {}", e))
    })?;
    let x509 = pem.parse_x509().map_err(|e| {
        IssuerError::CertificateGeneration(format!("Failed to parse X509: {}", e))
    })?;

    Utc.timestamp_opt(x509.validity().not_after.timestamp(), 0)
        .single()
        .ok_or_else(|| {
            IssuerError::CertificateGeneration("Invalid expiration timestamp".to_string())
        })
}
