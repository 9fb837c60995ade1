use autossl_core::UtcDateTime;
use autossl_entities::certificates;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use super::errors::RepositoryError;
use crate::challenges::DnsCredential;
use crate::settings::AcmeSettings;

/// Where a site's certificates come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum CertificateSource {
    #[serde(rename = "letsencrypt")]
    LetsEncrypt,
    #[serde(rename = "self_signed")]
    SelfSigned,
}

impl CertificateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateSource::LetsEncrypt => "letsencrypt",
            CertificateSource::SelfSigned => "self_signed",
        }
    }
}

impl fmt::Display for CertificateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertificateSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "letsencrypt" => Ok(CertificateSource::LetsEncrypt),
            "self_signed" => Ok(CertificateSource::SelfSigned),
            other => Err(format!("unknown certificate source '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateStatus {
    Issued,
}

impl CertificateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateStatus::Issued => "issued",
        }
    }
}

/// How the CA should be convinced of domain control
#[derive(Debug, Clone)]
pub enum ChallengePlan {
    Http01,
    Dns01 { credential: DnsCredential },
}

#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub domain: String,
    pub extra_sans: Vec<String>,
    pub acme: AcmeSettings,
    pub challenge: ChallengePlan,
}

impl IssueRequest {
    pub fn new(domain: impl Into<String>, acme: AcmeSettings, challenge: ChallengePlan) -> Self {
        Self {
            domain: domain.into(),
            extra_sans: Vec::new(),
            acme,
            challenge,
        }
    }
}

/// Plaintext issuance result, encrypted before it is stored
#[derive(Clone)]
pub struct IssuedCertificate {
    pub common_name: String,
    pub sans: Vec<String>,
    pub cert_pem: String,
    pub key_pem: String,
    pub chain_pem: String,
    pub issued_at: UtcDateTime,
    pub expires_at: UtcDateTime,
}

impl fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("common_name", &self.common_name)
            .field("sans", &self.sans)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Certificate summary; PEM material is never part of it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub id: i32,
    pub site_id: i32,
    pub common_name: String,
    pub sans: Vec<String>,
    pub status: String,
    #[schema(value_type = String, format = DateTime)]
    pub issued_at: UtcDateTime,
    #[schema(value_type = String, format = DateTime)]
    pub expires_at: UtcDateTime,
}

impl TryFrom<certificates::Model> for Certificate {
    type Error = RepositoryError;

    fn try_from(model: certificates::Model) -> Result<Self, Self::Error> {
        let sans: Vec<String> = serde_json::from_str(&model.sans).map_err(|e| {
            RepositoryError::InvalidData(format!(
                "certificate {} has malformed SANs: {}",
                model.id, e
            ))
        })?;
        Ok(Certificate {
            id: model.id,
            site_id: model.site_id,
            common_name: model.common_name,
            sans,
            status: model.status,
            issued_at: model.issued_at,
            expires_at: model.expires_at,
        })
    }
}

/// Decrypted PEM material of a stored certificate
#[derive(Clone)]
pub struct CertificateMaterial {
    pub cert_pem: String,
    pub key_pem: String,
    pub chain_pem: String,
}

impl fmt::Debug for CertificateMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateMaterial").finish_non_exhaustive()
    }
}
