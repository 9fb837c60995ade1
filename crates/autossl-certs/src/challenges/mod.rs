//! ACME challenge proofs: storage, DNS record plumbing and provisioning.

mod coordinator;
mod provisioner;
mod store;

pub use coordinator::{ChallengeCoordinator, DnsCredential};
pub use provisioner::{
    dns_txt_value, ChallengeProof, ChallengeProvisioner, DnsChallengeProvisioner,
    HttpChallengeProvisioner,
};
pub use store::{
    DnsChallengeRecord, DnsRecordRef, DnsRecordStore, HttpChallengeStore, InMemoryDnsRecordStore,
    InMemoryHttpChallengeStore,
};

use autossl_providers::ProviderError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Error, Debug)]
pub enum ChallengeError {
    #[error("No DNS zone matches {0}")]
    ZoneNotFound(String),

    #[error("DNS provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("{0}")]
    LocalVerification(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum ChallengeType {
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "dns-01")]
    Dns01,
}

impl ChallengeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeType::Http01 => "http-01",
            ChallengeType::Dns01 => "dns-01",
        }
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http-01" => Ok(ChallengeType::Http01),
            "dns-01" => Ok(ChallengeType::Dns01),
            other => Err(format!("unknown challenge type '{}'", other)),
        }
    }
}
