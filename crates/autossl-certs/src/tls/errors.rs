use autossl_core::{ServiceError, VaultError};
use thiserror::Error;

use crate::challenges::ChallengeError;
use crate::jobs::JobError;
use crate::settings::SettingsError;

#[derive(Error, Debug)]
pub enum IssuerError {
    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    Protocol(String),

    #[error(transparent)]
    Challenge(#[from] ChallengeError),

    #[error("Certificate generation error: {0}")]
    CertificateGeneration(String),

    #[error("Encryption error: {0}")]
    Vault(#[from] VaultError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Site {0} not found")]
    SiteNotFound(i32),

    #[error("An issuance for site {0} is already in progress")]
    IssuanceInProgress(i32),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<instant_acme::Error> for IssuerError {
    fn from(err: instant_acme::Error) -> Self {
        IssuerError::Protocol(format!("ACME error: {}", err))
    }
}

impl From<rcgen::Error> for IssuerError {
    fn from(err: rcgen::Error) -> Self {
        IssuerError::CertificateGeneration(err.to_string())
    }
}

impl From<SettingsError> for IssuerError {
    fn from(err: SettingsError) -> Self {
        match err {
            SettingsError::Validation(msg) => IssuerError::Configuration(msg),
            other => IssuerError::Internal(other.to_string()),
        }
    }
}

impl From<ServiceError> for IssuerError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Configuration { message } | ServiceError::Validation { message } => {
                IssuerError::Configuration(message)
            }
            other => IssuerError::Internal(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Encryption error: {0}")]
    Vault(#[from] VaultError),
}

impl From<sea_orm::DbErr> for RepositoryError {
    fn from(err: sea_orm::DbErr) -> Self {
        match err {
            sea_orm::DbErr::RecordNotFound(msg) => RepositoryError::NotFound(msg),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}
