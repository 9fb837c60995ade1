pub mod acme;
pub mod errors;
pub mod issuer;
pub mod models;
pub mod repository;
pub mod self_signed;
pub mod service;

pub use acme::AcmeIssuer;
pub use errors::{IssuerError, RepositoryError};
pub use issuer::{certificate_expiry, certificate_names, CertificateIssuer};
pub use models::{
    Certificate, CertificateMaterial, CertificateSource, CertificateStatus, ChallengePlan,
    IssueRequest, IssuedCertificate,
};
pub use repository::{CertificateRepository, DefaultCertificateRepository};
pub use self_signed::SelfSignedIssuer;
pub use service::{CertificateService, IssueOutcome, SiteLocks};
