//! sea-orm entities for the AutoSSL schema

pub mod acme_accounts;
pub mod certificates;
pub mod deployments;
pub mod domain_settings;
pub mod jobs;
pub mod provider_credentials;
pub mod sites;
pub mod tenant_settings;
pub mod tenants;
