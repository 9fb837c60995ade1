//! Core utilities and types shared across all AutoSSL crates

pub mod config;
pub mod domain;
pub mod error;
pub mod error_builder;
pub mod problemdetails;
pub mod types;
mod vault;

// Re-export commonly used types
pub use config::*;
pub use domain::{apex_domain, normalize_domain};
pub use error::*;
pub use error_builder::*;
pub use problemdetails::ProblemDetails;
pub use types::*;
pub use vault::{CredentialVault, VaultError};

// Re-export external dependencies
pub use anyhow;
pub use async_trait;
pub use chrono;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tokio;
pub use tracing;
