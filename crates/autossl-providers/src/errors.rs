use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} API error ({code}): {message}")]
    Api {
        provider: &'static str,
        code: String,
        message: String,
    },

    #[error("Invalid response from {provider}: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },

    #[error("Invalid provider config: {0}")]
    InvalidConfig(String),

    #[error("No DNS zone found for {0}")]
    ZoneNotFound(String),

    #[error("Provider type {0} does not support {1}")]
    Unsupported(String, &'static str),

    #[error("Request signing failed: {0}")]
    Signing(String),
}
