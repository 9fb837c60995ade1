use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::coordinator::{ChallengeCoordinator, DnsCredential};
use super::{ChallengeError, ChallengeType};
use crate::jobs::ProgressSink;

/// One authorization's proof as handed out by the CA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeProof {
    pub domain: String,
    pub token: String,
    pub key_authorization: String,
}

/// Makes a proof visible to the CA and removes it afterwards
#[async_trait]
pub trait ChallengeProvisioner: Send + Sync {
    fn challenge_type(&self) -> ChallengeType;

    async fn provision(
        &self,
        proof: &ChallengeProof,
        progress: &dyn ProgressSink,
    ) -> Result<(), ChallengeError>;

    /// Best effort; never fails the surrounding flow.
    async fn teardown(&self, proof: &ChallengeProof);
}

/// TXT value for a DNS-01 key authorization: base64url(sha256(key_auth))
pub fn dns_txt_value(key_authorization: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(key_authorization.as_bytes()))
}

/// Serves proofs from the well-known endpoint of this process
pub struct HttpChallengeProvisioner {
    coordinator: Arc<ChallengeCoordinator>,
    local_verify_port: Option<u16>,
    client: Client,
}

impl HttpChallengeProvisioner {
    pub fn new(coordinator: Arc<ChallengeCoordinator>) -> Self {
        Self {
            coordinator,
            local_verify_port: None,
            client: Client::new(),
        }
    }

    /// Fetches every token through `http://<domain>:<port>` before the CA is asked to validate.
    pub fn with_local_verification(mut self, port: u16) -> Result<Self, ChallengeError> {
        self.client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ChallengeError::LocalVerification(e.to_string()))?;
        self.local_verify_port = Some(port);
        Ok(self)
    }

    fn verification_url(domain: &str, port: u16, token: &str) -> String {
        if port == 80 {
            format!("http://{}/.well-known/acme-challenge/{}", domain, token)
        } else {
            format!("http://{}:{}/.well-known/acme-challenge/{}", domain, port, token)
        }
    }

    async fn verify_locally(&self, proof: &ChallengeProof, port: u16) -> Result<(), ChallengeError> {
        let url = Self::verification_url(&proof.domain, port, &proof.token);
        debug!("Checking HTTP-01 token at {}", url);

        let unreachable = |detail: String| {
            ChallengeError::LocalVerification(format!(
                "HTTP-01 pre-check for {} failed ({}): make sure port {} is reachable and \
                 /.well-known/acme-challenge/ is routed to this service",
                proof.domain, detail, port
            ))
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(unreachable(format!("status {}", status.as_u16())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        if body.trim() != proof.key_authorization {
            return Err(unreachable(
                "response did not match the key authorization".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ChallengeProvisioner for HttpChallengeProvisioner {
    fn challenge_type(&self) -> ChallengeType {
        ChallengeType::Http01
    }

    async fn provision(
        &self,
        proof: &ChallengeProof,
        _progress: &dyn ProgressSink,
    ) -> Result<(), ChallengeError> {
        self.coordinator
            .set_http_challenge(&proof.token, &proof.key_authorization)
            .await;

        if let Some(port) = self.local_verify_port {
            self.verify_locally(proof, port).await?;
        }
        Ok(())
    }

    async fn teardown(&self, proof: &ChallengeProof) {
        self.coordinator.remove_http_challenge(&proof.token).await;
    }
}

/// Publishes proofs as TXT records through the tenant's DNS provider
pub struct DnsChallengeProvisioner {
    coordinator: Arc<ChallengeCoordinator>,
    credential: DnsCredential,
    ttl: u32,
    wait_seconds: u64,
}

impl DnsChallengeProvisioner {
    pub fn new(
        coordinator: Arc<ChallengeCoordinator>,
        credential: DnsCredential,
        ttl: u32,
        wait_seconds: u64,
    ) -> Self {
        Self {
            coordinator,
            credential,
            ttl,
            wait_seconds,
        }
    }
}

#[async_trait]
impl ChallengeProvisioner for DnsChallengeProvisioner {
    fn challenge_type(&self) -> ChallengeType {
        ChallengeType::Dns01
    }

    async fn provision(
        &self,
        proof: &ChallengeProof,
        progress: &dyn ProgressSink,
    ) -> Result<(), ChallengeError> {
        let value = dns_txt_value(&proof.key_authorization);
        self.coordinator
            .create_dns_challenge(&proof.token, &proof.domain, &value, &self.credential, self.ttl)
            .await?;

        progress.report("waiting for DNS propagation").await;
        info!(
            "Waiting {}s for the DNS-01 record of {} to propagate",
            self.wait_seconds, proof.domain
        );
        ChallengeCoordinator::wait_for_propagation(self.wait_seconds).await;
        Ok(())
    }

    async fn teardown(&self, proof: &ChallengeProof) {
        self.coordinator.remove_dns_challenge(&proof.token).await;
    }
}
