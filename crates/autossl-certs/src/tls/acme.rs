//! ACME issuance through instant-acme.

use async_trait::async_trait;
use chrono::Utc;
use instant_acme::{
    Account, AccountCredentials, Authorization, AuthorizationStatus, Challenge,
    ChallengeType as AcmeChallengeType, Identifier, NewAccount, NewOrder, Order, OrderStatus,
};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::errors::IssuerError;
use super::issuer::{certificate_expiry, certificate_names, CertificateIssuer};
use super::models::{ChallengePlan, IssueRequest, IssuedCertificate};
use super::repository::CertificateRepository;
use crate::challenges::{
    ChallengeCoordinator, ChallengeProof, ChallengeProvisioner, ChallengeType,
    DnsChallengeProvisioner, HttpChallengeProvisioner,
};
use crate::jobs::ProgressSink;

const PLACEHOLDER_EMAIL_DOMAINS: [&str; 3] = ["example.com", "example.net", "example.org"];
const PLACEHOLDER_EMAIL_USERS: [&str; 3] = ["you", "user", "test"];

const ORDER_POLL_ATTEMPTS: u32 = 6;
const ORDER_POLL_BASE: Duration = Duration::from_secs(1);
const ORDER_POLL_MAX: Duration = Duration::from_secs(30);
const CERTIFICATE_POLL_ATTEMPTS: u32 = 10;

/// Rejects missing contact addresses and the usual documentation placeholders.
pub fn validate_account_email(email: Option<&str>) -> Result<String, IssuerError> {
    let email = email.map(str::trim).filter(|e| !e.is_empty()).ok_or_else(|| {
        IssuerError::Configuration(
            "an ACME account email is required: set ACME_ACCOUNT_EMAIL or the tenant's acmeAccountEmail"
                .to_string(),
        )
    })?;

    let (user, domain) = email.rsplit_once('@').ok_or_else(|| {
        IssuerError::Configuration(format!("'{}' is not a valid ACME account email", email))
    })?;
    let user = user.to_lowercase();
    let domain = domain.to_lowercase();

    let placeholder = user.is_empty()
        || domain.is_empty()
        || PLACEHOLDER_EMAIL_DOMAINS.contains(&domain.as_str())
        || domain == "invalid"
        || domain.ends_with(".invalid")
        || PLACEHOLDER_EMAIL_USERS.contains(&user.as_str());
    if placeholder {
        return Err(IssuerError::Configuration(format!(
            "'{}' looks like a placeholder; ACME needs a real contact email",
            email
        )));
    }
    Ok(email.to_string())
}

/// Message for a challenge the CA marked invalid
pub fn describe_challenge_failure(
    domain: &str,
    challenge_type: ChallengeType,
    detail: &str,
) -> String {
    if challenge_type == ChallengeType::Http01 && detail.contains("404") {
        return format!(
            "HTTP-01 validation for {} failed with 404: make sure port 80 is reachable and \
             /.well-known/acme-challenge/ is routed to this service",
            domain
        );
    }
    format!("{} validation for {} failed: {}", challenge_type, domain, detail)
}

fn acme_challenge_type(challenge_type: ChallengeType) -> AcmeChallengeType {
    match challenge_type {
        ChallengeType::Http01 => AcmeChallengeType::Http01,
        ChallengeType::Dns01 => AcmeChallengeType::Dns01,
    }
}

fn identifier_name(identifier: &Identifier) -> Result<String, IssuerError> {
    match identifier {
        Identifier::Dns(name) => Ok(name.clone()),
        #[allow(unreachable_patterns)]
        _ => Err(IssuerError::Protocol(
            "ACME authorization is not for a DNS identifier".to_string(),
        )),
    }
}

/// The order operations issuance needs from the CA
#[async_trait]
pub trait AcmeOrder: Send {
    fn status(&mut self) -> OrderStatus;

    async fn authorizations(&mut self) -> Result<Vec<Authorization>, IssuerError>;

    fn key_authorization(&self, challenge: &Challenge) -> String;

    async fn set_challenge_ready(&mut self, url: &str) -> Result<(), IssuerError>;

    /// Re-reads the order and returns its new status.
    async fn refresh(&mut self) -> Result<OrderStatus, IssuerError>;

    async fn finalize(&mut self, csr_der: &[u8]) -> Result<(), IssuerError>;

    /// The PEM chain once the CA has issued it
    async fn certificate(&mut self) -> Result<Option<String>, IssuerError>;
}

#[async_trait]
impl AcmeOrder for Order {
    fn status(&mut self) -> OrderStatus {
        self.state().status
    }

    async fn authorizations(&mut self) -> Result<Vec<Authorization>, IssuerError> {
        Ok(Order::authorizations(self).await?)
    }

    fn key_authorization(&self, challenge: &Challenge) -> String {
        Order::key_authorization(self, challenge).as_str().to_string()
    }

    async fn set_challenge_ready(&mut self, url: &str) -> Result<(), IssuerError> {
        Ok(Order::set_challenge_ready(self, url).await?)
    }

    async fn refresh(&mut self) -> Result<OrderStatus, IssuerError> {
        Ok(Order::refresh(self).await?.status)
    }

    async fn finalize(&mut self, csr_der: &[u8]) -> Result<(), IssuerError> {
        Ok(Order::finalize(self, csr_der).await?)
    }

    async fn certificate(&mut self) -> Result<Option<String>, IssuerError> {
        Ok(Order::certificate(self).await?)
    }
}

pub struct AcmeIssuer {
    repository: Arc<dyn CertificateRepository>,
    coordinator: Arc<ChallengeCoordinator>,
    poll_interval: Duration,
}

impl AcmeIssuer {
    pub fn new(
        repository: Arc<dyn CertificateRepository>,
        coordinator: Arc<ChallengeCoordinator>,
    ) -> Self {
        Self {
            repository,
            coordinator,
            poll_interval: ORDER_POLL_BASE,
        }
    }

    /// First delay of the order and certificate polls; order polls double it up to 30s.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn provisioner(
        &self,
        request: &IssueRequest,
    ) -> Result<Box<dyn ChallengeProvisioner>, IssuerError> {
        match &request.challenge {
            ChallengePlan::Http01 => {
                let provisioner = HttpChallengeProvisioner::new(self.coordinator.clone());
                if request.acme.skip_local_verify {
                    Ok(Box::new(provisioner))
                } else {
                    Ok(Box::new(provisioner.with_local_verification(
                        request.acme.local_verify_port,
                    )?))
                }
            }
            ChallengePlan::Dns01 { credential } => Ok(Box::new(DnsChallengeProvisioner::new(
                self.coordinator.clone(),
                credential.clone(),
                request.acme.dns_ttl,
                request.acme.dns_wait_seconds,
            ))),
        }
    }

    async fn account(&self, email: &str, directory_url: &str) -> Result<Account, IssuerError> {
        if let Some(stored) = self
            .repository
            .find_acme_account(email, directory_url)
            .await?
        {
            debug!("Reusing ACME account for {} at {}", email, directory_url);
            let credentials: AccountCredentials = serde_json::from_str(&stored).map_err(|e| {
                IssuerError::Internal(format!("stored ACME account is unreadable: {}", e))
            })?;
            return Ok(Account::from_credentials(credentials).await?);
        }

        info!("Registering ACME account for {} at {}", email, directory_url);
        let contact = format!("mailto:{}", email);
        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &[contact.as_str()],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            directory_url,
            None,
        )
        .await?;

        let serialized = serde_json::to_string(&credentials).map_err(|e| {
            IssuerError::Internal(format!("failed to serialize ACME account: {}", e))
        })?;
        self.repository
            .save_acme_account(email, directory_url, &serialized)
            .await?;
        Ok(account)
    }

    /// Provisions every pending authorization and waits for the order to become ready.
    /// Proofs are appended to `provisioned` before they are published.
    async fn authorize(
        &self,
        order: &mut dyn AcmeOrder,
        provisioner: &dyn ChallengeProvisioner,
        progress: &dyn ProgressSink,
        provisioned: &mut Vec<ChallengeProof>,
    ) -> Result<(), IssuerError> {
        let challenge_type = provisioner.challenge_type();
        let wanted = acme_challenge_type(challenge_type);
        let authorizations = order.authorizations().await?;

        progress
            .report(match challenge_type {
                ChallengeType::Http01 => "provisioning http-01 challenge",
                ChallengeType::Dns01 => "writing DNS TXT record",
            })
            .await;

        let mut ready_urls = Vec::new();
        for authorization in &authorizations {
            let domain = identifier_name(&authorization.identifier)?;
            match authorization.status {
                AuthorizationStatus::Pending => {}
                AuthorizationStatus::Valid => continue,
                other => {
                    return Err(IssuerError::Protocol(format!(
                        "authorization for {} is {:?}",
                        domain, other
                    )))
                }
            }

            let challenge = authorization
                .challenges
                .iter()
                .find(|c| c.r#type == wanted)
                .ok_or_else(|| {
                    IssuerError::Protocol(format!(
                        "the CA offered no {} challenge for {}",
                        challenge_type, domain
                    ))
                })?;

            let proof = ChallengeProof {
                domain,
                token: challenge.token.clone(),
                key_authorization: order.key_authorization(challenge),
            };
            provisioned.push(proof.clone());
            provisioner.provision(&proof, progress).await?;
            ready_urls.push(challenge.url.clone());
        }

        progress.report("validating challenge").await;
        for url in &ready_urls {
            order.set_challenge_ready(url).await?;
        }

        self.wait_for_order_ready(order, challenge_type).await
    }

    async fn wait_for_order_ready(
        &self,
        order: &mut dyn AcmeOrder,
        challenge_type: ChallengeType,
    ) -> Result<(), IssuerError> {
        for attempt in 1..=ORDER_POLL_ATTEMPTS {
            // 1s, 2s, 4s, 8s, 16s, 30s
            let delay = self
                .poll_interval
                .saturating_mul(2u32.pow(attempt - 1))
                .min(ORDER_POLL_MAX);
            tokio::time::sleep(delay).await;

            let status = order.refresh().await?;
            match status {
                OrderStatus::Ready | OrderStatus::Valid => {
                    info!("Order ready after {} attempt(s)", attempt);
                    return Ok(());
                }
                OrderStatus::Invalid => {
                    let message = Self::diagnose(order, challenge_type).await;
                    error!("{}", message);
                    return Err(IssuerError::Protocol(message));
                }
                _ => debug!(
                    "Order not ready yet (attempt {}/{})",
                    attempt, ORDER_POLL_ATTEMPTS
                ),
            }
        }

        Err(IssuerError::Protocol(format!(
            "ACME order was not ready after {} attempts",
            ORDER_POLL_ATTEMPTS
        )))
    }

    async fn diagnose(order: &mut dyn AcmeOrder, challenge_type: ChallengeType) -> String {
        let wanted = acme_challenge_type(challenge_type);
        let authorizations = match order.authorizations().await {
            Ok(authorizations) => authorizations,
            Err(e) => return format!("ACME order is invalid: {}", e),
        };

        for authorization in &authorizations {
            let Ok(domain) = identifier_name(&authorization.identifier) else {
                continue;
            };
            let failed = authorization
                .challenges
                .iter()
                .filter(|c| c.r#type == wanted)
                .find_map(|c| c.error.as_ref());
            if let Some(problem) = failed {
                let detail = problem.detail.as_deref().unwrap_or("no detail given");
                return describe_challenge_failure(&domain, challenge_type, detail);
            }
        }
        "ACME order is invalid".to_string()
    }

    async fn finalize(
        &self,
        order: &mut dyn AcmeOrder,
        names: &[String],
    ) -> Result<(String, String), IssuerError> {
        let mut params = CertificateParams::new(names.to_vec())?;
        let mut distinguished_name = DistinguishedName::new();
        if let Some(common_name) = names.first() {
            distinguished_name.push(DnType::CommonName, common_name.clone());
        }
        params.distinguished_name = distinguished_name;

        let key_pair = KeyPair::generate()?;
        let csr = params.serialize_request(&key_pair)?;
        order.finalize(csr.der()).await?;

        for _ in 0..CERTIFICATE_POLL_ATTEMPTS {
            if let Some(chain) = order.certificate().await? {
                return Ok((chain, key_pair.serialize_pem()));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        Err(IssuerError::Protocol(
            "the CA did not deliver the certificate in time".to_string(),
        ))
    }

    /// Authorizes the order unless the CA already considers it ready, then
    /// finalizes it. Every proof that was provisioned is torn down either way.
    async fn complete_order(
        &self,
        order: &mut dyn AcmeOrder,
        names: &[String],
        provisioner: &dyn ChallengeProvisioner,
        progress: &dyn ProgressSink,
    ) -> Result<IssuedCertificate, IssuerError> {
        let common_name = names
            .first()
            .cloned()
            .ok_or_else(|| IssuerError::Configuration("certificate has no domain".to_string()))?;

        let mut provisioned = Vec::new();
        let authorized = if order.status() == OrderStatus::Ready {
            debug!("Order for {} is already authorized", common_name);
            Ok(())
        } else {
            self.authorize(order, provisioner, progress, &mut provisioned)
                .await
        };

        for proof in &provisioned {
            provisioner.teardown(proof).await;
        }
        authorized?;

        progress.report("finalizing order").await;
        let (chain_pem, key_pem) = self.finalize(order, names).await?;
        let expires_at = certificate_expiry(&chain_pem)?;

        info!(
            "Issued certificate for {} valid until {}",
            common_name, expires_at
        );
        Ok(IssuedCertificate {
            common_name,
            sans: names.to_vec(),
            cert_pem: chain_pem.clone(),
            chain_pem,
            key_pem,
            issued_at: Utc::now(),
            expires_at,
        })
    }
}

#[async_trait]
impl CertificateIssuer for AcmeIssuer {
    async fn issue(
        &self,
        request: &IssueRequest,
        progress: &dyn ProgressSink,
    ) -> Result<IssuedCertificate, IssuerError> {
        let email = validate_account_email(request.acme.account_email.as_deref())?;
        let names = certificate_names(&request.domain, &request.extra_sans);
        if names.is_empty() {
            return Err(IssuerError::Configuration(
                "certificate has no domain".to_string(),
            ));
        }
        let provisioner = self.provisioner(request)?;

        progress.report("preparing ACME account").await;
        let account = self.account(&email, &request.acme.directory_url).await?;

        progress.report("creating order").await;
        let identifiers: Vec<Identifier> =
            names.iter().map(|n| Identifier::Dns(n.clone())).collect();
        let mut order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await?;
        info!("Created ACME order {} for {}", order.url(), request.domain);

        self.complete_order(&mut order, &names, provisioner.as_ref(), progress)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenges::{
        ChallengeError, DnsCredential, InMemoryDnsRecordStore, InMemoryHttpChallengeStore,
    };
    use crate::settings::AcmeSettings;
    use crate::testing::RecordingProgress;
    use crate::tls::repository::test_utils::MockCertificateRepository;
    use autossl_providers::test_utils::{MockDnsProvider, MockDnsProviderFactory};
    use autossl_providers::ProviderType;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Instant;

    fn coordinator(provider: Arc<MockDnsProvider>) -> Arc<ChallengeCoordinator> {
        Arc::new(ChallengeCoordinator::new(
            Arc::new(InMemoryHttpChallengeStore::new()),
            Arc::new(InMemoryDnsRecordStore::new()),
            Arc::new(MockDnsProviderFactory::new(provider)),
        ))
    }

    fn issuer() -> AcmeIssuer {
        AcmeIssuer::new(
            Arc::new(MockCertificateRepository::new()),
            coordinator(Arc::new(MockDnsProvider::default())),
        )
        .with_poll_interval(Duration::from_millis(1))
    }

    type Log = Arc<Mutex<Vec<String>>>;

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    fn challenge_url(kind: &str, domain: &str) -> String {
        format!("https://ca.test/chall/{}/{}", kind, domain)
    }

    /// Pending authorization offering both challenge types; `error` is set on the http-01 one
    fn authorization(domain: &str, status: &str, error: Option<&str>) -> serde_json::Value {
        let mut http = json!({
            "type": "http-01",
            "url": challenge_url("http-01", domain),
            "token": format!("tok-{}", domain),
            "status": "pending"
        });
        if let Some(detail) = error {
            http["status"] = json!("invalid");
            http["error"] = json!({
                "type": "urn:ietf:params:acme:error:unauthorized",
                "detail": detail,
                "status": 403
            });
        }
        json!({
            "identifier": {"type": "dns", "value": domain},
            "status": status,
            "challenges": [
                http,
                {
                    "type": "dns-01",
                    "url": challenge_url("dns-01", domain),
                    "token": format!("tok-{}", domain),
                    "status": "pending"
                }
            ]
        })
    }

    /// Order whose CA answers are scripted; every call lands in `log`
    struct ScriptedOrder {
        status: OrderStatus,
        authorizations: Vec<serde_json::Value>,
        refreshes: VecDeque<OrderStatus>,
        log: Log,
        dns: Option<Arc<MockDnsProvider>>,
        ready_at: Option<Instant>,
        chain: String,
    }

    impl ScriptedOrder {
        fn new(status: OrderStatus, authorizations: Vec<serde_json::Value>, log: Log) -> Self {
            let certified = rcgen::generate_simple_self_signed(vec![
                "cdn.example.com".to_string(),
                "www.example.com".to_string(),
            ])
            .unwrap();
            Self {
                status,
                authorizations,
                refreshes: VecDeque::from([OrderStatus::Pending, OrderStatus::Ready]),
                log,
                dns: None,
                ready_at: None,
                chain: certified.cert.pem(),
            }
        }

        fn refreshing_to(mut self, statuses: &[OrderStatus]) -> Self {
            self.refreshes = statuses.iter().copied().collect();
            self
        }

        fn watching_dns(mut self, provider: Arc<MockDnsProvider>) -> Self {
            self.dns = Some(provider);
            self
        }

        fn record(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }
    }

    #[async_trait]
    impl AcmeOrder for ScriptedOrder {
        fn status(&mut self) -> OrderStatus {
            self.status
        }

        async fn authorizations(&mut self) -> Result<Vec<Authorization>, IssuerError> {
            self.record("authorizations".to_string());
            Ok(self
                .authorizations
                .iter()
                .map(|a| serde_json::from_value(a.clone()).unwrap())
                .collect())
        }

        fn key_authorization(&self, challenge: &Challenge) -> String {
            format!("{}.thumbprint", challenge.token)
        }

        async fn set_challenge_ready(&mut self, url: &str) -> Result<(), IssuerError> {
            self.ready_at.get_or_insert_with(Instant::now);
            match &self.dns {
                Some(provider) => {
                    let published = provider.records().await.len();
                    self.record(format!("ready {} txt={}", url, published));
                }
                None => self.record(format!("ready {}", url)),
            }
            Ok(())
        }

        async fn refresh(&mut self) -> Result<OrderStatus, IssuerError> {
            self.record("refresh".to_string());
            if self.refreshes.len() > 1 {
                if let Some(status) = self.refreshes.pop_front() {
                    self.status = status;
                }
            } else if let Some(status) = self.refreshes.front() {
                self.status = *status;
            }
            Ok(self.status)
        }

        async fn finalize(&mut self, _csr_der: &[u8]) -> Result<(), IssuerError> {
            self.record("finalize".to_string());
            self.status = OrderStatus::Valid;
            Ok(())
        }

        async fn certificate(&mut self) -> Result<Option<String>, IssuerError> {
            self.record("certificate".to_string());
            Ok(Some(self.chain.clone()))
        }
    }

    /// Provisioner that logs proofs and can refuse one domain
    struct RecordingProvisioner {
        challenge_type: ChallengeType,
        log: Log,
        fail_for: Option<String>,
    }

    impl RecordingProvisioner {
        fn new(challenge_type: ChallengeType, log: Log) -> Self {
            Self {
                challenge_type,
                log,
                fail_for: None,
            }
        }
    }

    #[async_trait]
    impl ChallengeProvisioner for RecordingProvisioner {
        fn challenge_type(&self) -> ChallengeType {
            self.challenge_type
        }

        async fn provision(
            &self,
            proof: &ChallengeProof,
            _progress: &dyn ProgressSink,
        ) -> Result<(), ChallengeError> {
            self.log.lock().unwrap().push(format!(
                "provision {} {}",
                proof.domain, proof.key_authorization
            ));
            if self.fail_for.as_deref() == Some(proof.domain.as_str()) {
                return Err(ChallengeError::ZoneNotFound(proof.domain.clone()));
            }
            Ok(())
        }

        async fn teardown(&self, proof: &ChallengeProof) {
            self.log
                .lock()
                .unwrap()
                .push(format!("teardown {}", proof.domain));
        }
    }

    fn names() -> Vec<String> {
        vec!["cdn.example.com".to_string(), "www.example.com".to_string()]
    }

    #[test]
    fn test_placeholder_emails_rejected() {
        for email in [
            "admin@example.com",
            "ops@EXAMPLE.org",
            "certs@example.net",
            "certs@mail.invalid",
            "you@company.cn",
            "test@company.cn",
            "not-an-email",
        ] {
            assert!(
                matches!(
                    validate_account_email(Some(email)),
                    Err(IssuerError::Configuration(_))
                ),
                "{} should be rejected",
                email
            );
        }
        assert!(validate_account_email(None).is_err());
        assert!(validate_account_email(Some("  ")).is_err());
        assert_eq!(
            validate_account_email(Some(" ops@autossl.dev ")).unwrap(),
            "ops@autossl.dev"
        );
    }

    #[test]
    fn test_http_404_failure_is_rewritten() {
        let message = describe_challenge_failure(
            "cdn.example.com",
            ChallengeType::Http01,
            "Invalid response from http://cdn.example.com/.well-known/acme-challenge/abc: 404",
        );
        assert_eq!(
            message,
            "HTTP-01 validation for cdn.example.com failed with 404: make sure port 80 is \
             reachable and /.well-known/acme-challenge/ is routed to this service"
        );

        let message =
            describe_challenge_failure("cdn.example.com", ChallengeType::Dns01, "NXDOMAIN 404");
        assert!(message.starts_with("dns-01 validation for cdn.example.com failed"));
    }

    #[tokio::test]
    async fn test_placeholder_email_fails_before_network() {
        let acme = AcmeSettings {
            account_email: Some("admin@example.com".to_string()),
            // unroutable; reaching it would fail with a protocol error instead
            directory_url: "http://127.0.0.1:1/directory".to_string(),
            ..Default::default()
        };
        let request = IssueRequest::new("cdn.example.com", acme, ChallengePlan::Http01);
        let progress = RecordingProgress::default();

        let err = issuer().issue(&request, &progress).await.unwrap_err();
        assert!(matches!(err, IssuerError::Configuration(_)));
        assert!(progress.messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_order_flow_provisions_then_marks_ready() {
        let log: Log = Arc::default();
        let mut order = ScriptedOrder::new(
            OrderStatus::Pending,
            vec![
                authorization("cdn.example.com", "pending", None),
                authorization("www.example.com", "pending", None),
                authorization("img.example.com", "valid", None),
            ],
            log.clone(),
        );
        let provisioner = RecordingProvisioner::new(ChallengeType::Http01, log.clone());
        let progress = RecordingProgress::default();

        let issued = issuer()
            .complete_order(&mut order, &names(), &provisioner, &progress)
            .await
            .unwrap();

        assert_eq!(
            entries(&log),
            vec![
                "authorizations".to_string(),
                "provision cdn.example.com tok-cdn.example.com.thumbprint".to_string(),
                "provision www.example.com tok-www.example.com.thumbprint".to_string(),
                format!("ready {}", challenge_url("http-01", "cdn.example.com")),
                format!("ready {}", challenge_url("http-01", "www.example.com")),
                "refresh".to_string(),
                "refresh".to_string(),
                "teardown cdn.example.com".to_string(),
                "teardown www.example.com".to_string(),
                "finalize".to_string(),
                "certificate".to_string(),
            ]
        );
        assert_eq!(issued.common_name, "cdn.example.com");
        assert_eq!(issued.sans, names());
        assert!(issued.key_pem.contains("PRIVATE KEY"));
        assert!(issued.expires_at > Utc::now());
        assert_eq!(
            progress.messages().await,
            vec![
                "provisioning http-01 challenge",
                "validating challenge",
                "finalizing order"
            ]
        );
    }

    #[tokio::test]
    async fn test_ready_order_skips_authorization() {
        let log: Log = Arc::default();
        let mut order = ScriptedOrder::new(
            OrderStatus::Ready,
            vec![authorization("cdn.example.com", "pending", None)],
            log.clone(),
        );
        let provisioner = RecordingProvisioner::new(ChallengeType::Http01, log.clone());

        issuer()
            .complete_order(&mut order, &names(), &provisioner, &RecordingProgress::default())
            .await
            .unwrap();

        assert_eq!(entries(&log), vec!["finalize", "certificate"]);
    }

    #[tokio::test]
    async fn test_invalid_order_is_diagnosed_and_torn_down() {
        let log: Log = Arc::default();
        let mut order = ScriptedOrder::new(
            OrderStatus::Pending,
            vec![authorization(
                "cdn.example.com",
                "pending",
                Some("Invalid response from http://cdn.example.com/.well-known/acme-challenge/tok: 404"),
            )],
            log.clone(),
        )
        .refreshing_to(&[OrderStatus::Invalid]);
        let provisioner = RecordingProvisioner::new(ChallengeType::Http01, log.clone());

        let err = issuer()
            .complete_order(&mut order, &names(), &provisioner, &RecordingProgress::default())
            .await
            .unwrap_err();

        match err {
            IssuerError::Protocol(message) => assert_eq!(
                message,
                "HTTP-01 validation for cdn.example.com failed with 404: make sure port 80 is \
                 reachable and /.well-known/acme-challenge/ is routed to this service"
            ),
            other => panic!("unexpected error: {:?}", other),
        }
        let log = entries(&log);
        assert!(log.contains(&"teardown cdn.example.com".to_string()));
        assert!(!log.contains(&"finalize".to_string()));
        // once to authorize, once to diagnose
        assert_eq!(log.iter().filter(|e| *e == "authorizations").count(), 2);
    }

    #[tokio::test]
    async fn test_provision_failure_tears_down_every_proof() {
        let log: Log = Arc::default();
        let mut order = ScriptedOrder::new(
            OrderStatus::Pending,
            vec![
                authorization("cdn.example.com", "pending", None),
                authorization("www.example.com", "pending", None),
            ],
            log.clone(),
        );
        let mut provisioner = RecordingProvisioner::new(ChallengeType::Dns01, log.clone());
        provisioner.fail_for = Some("www.example.com".to_string());

        let err = issuer()
            .complete_order(&mut order, &names(), &provisioner, &RecordingProgress::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IssuerError::Challenge(_)));

        let log = entries(&log);
        assert!(!log.iter().any(|e| e.starts_with("ready")));
        assert_eq!(
            log.iter()
                .filter(|e| e.starts_with("teardown"))
                .cloned()
                .collect::<Vec<_>>(),
            vec!["teardown cdn.example.com", "teardown www.example.com"]
        );
    }

    #[tokio::test]
    async fn test_order_that_never_becomes_ready_fails() {
        let log: Log = Arc::default();
        let mut order = ScriptedOrder::new(
            OrderStatus::Pending,
            vec![authorization("cdn.example.com", "pending", None)],
            log.clone(),
        )
        .refreshing_to(&[OrderStatus::Pending]);
        let provisioner = RecordingProvisioner::new(ChallengeType::Http01, log.clone());

        let err = issuer()
            .complete_order(&mut order, &names(), &provisioner, &RecordingProgress::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not ready after 6 attempts"));
        assert!(entries(&log).contains(&"teardown cdn.example.com".to_string()));
    }

    #[tokio::test]
    async fn test_dns01_waits_for_propagation_before_validation() {
        let provider = Arc::new(MockDnsProvider::new(&["example.com"]));
        let issuer = AcmeIssuer::new(
            Arc::new(MockCertificateRepository::new()),
            coordinator(provider.clone()),
        )
        .with_poll_interval(Duration::from_millis(1));
        let provisioner = DnsChallengeProvisioner::new(
            issuer.coordinator.clone(),
            DnsCredential {
                provider_type: ProviderType::TencentDns,
                config: json!({}),
            },
            600,
            1,
        );

        let log: Log = Arc::default();
        let mut order = ScriptedOrder::new(
            OrderStatus::Pending,
            vec![authorization("cdn.example.com", "pending", None)],
            log.clone(),
        )
        .watching_dns(provider.clone());
        let progress = RecordingProgress::default();

        let started = Instant::now();
        issuer
            .complete_order(&mut order, &names(), &provisioner, &progress)
            .await
            .unwrap();

        let ready_at = order.ready_at.unwrap();
        assert!(ready_at.duration_since(started) >= Duration::from_secs(1));
        assert!(entries(&log).contains(&format!(
            "ready {} txt=1",
            challenge_url("dns-01", "cdn.example.com")
        )));
        assert_eq!(
            progress.messages().await,
            vec![
                "writing DNS TXT record",
                "waiting for DNS propagation",
                "validating challenge",
                "finalizing order"
            ]
        );

        // the TXT record is gone once the order is done
        assert!(provider.records().await.is_empty());
        assert_eq!(provider.deleted().await.len(), 1);
    }
}
