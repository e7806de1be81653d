//! Certificate issuance.
//!
//! [`Issuer`] is the seam between the certificate manager and the protocol
//! that produces signed certificates. [`AcmeIssuer`] implements it with the
//! ACME HTTP-01 flow:
//!
//! 1. Create (or reload) the ACME account
//! 2. Open an order for the hostname
//! 3. Publish the HTTP-01 key authorization through [`ChallengeManager`]
//! 4. Mark the challenge ready and poll until the order is ready
//! 5. Finalize with a fresh key's CSR and download the chain

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, Order, OrderStatus,
};
use rcgen::{CertificateParams, DistinguishedName, KeyPair};
use tokio::sync::OnceCell;

use super::challenge::ChallengeManager;
use super::error::IssueError;
use super::storage::CertificateStorage;

const ORDER_POLL_ATTEMPTS: u32 = 10;
const CERTIFICATE_POLL_ATTEMPTS: u32 = 10;

/// Freshly issued certificate chain and private key, PEM encoded.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    /// Leaf first, then intermediates.
    pub cert_chain_pem: String,
    /// Key the CSR was signed with.
    pub key_pem: String,
}

/// Produces a signed certificate for a hostname that already passed policy.
#[async_trait]
pub trait Issuer: Send + Sync + 'static {
    async fn issue(&self, hostname: &str) -> Result<IssuedCertificate, IssueError>;
}

/// ACME (RFC 8555) issuer answering HTTP-01 challenges.
pub struct AcmeIssuer {
    directory_url: String,
    contact_email: Option<String>,
    storage: Arc<CertificateStorage>,
    challenges: ChallengeManager,
    account: OnceCell<Account>,
}

impl AcmeIssuer {
    pub fn new(
        directory_url: impl Into<String>,
        contact_email: Option<String>,
        storage: Arc<CertificateStorage>,
        challenges: ChallengeManager,
    ) -> Self {
        Self {
            directory_url: directory_url.into(),
            contact_email,
            storage,
            challenges,
            account: OnceCell::new(),
        }
    }

    async fn account(&self) -> Result<&Account, IssueError> {
        self.account
            .get_or_try_init(|| self.load_or_create_account())
            .await
    }

    async fn load_or_create_account(&self) -> Result<Account, IssueError> {
        if let Some(json) = self.storage.load_credentials_json()? {
            let credentials: AccountCredentials = serde_json::from_str(&json)?;
            let account = Account::from_credentials(credentials).await?;
            tracing::info!("Reusing stored ACME account");
            return Ok(account);
        }

        let contact_urls: Vec<String> = self
            .contact_email
            .iter()
            .map(|email| format!("mailto:{email}"))
            .collect();
        let contact: Vec<&str> = contact_urls.iter().map(String::as_str).collect();

        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &contact,
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            &self.directory_url,
            None,
        )
        .await?;
        self.storage
            .save_credentials_json(&serde_json::to_string_pretty(&credentials)?)?;
        tracing::info!(directory = %self.directory_url, "Registered new ACME account");
        Ok(account)
    }

    /// Runs the order, recording every published token in `tokens`.
    async fn run_order(
        &self,
        account: &Account,
        hostname: &str,
        tokens: &mut Vec<String>,
    ) -> Result<IssuedCertificate, IssueError> {
        let identifiers = [Identifier::Dns(hostname.to_string())];
        let mut order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await?;

        let authorizations = order.authorizations().await?;
        for authz in &authorizations {
            match authz.status {
                AuthorizationStatus::Pending => {}
                AuthorizationStatus::Valid => continue,
                ref status => {
                    return Err(IssueError::Authorization {
                        host: hostname.to_string(),
                        status: format!("{status:?}"),
                    })
                }
            }

            let challenge = authz
                .challenges
                .iter()
                .find(|c| c.r#type == ChallengeType::Http01)
                .ok_or_else(|| IssueError::NoHttpChallenge(hostname.to_string()))?;

            let key_authorization = order.key_authorization(challenge);
            self.challenges
                .add_challenge(&challenge.token, key_authorization.as_str());
            tokens.push(challenge.token.clone());
            order.set_challenge_ready(&challenge.url).await?;
        }

        wait_until_ready(&mut order, hostname).await?;

        let key_pair = KeyPair::generate()?;
        let mut params = CertificateParams::new(vec![hostname.to_string()])?;
        params.distinguished_name = DistinguishedName::new();
        let csr = params.serialize_request(&key_pair)?;
        order.finalize(csr.der()).await?;

        let mut attempts = 0;
        let cert_chain_pem = loop {
            if let Some(pem) = order.certificate().await? {
                break pem;
            }
            attempts += 1;
            if attempts >= CERTIFICATE_POLL_ATTEMPTS {
                return Err(IssueError::OrderTimeout(hostname.to_string()));
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        };

        Ok(IssuedCertificate {
            cert_chain_pem,
            key_pem: key_pair.serialize_pem(),
        })
    }
}

async fn wait_until_ready(order: &mut Order, hostname: &str) -> Result<(), IssueError> {
    let mut delay = Duration::from_millis(250);
    for _ in 0..ORDER_POLL_ATTEMPTS {
        tokio::time::sleep(delay).await;
        match order.refresh().await?.status {
            OrderStatus::Ready => return Ok(()),
            OrderStatus::Invalid => return Err(IssueError::OrderInvalid(hostname.to_string())),
            _ => {}
        }
        delay = (delay * 2).min(Duration::from_secs(10));
    }
    Err(IssueError::OrderTimeout(hostname.to_string()))
}

#[async_trait]
impl Issuer for AcmeIssuer {
    async fn issue(&self, hostname: &str) -> Result<IssuedCertificate, IssueError> {
        let account = self.account().await?;
        tracing::info!(hostname = %hostname, "Requesting certificate");

        let mut tokens = Vec::new();
        let result = self.run_order(account, hostname, &mut tokens).await;
        for token in &tokens {
            self.challenges.remove_challenge(token);
        }
        result
    }
}
