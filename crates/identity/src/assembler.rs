//! Credential assembly: one strategy per bootstrap, chosen by auth type.

use edgecred_core::{AgentConfig, CancellationToken, Error, Result};
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::certificate::{CertdClient, CertificateChainResolver, CertificateEntry, CertificateSource};
use crate::engine::{DefaultEngine, EngineBackend, KeyHandle, KeyHandleBinder};
use crate::identity::{AuthSpec, IdentityInfo, IdentitySource};
use crate::token::{render_connection_target, KeyService, KeydClient, SasToken, TokenSigner};

/// Certificate credential: leaf certificate plus an engine-held key.
#[derive(Debug)]
pub struct X509Credential {
    pub device_id: String,
    pub module_id: Option<String>,
    pub leaf_certificate: CertificateEntry,
    pub key_handle: KeyHandle,
    pub ca_chain: Vec<CertificateEntry>,
}

/// Token credential: connection descriptor carrying a signed token.
pub struct SasCredential {
    pub connection_target: Zeroizing<String>,
    pub token: SasToken,
    pub token_expiry: u64,
}

impl fmt::Debug for SasCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SasCredential")
            .field("connection_target", &"<redacted>")
            .field("token", &self.token)
            .field("token_expiry", &self.token_expiry)
            .finish()
    }
}

/// The single credential produced by a bootstrap run.
#[derive(Debug)]
pub enum Credential {
    X509(X509Credential),
    Sas(SasCredential),
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::X509(_) => "x509",
            Credential::Sas(_) => "sas",
        }
    }

    /// Unix-seconds expiry for time-boxed credentials.
    pub fn expiry(&self) -> Option<u64> {
        match self {
            Credential::X509(_) => None,
            Credential::Sas(sas) => Some(sas.token_expiry),
        }
    }
}

/// Turns identity metadata into a [`Credential`].
pub struct CredentialAssembler<C = CertdClient, K = KeydClient, B = DefaultEngine>
where
    B: EngineBackend,
{
    resolver: CertificateChainResolver<C>,
    binder: KeyHandleBinder<B>,
    signer: TokenSigner<K>,
}

impl CredentialAssembler {
    /// Assembler talking to the configured daemons and the engine backend
    /// selected at build time.
    pub fn from_config(config: &AgentConfig) -> Self {
        Self::with_engine(config, DefaultEngine::default())
    }
}

impl<B: EngineBackend> CredentialAssembler<CertdClient, KeydClient, B> {
    /// Assembler talking to the configured daemons through `engine`.
    pub fn with_engine(config: &AgentConfig, engine: B) -> Self {
        Self::new(
            CertificateChainResolver::new(CertdClient::from_config(&config.daemons)),
            KeyHandleBinder::new(engine, config.engine.name.clone()),
            TokenSigner::new(
                KeydClient::from_config(&config.daemons),
                Duration::from_secs(config.token.ttl_secs),
            ),
        )
    }
}

impl<C, K, B> CredentialAssembler<C, K, B>
where
    C: CertificateSource,
    K: KeyService,
    B: EngineBackend,
{
    pub fn new(
        resolver: CertificateChainResolver<C>,
        binder: KeyHandleBinder<B>,
        signer: TokenSigner<K>,
    ) -> Self {
        Self {
            resolver,
            binder,
            signer,
        }
    }

    /// Run exactly the strategy named by `identity.auth`.
    pub async fn assemble(&mut self, identity: &IdentityInfo) -> Result<Credential> {
        match &identity.auth {
            AuthSpec::X509 {
                key_handle,
                cert_id,
            } => {
                let bundle = self.resolver.resolve(cert_id).await?;
                let key_handle = self.binder.bind(key_handle, bundle.leaf())?;
                let (leaf_certificate, ca_chain) = bundle.into_parts();

                info!(
                    device_id = %identity.device_id,
                    ca_count = ca_chain.len(),
                    "X.509 credential assembled"
                );
                Ok(Credential::X509(X509Credential {
                    device_id: identity.device_id.clone(),
                    module_id: identity.module_id.clone(),
                    leaf_certificate,
                    key_handle,
                    ca_chain,
                }))
            }
            AuthSpec::Sas { .. } => {
                let token = self.signer.assemble_token(identity).await?;
                let connection_target = render_connection_target(identity, &token);

                info!(
                    device_id = %identity.device_id,
                    gateway = identity.uses_gateway(),
                    expiry = token.expiry,
                    "SAS credential assembled"
                );
                Ok(Credential::Sas(SasCredential {
                    connection_target,
                    token_expiry: token.expiry,
                    token,
                }))
            }
        }
    }
}

/// Fetch identity and assemble the credential, aborting on cancellation.
///
/// Runs once; failures are returned to the caller, which does not retry.
pub async fn bootstrap<I, C, K, B>(
    identity_source: &I,
    assembler: &mut CredentialAssembler<C, K, B>,
    cancel: &CancellationToken,
) -> Result<(IdentityInfo, Credential)>
where
    I: IdentitySource + ?Sized,
    C: CertificateSource,
    K: KeyService,
    B: EngineBackend,
{
    let run = async {
        let identity = identity_source.fetch().await?;
        let credential = assembler.assemble(&identity).await?;
        Ok::<_, Error>((identity, credential))
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            warn!("Bootstrap cancelled before completion");
            Err(Error::Cancelled)
        }
        result = run => result,
    }
}
