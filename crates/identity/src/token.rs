//! Shared access token signing through the key daemon.
//!
//! The key never leaves the key daemon. The agent builds the canonical
//! string `"<url-encoded resource uri>\n<expiry>"`, sends it base64-encoded
//! for an HMAC-SHA256 signature, and assembles the token from the result.

use async_trait::async_trait;
use base64::prelude::*;
use edgecred_core::{config::DaemonConfig, Error, Result, UdsHttpClient};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::info;
use zeroize::Zeroizing;

use crate::identity::IdentityInfo;

/// Signing mechanism requested from the key daemon.
pub const SIGN_ALGORITHM: &str = "HMAC-SHA256";

/// A time-boxed shared access token.
///
/// The expiry is fixed when the token is assembled and is never refreshed.
#[derive(Clone, PartialEq, Eq)]
pub struct SasToken {
    /// URL-encoded resource URI the token is scoped to
    pub resource_uri: String,
    /// Expiry as seconds since the Unix epoch
    pub expiry: u64,
    signature: Zeroizing<String>,
}

impl SasToken {
    pub fn new(resource_uri: String, expiry: u64, signature: String) -> Self {
        Self {
            resource_uri,
            expiry,
            signature: Zeroizing::new(signature),
        }
    }

    /// URL-encoded base64 signature.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Token in `SharedAccessSignature sr=..&se=..&sig=..` form.
    pub fn to_header(&self) -> Zeroizing<String> {
        Zeroizing::new(format!(
            "SharedAccessSignature sr={}&se={}&sig={}",
            self.resource_uri,
            self.expiry,
            self.signature.as_str()
        ))
    }

    pub fn is_expired_at(&self, unix_secs: u64) -> bool {
        unix_secs >= self.expiry
    }
}

impl fmt::Debug for SasToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SasToken")
            .field("resource_uri", &self.resource_uri)
            .field("expiry", &self.expiry)
            .field("signature", &"<redacted>")
            .finish()
    }
}

/// Anything that can HMAC-sign a base64 message with a daemon-held key.
#[async_trait]
pub trait KeyService: Send + Sync {
    /// Returns the base64 signature.
    async fn sign(&self, key_handle: &str, message_b64: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest<'a> {
    key_handle: &'a str,
    algorithm: &'static str,
    parameters: SignParameters<'a>,
}

#[derive(Debug, Serialize)]
struct SignParameters<'a> {
    message: &'a str,
}

#[derive(Deserialize)]
struct SignResponse {
    signature: Option<String>,
}

/// Key daemon client.
#[derive(Debug, Clone)]
pub struct KeydClient {
    http: UdsHttpClient,
    api_version: String,
}

impl KeydClient {
    pub fn new(http: UdsHttpClient, api_version: impl Into<String>) -> Self {
        Self {
            http,
            api_version: api_version.into(),
        }
    }

    pub fn from_config(config: &DaemonConfig) -> Self {
        Self::new(
            UdsHttpClient::new(&config.key_socket),
            config.api_version.clone(),
        )
    }
}

#[async_trait]
impl KeyService for KeydClient {
    async fn sign(&self, key_handle: &str, message_b64: &str) -> Result<String> {
        let request = SignRequest {
            key_handle,
            algorithm: SIGN_ALGORITHM,
            parameters: SignParameters {
                message: message_b64,
            },
        };
        let path = format!("/sign?api-version={}", self.api_version);

        let response: SignResponse =
            self.http
                .post_json(&path, &request)
                .await
                .map_err(|e| match e {
                    Error::TransportUnavailable { endpoint, reason } => {
                        Error::SigningServiceUnavailable(format!("{endpoint}: {reason}"))
                    }
                    Error::MalformedResponse { reason, .. } => Error::SigningRejected(reason),
                    other => other,
                })?;

        response
            .signature
            .filter(|signature| !signature.is_empty())
            .ok_or_else(|| Error::SigningRejected("response has no signature".into()))
    }
}

/// Builds and signs shared access tokens.
#[derive(Debug, Clone)]
pub struct TokenSigner<K = KeydClient> {
    key_service: K,
    ttl: Duration,
}

impl<K: KeyService> TokenSigner<K> {
    pub fn new(key_service: K, ttl: Duration) -> Self {
        Self { key_service, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Canonical string to sign for an already URL-encoded resource URI.
    pub fn canonical_string(resource_uri: &str, expiry: u64) -> String {
        format!("{resource_uri}\n{expiry}")
    }

    /// URL-encoded resource URI for `identity`.
    pub fn resource_uri(identity: &IdentityInfo) -> String {
        urlencoding::encode(&identity.resource_path()).into_owned()
    }

    /// Have the key daemon sign the canonical string; returns the
    /// URL-encoded signature.
    pub async fn sign(&self, resource_uri: &str, expiry: u64, key_handle: &str) -> Result<String> {
        let canonical = Self::canonical_string(resource_uri, expiry);
        let message = BASE64_STANDARD.encode(canonical.as_bytes());

        info!(key_handle, expiry, "Creating SAS token signature");
        let signature = self.key_service.sign(key_handle, &message).await?;
        Ok(urlencoding::encode(&signature).into_owned())
    }

    /// Assemble a token that expires `ttl` from now.
    pub async fn assemble_token(&self, identity: &IdentityInfo) -> Result<SasToken> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.assemble_token_at(identity, now).await
    }

    /// Assemble a token issued at `issued_at` (Unix seconds).
    pub async fn assemble_token_at(
        &self,
        identity: &IdentityInfo,
        issued_at: u64,
    ) -> Result<SasToken> {
        let resource_uri = Self::resource_uri(identity);
        let expiry = issued_at.checked_add(self.ttl.as_secs()).ok_or_else(|| {
            Error::Config(format!(
                "token ttl of {}s overflows the expiry timestamp",
                self.ttl.as_secs()
            ))
        })?;
        let signature = self
            .sign(&resource_uri, expiry, identity.auth.key_handle())
            .await?;

        info!(resource_uri = %resource_uri, expiry, "SAS token assembled");
        Ok(SasToken::new(resource_uri, expiry, signature))
    }
}

/// Connection descriptor for the token path.
///
/// The `GatewayHost` segment is present if and only if the gateway differs
/// from the hub.
pub fn render_connection_target(identity: &IdentityInfo, token: &SasToken) -> Zeroizing<String> {
    let mut target = format!(
        "HostName={};DeviceId={}",
        identity.hub_name, identity.device_id
    );
    if let Some(module_id) = &identity.module_id {
        target.push_str(&format!(";ModuleId={module_id}"));
    }
    target.push_str(";SharedAccessSignature=");
    target.push_str(&token.to_header());
    if identity.uses_gateway() {
        target.push_str(&format!(";GatewayHost={}", identity.gateway_host));
    }
    Zeroizing::new(target)
}
