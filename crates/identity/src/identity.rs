//! Identity metadata from the identity daemon.
//!
//! The daemon answers `GET /identities/identity` with an envelope whose
//! `spec` object names the hub, gateway, device and optional module, plus
//! the auth strategy the agent must use.

use async_trait::async_trait;
use edgecred_core::{config::DaemonConfig, Error, Result, UdsHttpClient};
use serde::Deserialize;
use tracing::info;

/// Identity envelope type produced for hub-provisioned identities.
const HUB_IDENTITY_TYPE: &str = "aziot";

/// API version of the MQTT user name handed to transports.
pub const MQTT_API_VERSION: &str = "2021-04-12";

/// Device or module identity, immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityInfo {
    pub hub_name: String,
    /// Host the transport connects through. Equals `hub_name` unless the
    /// device sits behind a gateway.
    pub gateway_host: String,
    pub device_id: String,
    pub module_id: Option<String>,
    pub auth: AuthSpec,
}

/// Credential strategy selected by the identity daemon.
///
/// The variants are mutually exclusive; a new strategy must be added here
/// and handled wherever the union is matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthSpec {
    /// Certificate-based mutual TLS with an engine-held private key
    X509 { key_handle: String, cert_id: String },
    /// Shared access token signed by the key daemon
    Sas { key_handle: String },
}

impl AuthSpec {
    pub fn key_handle(&self) -> &str {
        match self {
            AuthSpec::X509 { key_handle, .. } | AuthSpec::Sas { key_handle } => key_handle,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AuthSpec::X509 { .. } => "x509",
            AuthSpec::Sas { .. } => "sas",
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdentityEnvelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    spec: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireIdentity {
    hub_name: String,
    gateway_host: Option<String>,
    device_id: String,
    module_id: Option<String>,
    auth: WireAuth,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAuth {
    #[serde(rename = "type")]
    kind: String,
    #[serde(alias = "keyHandleRef")]
    key_handle: String,
    cert_id: Option<String>,
}

impl IdentityInfo {
    /// Decode the identity daemon's JSON envelope.
    pub fn from_envelope(envelope: serde_json::Value) -> Result<Self> {
        let envelope: IdentityEnvelope = serde_json::from_value(envelope)
            .map_err(|e| Error::MalformedIdentity(format!("invalid envelope: {e}")))?;

        if let Some(kind) = envelope.kind.as_deref() {
            if kind != HUB_IDENTITY_TYPE {
                return Err(Error::MalformedIdentity(format!(
                    "expected a '{HUB_IDENTITY_TYPE}' identity, got '{kind}'"
                )));
            }
        }

        let spec = envelope
            .spec
            .ok_or_else(|| Error::MalformedIdentity("envelope has no 'spec' object".into()))?;
        let wire: WireIdentity = serde_json::from_value(spec)
            .map_err(|e| Error::MalformedIdentity(e.to_string()))?;

        Self::try_from(wire)
    }

    /// Whether the transport must connect through a gateway rather than the hub.
    pub fn uses_gateway(&self) -> bool {
        self.gateway_host != self.hub_name
    }

    /// Resource path the SAS token is scoped to, before URL encoding.
    pub fn resource_path(&self) -> String {
        match &self.module_id {
            Some(module_id) => format!(
                "{}/devices/{}/modules/{}",
                self.hub_name, self.device_id, module_id
            ),
            None => format!("{}/devices/{}", self.hub_name, self.device_id),
        }
    }

    /// Client identifier presented to the messaging endpoint.
    pub fn client_id(&self) -> String {
        match &self.module_id {
            Some(module_id) => format!("{}/{}", self.device_id, module_id),
            None => self.device_id.clone(),
        }
    }

    /// User name for MQTT-style transports.
    pub fn mqtt_username(&self) -> String {
        format!(
            "{}/{}/?api-version={}",
            self.hub_name,
            self.client_id(),
            MQTT_API_VERSION
        )
    }
}

impl TryFrom<WireIdentity> for IdentityInfo {
    type Error = Error;

    fn try_from(wire: WireIdentity) -> Result<Self> {
        if wire.hub_name.is_empty() {
            return Err(Error::MalformedIdentity("hubName is empty".into()));
        }
        if wire.device_id.is_empty() {
            return Err(Error::MalformedIdentity("deviceId is empty".into()));
        }
        if wire.auth.key_handle.is_empty() {
            return Err(Error::MalformedIdentity("auth.keyHandle is empty".into()));
        }

        let auth = match wire.auth.kind.as_str() {
            "x509" => {
                let cert_id = wire
                    .auth
                    .cert_id
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| {
                        Error::MalformedIdentity("x509 auth requires auth.certId".into())
                    })?;
                AuthSpec::X509 {
                    key_handle: wire.auth.key_handle,
                    cert_id,
                }
            }
            "sas" => AuthSpec::Sas {
                key_handle: wire.auth.key_handle,
            },
            other => return Err(Error::UnsupportedAuthType(other.to_string())),
        };

        let gateway_host = wire
            .gateway_host
            .filter(|host| !host.is_empty())
            .unwrap_or_else(|| wire.hub_name.clone());

        Ok(Self {
            hub_name: wire.hub_name,
            gateway_host,
            device_id: wire.device_id,
            module_id: wire.module_id.filter(|id| !id.is_empty()),
            auth,
        })
    }
}

/// Anything that can produce the caller's identity.
#[async_trait]
pub trait IdentitySource: Send + Sync {
    async fn fetch(&self) -> Result<IdentityInfo>;
}

/// Identity daemon client.
///
/// Performs exactly one request per `fetch`; retry policy belongs to the
/// caller.
#[derive(Debug, Clone)]
pub struct IdentityClient {
    http: UdsHttpClient,
    api_version: String,
}

impl IdentityClient {
    pub fn new(http: UdsHttpClient, api_version: impl Into<String>) -> Self {
        Self {
            http,
            api_version: api_version.into(),
        }
    }

    pub fn from_config(config: &DaemonConfig) -> Self {
        Self::new(
            UdsHttpClient::new(&config.identity_socket),
            config.api_version.clone(),
        )
    }
}

#[async_trait]
impl IdentitySource for IdentityClient {
    async fn fetch(&self) -> Result<IdentityInfo> {
        info!(endpoint = %self.http.endpoint(), "Obtaining identity metadata");

        let path = format!("/identities/identity?api-version={}", self.api_version);
        let envelope: serde_json::Value =
            self.http.get_json(&path).await.map_err(|e| match e {
                Error::TransportUnavailable { endpoint, reason } => {
                    Error::IdentityUnavailable(format!("{endpoint}: {reason}"))
                }
                Error::MalformedResponse { reason, .. } => Error::MalformedIdentity(reason),
                other => other,
            })?;

        let identity = IdentityInfo::from_envelope(envelope)?;
        info!(
            hub = %identity.hub_name,
            device_id = %identity.device_id,
            module_id = identity.module_id.as_deref().unwrap_or("-"),
            auth = identity.auth.kind(),
            "Identity obtained"
        );
        Ok(identity)
    }
}
