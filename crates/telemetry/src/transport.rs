//! Messaging endpoint session contract.
//!
//! The transport itself (MQTT/AMQP client, TLS) lives outside this crate.
//! A [`Connector`] consumes the assembled credential once and yields a
//! [`TransportSession`] that holds it for the session lifetime.

use async_trait::async_trait;
use edgecred_core::Result;
use edgecred_identity::Credential;
use std::fmt;
use thiserror::Error;
use tracing::info;

use crate::sampler::TelemetryMessage;

/// How the endpoint classified a failed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErrorKind {
    /// Recoverable without operator intervention (throttling, network blip)
    Transient,
    /// Anything else
    Unexpected,
}

impl fmt::Display for SendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendErrorKind::Transient => f.write_str("transient"),
            SendErrorKind::Unexpected => f.write_str("unexpected"),
        }
    }
}

/// Failed send. Never terminates the publish loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} send failure: {reason}")]
pub struct SendError {
    pub kind: SendErrorKind,
    pub reason: String,
}

impl SendError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            kind: SendErrorKind::Transient,
            reason: reason.into(),
        }
    }

    pub fn unexpected(reason: impl Into<String>) -> Self {
        Self {
            kind: SendErrorKind::Unexpected,
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == SendErrorKind::Transient
    }
}

pub type SendResult = std::result::Result<(), SendError>;

/// An open session on the messaging endpoint.
#[async_trait]
pub trait TransportSession: Send {
    async fn send(&mut self, message: &TelemetryMessage) -> SendResult;

    async fn close(&mut self);
}

/// Opens sessions from an assembled credential.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, credential: Credential) -> Result<Box<dyn TransportSession>>;
}

/// Connector that logs messages instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunConnector;

#[async_trait]
impl Connector for DryRunConnector {
    async fn open(&self, credential: Credential) -> Result<Box<dyn TransportSession>> {
        match &credential {
            Credential::X509(x509) => info!(
                device_id = %x509.device_id,
                subject = %x509.leaf_certificate.subject,
                "Opening dry-run session with X.509 credential"
            ),
            Credential::Sas(sas) => info!(
                resource_uri = %sas.token.resource_uri,
                expiry = sas.token_expiry,
                "Opening dry-run session with SAS credential"
            ),
        }
        Ok(Box::new(DryRunSession {
            credential,
            sent: 0,
        }))
    }
}

/// Session opened by [`DryRunConnector`].
#[derive(Debug)]
pub struct DryRunSession {
    credential: Credential,
    sent: u64,
}

impl DryRunSession {
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }
}

#[async_trait]
impl TransportSession for DryRunSession {
    async fn send(&mut self, message: &TelemetryMessage) -> SendResult {
        self.sent += 1;
        info!(
            message_id = message.message_id,
            body = %String::from_utf8_lossy(&message.body),
            "Telemetry message (dry run)"
        );
        Ok(())
    }

    async fn close(&mut self) {
        info!(
            kind = self.credential.kind(),
            sent = self.sent,
            "Dry-run session closed"
        );
    }
}
