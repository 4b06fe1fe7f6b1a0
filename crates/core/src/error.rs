//! Error types for edgecred bootstrap operations.
//!
//! Every error raised while acquiring identity or credentials is fatal: the
//! agent performs a single bootstrap attempt and relies on process
//! supervision for restarts. Publish-loop failures are not represented here.

use thiserror::Error;

/// Errors raised while classifying a certificate bundle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertificateError {
    /// The PEM blob contained no complete certificate block
    #[error("no certificates found in PEM bundle")]
    NoCertificatesFound,

    /// Every certificate in the bundle is a certificate authority
    #[error("PEM bundle contains no leaf (device) certificate")]
    NoLeafCertificate,

    /// More than one certificate lacks the CA basic constraint
    #[error("PEM bundle contains {count} leaf certificates, expected exactly one")]
    AmbiguousLeafCertificate { count: usize },

    /// A certificate block is not valid base64
    #[error("certificate block {index} is not valid base64: {reason}")]
    InvalidEncoding { index: usize, reason: String },

    /// A certificate block does not decode as X.509 DER
    #[error("certificate block {index} is not a valid X.509 certificate: {reason}")]
    InvalidDer { index: usize, reason: String },
}

/// Errors that can occur during bootstrap and session setup.
#[derive(Debug, Error)]
pub enum Error {
    /// A daemon socket could not be reached or the exchange was cut short
    #[error("transport unavailable at '{endpoint}': {reason}")]
    TransportUnavailable { endpoint: String, reason: String },

    /// A daemon answered with a non-success status or an undecodable body
    #[error("malformed response from '{endpoint}': {reason}")]
    MalformedResponse { endpoint: String, reason: String },

    /// The identity daemon could not be reached
    #[error("identity unavailable: {0}")]
    IdentityUnavailable(String),

    /// The identity envelope lacks `spec` or a required field
    #[error("malformed identity: {0}")]
    MalformedIdentity(String),

    /// Certificate bundle errors
    #[error("certificate error: {0}")]
    Certificate(#[from] CertificateError),

    /// The crypto engine could not be loaded or initialized
    #[error("crypto engine '{engine}' unavailable: {reason}")]
    EngineUnavailable { engine: String, reason: String },

    /// The engine returned no key for the requested handle
    #[error("engine: unable to find private key with handle: {key_handle}")]
    KeyHandleNotFound { key_handle: String },

    /// The engine key's public half does not match the leaf certificate
    #[error("engine key '{key_handle}' does not match certificate '{subject}'")]
    KeyCertificateMismatch { key_handle: String, subject: String },

    /// The key handle was already bound during this run
    #[error("key handle already bound: {key_handle}")]
    KeyHandleAlreadyBound { key_handle: String },

    /// An operation on an engine-held key failed
    #[error("engine signing failed: {0}")]
    EngineSigning(String),

    /// The key daemon could not be reached
    #[error("signing service unavailable: {0}")]
    SigningServiceUnavailable(String),

    /// The key daemon answered without a signature
    #[error("signing rejected: {0}")]
    SigningRejected(String),

    /// The identity carries an auth type with no credential strategy
    #[error("unsupported auth type: {0}")]
    UnsupportedAuthType(String),

    /// Opening the messaging session failed
    #[error("session connect failed: {0}")]
    Connect(String),

    /// Cancellation was observed before the operation completed
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for edgecred operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Get the error category for structured logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::TransportUnavailable { .. }
            | Error::MalformedResponse { .. }
            | Error::Io(_)
            | Error::Serialization(_) => "transport",

            Error::IdentityUnavailable(_)
            | Error::MalformedIdentity(_)
            | Error::UnsupportedAuthType(_) => "identity",

            Error::Certificate(_) => "certificate",

            Error::EngineUnavailable { .. }
            | Error::KeyHandleNotFound { .. }
            | Error::KeyHandleAlreadyBound { .. }
            | Error::KeyCertificateMismatch { .. }
            | Error::EngineSigning(_) => "key",

            Error::SigningServiceUnavailable(_) | Error::SigningRejected(_) => "signing",

            Error::Connect(_) => "session",

            Error::Config(_) => "config",

            Error::Cancelled => "lifecycle",
        }
    }

    /// Whether the error should abort the process.
    ///
    /// Bootstrap is never retried, so everything except cancellation is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Cancelled)
    }

    /// Process exit code used when this error reaches the top level.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Cancelled => 0,
            Error::Connect(_) => 2,
            _ => 1,
        }
    }
}
