//! Credential bootstrap for edgecred devices and modules.
//!
//! Bootstrap turns identity metadata from the identity daemon into exactly
//! one transport credential, using one of two mutually exclusive strategies:
//!
//! - **X.509**: fetch the identity certificate bundle from the certificate
//!   daemon, separate the CA chain from the single leaf certificate, and bind
//!   an engine-held private key handle to the leaf. Key bytes never enter
//!   this process.
//! - **SAS**: build the canonical string to sign, have the key daemon
//!   HMAC-sign it, and assemble a time-boxed shared access token plus the
//!   connection descriptor.
//!
//! ```text
//! IdentityClient ──► CertificateChainResolver ──► KeyHandleBinder ─┐
//!        │                                                         ├─► Credential
//!        └─────────► TokenSigner ──────────────────────────────────┘
//! ```

pub mod assembler;
pub mod certificate;
pub mod engine;
pub mod identity;
pub mod token;

#[cfg(feature = "openssl-engine")]
pub mod openssl_engine;

pub use assembler::{bootstrap, Credential, CredentialAssembler, SasCredential, X509Credential};
pub use certificate::{
    extract_pem_blocks, CertdClient, CertificateBundle, CertificateChainResolver,
    CertificateEntry, CertificateSource,
};
pub use engine::{
    DefaultEngine, EngineBackend, EngineKey, KeyHandle, KeyHandleBinder, UnavailableEngine,
};
pub use identity::{AuthSpec, IdentityClient, IdentityInfo, IdentitySource, MQTT_API_VERSION};
pub use token::{render_connection_target, KeyService, KeydClient, SasToken, TokenSigner};

#[cfg(feature = "openssl-engine")]
pub use openssl_engine::OpensslEngine;

// Re-export core types for convenience
pub use edgecred_core::{CertificateError, Error, Result};
