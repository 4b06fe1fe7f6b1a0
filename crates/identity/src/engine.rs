//! Engine-held private keys bound to the identity certificate.
//!
//! The private key for the identity certificate lives inside a crypto engine
//! (possibly HSM-backed). This module only ever holds an opaque handle: the
//! engine is loaded and initialized once, asked for the key by reference,
//! and the result is checked before it becomes a [`KeyHandle`]: the key must
//! exist and its public half must match the leaf certificate. Private key
//! bytes are never read or exported.

use edgecred_core::{Error, Result};
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use tracing::info;

use crate::certificate::CertificateEntry;

/// A private key living inside an engine.
///
/// Dropping the value releases the engine-side reference.
pub trait EngineKey: Any + Send + Sync + fmt::Debug {
    /// Sign `message` inside the engine.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;

    /// DER-encoded SubjectPublicKeyInfo of the key.
    fn public_key_der(&self) -> Result<Vec<u8>>;

    fn as_any(&self) -> &dyn Any;
}

/// Foreign-call boundary of a crypto engine implementation.
///
/// All three operations are synchronous and are expected to be called from
/// a single thread.
pub trait EngineBackend: Send {
    /// Structural reference to a loaded engine.
    type Engine: Send;

    /// Look up an engine implementation by name.
    fn load_engine(&mut self, name: &str) -> Result<Self::Engine>;

    /// Obtain a functional reference to the engine.
    fn init_engine(&mut self, engine: &mut Self::Engine) -> Result<()>;

    /// Ask the engine for a private key. `None` is the engine's null answer.
    fn load_private_key(
        &mut self,
        engine: &mut Self::Engine,
        key_ref: &str,
    ) -> Option<Box<dyn EngineKey>>;
}

/// Opaque, non-exportable reference to an engine-held private key.
///
/// Only [`KeyHandleBinder::bind`] creates one, after validating the engine
/// response, so every `KeyHandle` in existence is valid. It is neither
/// `Clone` nor `Copy`; signing borrows it.
pub struct KeyHandle {
    key_ref: String,
    bound_subject: String,
    key: Box<dyn EngineKey>,
}

impl KeyHandle {
    /// Reference the key was requested by.
    pub fn key_ref(&self) -> &str {
        &self.key_ref
    }

    /// Subject of the certificate this key is bound to.
    pub fn bound_subject(&self) -> &str {
        &self.bound_subject
    }

    /// Sign through the engine without exposing key material.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        self.key.sign(message)
    }

    /// Access the engine-specific key, e.g. to configure a TLS context.
    pub fn engine_key<K: EngineKey>(&self) -> Option<&K> {
        self.key.as_any().downcast_ref::<K>()
    }

    /// Release the engine-side key now instead of at drop.
    pub fn release(self) {
        info!(key_handle = %self.key_ref, "Releasing engine key");
        drop(self);
    }
}

impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHandle")
            .field("key_ref", &self.key_ref)
            .field("bound_subject", &self.bound_subject)
            .finish_non_exhaustive()
    }
}

/// Loads the engine once and binds key handles to the leaf certificate.
pub struct KeyHandleBinder<B: EngineBackend> {
    backend: B,
    engine_name: String,
    engine: Option<B::Engine>,
    bound: HashSet<String>,
}

impl<B: EngineBackend> KeyHandleBinder<B> {
    pub fn new(backend: B, engine_name: impl Into<String>) -> Self {
        Self {
            backend,
            engine_name: engine_name.into(),
            engine: None,
            bound: HashSet::new(),
        }
    }

    pub fn engine_name(&self) -> &str {
        &self.engine_name
    }

    /// Bind the key named by `key_ref` to `leaf`.
    ///
    /// Fails with [`Error::KeyCertificateMismatch`] when the engine key is not
    /// the certificate's key. Each reference can be bound at most once per binder so the handle is
    /// never exposed to two owners.
    pub fn bind(&mut self, key_ref: &str, leaf: &CertificateEntry) -> Result<KeyHandle> {
        if self.bound.contains(key_ref) {
            return Err(Error::KeyHandleAlreadyBound {
                key_handle: key_ref.to_string(),
            });
        }
        let certificate_key = leaf.public_key_der()?;

        if self.engine.is_none() {
            let mut engine = self.backend.load_engine(&self.engine_name)?;
            self.backend.init_engine(&mut engine)?;
            info!(engine = %self.engine_name, "Crypto engine initialized");
            self.engine = Some(engine);
        }
        let engine = self
            .engine
            .as_mut()
            .ok_or_else(|| Error::EngineUnavailable {
                engine: self.engine_name.clone(),
                reason: "engine not initialized".into(),
            })?;

        let key = self
            .backend
            .load_private_key(engine, key_ref)
            .ok_or_else(|| Error::KeyHandleNotFound {
                key_handle: key_ref.to_string(),
            })?;
        if key.public_key_der()? != certificate_key {
            return Err(Error::KeyCertificateMismatch {
                key_handle: key_ref.to_string(),
                subject: leaf.subject.clone(),
            });
        }

        self.bound.insert(key_ref.to_string());
        info!(
            key_handle = key_ref,
            subject = %leaf.subject,
            "Private key handle bound to identity certificate"
        );

        Ok(KeyHandle {
            key_ref: key_ref.to_string(),
            bound_subject: leaf.subject.clone(),
            key,
        })
    }
}

/// Backend used when no engine support is compiled in.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableEngine;

impl EngineBackend for UnavailableEngine {
    type Engine = ();

    fn load_engine(&mut self, name: &str) -> Result<()> {
        Err(Error::EngineUnavailable {
            engine: name.to_string(),
            reason: "built without the openssl-engine feature".into(),
        })
    }

    fn init_engine(&mut self, _engine: &mut ()) -> Result<()> {
        Ok(())
    }

    fn load_private_key(&mut self, _engine: &mut (), _key_ref: &str) -> Option<Box<dyn EngineKey>> {
        None
    }
}

/// Engine backend selected at build time.
#[cfg(feature = "openssl-engine")]
pub type DefaultEngine = crate::openssl_engine::OpensslEngine;

/// Engine backend selected at build time.
#[cfg(not(feature = "openssl-engine"))]
pub type DefaultEngine = UnavailableEngine;
