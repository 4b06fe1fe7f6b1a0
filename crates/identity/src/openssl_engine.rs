//! OpenSSL ENGINE backend for [`KeyHandleBinder`](crate::KeyHandleBinder).
//!
//! Keys are loaded with `ENGINE_load_private_key`, which returns an
//! `EVP_PKEY` whose operations are dispatched into the engine. The raw
//! pointers never leave this module.

use edgecred_core::{Error, Result};
use foreign_types::ForeignType;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::sign::Signer;
use std::any::Any;
use std::ffi::{c_char, c_int, c_void, CString};
use std::fmt;
use std::ptr::{self, NonNull};

use crate::engine::{EngineBackend, EngineKey};

#[repr(C)]
struct RawEngine {
    _private: [u8; 0],
}

// Provided by libcrypto, which openssl-sys links.
extern "C" {
    fn ENGINE_by_id(id: *const c_char) -> *mut RawEngine;
    fn ENGINE_init(engine: *mut RawEngine) -> c_int;
    fn ENGINE_finish(engine: *mut RawEngine) -> c_int;
    fn ENGINE_free(engine: *mut RawEngine) -> c_int;
    fn ENGINE_load_private_key(
        engine: *mut RawEngine,
        key_id: *const c_char,
        ui_method: *mut c_void,
        callback_data: *mut c_void,
    ) -> *mut openssl_sys::EVP_PKEY;
}

/// Engine reference owned by the binder.
pub struct EngineRef {
    ptr: NonNull<RawEngine>,
    initialized: bool,
}

// The binder is used from one task at a time; the engine is never shared.
unsafe impl Send for EngineRef {}

impl Drop for EngineRef {
    fn drop(&mut self) {
        unsafe {
            if self.initialized {
                ENGINE_finish(self.ptr.as_ptr());
            }
            ENGINE_free(self.ptr.as_ptr());
        }
    }
}

/// Backend calling into OpenSSL's ENGINE API.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpensslEngine;

impl EngineBackend for OpensslEngine {
    type Engine = EngineRef;

    fn load_engine(&mut self, name: &str) -> Result<EngineRef> {
        openssl::init();
        let id = CString::new(name)
            .map_err(|_| Error::Config(format!("engine name '{name}' contains NUL")))?;

        let raw = unsafe { ENGINE_by_id(id.as_ptr()) };
        NonNull::new(raw)
            .map(|ptr| EngineRef {
                ptr,
                initialized: false,
            })
            .ok_or_else(|| Error::EngineUnavailable {
                engine: name.to_string(),
                reason: "ENGINE_by_id returned null".into(),
            })
    }

    fn init_engine(&mut self, engine: &mut EngineRef) -> Result<()> {
        if engine.initialized {
            return Ok(());
        }
        if unsafe { ENGINE_init(engine.ptr.as_ptr()) } != 1 {
            return Err(Error::EngineUnavailable {
                engine: "loaded engine".into(),
                reason: "ENGINE_init failed".into(),
            });
        }
        engine.initialized = true;
        Ok(())
    }

    fn load_private_key(
        &mut self,
        engine: &mut EngineRef,
        key_ref: &str,
    ) -> Option<Box<dyn EngineKey>> {
        let key_id = CString::new(key_ref).ok()?;
        let raw = unsafe {
            ENGINE_load_private_key(
                engine.ptr.as_ptr(),
                key_id.as_ptr(),
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        if raw.is_null() {
            return None;
        }

        // Ownership of the EVP_PKEY moves into `PKey`, which frees it on drop.
        let pkey = unsafe { PKey::<Private>::from_ptr(raw) };
        Some(Box::new(OpensslKey { pkey }))
    }
}

/// Engine-backed `EVP_PKEY`.
pub struct OpensslKey {
    pkey: PKey<Private>,
}

impl OpensslKey {
    /// The key for TLS client authentication. Operations run in the engine.
    pub fn pkey(&self) -> &PKeyRef<Private> {
        &self.pkey
    }
}

impl fmt::Debug for OpensslKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpensslKey")
            .field("id", &self.pkey.id())
            .field("bits", &self.pkey.bits())
            .finish()
    }
}

impl EngineKey for OpensslKey {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.pkey)
            .map_err(|e| Error::EngineSigning(e.to_string()))?;
        signer
            .sign_oneshot_to_vec(message)
            .map_err(|e| Error::EngineSigning(e.to_string()))
    }

    fn public_key_der(&self) -> Result<Vec<u8>> {
        self.pkey
            .public_key_to_der()
            .map_err(|e| Error::EngineSigning(format!("public key export failed: {e}")))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
