//! Core functionality for the edgecred device agent.
//!
//! This crate provides the error taxonomy, configuration, logging setup and
//! the local daemon transport shared by the identity and telemetry crates.
//!
//! # Local daemons
//!
//! Proof material never lives in the agent process. Identity metadata,
//! certificates and signatures are brokered by three daemons that are only
//! reachable over Unix domain sockets:
//!
//! - identity daemon: device/module identity and auth metadata
//! - certificate daemon: PEM bundles keyed by certificate id
//! - key daemon: HMAC signing with a key that never leaves the daemon

pub mod config;
pub mod error;
pub mod logging;
pub mod uds;

pub use config::{AgentConfig, DaemonConfig, EngineConfig, LogFormat, PublishConfig, TokenConfig};
pub use error::{CertificateError, Error, Result};
pub use uds::{HttpResponse, UdsHttpClient};

/// Cooperative cancellation shared by bootstrap and the publish loop.
pub use tokio_util::sync::CancellationToken;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
