//! Fatal bootstrap failures: every one aborts and none is retried.

use crate::bootstrap_scenarios::assembler_for;
use crate::test_utils::*;
use edgecred_core::{CancellationToken, CertificateError, Error};
use edgecred_identity::{
    bootstrap, EngineBackend, IdentityClient, IdentityInfo, UnavailableEngine,
};
use serde_json::json;

fn x509_identity() -> serde_json::Value {
    identity_envelope(json!({
        "hubName": "h",
        "deviceId": "d",
        "auth": { "type": "x509", "keyHandle": "device-key", "certId": "c1" }
    }))
}

async fn run_bootstrap<B: EngineBackend>(
    sockets: &DaemonSockets,
    engine: B,
) -> Result<IdentityInfo, Error> {
    let identity_client = IdentityClient::from_config(&sockets.config.daemons);
    let mut assembler = assembler_for(sockets, engine);
    let cancel = CancellationToken::new();
    bootstrap(&identity_client, &mut assembler, &cancel)
        .await
        .map(|(identity, _)| identity)
}

#[tokio::test]
async fn test_missing_identity_daemon_is_unavailable() {
    init_tracing();
    let sockets = DaemonSockets::new();

    let err = run_bootstrap(&sockets, TestEngine::default())
        .await
        .expect_err("no identity daemon");
    assert!(matches!(err, Error::IdentityUnavailable(_)));
    assert_eq!(err.category(), "identity");
    assert!(err.is_fatal());
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn test_envelope_without_spec_is_malformed() {
    init_tracing();
    let sockets = DaemonSockets::new();
    let _identityd = FakeDaemon::fixed(&sockets.identity, 200, json!({ "type": "aziot" }));

    let err = run_bootstrap(&sockets, TestEngine::default())
        .await
        .expect_err("no spec");
    assert!(matches!(err, Error::MalformedIdentity(_)));
}

#[tokio::test]
async fn test_unknown_auth_type_is_unsupported() {
    init_tracing();
    let sockets = DaemonSockets::new();
    let _identityd = FakeDaemon::fixed(
        &sockets.identity,
        200,
        identity_envelope(json!({
            "hubName": "h",
            "deviceId": "d",
            "auth": { "type": "tpm", "keyHandle": "k" }
        })),
    );

    let err = run_bootstrap(&sockets, TestEngine::default())
        .await
        .expect_err("unsupported auth");
    assert!(matches!(err, Error::UnsupportedAuthType(kind) if kind == "tpm"));
}

#[tokio::test]
async fn test_bundle_with_two_leaves_is_ambiguous() {
    init_tracing();
    let sockets = DaemonSockets::new();
    let _identityd = FakeDaemon::fixed(&sockets.identity, 200, x509_identity());
    let _certd = FakeDaemon::fixed(
        &sockets.cert,
        200,
        json!({ "pem": format!("{}{}{}", leaf_pem(), ca_pem(), leaf_pem()) }),
    );

    let err = run_bootstrap(&sockets, TestEngine::with_keys(&["device-key"]))
        .await
        .expect_err("two leaves");
    assert!(matches!(
        err,
        Error::Certificate(CertificateError::AmbiguousLeafCertificate { count: 2 })
    ));
    assert_eq!(err.category(), "certificate");
}

#[tokio::test]
async fn test_bundle_with_only_ca_entries_has_no_leaf() {
    init_tracing();
    let sockets = DaemonSockets::new();
    let _identityd = FakeDaemon::fixed(&sockets.identity, 200, x509_identity());
    let _certd = FakeDaemon::fixed(&sockets.cert, 200, json!({ "pem": ca_pem() }));

    let err = run_bootstrap(&sockets, TestEngine::with_keys(&["device-key"]))
        .await
        .expect_err("no leaf");
    assert!(matches!(
        err,
        Error::Certificate(CertificateError::NoLeafCertificate)
    ));
}

#[tokio::test]
async fn test_certificate_daemon_error_status_is_malformed_response() {
    init_tracing();
    let sockets = DaemonSockets::new();
    let _identityd = FakeDaemon::fixed(&sockets.identity, 200, x509_identity());
    let _certd = FakeDaemon::fixed(&sockets.cert, 404, json!({ "message": "not found" }));

    let err = run_bootstrap(&sockets, TestEngine::with_keys(&["device-key"]))
        .await
        .expect_err("404");
    assert!(matches!(err, Error::MalformedResponse { .. }));
}

#[tokio::test]
async fn test_missing_certificate_daemon_is_transport_unavailable() {
    init_tracing();
    let sockets = DaemonSockets::new();
    let _identityd = FakeDaemon::fixed(&sockets.identity, 200, x509_identity());

    let err = run_bootstrap(&sockets, TestEngine::with_keys(&["device-key"]))
        .await
        .expect_err("no certd");
    assert!(matches!(err, Error::TransportUnavailable { .. }));
    assert_eq!(err.category(), "transport");
}

#[tokio::test]
async fn test_engine_without_key_reports_requested_handle() {
    init_tracing();
    let sockets = DaemonSockets::new();
    let _identityd = FakeDaemon::fixed(&sockets.identity, 200, x509_identity());
    let _certd = FakeDaemon::fixed(
        &sockets.cert,
        200,
        json!({ "pem": format!("{}{}", ca_pem(), leaf_pem()) }),
    );

    let err = run_bootstrap(&sockets, TestEngine::with_keys(&["other-key"]))
        .await
        .expect_err("key missing");
    assert!(matches!(err, Error::KeyHandleNotFound { key_handle } if key_handle == "device-key"));
}

#[tokio::test]
async fn test_engine_key_for_another_certificate_is_rejected() {
    init_tracing();
    let sockets = DaemonSockets::new();
    let _identityd = FakeDaemon::fixed(&sockets.identity, 200, x509_identity());
    let _certd = FakeDaemon::fixed(
        &sockets.cert,
        200,
        json!({ "pem": format!("{}{}", ca_pem(), leaf_pem()) }),
    );

    let err = run_bootstrap(&sockets, TestEngine::with_foreign_keys(&["device-key"]))
        .await
        .expect_err("key mismatch");
    assert!(matches!(
        err,
        Error::KeyCertificateMismatch { ref key_handle, .. } if key_handle == "device-key"
    ));
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn test_build_without_engine_support_is_unavailable() {
    init_tracing();
    let sockets = DaemonSockets::new();
    let _identityd = FakeDaemon::fixed(&sockets.identity, 200, x509_identity());
    let _certd = FakeDaemon::fixed(
        &sockets.cert,
        200,
        json!({ "pem": format!("{}{}", ca_pem(), leaf_pem()) }),
    );

    let err = run_bootstrap(&sockets, UnavailableEngine)
        .await
        .expect_err("no engine");
    assert!(matches!(err, Error::EngineUnavailable { engine, .. } if engine == "aziot_keys"));
}

#[tokio::test]
async fn test_key_daemon_without_signature_is_rejected() {
    init_tracing();
    let sockets = DaemonSockets::new();
    let _identityd = FakeDaemon::fixed(
        &sockets.identity,
        200,
        identity_envelope(json!({
            "hubName": "h",
            "deviceId": "d",
            "auth": { "type": "sas", "keyHandle": "sas-key" }
        })),
    );
    let _keyd = FakeDaemon::fixed(&sockets.key, 200, json!({}));

    let err = run_bootstrap(&sockets, TestEngine::default())
        .await
        .expect_err("no signature");
    assert!(matches!(err, Error::SigningRejected(_)));
    assert_eq!(err.category(), "signing");
}

#[tokio::test]
async fn test_missing_key_daemon_is_signing_unavailable() {
    init_tracing();
    let sockets = DaemonSockets::new();
    let _identityd = FakeDaemon::fixed(
        &sockets.identity,
        200,
        identity_envelope(json!({
            "hubName": "h",
            "deviceId": "d",
            "auth": { "type": "sas", "keyHandle": "sas-key" }
        })),
    );

    let err = run_bootstrap(&sockets, TestEngine::default())
        .await
        .expect_err("no keyd");
    assert!(matches!(err, Error::SigningServiceUnavailable(_)));
}

#[tokio::test]
async fn test_cancelled_bootstrap_exits_cleanly() {
    init_tracing();
    let sockets = DaemonSockets::new();
    let _identityd = FakeDaemon::fixed(&sockets.identity, 200, x509_identity());

    let identity_client = IdentityClient::from_config(&sockets.config.daemons);
    let mut assembler = assembler_for(&sockets, TestEngine::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = bootstrap(&identity_client, &mut assembler, &cancel)
        .await
        .expect_err("cancelled");
    assert!(matches!(err, Error::Cancelled));
    assert!(!err.is_fatal());
    assert_eq!(err.exit_code(), 0);
}
