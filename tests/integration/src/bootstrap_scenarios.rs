//! Bootstrap against fake daemons: X.509 and SAS strategies end to end.

use crate::test_utils::*;
use base64::prelude::*;
use edgecred_core::CancellationToken;
use edgecred_identity::{
    bootstrap, CertdClient, Credential, CredentialAssembler, EngineBackend, IdentityClient,
    KeydClient,
};
use serde_json::json;

pub(crate) fn assembler_for<B: EngineBackend>(
    sockets: &DaemonSockets,
    engine: B,
) -> CredentialAssembler<CertdClient, KeydClient, B> {
    CredentialAssembler::with_engine(&sockets.config, engine)
}

fn sas_identity(gateway: &str) -> serde_json::Value {
    identity_envelope(json!({
        "hubName": "h",
        "gatewayHost": gateway,
        "deviceId": "d",
        "moduleId": "m",
        "auth": { "type": "sas", "keyHandleRef": "sas-key" }
    }))
}

#[tokio::test]
async fn test_x509_bundle_yields_one_leaf_and_one_ca() {
    init_tracing();
    let sockets = DaemonSockets::new();
    let _identityd = FakeDaemon::fixed(
        &sockets.identity,
        200,
        identity_envelope(json!({
            "hubName": "h",
            "deviceId": "d",
            "auth": { "type": "x509", "keyHandle": "device-key", "certId": "c1" }
        })),
    );
    let certd = FakeDaemon::fixed(
        &sockets.cert,
        200,
        json!({ "pem": format!("{}{}", ca_pem(), leaf_pem()) }),
    );
    let keyd = FakeDaemon::fixed(&sockets.key, 500, json!({ "message": "not expected" }));

    let identity_client = IdentityClient::from_config(&sockets.config.daemons);
    let mut assembler = assembler_for(&sockets, TestEngine::with_keys(&["device-key"]));
    let cancel = CancellationToken::new();

    let (identity, credential) = bootstrap(&identity_client, &mut assembler, &cancel)
        .await
        .expect("bootstrap");

    assert_eq!(identity.gateway_host, "h");
    assert!(credential.expiry().is_none());
    let Credential::X509(x509) = credential else {
        panic!("expected an X.509 credential");
    };
    assert_eq!(x509.device_id, "d");
    assert!(!x509.leaf_certificate.is_certificate_authority);
    assert_eq!(x509.ca_chain.len(), 1);
    assert!(x509.ca_chain[0].is_certificate_authority);
    assert_eq!(x509.key_handle.key_ref(), "device-key");
    assert_eq!(x509.key_handle.sign(b"ab").expect("engine sign"), b"ba");

    let requests = certd.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/certificates/c1?api-version=2020-09-01");
    assert!(keyd.requests().is_empty());
}

#[tokio::test]
async fn test_sas_descriptor_without_gateway() {
    init_tracing();
    let sockets = DaemonSockets::new();
    let identityd = FakeDaemon::fixed(&sockets.identity, 200, sas_identity("h"));
    let keyd = FakeDaemon::fixed(&sockets.key, 200, json!({ "signature": "abc" }));

    let identity_client = IdentityClient::from_config(&sockets.config.daemons);
    let mut assembler = assembler_for(&sockets, TestEngine::default());
    let cancel = CancellationToken::new();

    let (_, credential) = bootstrap(&identity_client, &mut assembler, &cancel)
        .await
        .expect("bootstrap");
    let Credential::Sas(sas) = credential else {
        panic!("expected a SAS credential");
    };

    let target = sas.connection_target.as_str();
    assert!(target.starts_with(
        "HostName=h;DeviceId=d;ModuleId=m;SharedAccessSignature=SharedAccessSignature sr=h%2Fdevices%2Fd%2Fmodules%2Fm&se="
    ));
    assert!(target.ends_with(&format!("&se={}&sig=abc", sas.token_expiry)));
    assert!(!target.contains("GatewayHost="));

    assert_eq!(
        identityd.requests()[0].path,
        "/identities/identity?api-version=2020-09-01"
    );

    let requests = keyd.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, "/sign?api-version=2020-09-01");

    let body = requests[0].json();
    assert_eq!(body["keyHandle"], "sas-key");
    assert_eq!(body["algorithm"], "HMAC-SHA256");
    let message = body["parameters"]["message"].as_str().expect("message");
    let canonical = BASE64_STANDARD.decode(message).expect("base64 message");
    assert_eq!(
        String::from_utf8(canonical).expect("utf8"),
        format!("h%2Fdevices%2Fd%2Fmodules%2Fm\n{}", sas.token_expiry)
    );
}

#[tokio::test]
async fn test_sas_descriptor_with_distinct_gateway() {
    init_tracing();
    let sockets = DaemonSockets::new();
    let _identityd = FakeDaemon::fixed(&sockets.identity, 200, sas_identity("g"));
    let _keyd = FakeDaemon::fixed(&sockets.key, 200, json!({ "signature": "abc" }));

    let identity_client = IdentityClient::from_config(&sockets.config.daemons);
    let mut assembler = assembler_for(&sockets, TestEngine::default());
    let cancel = CancellationToken::new();

    let (identity, credential) = bootstrap(&identity_client, &mut assembler, &cancel)
        .await
        .expect("bootstrap");
    assert!(identity.uses_gateway());

    let Credential::Sas(sas) = credential else {
        panic!("expected a SAS credential");
    };
    assert!(sas.connection_target.ends_with(";GatewayHost=g"));
    assert_eq!(sas.connection_target.matches("GatewayHost=").count(), 1);
}

#[tokio::test]
async fn test_sas_signature_is_url_encoded_in_descriptor() {
    init_tracing();
    let sockets = DaemonSockets::new();
    let _identityd = FakeDaemon::fixed(&sockets.identity, 200, sas_identity("h"));
    let _keyd = FakeDaemon::fixed(&sockets.key, 200, json!({ "signature": "a+b/c=" }));

    let identity_client = IdentityClient::from_config(&sockets.config.daemons);
    let mut assembler = assembler_for(&sockets, TestEngine::default());
    let cancel = CancellationToken::new();

    let (_, credential) = bootstrap(&identity_client, &mut assembler, &cancel)
        .await
        .expect("bootstrap");
    let Credential::Sas(sas) = credential else {
        panic!("expected a SAS credential");
    };
    assert!(sas.connection_target.ends_with("&sig=a%2Bb%2Fc%3D"));
    assert!(!format!("{sas:?}").contains("a%2Bb%2Fc%3D"));
}
