//! Identity certificate retrieval and CA/leaf classification.
//!
//! The certificate daemon returns the device identity certificate together
//! with its issuing chain as one PEM blob. Blocks are located by their
//! delimiters rather than parsed as a PEM grammar, then each decoded
//! certificate is classified by its basic-constraints extension.

use async_trait::async_trait;
use base64::prelude::*;
use edgecred_core::{config::DaemonConfig, CertificateError, Error, Result, UdsHttpClient};
use serde::Deserialize;
use tracing::{debug, info};
use x509_parser::prelude::{FromDer, X509Certificate};

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// One decoded certificate from a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateEntry {
    /// DER encoding
    pub der: Vec<u8>,
    /// Subject distinguished name, for diagnostics only
    pub subject: String,
    /// True when basic constraints mark the certificate as a CA
    pub is_certificate_authority: bool,
}

impl CertificateEntry {
    /// Decode and classify one DER certificate. `index` is the block position
    /// in the source bundle and is only used for error reporting.
    pub fn from_der(index: usize, der: Vec<u8>) -> std::result::Result<Self, CertificateError> {
        let (subject, is_certificate_authority) = {
            let (_, parsed) =
                X509Certificate::from_der(&der).map_err(|e| CertificateError::InvalidDer {
                    index,
                    reason: e.to_string(),
                })?;
            // A missing extension means an end-entity certificate.
            let is_ca = parsed
                .basic_constraints()
                .map_err(|e| CertificateError::InvalidDer {
                    index,
                    reason: e.to_string(),
                })?
                .map(|ext| ext.value.ca)
                .unwrap_or(false);
            (parsed.subject().to_string(), is_ca)
        };

        Ok(Self {
            der,
            subject,
            is_certificate_authority,
        })
    }

    /// DER-encoded SubjectPublicKeyInfo of this certificate.
    pub fn public_key_der(&self) -> std::result::Result<Vec<u8>, CertificateError> {
        let (_, parsed) =
            X509Certificate::from_der(&self.der).map_err(|e| CertificateError::InvalidDer {
                index: 0,
                reason: e.to_string(),
            })?;
        Ok(parsed.tbs_certificate.subject_pki.raw.to_vec())
    }
}

/// Ordered certificates with exactly one leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    entries: Vec<CertificateEntry>,
    leaf_index: usize,
}

impl CertificateBundle {
    /// Build a bundle, enforcing the single-leaf invariant.
    pub fn from_entries(
        entries: Vec<CertificateEntry>,
    ) -> std::result::Result<Self, CertificateError> {
        if entries.is_empty() {
            return Err(CertificateError::NoCertificatesFound);
        }

        let mut leaves = entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.is_certificate_authority)
            .map(|(index, _)| index);

        let leaf_index = leaves.next().ok_or(CertificateError::NoLeafCertificate)?;
        let extra = leaves.count();
        if extra > 0 {
            return Err(CertificateError::AmbiguousLeafCertificate { count: extra + 1 });
        }

        Ok(Self {
            entries,
            leaf_index,
        })
    }

    /// Scan a PEM blob, decode every certificate block and classify it.
    pub fn from_pem(pem: &str) -> std::result::Result<Self, CertificateError> {
        let entries = extract_pem_blocks(pem)
            .into_iter()
            .enumerate()
            .map(|(index, body)| {
                let der = BASE64_STANDARD.decode(body.as_bytes()).map_err(|e| {
                    CertificateError::InvalidEncoding {
                        index,
                        reason: e.to_string(),
                    }
                })?;
                CertificateEntry::from_der(index, der)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Self::from_entries(entries)
    }

    /// All certificates in source order.
    pub fn entries(&self) -> &[CertificateEntry] {
        &self.entries
    }

    /// The device (leaf) certificate.
    pub fn leaf(&self) -> &CertificateEntry {
        &self.entries[self.leaf_index]
    }

    /// CA certificates in source order.
    pub fn ca_chain(&self) -> impl Iterator<Item = &CertificateEntry> {
        self.entries
            .iter()
            .enumerate()
            .filter(move |(index, _)| *index != self.leaf_index)
            .map(|(_, entry)| entry)
    }

    /// Split into the leaf and the CA chain.
    pub fn into_parts(mut self) -> (CertificateEntry, Vec<CertificateEntry>) {
        let leaf = self.entries.remove(self.leaf_index);
        (leaf, self.entries)
    }
}

/// Extract the base64 bodies of all `CERTIFICATE` blocks in `pem`.
///
/// Whitespace inside a block is dropped. A block ends at the first end
/// delimiter after its begin delimiter; if another begin delimiter appears
/// first, the earlier unterminated block is discarded. Empty blocks are
/// skipped.
pub fn extract_pem_blocks(pem: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut rest = pem;

    while let Some(start) = rest.find(PEM_BEGIN) {
        let body_start = &rest[start + PEM_BEGIN.len()..];
        let Some(end) = body_start.find(PEM_END) else {
            break;
        };
        let body = &body_start[..end];

        if let Some(inner) = body.rfind(PEM_BEGIN) {
            rest = &body_start[inner..];
            continue;
        }

        let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
        if !compact.is_empty() {
            blocks.push(compact);
        }
        rest = &body_start[end + PEM_END.len()..];
    }

    blocks
}

/// Anything that can return a PEM bundle by certificate id.
#[async_trait]
pub trait CertificateSource: Send + Sync {
    async fn fetch_pem(&self, cert_id: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct CertificateResponse {
    pem: Option<String>,
}

/// Certificate daemon client.
#[derive(Debug, Clone)]
pub struct CertdClient {
    http: UdsHttpClient,
    api_version: String,
}

impl CertdClient {
    pub fn new(http: UdsHttpClient, api_version: impl Into<String>) -> Self {
        Self {
            http,
            api_version: api_version.into(),
        }
    }

    pub fn from_config(config: &DaemonConfig) -> Self {
        Self::new(
            UdsHttpClient::new(&config.cert_socket),
            config.api_version.clone(),
        )
    }
}

#[async_trait]
impl CertificateSource for CertdClient {
    async fn fetch_pem(&self, cert_id: &str) -> Result<String> {
        let path = format!(
            "/certificates/{}?api-version={}",
            urlencoding::encode(cert_id),
            self.api_version
        );
        let response: CertificateResponse = self.http.get_json(&path).await?;
        response.pem.ok_or_else(|| Error::MalformedResponse {
            endpoint: self.http.endpoint(),
            reason: format!("certificate '{cert_id}' response has no 'pem' field"),
        })
    }
}

/// Resolves a certificate id into a classified bundle.
#[derive(Debug, Clone)]
pub struct CertificateChainResolver<S = CertdClient> {
    source: S,
}

impl<S: CertificateSource> CertificateChainResolver<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub async fn resolve(&self, cert_id: &str) -> Result<CertificateBundle> {
        info!(cert_id, "Obtaining identity certificate");

        let pem = self.source.fetch_pem(cert_id).await?;
        let bundle = CertificateBundle::from_pem(&pem)?;

        for entry in bundle.entries() {
            debug!(
                subject = %entry.subject,
                ca = entry.is_certificate_authority,
                "Classified certificate"
            );
        }
        info!(
            cert_id,
            leaf = %bundle.leaf().subject,
            ca_count = bundle.entries().len() - 1,
            "Certificate chain resolved"
        );
        Ok(bundle)
    }
}
