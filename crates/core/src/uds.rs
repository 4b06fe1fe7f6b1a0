//! HTTP/1.1 over Unix domain sockets for the local daemons.
//!
//! Every exchange opens a fresh connection, hands it to a hyper http1 client
//! and sends `Connection: close`. Framing (`Content-Length`, chunked, close
//! delimited) is left to hyper.

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::client::conn::http1;
use hyper::header::{CONNECTION, CONTENT_TYPE, HOST};
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use tokio::net::UnixStream;
use tracing::debug;

use crate::error::{Error, Result};

/// Raw response from a daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Client bound to one daemon socket.
#[derive(Debug, Clone)]
pub struct UdsHttpClient {
    socket: PathBuf,
    host: String,
}

impl UdsHttpClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        let socket = socket.into();
        // The Host header only needs to be syntactically valid; daemons
        // route on path alone.
        let host = socket
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .unwrap_or("localhost")
            .to_string();
        Self { socket, host }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Human-readable endpoint used in errors and logs.
    pub fn endpoint(&self) -> String {
        format!("unix://{}", self.socket.display())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.request(Method::GET, path, None).await?;
        self.decode(path, response)
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_vec(body)?;
        let response = self.request(Method::POST, path, Some(body)).await?;
        self.decode(path, response)
    }

    /// Perform one request and return the raw response.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse> {
        let stream = UnixStream::connect(&self.socket)
            .await
            .map_err(|e| self.unavailable(e))?;
        let (mut sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| self.unavailable(e))?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!(error = %err, "daemon connection ended with error");
            }
        });

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(path)
            .header(HOST, self.host.as_str())
            .header(CONNECTION, "close");
        let payload = match body {
            Some(body) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Full::new(Bytes::from(body))
            }
            None => Full::new(Bytes::new()),
        };
        let request = builder
            .body(payload)
            .map_err(|e| Error::Config(format!("invalid daemon request '{path}': {e}")))?;

        debug!(endpoint = %self.endpoint(), %method, path, "daemon request");
        let response = sender.send_request(request).await.map_err(|e| {
            if e.is_parse() {
                self.malformed(e)
            } else {
                self.unavailable(e)
            }
        })?;

        let status = response.status().as_u16();
        // Framing errors past the status line are reported as malformed.
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| self.malformed(e))?
            .to_bytes()
            .to_vec();

        Ok(HttpResponse { status, body })
    }

    fn unavailable(&self, reason: impl ToString) -> Error {
        Error::TransportUnavailable {
            endpoint: self.endpoint(),
            reason: reason.to_string(),
        }
    }

    fn malformed(&self, reason: impl ToString) -> Error {
        Error::MalformedResponse {
            endpoint: self.endpoint(),
            reason: reason.to_string(),
        }
    }

    fn decode<T: DeserializeOwned>(&self, path: &str, response: HttpResponse) -> Result<T> {
        if !response.is_success() {
            return Err(Error::MalformedResponse {
                endpoint: format!("{}{}", self.endpoint(), path),
                reason: format!(
                    "status {}: {}",
                    response.status,
                    String::from_utf8_lossy(&response.body)
                ),
            });
        }
        serde_json::from_slice(&response.body).map_err(|e| Error::MalformedResponse {
            endpoint: format!("{}{}", self.endpoint(), path),
            reason: e.to_string(),
        })
    }
}
