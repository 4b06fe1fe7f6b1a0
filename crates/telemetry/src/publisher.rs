//! Resilient publish loop.
//!
//! ```text
//! Idle ─► Connecting ─► Connected ─► Publishing ⇄ Retrying
//!                                        │
//!                                        ▼
//!                                    Stopping ─► Closed
//! ```
//!
//! Connect failures are returned to the caller. Once publishing, send
//! failures are logged and the loop carries on; only cancellation reaches
//! `Closed`.

use edgecred_core::{CancellationToken, Error, Result};
use edgecred_identity::Credential;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

use crate::sampler::TelemetrySampler;
use crate::transport::{Connector, SendError, TransportSession};

/// Publisher lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    Idle,
    Connecting,
    Connected,
    Publishing,
    /// Waiting out the delay after a failed send
    Retrying,
    Stopping,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    TransientFailure,
    /// Unclassified failure; logged, never terminal
    FatalFailure,
}

/// Record of a single send. Lives for one loop iteration.
#[derive(Debug)]
pub struct PublishAttempt {
    pub sequence_number: u64,
    pub payload: Vec<u8>,
    pub outcome: AttemptOutcome,
}

/// Totals returned when the loop is cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub attempts: u64,
    pub sent: u64,
    pub transient_failures: u64,
    pub unexpected_failures: u64,
    pub final_state: PublisherState,
}

/// Owns the open session and runs the send loop until cancelled.
pub struct ResilientPublisher<S> {
    sampler: S,
    interval: Duration,
    state: PublisherState,
    session: Option<Box<dyn TransportSession>>,
    sequence_number: u64,
    token_expiry: Option<u64>,
    expiry_warned: bool,
}

impl<S: TelemetrySampler> ResilientPublisher<S> {
    pub fn new(sampler: S, interval: Duration) -> Self {
        Self {
            sampler,
            interval,
            state: PublisherState::Idle,
            session: None,
            sequence_number: 0,
            token_expiry: None,
            expiry_warned: false,
        }
    }

    pub fn state(&self) -> PublisherState {
        self.state
    }

    /// Sequence number of the next message; advances only on success.
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Open the session with `credential`. Not retried.
    pub async fn connect<C>(&mut self, connector: &C, credential: Credential) -> Result<()>
    where
        C: Connector + ?Sized,
    {
        self.state = PublisherState::Connecting;
        self.token_expiry = credential.expiry();
        let kind = credential.kind();

        match connector.open(credential).await {
            Ok(session) => {
                self.session = Some(session);
                self.state = PublisherState::Connected;
                info!(credential = kind, "Transport session connected");
                Ok(())
            }
            Err(err) => {
                self.state = PublisherState::Closed;
                error!(
                    credential = kind,
                    category = err.category(),
                    error = %err,
                    "Transport session failed to open"
                );
                Err(match err {
                    Error::Connect(reason) => Error::Connect(reason),
                    other => Error::Connect(other.to_string()),
                })
            }
        }
    }

    /// Publish until `cancel` fires, then close the session.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<PublishReport> {
        let Some(mut session) = self.session.take() else {
            return Err(Error::Connect("publisher is not connected".into()));
        };

        let mut report = PublishReport {
            attempts: 0,
            sent: 0,
            transient_failures: 0,
            unexpected_failures: 0,
            final_state: self.state,
        };
        self.state = PublisherState::Publishing;
        info!(interval_ms = self.interval.as_millis() as u64, "Publish loop started");

        while !cancel.is_cancelled() {
            self.state = PublisherState::Publishing;
            self.check_token_expiry();

            let message = self.sampler.next_message(self.sequence_number);
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(sequence = self.sequence_number, "Send abandoned on cancellation");
                    break;
                }
                result = session.send(&message) => result,
            };
            report.attempts += 1;

            let attempt = PublishAttempt {
                sequence_number: self.sequence_number,
                payload: message.body,
                outcome: self.classify(result, &mut report),
            };
            debug!(
                sequence = attempt.sequence_number,
                bytes = attempt.payload.len(),
                outcome = ?attempt.outcome,
                "Publish attempt finished"
            );
            drop(attempt);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        self.state = PublisherState::Stopping;
        info!(sent = report.sent, attempts = report.attempts, "Stopping publish loop");
        session.close().await;
        self.state = PublisherState::Closed;

        report.final_state = self.state;
        Ok(report)
    }

    fn classify(
        &mut self,
        result: std::result::Result<(), SendError>,
        report: &mut PublishReport,
    ) -> AttemptOutcome {
        match result {
            Ok(()) => {
                info!(sequence = self.sequence_number, "Telemetry message sent");
                self.sequence_number += 1;
                report.sent += 1;
                AttemptOutcome::Success
            }
            Err(err) if err.is_transient() => {
                warn!(
                    sequence = self.sequence_number,
                    reason = %err.reason,
                    "Transient send failure; continuing"
                );
                self.state = PublisherState::Retrying;
                report.transient_failures += 1;
                AttemptOutcome::TransientFailure
            }
            Err(err) => {
                error!(
                    sequence = self.sequence_number,
                    reason = %err.reason,
                    "Unexpected send failure; continuing"
                );
                self.state = PublisherState::Retrying;
                report.unexpected_failures += 1;
                AttemptOutcome::FatalFailure
            }
        }
    }

    // Tokens are never renewed; sends are expected to fail once this fires.
    fn check_token_expiry(&mut self) {
        let Some(expiry) = self.token_expiry else {
            return;
        };
        if self.expiry_warned {
            return;
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        if now >= expiry {
            warn!(expiry, "SAS token has expired and will not be renewed");
            self.expiry_warned = true;
        }
    }
}
