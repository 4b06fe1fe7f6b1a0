//! edgecred telemetry
//!
//! Sampling, the transport session contract, and the publish loop that runs
//! after bootstrap until the process is cancelled.

pub mod publisher;
pub mod sampler;
pub mod transport;

pub use publisher::{AttemptOutcome, PublishAttempt, PublishReport, PublisherState, ResilientPublisher};
pub use sampler::{SensorSampler, TelemetryMessage, TelemetrySampler};
pub use transport::{
    Connector, DryRunConnector, DryRunSession, SendError, SendErrorKind, SendResult,
    TransportSession,
};
