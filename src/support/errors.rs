use thiserror::Error;

/// Connect-time and lookup failures from the session registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid charge point identity")]
    InvalidIdentity,

    #[error("charge point {0} already connected")]
    RejectedConnection(String),

    #[error("charge point {0} is not connected")]
    NotConnected(String),
}

/// Telemetry durability failures. Degraded-but-live: these are surfaced to
/// operators, never to the charge point.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("time-series write failed: {0}")]
    WriteFailed(String),

    #[error("telemetry queue closed")]
    QueueClosed,
}
