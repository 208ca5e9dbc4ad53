//! Error kinds that cross a component boundary — spec.md §7. Most
//! per-sample and per-packet failures are handled inline with a
//! `tracing::warn!` and never reach this type; it exists for the
//! failures that a caller actually needs to react to (config load,
//! log rotation, bus contention).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("malformed TLV: {0}")]
    MalformedTlv(String),

    #[error("transport unavailable: {0}")]
    TransportDown(String),

    #[error("storage I/O error: {0}")]
    StorageIo(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("timing source stale: {0}")]
    TimingStale(String),

    #[error("bus lock timeout")]
    BusLockTimeout,
}

impl From<iltm_tlv::TlvError> for TelemetryError {
    fn from(err: iltm_tlv::TlvError) -> Self {
        TelemetryError::MalformedTlv(err.to_string())
    }
}
