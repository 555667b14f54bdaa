// ── Core error types ──
//
// User-facing errors from motionlink-core. Consumers never see raw wire
// or port failures directly; the `From<DeviceError>` impl translates
// transport-layer errors into domain-appropriate variants.

use thiserror::Error;

use motionlink_device::DeviceError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to device: {reason}")]
    ConnectionFailed { reason: String },

    /// A connect attempt is already in flight for this session.
    #[error("Connection attempt already in progress")]
    ConnectInProgress,

    #[error("Device disconnected")]
    Disconnected,

    /// The connect-then-ready timeout expired. This is the catastrophic
    /// path: the session has already persisted a resume marker and
    /// invoked the recovery handler by the time the caller sees this.
    #[error("Device did not become ready within {timeout_secs}s")]
    ConnectTimeout { timeout_secs: u64 },

    #[error("Handshake failed: {reason}")]
    HandshakeFailed { reason: String },

    // ── Data errors ──────────────────────────────────────────────────
    /// The sample ring holds fewer in-window samples than requested.
    #[error("Insufficient data: requested {requested}, found {found}")]
    InsufficientData { requested: usize, found: usize },

    #[error("Vector dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    // ── Classification errors ────────────────────────────────────────
    #[error("Classifier has no trained model")]
    Untrained,

    /// The model produced a probability vector that does not line up
    /// with the gesture list.
    #[error("Model output mismatch: {classes} classes for {gestures} gestures")]
    ModelOutputMismatch { classes: usize, gestures: usize },

    // ── Recovery errors ──────────────────────────────────────────────
    #[error("Failed to persist resume marker: {0}")]
    ResumeMarker(#[from] std::io::Error),

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<DeviceError> for CoreError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::HandshakeFailed { attempts } => CoreError::HandshakeFailed {
                reason: format!("no valid response after {attempts} attempts"),
            },
            DeviceError::VersionMismatch { expected, got } => CoreError::HandshakeFailed {
                reason: format!("protocol version mismatch (expected {expected}, got {got})"),
            },
            DeviceError::NotConnected | DeviceError::LinkClosed => CoreError::Disconnected,
            other => CoreError::ConnectionFailed {
                reason: other.to_string(),
            },
        }
    }
}
