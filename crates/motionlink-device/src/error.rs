use thiserror::Error;

/// Top-level error type for the `motionlink-device` crate.
///
/// Covers every failure mode across the transport and protocol surfaces:
/// port discovery, link establishment, raw I/O, request/response
/// correlation, handshake, and firmware flashing. `motionlink-core` maps
/// these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum DeviceError {
    // ── Discovery / link ────────────────────────────────────────────
    /// Enumerating candidate ports failed at the OS level.
    #[error("Port discovery failed: {reason}")]
    Discovery { reason: String },

    /// No device matching the USB id filter was found.
    #[error("No matching device found")]
    DeviceNotFound,

    /// Opening the link failed (port busy, permissions, unplugged).
    #[error("Failed to open {target}: {reason}")]
    Open { target: String, reason: String },

    /// Operation attempted on a link that is not connected.
    #[error("Transport not connected")]
    NotConnected,

    /// The link dropped while an operation was in flight.
    #[error("Link closed")]
    LinkClosed,

    // ── I/O ─────────────────────────────────────────────────────────
    /// Raw read/write error from the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Protocol ────────────────────────────────────────────────────
    /// No response arrived for a command within the per-request timeout.
    #[error("Response timed out for message {id:#06x} after {timeout_ms}ms")]
    ResponseTimeout { id: u16, timeout_ms: u64 },

    /// The remote answered a command with an error indicator.
    #[error("Device rejected message {id:#06x}: {code}")]
    Remote { id: u16, code: String },

    /// Every handshake attempt timed out.
    #[error("Handshake failed after {attempts} attempts")]
    HandshakeFailed { attempts: u32 },

    /// The remote speaks a different protocol version.
    #[error("Protocol version mismatch: expected {expected}, device reports {got}")]
    VersionMismatch { expected: u32, got: u32 },

    /// A characteristic operation the transport cannot perform
    /// (e.g. GATT reads on a plain serial link).
    #[error("Operation not supported by this transport: {0}")]
    Unsupported(&'static str),

    // ── Flashing ────────────────────────────────────────────────────
    /// The debug probe's mass-storage volume could not be located.
    #[error("Flash volume not found")]
    FlashVolumeNotFound,

    /// Copying the firmware image onto the probe failed.
    #[error("Firmware flash failed: {reason}")]
    Flash { reason: String },
}

impl DeviceError {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ResponseTimeout { .. } | Self::LinkClosed
        )
    }

    /// Returns `true` if this failure ends the connection attempt for good
    /// (retrying without operator intervention will not help).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::HandshakeFailed { .. } | Self::VersionMismatch { .. } | Self::Unsupported(_)
        )
    }
}
