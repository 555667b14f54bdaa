// ── Runtime session configuration ──
//
// Describes *how* a device session behaves: timeouts, reconnect policy,
// buffer sizing. The CLI (or another host) constructs a `SessionConfig`
// and hands it in -- core never reads config files.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a single device session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Advertised device name filter for wireless discovery
    /// (e.g. `"BBC micro:bit [gazov]"`). Unused for serial links.
    pub device_name: Option<String>,

    /// Per-request response timeout on the wire protocol.
    pub response_timeout: Duration,

    /// Connect-then-ready deadline. Expiry triggers catastrophic
    /// recovery, not a retry.
    pub connect_timeout: Duration,

    /// Maximum silence between periodic messages while `Connected`
    /// before the session proactively reconnects.
    pub liveness_timeout: Duration,

    /// Reconnect attempts after an unexpected link loss before giving
    /// up and triggering catastrophic recovery.
    pub reconnect_attempts: u32,

    /// Delay between reconnect attempts.
    pub reconnect_delay: Duration,

    /// Capacity of the sample ring. At device cadence (~50 Hz) the
    /// default holds a little over ten seconds of samples.
    pub ring_capacity: usize,

    /// Capacity of the outbound write queue.
    pub write_queue_capacity: usize,

    /// Where to persist the resume marker on catastrophic failure.
    /// `None` disables persistence (tests, embedded hosts).
    pub resume_marker: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            response_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(10),
            liveness_timeout: Duration::from_millis(1500),
            reconnect_attempts: 3,
            reconnect_delay: Duration::from_millis(500),
            ring_capacity: 600,
            write_queue_capacity: 32,
            resume_marker: None,
        }
    }
}
