// ── Transport capability seam ──
//
// The session layer and the protocol client are written against this
// trait, never against a concrete link. Platform GATT objects are
// side-effecting and host-owned; the serial implementation in this crate
// and deterministic fakes in tests both satisfy the same contract.

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::DeviceError;

/// USB vendor id of the board's debug probe.
pub const USB_VENDOR_ID: u16 = 0x0d28;
/// USB product id of the board's debug probe.
pub const USB_PRODUCT_ID: u16 = 0x0204;

/// Capacity of the inbound event channel. Periodic traffic at device
/// cadence (~50 Hz) stays far below this; a slow subscriber lags rather
/// than blocking the read pump.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ── UsbIdFilter ──────────────────────────────────────────────────────

/// Vendor/product filter applied during port discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbIdFilter {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl Default for UsbIdFilter {
    fn default() -> Self {
        Self {
            vendor_id: USB_VENDOR_ID,
            product_id: USB_PRODUCT_ID,
        }
    }
}

impl UsbIdFilter {
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

// ── Link kind ────────────────────────────────────────────────────────

/// Which family of link a transport provides. The session layer uses this
/// to pick between the text wire protocol (serial) and characteristic
/// operations (GATT).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Serial,
    Gatt,
}

// ── TransportEvent ───────────────────────────────────────────────────

/// Inbound traffic and lifecycle signals from a transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A chunk of raw bytes from a serial link. Chunk boundaries are
    /// arbitrary; the codec reassembles frames.
    Data(Vec<u8>),

    /// A GATT notification for a subscribed characteristic.
    Notification { characteristic: Uuid, value: Vec<u8> },

    /// The link dropped. May be delivered more than once for a single
    /// logical disconnect; consumers must deduplicate.
    Disconnected,
}

// ── DeviceTransport ──────────────────────────────────────────────────

/// Async capability interface over a physical device link.
///
/// All methods take `&self`; implementations use interior mutability so a
/// single transport can be shared between the read pump, the write queue,
/// and the session state machine. The characteristic operations default to
/// [`DeviceError::Unsupported`] so serial links only implement the byte
/// surface.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Which protocol family this link speaks.
    fn kind(&self) -> LinkKind;

    /// Establish the link and start delivering [`TransportEvent`]s.
    async fn connect(&self) -> Result<(), DeviceError>;

    /// Write one raw outbound frame/payload.
    async fn write(&self, data: &[u8]) -> Result<(), DeviceError>;

    /// Subscribe to inbound events. May be called before `connect`;
    /// events only flow while the link is up.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    /// Tear the link down. Idempotent.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Read a characteristic value (GATT links only).
    async fn read_characteristic(&self, characteristic: Uuid) -> Result<Vec<u8>, DeviceError> {
        let _ = characteristic;
        Err(DeviceError::Unsupported("read_characteristic"))
    }

    /// Write a characteristic value (GATT links only).
    async fn write_characteristic(
        &self,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), DeviceError> {
        let _ = (characteristic, value);
        Err(DeviceError::Unsupported("write_characteristic"))
    }

    /// Enable notifications for a characteristic (GATT links only).
    async fn subscribe_characteristic(&self, characteristic: Uuid) -> Result<(), DeviceError> {
        let _ = characteristic;
        Err(DeviceError::Unsupported("subscribe_characteristic"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_matches_probe_ids() {
        let filter = UsbIdFilter::default();
        assert!(filter.matches(0x0d28, 0x0204));
        assert!(!filter.matches(0x0d28, 0x0001));
        assert!(!filter.matches(0x1234, 0x0204));
    }
}
