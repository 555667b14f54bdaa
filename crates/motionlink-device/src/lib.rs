// motionlink-device: transport and wire-protocol layer for sensor boards.

pub mod codec;
pub mod error;
pub mod gatt;
pub mod protocol;
pub mod serial;
pub mod testing;
pub mod transport;

pub use codec::{
    CommandVerb, FrameKind, PERIODIC_FRAME_LEN, PROTOCOL_VERSION, PeriodicReading, Response,
    ResponsePayload, SplitMessages, split_messages,
};
pub use error::DeviceError;
pub use protocol::ProtocolClient;
pub use serial::{DEFAULT_BAUD, DiscoveredPort, SerialTransport, discover_ports};
pub use transport::{
    DeviceTransport, LinkKind, TransportEvent, USB_PRODUCT_ID, USB_VENDOR_ID, UsbIdFilter,
};
