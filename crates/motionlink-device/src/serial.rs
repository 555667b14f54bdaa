// ── Serial-over-USB transport ──
//
// The board's debug probe exposes a CDC serial port and a mass-storage
// volume over the same USB link: the port bridges the byte stream the
// wire codec speaks, the volume accepts firmware images.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::sync::{Mutex, broadcast};
use tokio_serial::{SerialPortBuilderExt, SerialPortType, SerialStream};
use tokio_util::sync::CancellationToken;

use crate::error::DeviceError;
use crate::transport::{
    DeviceTransport, EVENT_CHANNEL_CAPACITY, LinkKind, TransportEvent, UsbIdFilter,
};

/// Baud rate the device firmware configures its UART bridge for.
pub const DEFAULT_BAUD: u32 = 115_200;

const READ_CHUNK: usize = 256;

// ── Discovery ────────────────────────────────────────────────────────

/// A candidate serial port that matched the USB id filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPort {
    pub path: String,
    pub serial_number: Option<String>,
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Enumerate serial ports whose USB ids match `filter`.
pub fn discover_ports(filter: &UsbIdFilter) -> Result<Vec<DiscoveredPort>, DeviceError> {
    let ports = tokio_serial::available_ports().map_err(|e| DeviceError::Discovery {
        reason: e.to_string(),
    })?;

    Ok(ports
        .into_iter()
        .filter_map(|info| match info.port_type {
            SerialPortType::UsbPort(usb) if filter.matches(usb.vid, usb.pid) => {
                Some(DiscoveredPort {
                    path: info.port_name,
                    serial_number: usb.serial_number,
                    vendor_id: usb.vid,
                    product_id: usb.pid,
                })
            }
            _ => None,
        })
        .collect())
}

// ── SerialTransport ──────────────────────────────────────────────────

/// `DeviceTransport` over a serial port opened with tokio-serial.
///
/// `connect` opens the port and spawns a read pump that chunks inbound
/// bytes onto the event channel; writes go through an interior mutex so
/// the transport can be shared behind an `Arc`.
pub struct SerialTransport {
    path: String,
    baud: u32,
    events: broadcast::Sender<TransportEvent>,
    writer: Mutex<Option<WriteHalf<SerialStream>>>,
    cancel: Mutex<Option<CancellationToken>>,
    connected: Arc<AtomicBool>,
}

impl SerialTransport {
    pub fn new(path: impl Into<String>, baud: u32) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            path: path.into(),
            baud,
            events,
            writer: Mutex::new(None),
            cancel: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl DeviceTransport for SerialTransport {
    fn kind(&self) -> LinkKind {
        LinkKind::Serial
    }

    async fn connect(&self) -> Result<(), DeviceError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        tracing::info!(port = %self.path, baud = self.baud, "opening serial port");

        let stream = tokio_serial::new(&self.path, self.baud)
            .open_native_async()
            .map_err(|e| DeviceError::Open {
                target: self.path.clone(),
                reason: e.to_string(),
            })?;

        let (mut reader, writer) = tokio::io::split(stream);
        *self.writer.lock().await = Some(writer);

        let cancel = CancellationToken::new();
        *self.cancel.lock().await = Some(cancel.clone());
        self.connected.store(true, Ordering::SeqCst);

        let events = self.events.clone();
        let connected = Arc::clone(&self.connected);
        let port = self.path.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    read = reader.read(&mut buf) => match read {
                        Ok(0) => {
                            tracing::warn!(port = %port, "serial port closed unexpectedly");
                            connected.store(false, Ordering::SeqCst);
                            let _ = events.send(TransportEvent::Disconnected);
                            break;
                        }
                        Ok(n) => {
                            let _ = events.send(TransportEvent::Data(buf[..n].to_vec()));
                        }
                        Err(e) => {
                            tracing::warn!(port = %port, error = %e, "serial read error");
                            connected.store(false, Ordering::SeqCst);
                            let _ = events.send(TransportEvent::Disconnected);
                            break;
                        }
                    }
                }
            }
            tracing::debug!(port = %port, "serial read pump exiting");
        });

        Ok(())
    }

    async fn write(&self, data: &[u8]) -> Result<(), DeviceError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(DeviceError::NotConnected)?;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) {
        if let Some(cancel) = self.cancel.lock().await.take() {
            cancel.cancel();
        }
        *self.writer.lock().await = None;
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ── Firmware flashing ────────────────────────────────────────────────

/// File the probe's mass-storage volume always carries; its presence
/// identifies the volume among mounted filesystems.
pub const FLASH_SIGNATURE_FILE: &str = "DETAILS.TXT";

const MOUNT_ROOTS: &[&str] = &["/media", "/run/media", "/Volumes"];

/// Locate the probe's mass-storage volume by scanning the usual mount
/// roots (one and two levels deep) for the signature file.
pub fn find_flash_volume() -> Option<PathBuf> {
    for root in MOUNT_ROOTS {
        let Ok(entries) = std::fs::read_dir(root) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.join(FLASH_SIGNATURE_FILE).is_file() {
                return Some(path);
            }
            // /run/media nests volumes under the user name.
            let Ok(nested) = std::fs::read_dir(&path) else {
                continue;
            };
            for sub in nested.flatten() {
                let sub_path = sub.path();
                if sub_path.join(FLASH_SIGNATURE_FILE).is_file() {
                    return Some(sub_path);
                }
            }
        }
    }
    None
}

/// Copy a firmware image onto the probe's mass-storage volume. The probe
/// programs the board and remounts itself when the copy completes.
pub async fn flash_firmware(volume: &Path, image: &[u8]) -> Result<(), DeviceError> {
    if !volume.join(FLASH_SIGNATURE_FILE).is_file() {
        return Err(DeviceError::FlashVolumeNotFound);
    }

    let target = volume.join("firmware.hex");
    tracing::info!(target = %target.display(), bytes = image.len(), "flashing firmware");

    tokio::fs::write(&target, image)
        .await
        .map_err(|e| DeviceError::Flash {
            reason: e.to_string(),
        })?;

    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_before_connect_is_rejected() {
        let transport = SerialTransport::new("/dev/null", DEFAULT_BAUD);
        let err = transport.write(b"C0001HS\n").await.unwrap_err();
        assert!(matches!(err, DeviceError::NotConnected));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn flash_rejects_volume_without_signature() {
        let dir = tempfile::tempdir().unwrap();
        let err = flash_firmware(dir.path(), b":00000001FF\n").await.unwrap_err();
        assert!(matches!(err, DeviceError::FlashVolumeNotFound));
    }

    #[tokio::test]
    async fn flash_writes_image_to_signed_volume() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(FLASH_SIGNATURE_FILE), "DAPLink").unwrap();

        flash_firmware(dir.path(), b":00000001FF\n").await.unwrap();

        let written = std::fs::read(dir.path().join("firmware.hex")).unwrap();
        assert_eq!(written, b":00000001FF\n");
    }
}
