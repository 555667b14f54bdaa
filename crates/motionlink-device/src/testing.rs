// ── Deterministic fake transport ──
//
// In-memory `DeviceTransport` used by this crate's protocol tests and by
// motionlink-core's session tests. Scripted, single-threaded-friendly,
// and entirely free of real I/O.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::DeviceError;
use crate::transport::{DeviceTransport, EVENT_CHANNEL_CAPACITY, LinkKind, TransportEvent};

type Responder = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Scriptable in-memory transport.
///
/// Inbound traffic is injected with [`push_data`](Self::push_data) /
/// [`push_notification`](Self::push_notification); outbound writes are
/// recorded and optionally answered by a responder closure, which lets a
/// test play the role of the device firmware.
pub struct FakeTransport {
    kind: LinkKind,
    events: broadcast::Sender<TransportEvent>,
    written: Mutex<Vec<Vec<u8>>>,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    fail_writes: AtomicBool,
    responder: Mutex<Option<Responder>>,
    characteristics: DashMap<Uuid, Vec<u8>>,
    subscriptions: Mutex<Vec<Uuid>>,
}

impl FakeTransport {
    pub fn serial() -> Self {
        Self::with_kind(LinkKind::Serial)
    }

    pub fn gatt() -> Self {
        Self::with_kind(LinkKind::Gatt)
    }

    fn with_kind(kind: LinkKind) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            kind,
            events,
            written: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            responder: Mutex::new(None),
            characteristics: DashMap::new(),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Inject inbound bytes, as if read from the wire.
    pub fn push_data(&self, bytes: &[u8]) {
        let _ = self.events.send(TransportEvent::Data(bytes.to_vec()));
    }

    /// Inject a GATT notification.
    pub fn push_notification(&self, characteristic: Uuid, value: &[u8]) {
        let _ = self.events.send(TransportEvent::Notification {
            characteristic,
            value: value.to_vec(),
        });
    }

    /// Emit a disconnect notification. Call repeatedly to exercise
    /// deduplication in consumers.
    pub fn emit_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Disconnected);
    }

    /// Everything written so far, decoded as UTF-8 frames.
    pub fn written_frames(&self) -> Vec<String> {
        self.written
            .lock()
            .expect("written lock")
            .iter()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .collect()
    }

    /// Script an automatic device-side reply: the closure sees each
    /// written frame (newline stripped) and may return a frame to echo
    /// back onto the inbound stream (newline appended automatically).
    pub fn set_responder<F>(&self, f: F)
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        *self.responder.lock().expect("responder lock") = Some(Box::new(f));
    }

    /// Make the next `connect` call fail.
    pub fn fail_next_connect(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }

    /// Toggle write failures (each write errors while set).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Seed a readable characteristic value.
    pub fn set_characteristic(&self, characteristic: Uuid, value: &[u8]) {
        self.characteristics.insert(characteristic, value.to_vec());
    }

    /// Characteristics a consumer subscribed to, in order.
    pub fn subscriptions(&self) -> Vec<Uuid> {
        self.subscriptions.lock().expect("subscriptions lock").clone()
    }
}

#[async_trait]
impl DeviceTransport for FakeTransport {
    fn kind(&self) -> LinkKind {
        self.kind
    }

    async fn connect(&self) -> Result<(), DeviceError> {
        if self.fail_connect.swap(false, Ordering::SeqCst) {
            return Err(DeviceError::Open {
                target: "fake".into(),
                reason: "scripted failure".into(),
            });
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn write(&self, data: &[u8]) -> Result<(), DeviceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DeviceError::Io(std::io::Error::other("scripted write failure")));
        }
        self.written
            .lock()
            .expect("written lock")
            .push(data.to_vec());

        let frame = String::from_utf8_lossy(data);
        let reply = {
            let guard = self.responder.lock().expect("responder lock");
            guard.as_ref().and_then(|f| f(frame.trim_end()))
        };
        if let Some(reply) = reply {
            self.push_data(format!("{reply}\n").as_bytes());
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn read_characteristic(&self, characteristic: Uuid) -> Result<Vec<u8>, DeviceError> {
        self.characteristics
            .get(&characteristic)
            .map(|v| v.clone())
            .ok_or(DeviceError::Unsupported("characteristic not seeded"))
    }

    async fn write_characteristic(
        &self,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), DeviceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DeviceError::Io(std::io::Error::other("scripted write failure")));
        }
        self.characteristics.insert(characteristic, value.to_vec());
        Ok(())
    }

    async fn subscribe_characteristic(&self, characteristic: Uuid) -> Result<(), DeviceError> {
        self.subscriptions
            .lock()
            .expect("subscriptions lock")
            .push(characteristic);
        Ok(())
    }
}
