// ── Serial protocol client ──
//
// Sits between a byte-stream transport and the session layer: reassembles
// frames, fans periodic readings out on a broadcast channel, and
// correlates command/response pairs through a pending-request map keyed
// by message id.

use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

use crate::codec::{
    self, CommandVerb, FrameKind, PeriodicReading, Response, ResponsePayload, PROTOCOL_VERSION,
};
use crate::error::DeviceError;
use crate::transport::{DeviceTransport, TransportEvent};

/// Default per-request response timeout.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval between handshake re-sends. The remote only starts draining
/// its outbound buffer once enough bytes have accumulated, so the first
/// few sends routinely vanish into it.
pub const HANDSHAKE_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on handshake attempts before failing closed.
pub const HANDSHAKE_MAX_ATTEMPTS: u32 = 25;

const PERIODIC_CHANNEL_CAPACITY: usize = 1024;

/// Frame-level protocol client for serial links.
///
/// Cheaply cloneable; all clones share the pending-request map and the
/// periodic broadcast. Call [`start`](Self::start) once after the
/// transport connects, and [`stop`](Self::stop) when the link goes away.
#[derive(Clone)]
pub struct ProtocolClient {
    transport: Arc<dyn DeviceTransport>,
    pending: Arc<DashMap<u16, oneshot::Sender<Response>>>,
    next_id: Arc<AtomicU16>,
    response_timeout: Duration,
    periodic_tx: broadcast::Sender<PeriodicReading>,
    cancel: CancellationToken,
}

impl ProtocolClient {
    pub fn new(transport: Arc<dyn DeviceTransport>, response_timeout: Duration) -> Self {
        let (periodic_tx, _) = broadcast::channel(PERIODIC_CHANNEL_CAPACITY);
        Self {
            transport,
            pending: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU16::new(1)),
            response_timeout,
            periodic_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn the frame pump. Inbound chunks are reassembled against the
    /// carry buffer; complete frames are dispatched, partial frames wait
    /// for the next chunk.
    pub fn start(&self) {
        let mut events = self.transport.subscribe();
        let pending = Arc::clone(&self.pending);
        let periodic_tx = self.periodic_tx.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut carry = String::new();
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(TransportEvent::Data(chunk)) => {
                            carry.push_str(&String::from_utf8_lossy(&chunk));
                            let split = codec::split_messages(&carry);
                            carry = split.remaining_input;
                            for frame in &split.messages {
                                dispatch_frame(frame, &pending, &periodic_tx);
                            }
                        }
                        Ok(TransportEvent::Notification { .. }) => {
                            // Serial links never emit these.
                        }
                        Ok(TransportEvent::Disconnected) => {
                            carry.clear();
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(missed = n, "protocol pump lagged, frames dropped");
                            carry.clear();
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            tracing::debug!("protocol pump exiting");
        });
    }

    /// Stop the frame pump. Pending requests are left to their timeouts.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Subscribe to decoded periodic readings.
    pub fn periodic(&self) -> broadcast::Receiver<PeriodicReading> {
        self.periodic_tx.subscribe()
    }

    /// Send a command and await its correlated response.
    ///
    /// The entry is removed from the pending map on timeout so stale
    /// responses arriving later are dropped, not delivered.
    pub async fn request(
        &self,
        verb: CommandVerb,
        payload: &str,
    ) -> Result<Response, DeviceError> {
        self.request_with_timeout(verb, payload, self.response_timeout)
            .await
    }

    async fn request_with_timeout(
        &self,
        verb: CommandVerb,
        payload: &str,
        timeout: Duration,
    ) -> Result<Response, DeviceError> {
        let id = self.alloc_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let frame = codec::encode_command(id, verb, payload);
        if let Err(e) = self.transport.write(frame.as_bytes()).await {
            self.pending.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => match response.payload {
                ResponsePayload::Value(_) => Ok(response),
                ResponsePayload::Error(ref code) => Err(DeviceError::Remote {
                    id,
                    code: code.clone(),
                }),
            },
            // Responder dropped: the pump died underneath us.
            Ok(Err(_)) => {
                self.pending.remove(&id);
                Err(DeviceError::LinkClosed)
            }
            Err(_) => {
                self.pending.remove(&id);
                Err(DeviceError::ResponseTimeout {
                    id,
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Fire-and-forget command write. Used for idempotent output writes
    /// (LED matrix, pins) where a dropped frame is tolerable.
    pub async fn send(&self, verb: CommandVerb, payload: &str) -> Result<(), DeviceError> {
        let frame = codec::encode_command(self.alloc_id(), verb, payload);
        self.transport.write(frame.as_bytes()).await
    }

    /// Run the handshake: re-send at a short fixed interval until a valid
    /// versioned response arrives or the attempt bound is hit.
    ///
    /// Fails closed -- a version mismatch or exhausted attempts leaves the
    /// link unusable rather than partially connected.
    pub async fn handshake(&self) -> Result<u32, DeviceError> {
        for attempt in 1..=HANDSHAKE_MAX_ATTEMPTS {
            match self
                .request_with_timeout(CommandVerb::Handshake, "", HANDSHAKE_RETRY_INTERVAL)
                .await
            {
                Ok(response) => {
                    let got = response.protocol_version().ok_or_else(|| {
                        DeviceError::Remote {
                            id: response.id,
                            code: "unparseable handshake value".into(),
                        }
                    })?;
                    if got == PROTOCOL_VERSION {
                        tracing::debug!(attempt, version = got, "handshake complete");
                        return Ok(got);
                    }
                    return Err(DeviceError::VersionMismatch {
                        expected: PROTOCOL_VERSION,
                        got,
                    });
                }
                Err(DeviceError::ResponseTimeout { .. }) => {
                    tracing::trace!(attempt, "handshake attempt timed out, re-sending");
                }
                Err(e) => return Err(e),
            }
        }
        Err(DeviceError::HandshakeFailed {
            attempts: HANDSHAKE_MAX_ATTEMPTS,
        })
    }

    fn alloc_id(&self) -> u16 {
        // Wraps at 0xffff; skips 0 so an all-zero id never appears on the
        // wire (useful when eyeballing traces).
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

/// Route one complete frame. Malformed frames are dropped with a trace
/// log; responses with no pending entry (stale or duplicated) likewise.
fn dispatch_frame(
    frame: &str,
    pending: &DashMap<u16, oneshot::Sender<Response>>,
    periodic_tx: &broadcast::Sender<PeriodicReading>,
) {
    match codec::frame_kind(frame) {
        FrameKind::Periodic => match codec::decode_periodic(frame) {
            Some(reading) => {
                // Send errors just mean no subscribers right now.
                let _ = periodic_tx.send(reading);
            }
            None => tracing::trace!(frame, "dropping malformed periodic frame"),
        },
        FrameKind::Response => match codec::decode_response(frame) {
            Some(response) => match pending.remove(&response.id) {
                Some((_, tx)) => {
                    let _ = tx.send(response);
                }
                None => {
                    tracing::trace!(id = response.id, "dropping response with no pending request");
                }
            },
            None => tracing::trace!(frame, "dropping malformed response frame"),
        },
        FrameKind::Command | FrameKind::Unknown => {
            tracing::trace!(frame, "dropping unexpected frame");
        }
    }
}
