// ── Device session ──
//
// Full lifecycle management for one device connection over either link
// kind: connect, handshake, liveness-checked reconnect, serialized
// outbound writes, and the catastrophic-recovery path that hands control
// back to the host when the platform needs a cold restart.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use motionlink_device::codec::CommandVerb;
use motionlink_device::gatt::{self, characteristics};
use motionlink_device::transport::{DeviceTransport, LinkKind, TransportEvent};
use motionlink_device::{PeriodicReading, ProtocolClient};

use crate::buffer::SampleRing;
use crate::config::SessionConfig;
use crate::error::CoreError;
use crate::model::{TimestampedSample, Vector};

const EVENT_CHANNEL_SIZE: usize = 256;

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers. Owned exclusively by the
/// session; nothing else mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
    Reconnecting { attempt: u32 },
    Failed,
}

// ── Session events ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceButton {
    A,
    B,
}

/// Broadcast notifications for host consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Button { button: DeviceButton, pressed: bool },
    /// The link dropped unexpectedly; reconnection is starting.
    LinkLost,
    /// The catastrophic path fired; the resume marker (if configured)
    /// is already on disk.
    RecoveryTriggered(CatastrophicReason),
}

/// The only two in-process-unrecoverable failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatastrophicReason {
    ConnectTimeout,
    ReconnectExhausted { attempts: u32 },
}

/// Marker persisted before a forced restart so the next process launch
/// can resume where this one gave up.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResumeMarker {
    pub reason: CatastrophicReason,
    pub at: chrono::DateTime<chrono::Utc>,
    pub device_name: Option<String>,
}

/// Host hook invoked after the resume marker is persisted. The known
/// unrecoverable platform defect only clears on a cold process restart,
/// so the CLI's handler exits; embedded hosts may do something gentler.
pub trait RecoveryHandler: Send + Sync {
    fn on_catastrophic(&self, reason: &CatastrophicReason);
}

/// Default handler: log and carry on (the session stays `Failed`).
pub struct LogOnlyRecovery;

impl RecoveryHandler for LogOnlyRecovery {
    fn on_catastrophic(&self, reason: &CatastrophicReason) {
        tracing::error!(?reason, "catastrophic failure; host restart required");
    }
}

// ── Outbound writes ──────────────────────────────────────────────

/// Idempotent output writes, queued FIFO with at most one in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundWrite {
    LedMatrix([[bool; 5]; 5]),
    Pin { pin: u8, value: u8 },
}

impl OutboundWrite {
    /// Expand a winning gesture's output configuration into queue
    /// entries, matrix first.
    pub fn from_output(config: &crate::model::OutputConfig) -> Vec<Self> {
        let mut writes = Vec::new();
        if let Some(matrix) = config.matrix {
            writes.push(Self::LedMatrix(matrix));
        }
        if let Some(pin) = config.pin {
            writes.push(Self::Pin {
                pin: pin.pin,
                value: pin.value,
            });
        }
        writes
    }
}

// ── DeviceSession ────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<SessionInner>`. Create one per device,
/// `connect()`, read samples from [`ring`](Self::ring), and enqueue
/// output through [`queue_write`](Self::queue_write).
#[derive(Clone)]
pub struct DeviceSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    transport: Arc<dyn DeviceTransport>,
    /// Protocol client for the current serial connection, replaced on
    /// every (re)connect. `None` before first connect and on GATT links.
    protocol: Mutex<Option<ProtocolClient>>,
    ring: Arc<SampleRing>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<SessionEvent>,
    write_tx: mpsc::Sender<OutboundWrite>,
    write_rx: Mutex<Option<mpsc::Receiver<OutboundWrite>>>,
    /// When the last periodic sample arrived; drives the liveness check.
    last_sample: watch::Sender<Option<Instant>>,
    /// Single-flight guard for `connect()`.
    connect_in_flight: AtomicBool,
    /// "Has fired" guard: the link-lost chain runs exactly once per
    /// logical disconnect even when the transport notifies repeatedly.
    link_lost_fired: AtomicBool,
    manual_disconnect: AtomicBool,
    /// Cancels the current connection's pump/monitor/liveness tasks.
    conn_cancel: Mutex<CancellationToken>,
    recovery: Arc<dyn RecoveryHandler>,
}

impl DeviceSession {
    pub fn new(transport: Arc<dyn DeviceTransport>, config: SessionConfig) -> Self {
        Self::with_recovery(transport, config, Arc::new(LogOnlyRecovery))
    }

    pub fn with_recovery(
        transport: Arc<dyn DeviceTransport>,
        config: SessionConfig,
        recovery: Arc<dyn RecoveryHandler>,
    ) -> Self {
        let ring = Arc::new(SampleRing::new(config.ring_capacity));
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (write_tx, write_rx) = mpsc::channel(config.write_queue_capacity);
        let (last_sample, _) = watch::channel(None);

        Self {
            inner: Arc::new(SessionInner {
                config,
                transport,
                protocol: Mutex::new(None),
                ring,
                state,
                events,
                write_tx,
                write_rx: Mutex::new(Some(write_rx)),
                last_sample,
                connect_in_flight: AtomicBool::new(false),
                link_lost_fired: AtomicBool::new(false),
                manual_disconnect: AtomicBool::new(false),
                conn_cancel: Mutex::new(CancellationToken::new()),
                recovery,
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// The sample ring this session fills. Hand it to a
    /// `PollingPredictor` to classify the stream.
    pub fn ring(&self) -> &Arc<SampleRing> {
        &self.inner.ring
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    /// Subscribe to connection state changes.
    pub fn state_updates(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Subscribe to session events (buttons, link loss, recovery).
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Connect, handshake, and start streaming.
    ///
    /// Single-flight: a second call while one is in flight is rejected
    /// rather than raced. Expiry of the connect-then-ready deadline
    /// takes the catastrophic path.
    pub async fn connect(&self) -> Result<(), CoreError> {
        let inner = &self.inner;
        if inner.connect_in_flight.swap(true, Ordering::SeqCst) {
            return Err(CoreError::ConnectInProgress);
        }
        let result = Self::connect_inner(inner).await;
        inner.connect_in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn connect_inner(inner: &Arc<SessionInner>) -> Result<(), CoreError> {
        match *inner.state.borrow() {
            ConnectionState::Disconnected | ConnectionState::Failed => {}
            ref other => {
                return Err(CoreError::ConnectionFailed {
                    reason: format!("cannot connect from state {other:?}"),
                });
            }
        }

        inner.manual_disconnect.store(false, Ordering::SeqCst);
        set_state(inner, ConnectionState::Connecting);

        let deadline = inner.config.connect_timeout;
        let attempt = async {
            inner.transport.connect().await?;
            set_state(inner, ConnectionState::Handshaking);
            establish_connection(inner).await
        };

        match tokio::time::timeout(deadline, attempt).await {
            Ok(Ok(())) => {
                // First successful connect takes the write queue receiver.
                let taken = inner
                    .write_rx
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .take();
                if let Some(rx) = taken {
                    tokio::spawn(write_worker(Arc::downgrade(inner), rx));
                }
                set_state(inner, ConnectionState::Connected);
                info!("device connected");
                Ok(())
            }
            Ok(Err(e)) => {
                teardown_connection(inner).await;
                set_state(inner, ConnectionState::Failed);
                Err(e)
            }
            Err(_) => {
                teardown_connection(inner).await;
                set_state(inner, ConnectionState::Failed);
                catastrophic(inner, CatastrophicReason::ConnectTimeout);
                Err(CoreError::ConnectTimeout {
                    timeout_secs: deadline.as_secs(),
                })
            }
        }
    }

    /// Manual disconnect: tears the link down without entering
    /// `Reconnecting`.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.manual_disconnect.store(true, Ordering::SeqCst);
        teardown_connection(inner).await;
        set_state(inner, ConnectionState::Disconnected);
        debug!("disconnected");
    }

    // ── Outbound writes ──────────────────────────────────────────

    /// Append an output write to the per-device FIFO queue.
    ///
    /// At most one write is ever in flight; a failed write is logged and
    /// the queue drains the next entry regardless.
    pub async fn queue_write(&self, write: OutboundWrite) -> Result<(), CoreError> {
        self.inner
            .write_tx
            .send(write)
            .await
            .map_err(|_| CoreError::Disconnected)
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.conn_cancel
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .cancel();
    }
}

// ── Connection establishment ─────────────────────────────────────

/// Handshake and arm the per-connection tasks. The transport link is
/// already up when this runs; the caller owns the surrounding state
/// transitions.
async fn establish_connection(inner: &Arc<SessionInner>) -> Result<(), CoreError> {
    let conn = new_connection_token(inner);

    match inner.transport.kind() {
        LinkKind::Serial => {
            let protocol = ProtocolClient::new(
                Arc::clone(&inner.transport),
                inner.config.response_timeout,
            );
            protocol.start();
            // Tie the frame pump to the connection token so teardown
            // stops it even when this future is dropped mid-handshake.
            let stopper = protocol.clone();
            let stop_signal = conn.clone();
            tokio::spawn(async move {
                stop_signal.cancelled().await;
                stopper.stop();
            });
            protocol.handshake().await?;

            let periodic = protocol.periodic();
            *lock(&inner.protocol) = Some(protocol);
            tokio::spawn(serial_pump(Arc::clone(inner), periodic, conn.clone()));
        }
        LinkKind::Gatt => {
            // Read-then-subscribe doubles as the readiness handshake: a
            // device that answers the model read and accepts the
            // subscriptions is streaming-ready.
            let raw = inner
                .transport
                .read_characteristic(characteristics::MODEL_NUMBER)
                .await?;
            let model = gatt::decode_model_number(&raw).ok_or(CoreError::HandshakeFailed {
                reason: "empty model number".into(),
            })?;
            debug!(model = %model, "device model read");

            for characteristic in [
                characteristics::ACCELEROMETER_DATA,
                characteristics::BUTTON_A_STATE,
                characteristics::BUTTON_B_STATE,
            ] {
                inner
                    .transport
                    .subscribe_characteristic(characteristic)
                    .await?;
            }
            tokio::spawn(gatt_pump(
                Arc::clone(inner),
                inner.transport.subscribe(),
                conn.clone(),
            ));
        }
    }

    inner.link_lost_fired.store(false, Ordering::SeqCst);
    let _ = inner.last_sample.send_replace(Some(Instant::now()));

    tokio::spawn(link_monitor(
        Arc::clone(inner),
        inner.transport.subscribe(),
        conn.clone(),
    ));
    tokio::spawn(liveness_monitor(Arc::clone(inner), conn));
    Ok(())
}

/// Cancel the current connection's tasks and close the link.
async fn teardown_connection(inner: &Arc<SessionInner>) {
    lock(&inner.conn_cancel).cancel();
    if let Some(protocol) = lock(&inner.protocol).take() {
        protocol.stop();
    }
    inner.transport.disconnect().await;
}

fn new_connection_token(inner: &Arc<SessionInner>) -> CancellationToken {
    let mut guard = lock(&inner.conn_cancel);
    guard.cancel();
    *guard = CancellationToken::new();
    guard.clone()
}

fn set_state(inner: &Arc<SessionInner>, state: ConnectionState) {
    let _ = inner.state.send_replace(state);
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

// ── Link loss and reconnection ───────────────────────────────────

/// Entry point of the link-lost chain. Runs the downstream exactly once
/// per logical disconnect and never for manual disconnects.
fn on_link_lost(inner: &Arc<SessionInner>) {
    if inner.manual_disconnect.load(Ordering::SeqCst) {
        return;
    }
    if inner.link_lost_fired.swap(true, Ordering::SeqCst) {
        return;
    }
    warn!("link lost, starting reconnection");
    let _ = inner.events.send(SessionEvent::LinkLost);
    tokio::spawn(reconnect_loop(Arc::clone(inner)));
}

async fn reconnect_loop(inner: Arc<SessionInner>) {
    teardown_connection(&inner).await;

    let attempts = inner.config.reconnect_attempts;
    for attempt in 1..=attempts {
        if inner.manual_disconnect.load(Ordering::SeqCst) {
            return;
        }
        set_state(&inner, ConnectionState::Reconnecting { attempt });
        tokio::time::sleep(inner.config.reconnect_delay).await;

        match try_reconnect(&inner).await {
            Ok(()) => {
                set_state(&inner, ConnectionState::Connected);
                info!(attempt, "reconnected");
                return;
            }
            Err(e) => {
                warn!(error = %e, attempt, "reconnect attempt failed");
                teardown_connection(&inner).await;
            }
        }
    }

    set_state(&inner, ConnectionState::Failed);
    catastrophic(&inner, CatastrophicReason::ReconnectExhausted { attempts });
}

async fn try_reconnect(inner: &Arc<SessionInner>) -> Result<(), CoreError> {
    inner.transport.connect().await?;
    establish_connection(inner).await
}

// ── Catastrophic recovery ────────────────────────────────────────

/// Persist the resume marker, then hand off to the host. The marker is
/// on disk before the handler runs so a forced restart cannot lose it.
fn catastrophic(inner: &Arc<SessionInner>, reason: CatastrophicReason) {
    if let Some(path) = &inner.config.resume_marker {
        let marker = ResumeMarker {
            reason,
            at: chrono::Utc::now(),
            device_name: inner.config.device_name.clone(),
        };
        if let Err(e) = persist_marker(path, &marker) {
            tracing::error!(error = %e, path = %path.display(), "failed to persist resume marker");
        }
    }
    let _ = inner.events.send(SessionEvent::RecoveryTriggered(reason));
    inner.recovery.on_catastrophic(&reason);
}

fn persist_marker(path: &std::path::Path, marker: &ResumeMarker) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(marker)
        .map_err(|e| CoreError::Internal(e.to_string()))?;
    std::fs::write(path, json)?;
    Ok(())
}

// ── Background tasks ─────────────────────────────────────────────

/// Forward decoded serial periodic readings into the ring and surface
/// button edges as session events.
async fn serial_pump(
    inner: Arc<SessionInner>,
    mut periodic: broadcast::Receiver<PeriodicReading>,
    cancel: CancellationToken,
) {
    let mut buttons = (false, false);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            reading = periodic.recv() => match reading {
                Ok(reading) => ingest_reading(&inner, &reading, &mut buttons),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "sample pump lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

fn ingest_reading(
    inner: &Arc<SessionInner>,
    reading: &PeriodicReading,
    buttons: &mut (bool, bool),
) {
    inner.ring.push(TimestampedSample::now(Vector::accel(
        f64::from(reading.accel_x),
        f64::from(reading.accel_y),
        f64::from(reading.accel_z),
    )));
    let _ = inner.last_sample.send_replace(Some(Instant::now()));

    if reading.button_a != buttons.0 {
        buttons.0 = reading.button_a;
        let _ = inner.events.send(SessionEvent::Button {
            button: DeviceButton::A,
            pressed: reading.button_a,
        });
    }
    if reading.button_b != buttons.1 {
        buttons.1 = reading.button_b;
        let _ = inner.events.send(SessionEvent::Button {
            button: DeviceButton::B,
            pressed: reading.button_b,
        });
    }
}

/// Decode GATT notifications into samples and button events.
async fn gatt_pump(
    inner: Arc<SessionInner>,
    mut events: broadcast::Receiver<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(TransportEvent::Notification { characteristic, value }) => {
                    ingest_notification(&inner, characteristic, &value);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "notification pump lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

fn ingest_notification(inner: &Arc<SessionInner>, characteristic: uuid::Uuid, value: &[u8]) {
    if characteristic == characteristics::ACCELEROMETER_DATA {
        let Some((x, y, z)) = gatt::decode_accelerometer(value) else {
            tracing::trace!("dropping malformed accelerometer notification");
            return;
        };
        inner.ring.push(TimestampedSample::now(Vector::accel(
            f64::from(x),
            f64::from(y),
            f64::from(z),
        )));
        let _ = inner.last_sample.send_replace(Some(Instant::now()));
    } else if characteristic == characteristics::BUTTON_A_STATE
        || characteristic == characteristics::BUTTON_B_STATE
    {
        let Some(state) = gatt::decode_button(value) else {
            tracing::trace!("dropping malformed button notification");
            return;
        };
        let button = if characteristic == characteristics::BUTTON_A_STATE {
            DeviceButton::A
        } else {
            DeviceButton::B
        };
        let _ = inner.events.send(SessionEvent::Button {
            button,
            pressed: state.is_pressed(),
        });
    }
}

/// Watch the transport for disconnect notifications.
async fn link_monitor(
    inner: Arc<SessionInner>,
    mut events: broadcast::Receiver<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(TransportEvent::Disconnected) => on_link_lost(&inner),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Proactive reconnect when the periodic stream goes silent while
/// nominally connected.
async fn liveness_monitor(inner: Arc<SessionInner>, cancel: CancellationToken) {
    let timeout = inner.config.liveness_timeout;
    let check = (timeout / 4).max(std::time::Duration::from_millis(10));
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(check) => {
                if *inner.state.borrow() != ConnectionState::Connected {
                    continue;
                }
                let stale = inner
                    .last_sample
                    .borrow()
                    .is_none_or(|at| at.elapsed() > timeout);
                if stale {
                    warn!(timeout_ms = timeout.as_millis() as u64, "liveness timeout");
                    on_link_lost(&inner);
                    break;
                }
            }
        }
    }
}

/// Drain the outbound queue, one write in flight at a time. Failures are
/// logged and dropped; the queue keeps moving.
///
/// Holds the session weakly so a fully released session closes the
/// channel and ends the worker.
async fn write_worker(session: Weak<SessionInner>, mut rx: mpsc::Receiver<OutboundWrite>) {
    while let Some(write) = rx.recv().await {
        let Some(inner) = session.upgrade() else {
            break;
        };
        if let Err(e) = perform_write(&inner, write).await {
            warn!(error = %e, ?write, "outbound write failed (dropped)");
        }
    }
    debug!("write worker exiting");
}

async fn perform_write(inner: &Arc<SessionInner>, write: OutboundWrite) -> Result<(), CoreError> {
    match inner.transport.kind() {
        LinkKind::Serial => {
            let protocol = lock(&inner.protocol)
                .clone()
                .ok_or(CoreError::Disconnected)?;
            match write {
                OutboundWrite::LedMatrix(rows) => {
                    let payload: String = gatt::encode_led_matrix(&rows)
                        .iter()
                        .map(|b| format!("{b:02x}"))
                        .collect();
                    protocol.send(CommandVerb::LedMatrix, &payload).await?;
                }
                OutboundWrite::Pin { pin, value } => {
                    protocol
                        .send(CommandVerb::PinOutput, &format!("{pin:02x}{value:02x}"))
                        .await?;
                }
            }
        }
        LinkKind::Gatt => match write {
            OutboundWrite::LedMatrix(rows) => {
                inner
                    .transport
                    .write_characteristic(
                        characteristics::LED_MATRIX_STATE,
                        &gatt::encode_led_matrix(&rows),
                    )
                    .await?;
            }
            OutboundWrite::Pin { pin, value } => {
                inner
                    .transport
                    .write_characteristic(
                        characteristics::PIN_DATA,
                        &gatt::encode_pin_writes(&[(pin, value)]),
                    )
                    .await?;
            }
        },
    }
    Ok(())
}
