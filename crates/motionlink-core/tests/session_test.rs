// Integration tests for `DeviceSession` over scripted fake transports:
// connect/handshake, reconnect, liveness, write serialization, and the
// catastrophic-recovery path.

#![allow(clippy::unwrap_used)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use motionlink_core::{
    CatastrophicReason, ConnectionState, CoreError, DeviceButton, DeviceSession, OutboundWrite,
    RecoveryHandler, SessionConfig, SessionEvent,
};
use motionlink_device::gatt::characteristics;
use motionlink_device::testing::FakeTransport;

const EVENT_WAIT: Duration = Duration::from_secs(60);

fn fast_config() -> SessionConfig {
    SessionConfig {
        connect_timeout: Duration::from_secs(30),
        // Long enough that tests which leave the stream idle do not trip
        // a surprise reconnect; the liveness test overrides this.
        liveness_timeout: Duration::from_secs(10),
        reconnect_attempts: 2,
        reconnect_delay: Duration::from_millis(100),
        ..SessionConfig::default()
    }
}

/// Device-side script: answer handshakes with protocol version 1.
fn answer_handshakes(frame: &str) -> Option<String> {
    (frame.len() >= 7 && &frame[5..7] == "HS").then(|| format!("R{}V1", &frame[1..5]))
}

async fn connected_serial(config: SessionConfig) -> (Arc<FakeTransport>, DeviceSession) {
    let transport = Arc::new(FakeTransport::serial());
    transport.set_responder(answer_handshakes);
    let session = DeviceSession::new(transport.clone(), config);
    session.connect().await.unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);
    (transport, session)
}

async fn next_event(
    rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
) -> SessionEvent {
    tokio::time::timeout(EVENT_WAIT, rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

// ── Connect / handshake ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn serial_connect_reaches_connected_and_streams_samples() {
    let (transport, session) = connected_serial(fast_config()).await;
    let mut events = session.events();

    // Stream two periodic frames; the second presses button A.
    transport.push_data(b"P390080070000\nP190080070010\n");
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(!session.ring().is_empty());
    assert_eq!(session.ring().pushed(), 2);

    let event = next_event(&mut events).await;
    assert_eq!(
        event,
        SessionEvent::Button {
            button: DeviceButton::A,
            pressed: true
        }
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_connect_attempts_are_rejected() {
    let transport = Arc::new(FakeTransport::serial());
    // No responder: the first attempt grinds through handshake retries.
    let session = DeviceSession::new(transport, fast_config());

    let racing = session.clone();
    let first = tokio::spawn(async move { racing.connect().await });
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    let second = session.connect().await;
    assert!(matches!(second, Err(CoreError::ConnectInProgress)));

    let first = first.await.unwrap();
    assert!(matches!(first, Err(CoreError::HandshakeFailed { .. })));
    assert_eq!(session.state(), ConnectionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn handshake_version_mismatch_fails_the_attempt() {
    let transport = Arc::new(FakeTransport::serial());
    transport.set_responder(|frame| Some(format!("R{}V9", &frame[1..5])));
    let session = DeviceSession::new(transport, fast_config());

    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, CoreError::HandshakeFailed { .. }));
    assert_eq!(session.state(), ConnectionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn failed_attempt_can_be_retried() {
    let transport = Arc::new(FakeTransport::serial());
    let session = DeviceSession::new(transport.clone(), fast_config());

    assert!(session.connect().await.is_err());
    assert_eq!(session.state(), ConnectionState::Failed);

    transport.set_responder(answer_handshakes);
    session.connect().await.unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);
}

// ── Disconnect semantics ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn duplicate_disconnect_notifications_fire_link_lost_once() {
    let (transport, session) = connected_serial(fast_config()).await;
    let mut events = session.events();

    transport.emit_disconnected();
    transport.emit_disconnected();

    assert_eq!(next_event(&mut events).await, SessionEvent::LinkLost);

    // Let the reconnect settle, then verify no second LinkLost arrived.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(session.state(), ConnectionState::Connected);
    let mut extra_link_lost = 0;
    while let Ok(event) = events.try_recv() {
        if event == SessionEvent::LinkLost {
            extra_link_lost += 1;
        }
    }
    assert_eq!(extra_link_lost, 0, "link-lost chain ran more than once");
}

#[tokio::test(start_paused = true)]
async fn manual_disconnect_skips_reconnection() {
    let (transport, session) = connected_serial(fast_config()).await;
    let mut events = session.events();

    session.disconnect().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);

    // A late transport notification must not start a reconnect.
    transport.emit_disconnected();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(events.try_recv().is_err(), "unexpected session event");
}

// ── Reconnection ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn unexpected_link_loss_reconnects() {
    let (transport, session) = connected_serial(fast_config()).await;
    let mut events = session.events();
    let mut states = session.state_updates();

    transport.emit_disconnected();
    assert_eq!(next_event(&mut events).await, SessionEvent::LinkLost);

    // Observe the Reconnecting hop, then recovery to Connected.
    let saw_reconnecting = tokio::time::timeout(EVENT_WAIT, async {
        loop {
            states.changed().await.unwrap();
            let state = states.borrow_and_update().clone();
            match state {
                ConnectionState::Reconnecting { .. } => return true,
                ConnectionState::Failed => return false,
                _ => {}
            }
        }
    })
    .await
    .unwrap();
    assert!(saw_reconnecting);

    tokio::time::timeout(EVENT_WAIT, async {
        while session.state() != ConnectionState::Connected {
            states.changed().await.unwrap();
        }
    })
    .await
    .unwrap();
}

#[tokio::test(start_paused = true)]
async fn liveness_timeout_triggers_reconnect() {
    let config = SessionConfig {
        liveness_timeout: Duration::from_millis(200),
        ..fast_config()
    };
    let (_transport, session) = connected_serial(config).await;
    let mut events = session.events();

    // No periodic traffic at all: the liveness monitor must notice on
    // its own, without an explicit disconnect notification.
    assert_eq!(next_event(&mut events).await, SessionEvent::LinkLost);
}

#[tokio::test(start_paused = true)]
async fn reconnect_exhaustion_is_catastrophic() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("resume.json");
    let recovery = Arc::new(CapturingRecovery::new(marker.clone()));

    let transport = Arc::new(FakeTransport::serial());
    transport.set_responder(answer_handshakes);
    let config = SessionConfig {
        resume_marker: Some(marker.clone()),
        ..fast_config()
    };
    let session =
        DeviceSession::with_recovery(transport.clone(), config, recovery.clone());
    session.connect().await.unwrap();

    // Device goes permanently silent.
    transport.set_responder(|_| None);
    transport.emit_disconnected();

    let mut events = session.events();
    let reason = tokio::time::timeout(EVENT_WAIT, async {
        loop {
            if let Ok(SessionEvent::RecoveryTriggered(reason)) = events.recv().await {
                return reason;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(reason, CatastrophicReason::ReconnectExhausted { attempts: 2 });
    assert_eq!(session.state(), ConnectionState::Failed);
    assert!(recovery.marker_existed_when_called());

    let parsed: motionlink_core::ResumeMarker =
        serde_json::from_str(&std::fs::read_to_string(&marker).unwrap()).unwrap();
    assert_eq!(
        parsed.reason,
        CatastrophicReason::ReconnectExhausted { attempts: 2 }
    );
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_is_catastrophic() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("resume.json");
    let recovery = Arc::new(CapturingRecovery::new(marker.clone()));

    let transport = Arc::new(FakeTransport::serial());
    // Never answers: the handshake outlives the connect deadline.
    let config = SessionConfig {
        connect_timeout: Duration::from_millis(300),
        resume_marker: Some(marker.clone()),
        ..SessionConfig::default()
    };
    let session = DeviceSession::with_recovery(transport, config, recovery.clone());

    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, CoreError::ConnectTimeout { .. }));
    assert_eq!(session.state(), ConnectionState::Failed);
    assert_eq!(recovery.reason(), Some(CatastrophicReason::ConnectTimeout));
    assert!(recovery.marker_existed_when_called());
    assert!(marker.is_file());
}

// ── Write queue ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn writes_drain_fifo_and_survive_failures() {
    let (transport, session) = connected_serial(fast_config()).await;
    let before = transport.written_frames().len();

    // First write fails at the transport; the queue must keep draining.
    transport.set_fail_writes(true);
    session
        .queue_write(OutboundWrite::LedMatrix([[true; 5]; 5]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    transport.set_fail_writes(false);

    session
        .queue_write(OutboundWrite::Pin { pin: 0, value: 1 })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut all = transport.written_frames();
    let frames = all.split_off(before);
    assert_eq!(frames.len(), 1, "only the post-failure write lands: {frames:?}");
    assert!(frames[0].contains("PO0001"), "pin frame: {frames:?}");
}

#[tokio::test(start_paused = true)]
async fn gesture_output_config_expands_into_queued_writes() {
    use motionlink_core::{Gesture, PinOutput};

    let mut gesture = Gesture::new("shake");
    gesture.output.matrix = Some([[true; 5]; 5]);
    gesture.output.pin = Some(PinOutput { pin: 1, value: 1 });

    let writes = OutboundWrite::from_output(&gesture.output);
    assert_eq!(
        writes,
        vec![
            OutboundWrite::LedMatrix([[true; 5]; 5]),
            OutboundWrite::Pin { pin: 1, value: 1 },
        ]
    );

    // And they flow through the queue onto the wire in order.
    let (transport, session) = connected_serial(fast_config()).await;
    let before = transport.written_frames().len();
    for write in writes {
        session.queue_write(write).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let frames = transport.written_frames();
    assert!(frames[before].contains("LD"), "LED frame first: {frames:?}");
    assert!(frames[before + 1].contains("PO0101"), "pin frame second: {frames:?}");
}

// ── GATT link ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn gatt_connect_subscribes_and_streams_notifications() {
    let transport = Arc::new(FakeTransport::gatt());
    transport.set_characteristic(characteristics::MODEL_NUMBER, b"BBC micro:bit V2");
    let session = DeviceSession::new(transport.clone(), fast_config());
    session.connect().await.unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);

    assert_eq!(
        transport.subscriptions(),
        vec![
            characteristics::ACCELEROMETER_DATA,
            characteristics::BUTTON_A_STATE,
            characteristics::BUTTON_B_STATE,
        ]
    );

    let mut events = session.events();
    // 3 x i16 LE: x=-100, y=0, z=1024.
    transport.push_notification(
        characteristics::ACCELEROMETER_DATA,
        &[0x9c, 0xff, 0x00, 0x00, 0x00, 0x04],
    );
    transport.push_notification(characteristics::BUTTON_B_STATE, &[1]);
    tokio::task::yield_now().await;

    assert_eq!(session.ring().pushed(), 1);
    let newest = session.ring().newest(1);
    let sample = newest[0].as_ref().unwrap();
    assert_eq!(sample.value.values(), &[-100.0, 0.0, 1024.0]);

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Button {
            button: DeviceButton::B,
            pressed: true
        }
    );
}

#[tokio::test(start_paused = true)]
async fn gatt_connect_fails_without_model_number() {
    let transport = Arc::new(FakeTransport::gatt());
    // MODEL_NUMBER not seeded: the readiness handshake fails.
    let session = DeviceSession::new(transport, fast_config());

    assert!(session.connect().await.is_err());
    assert_eq!(session.state(), ConnectionState::Failed);
}

// ── Recovery handler capture ────────────────────────────────────────

struct CapturingRecovery {
    marker_path: PathBuf,
    marker_existed: AtomicBool,
    reason: Mutex<Option<CatastrophicReason>>,
}

impl CapturingRecovery {
    fn new(marker_path: PathBuf) -> Self {
        Self {
            marker_path,
            marker_existed: AtomicBool::new(false),
            reason: Mutex::new(None),
        }
    }

    fn marker_existed_when_called(&self) -> bool {
        self.marker_existed.load(Ordering::SeqCst)
    }

    fn reason(&self) -> Option<CatastrophicReason> {
        *self.reason.lock().unwrap()
    }
}

impl RecoveryHandler for CapturingRecovery {
    fn on_catastrophic(&self, reason: &CatastrophicReason) {
        self.marker_existed
            .store(self.marker_path.is_file(), Ordering::SeqCst);
        *self.reason.lock().unwrap() = Some(*reason);
    }
}
