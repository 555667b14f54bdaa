// Integration tests for `ProtocolClient` against the scripted fake
// transport playing the device-firmware side.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use motionlink_device::codec::{self, CommandVerb};
use motionlink_device::testing::FakeTransport;
use motionlink_device::{DeviceError, ProtocolClient};

const RESPONSE_TIMEOUT: Duration = Duration::from_millis(200);

fn setup() -> (Arc<FakeTransport>, ProtocolClient) {
    let transport = Arc::new(FakeTransport::serial());
    let client = ProtocolClient::new(transport.clone(), RESPONSE_TIMEOUT);
    client.start();
    (transport, client)
}

/// Extract the 4-hex message id from a written command frame.
fn frame_id(frame: &str) -> u16 {
    u16::from_str_radix(&frame[1..5], 16).unwrap()
}

// ── Request/response correlation ────────────────────────────────────

#[tokio::test]
async fn request_resolves_with_echoed_id() {
    let (transport, client) = setup();
    transport.set_responder(|frame| {
        frame
            .starts_with('C')
            .then(|| format!("R{}Vok", &frame[1..5]))
    });

    let response = client.request(CommandVerb::PinOutput, "0001").await.unwrap();
    let written = transport.written_frames();
    assert_eq!(response.id, frame_id(&written[0]));
    assert_eq!(
        response.payload,
        codec::ResponsePayload::Value("ok".into())
    );
}

#[tokio::test(start_paused = true)]
async fn request_times_out_and_clears_pending_entry() {
    let (transport, client) = setup();
    // No responder: the device stays silent.

    let err = client.request(CommandVerb::PinOutput, "0001").await.unwrap_err();
    assert!(matches!(err, DeviceError::ResponseTimeout { .. }));

    // A late response for the timed-out id must be dropped, and a fresh
    // request must still work.
    let stale_id = frame_id(&transport.written_frames()[0]);
    transport.push_data(format!("R{stale_id:04x}Vlate\n").as_bytes());

    transport.set_responder(|frame| Some(format!("R{}Vfresh", &frame[1..5])));
    let response = client.request(CommandVerb::PinOutput, "0002").await.unwrap();
    assert_eq!(
        response.payload,
        codec::ResponsePayload::Value("fresh".into())
    );
}

#[tokio::test]
async fn remote_error_payload_is_surfaced() {
    let (transport, client) = setup();
    transport.set_responder(|frame| Some(format!("R{}Ebusy", &frame[1..5])));

    let err = client.request(CommandVerb::LedMatrix, "1f00000000").await.unwrap_err();
    match err {
        DeviceError::Remote { code, .. } => assert_eq!(code, "busy"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn message_ids_increase_monotonically() {
    let (transport, client) = setup();
    transport.set_responder(|frame| Some(format!("R{}V", &frame[1..5])));

    for _ in 0..3 {
        client.request(CommandVerb::PinOutput, "").await.unwrap();
    }

    let ids: Vec<u16> = transport.written_frames().iter().map(|f| frame_id(f)).collect();
    assert!(ids.windows(2).all(|w| w[1] > w[0]), "ids not increasing: {ids:?}");
}

// ── Periodic stream ─────────────────────────────────────────────────

#[tokio::test]
async fn periodic_frames_fan_out_and_malformed_frames_drop() {
    let (transport, client) = setup();
    let mut periodic = client.periodic();

    // One good frame, one wrong-length frame, one non-hex frame.
    transport.push_data(b"P390080070010\nP3900800700\nP39z080070010\n");

    let reading = tokio::time::timeout(Duration::from_secs(1), periodic.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reading.accel_x, 256);
    assert_eq!(reading.accel_y, 0);
    assert_eq!(reading.accel_z, -256);
    assert!(reading.button_a);
    assert!(!reading.button_b);

    // The malformed frames produced nothing.
    assert!(periodic.try_recv().is_err());
}

#[tokio::test]
async fn frames_reassemble_across_chunk_boundaries() {
    let (transport, client) = setup();
    let mut periodic = client.periodic();

    transport.push_data(b"P39008");
    transport.push_data(b"0070010\nP3");
    transport.push_data(b"90080070001\n");

    let first = tokio::time::timeout(Duration::from_secs(1), periodic.recv())
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(1), periodic.recv())
        .await
        .unwrap()
        .unwrap();

    assert!(first.button_a && !first.button_b);
    assert!(!second.button_a && second.button_b);
}

// ── Handshake ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn handshake_succeeds_once_device_starts_answering() {
    let (transport, client) = setup();
    let attempts = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&attempts);
    // The device's outbound buffer swallows the first two attempts.
    transport.set_responder(move |frame| {
        if !frame[5..].starts_with("HS") {
            return None;
        }
        let n = seen.fetch_add(1, Ordering::SeqCst);
        (n >= 2).then(|| format!("R{}V1", &frame[1..5]))
    });

    let version = client.handshake().await.unwrap();
    assert_eq!(version, 1);
    assert!(attempts.load(Ordering::SeqCst) >= 3);
}

#[tokio::test]
async fn handshake_rejects_version_mismatch_immediately() {
    let (transport, client) = setup();
    transport.set_responder(|frame| Some(format!("R{}V7", &frame[1..5])));

    let err = client.handshake().await.unwrap_err();
    assert!(matches!(
        err,
        DeviceError::VersionMismatch { expected: 1, got: 7 }
    ));
    // Exactly one attempt: a wrong version is not a timeout.
    assert_eq!(transport.written_frames().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn handshake_fails_closed_after_all_attempts_time_out() {
    let (transport, client) = setup();
    // Device never answers.

    let err = client.handshake().await.unwrap_err();
    assert!(matches!(err, DeviceError::HandshakeFailed { attempts: 25 }));
    assert_eq!(transport.written_frames().len(), 25);
}
