// ── Serial wire codec ──
//
// Newline-delimited ASCII frames, decoded with explicit fixed-width
// grammar rather than pattern matching. A frame that violates the grammar
// in any way decodes to `None` -- callers drop it and move on; nothing in
// this module panics or propagates an error for malformed input.
//
// Frame shapes:
//   Periodic  `P` seq  XXX YYY ZZZ a b          (13 chars)
//   Command   `C` iiii VV payload...
//   Response  `R` iiii `V` value  |  `R` iiii `E` code

/// Protocol version both sides must agree on during the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Exact length of a periodic frame (excluding the newline terminator).
pub const PERIODIC_FRAME_LEN: usize = 13;

/// Offset applied to the 12-bit axis payload: wire value `raw` decodes to
/// `raw - 2048`, giving a signed range of -2048..=2047 milli-g.
const AXIS_OFFSET: i32 = 2048;

const COMMAND_TAG: char = 'C';
const RESPONSE_TAG: char = 'R';
const PERIODIC_TAG: char = 'P';

// ── Frame splitting ──────────────────────────────────────────────────

/// Result of [`split_messages`]: zero or more complete frames plus the
/// trailing partial frame still waiting for its newline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SplitMessages {
    pub messages: Vec<String>,
    pub remaining_input: String,
}

/// Split a read buffer into newline-terminated frames.
///
/// The returned `remaining_input` must be prepended to the next read --
/// serial chunk boundaries are arbitrary and frames routinely straddle
/// them. Empty input yields no messages and an empty remainder.
pub fn split_messages(input: &str) -> SplitMessages {
    let mut messages: Vec<String> = input.split('\n').map(str::to_owned).collect();
    // `split` always yields at least one element; the last is the part
    // after the final newline (possibly empty), i.e. the partial frame.
    let remaining_input = messages.pop().unwrap_or_default();
    SplitMessages {
        messages,
        remaining_input,
    }
}

// ── Periodic frames ──────────────────────────────────────────────────

/// One decoded sensor snapshot from a periodic frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicReading {
    /// Acceleration in milli-g. The wire carries the device's native
    /// 12-bit window; the decoded type spans the full 16-bit range.
    pub accel_x: i16,
    pub accel_y: i16,
    pub accel_z: i16,
    pub button_a: bool,
    pub button_b: bool,
}

/// Decode a periodic frame, or `None` if it is not decodable.
///
/// Rejection is all-or-nothing: wrong length, wrong tag, any non-hex
/// digit in the sequence/axis region, or a button character outside
/// `{'0','1'}` all yield `None` -- never partial data.
pub fn decode_periodic(frame: &str) -> Option<PeriodicReading> {
    let bytes = frame.as_bytes();
    if bytes.len() != PERIODIC_FRAME_LEN {
        return None;
    }
    if bytes[0] != PERIODIC_TAG as u8 {
        return None;
    }
    // Rolling sequence digit: must be hex, value unused.
    hex_val(bytes[1])?;

    let accel_x = decode_axis(&bytes[2..5])?;
    let accel_y = decode_axis(&bytes[5..8])?;
    let accel_z = decode_axis(&bytes[8..11])?;
    let button_a = decode_button_bit(bytes[11])?;
    let button_b = decode_button_bit(bytes[12])?;

    Some(PeriodicReading {
        accel_x,
        accel_y,
        accel_z,
        button_a,
        button_b,
    })
}

/// Encode a periodic frame (newline-terminated). Used by tests and by
/// firmware simulators; the host normally only decodes these.
pub fn encode_periodic(seq: u8, reading: &PeriodicReading) -> String {
    format!(
        "{PERIODIC_TAG}{:x}{}{}{}{}{}\n",
        seq & 0x0f,
        encode_axis(reading.accel_x),
        encode_axis(reading.accel_y),
        encode_axis(reading.accel_z),
        u8::from(reading.button_a),
        u8::from(reading.button_b),
    )
}

fn decode_axis(digits: &[u8]) -> Option<i16> {
    let mut raw: i32 = 0;
    for &d in digits {
        raw = (raw << 4) | i32::from(hex_val(d)?);
    }
    i16::try_from(raw - AXIS_OFFSET).ok()
}

fn encode_axis(value: i16) -> String {
    let raw = (i32::from(value) + AXIS_OFFSET).clamp(0, 0x0fff);
    format!("{raw:03x}")
}

fn decode_button_bit(ch: u8) -> Option<bool> {
    match ch {
        b'0' => Some(false),
        b'1' => Some(true),
        _ => None,
    }
}

fn hex_val(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        _ => None,
    }
}

// ── Commands ─────────────────────────────────────────────────────────

/// Two-character command verbs the device understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandVerb {
    /// Protocol handshake; the response value is the device's protocol
    /// version.
    Handshake,
    /// Set the 5x5 LED matrix (payload: 5 hex bytes, one row each).
    LedMatrix,
    /// Drive an IO pin (payload: 2 hex bytes, pin then value).
    PinOutput,
}

impl CommandVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Handshake => "HS",
            Self::LedMatrix => "LD",
            Self::PinOutput => "PO",
        }
    }
}

/// Encode a command frame, newline-terminated and ready to write.
pub fn encode_command(id: u16, verb: CommandVerb, payload: &str) -> String {
    format!("{COMMAND_TAG}{id:04x}{}{payload}\n", verb.as_str())
}

// ── Responses ────────────────────────────────────────────────────────

/// What a response frame carries after the echoed id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePayload {
    Value(String),
    Error(String),
}

/// A decoded response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Echo of the originating command's message id.
    pub id: u16,
    pub payload: ResponsePayload,
}

impl Response {
    /// Interpret the payload as the handshake's protocol version.
    pub fn protocol_version(&self) -> Option<u32> {
        match &self.payload {
            ResponsePayload::Value(v) => v.parse().ok(),
            ResponsePayload::Error(_) => None,
        }
    }
}

/// Decode a response frame, or `None` if it is not decodable.
pub fn decode_response(frame: &str) -> Option<Response> {
    let bytes = frame.as_bytes();
    if bytes.len() < 6 || bytes[0] != RESPONSE_TAG as u8 {
        return None;
    }
    let mut id: u16 = 0;
    for &d in &bytes[1..5] {
        id = (id << 4) | u16::from(hex_val(d)?);
    }
    let rest = frame.get(6..)?.to_owned();
    let payload = match bytes[5] {
        b'V' => ResponsePayload::Value(rest),
        b'E' => ResponsePayload::Error(rest),
        _ => return None,
    };
    Some(Response { id, payload })
}

/// Classify a frame by its leading tag without fully decoding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Periodic,
    Response,
    Command,
    Unknown,
}

pub fn frame_kind(frame: &str) -> FrameKind {
    match frame.as_bytes().first() {
        Some(&b) if b == PERIODIC_TAG as u8 => FrameKind::Periodic,
        Some(&b) if b == RESPONSE_TAG as u8 => FrameKind::Response,
        Some(&b) if b == COMMAND_TAG as u8 => FrameKind::Command,
        _ => FrameKind::Unknown,
    }
}

// ── Tests ────────────────────────────────────────────────────────────
