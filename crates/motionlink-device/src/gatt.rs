// ── GATT profile ──
//
// Service/characteristic identifiers and binary codecs for the wireless
// link. The platform GATT object itself is host-owned; everything here is
// the typed wire surface carried over a `DeviceTransport` whose events
// deliver characteristic notifications.

use uuid::{uuid, Uuid};

// ── Services ─────────────────────────────────────────────────────────

pub mod services {
    use super::{uuid, Uuid};

    pub const ACCELEROMETER: Uuid = uuid!("e95d0753-251d-470a-a062-fa1922dfa9a8");
    pub const BUTTON: Uuid = uuid!("e95d9882-251d-470a-a062-fa1922dfa9a8");
    pub const LED: Uuid = uuid!("e95dd91d-251d-470a-a062-fa1922dfa9a8");
    pub const IO_PIN: Uuid = uuid!("e95d127b-251d-470a-a062-fa1922dfa9a8");
    pub const UART: Uuid = uuid!("6e400001-b5a3-f393-e0a9-e50e24dcca9e");
    pub const DEVICE_INFORMATION: Uuid = uuid!("0000180a-0000-1000-8000-00805f9b34fb");
}

// ── Characteristics ──────────────────────────────────────────────────

pub mod characteristics {
    use super::{uuid, Uuid};

    /// Notification payload: 3 x i16 little-endian, milli-g.
    pub const ACCELEROMETER_DATA: Uuid = uuid!("e95dca4b-251d-470a-a062-fa1922dfa9a8");
    /// Sampling period in ms, u16 little-endian, write.
    pub const ACCELEROMETER_PERIOD: Uuid = uuid!("e95dfb24-251d-470a-a062-fa1922dfa9a8");
    /// One byte: 0 released, 1 pressed, 2 long press.
    pub const BUTTON_A_STATE: Uuid = uuid!("e95dda90-251d-470a-a062-fa1922dfa9a8");
    pub const BUTTON_B_STATE: Uuid = uuid!("e95dda91-251d-470a-a062-fa1922dfa9a8");
    /// Five bytes, one row each, low 5 bits used.
    pub const LED_MATRIX_STATE: Uuid = uuid!("e95d7b77-251d-470a-a062-fa1922dfa9a8");
    /// Pairs of (pin, value) bytes.
    pub const PIN_DATA: Uuid = uuid!("e95d8d00-251d-470a-a062-fa1922dfa9a8");
    /// Write side of the UART bridge (host -> device).
    pub const UART_RX: Uuid = uuid!("6e400002-b5a3-f393-e0a9-e50e24dcca9e");
    /// Notify side of the UART bridge (device -> host).
    pub const UART_TX: Uuid = uuid!("6e400003-b5a3-f393-e0a9-e50e24dcca9e");
    /// UTF-8 model string, read once during connect.
    pub const MODEL_NUMBER: Uuid = uuid!("00002a24-0000-1000-8000-00805f9b34fb");
}

// ── Codecs ───────────────────────────────────────────────────────────

/// Decode an accelerometer notification: exactly 6 bytes, 3 x i16 LE,
/// in milli-g. Anything else is undecodable.
pub fn decode_accelerometer(value: &[u8]) -> Option<(i16, i16, i16)> {
    if value.len() != 6 {
        return None;
    }
    Some((
        i16::from_le_bytes([value[0], value[1]]),
        i16::from_le_bytes([value[2], value[3]]),
        i16::from_le_bytes([value[4], value[5]]),
    ))
}

/// Button characteristic states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonState {
    Released,
    Pressed,
    LongPressed,
}

impl ButtonState {
    pub fn is_pressed(self) -> bool {
        !matches!(self, Self::Released)
    }
}

/// Decode a button state notification: exactly one byte in 0..=2.
pub fn decode_button(value: &[u8]) -> Option<ButtonState> {
    match value {
        [0] => Some(ButtonState::Released),
        [1] => Some(ButtonState::Pressed),
        [2] => Some(ButtonState::LongPressed),
        _ => None,
    }
}

/// Encode the 5x5 LED matrix: one byte per row, column 0 at bit 4.
pub fn encode_led_matrix(rows: &[[bool; 5]; 5]) -> [u8; 5] {
    let mut out = [0u8; 5];
    for (row, bits) in rows.iter().enumerate() {
        let mut byte = 0u8;
        for (col, &on) in bits.iter().enumerate() {
            if on {
                byte |= 1 << (4 - col);
            }
        }
        out[row] = byte;
    }
    out
}

/// Encode IO pin writes as (pin, value) byte pairs.
pub fn encode_pin_writes(pairs: &[(u8, u8)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pairs.len() * 2);
    for &(pin, value) in pairs {
        out.push(pin);
        out.push(value);
    }
    out
}

/// Decode the model number string characteristic.
pub fn decode_model_number(value: &[u8]) -> Option<String> {
    let s = std::str::from_utf8(value).ok()?.trim_end_matches('\0');
    if s.is_empty() { None } else { Some(s.to_owned()) }
}

/// Encode the accelerometer sampling period in milliseconds.
pub fn encode_accelerometer_period(period_ms: u16) -> [u8; 2] {
    period_ms.to_le_bytes()
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn accelerometer_decodes_signed_le() {
        let (x, y, z) = decode_accelerometer(&[0x00, 0x01, 0xff, 0xff, 0x00, 0x08]).unwrap();
        assert_eq!(x, 256);
        assert_eq!(y, -1);
        assert_eq!(z, 2048);
    }

    #[test]
    fn accelerometer_rejects_wrong_length() {
        assert!(decode_accelerometer(&[0, 0, 0, 0]).is_none());
        assert!(decode_accelerometer(&[0; 8]).is_none());
    }

    #[test]
    fn button_state_decoding() {
        assert_eq!(decode_button(&[0]), Some(ButtonState::Released));
        assert_eq!(decode_button(&[1]), Some(ButtonState::Pressed));
        assert_eq!(decode_button(&[2]), Some(ButtonState::LongPressed));
        assert_eq!(decode_button(&[3]), None);
        assert_eq!(decode_button(&[]), None);
        assert_eq!(decode_button(&[1, 1]), None);
        assert!(ButtonState::LongPressed.is_pressed());
        assert!(!ButtonState::Released.is_pressed());
    }

    #[test]
    fn led_matrix_rows_pack_into_low_five_bits() {
        let mut rows = [[false; 5]; 5];
        rows[0][0] = true;
        rows[0][4] = true;
        rows[4] = [true; 5];
        let encoded = encode_led_matrix(&rows);
        assert_eq!(encoded[0], 0b1_0001);
        assert_eq!(encoded[1], 0);
        assert_eq!(encoded[4], 0b1_1111);
    }

    #[test]
    fn pin_writes_are_flat_pairs() {
        assert_eq!(encode_pin_writes(&[(0, 1), (2, 255)]), vec![0, 1, 2, 255]);
        assert!(encode_pin_writes(&[]).is_empty());
    }

    #[test]
    fn accelerometer_period_is_little_endian() {
        assert_eq!(encode_accelerometer_period(20), [20, 0]);
        assert_eq!(encode_accelerometer_period(640), [0x80, 0x02]);
    }

    #[test]
    fn model_number_trims_nul_padding() {
        assert_eq!(
            decode_model_number(b"BBC micro:bit V2\0\0").as_deref(),
            Some("BBC micro:bit V2")
        );
        assert_eq!(decode_model_number(b"\0\0"), None);
        assert_eq!(decode_model_number(&[0xff, 0xfe]), None);
    }
}
