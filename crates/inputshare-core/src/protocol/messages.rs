//! All inputshare protocol message types.
//!
//! A session exchanges [`Envelope`]s over a framed TLS stream. The envelope
//! header is decodable without knowing the payload kind; the payload is an
//! opaque byte sequence interpreted according to [`MessageType`].

use serde::{Deserialize, Serialize};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Fixed portion of the envelope header in bytes:
/// version (1) + msg_type (1) + reserved (2) + seq (8) + monotonic_ns (8) +
/// device_id length prefix (2).
pub const ENVELOPE_FIXED_SIZE: usize = 22;

// ── Message type codes ────────────────────────────────────────────────────────

/// All message type codes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Session control (0x00–0x3F)
    Hello = 0x01,
    Activate = 0x10,
    Activated = 0x11,
    Deactivate = 0x12,
    Deactivated = 0x13,
    // Reserved for the external pairing flow; decoded but never acted on.
    PairRequest = 0x20,
    PairAccept = 0x21,
    // Input channel (0x40–0x7F)
    InputEvent = 0x40,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(MessageType::Hello),
            0x10 => Ok(MessageType::Activate),
            0x11 => Ok(MessageType::Activated),
            0x12 => Ok(MessageType::Deactivate),
            0x13 => Ok(MessageType::Deactivated),
            0x20 => Ok(MessageType::PairRequest),
            0x21 => Ok(MessageType::PairAccept),
            0x40 => Ok(MessageType::InputEvent),
            _ => Err(()),
        }
    }
}

// ── Envelope ──────────────────────────────────────────────────────────────────

/// One protocol message: header fields plus an opaque payload.
///
/// `sequence` increases strictly per `source_device_id` within a session;
/// gaps on the receiving side imply loss. `monotonic_ns` is a reading of the
/// sender's monotonic clock and is meaningful only relative to other readings
/// from the same sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Protocol version; always [`PROTOCOL_VERSION`] on the current wire.
    pub version: u8,
    /// Identifies how `payload` is to be interpreted.
    pub message_type: MessageType,
    /// Monotonically increasing per-sender counter.
    pub sequence: u64,
    /// Sender monotonic clock reading in nanoseconds.
    pub monotonic_ns: u64,
    /// Stable identifier of the sending peer.
    pub source_device_id: String,
    /// Kind-specific serialized payload; opaque to the transport.
    pub payload: Vec<u8>,
}

// ── Input events ──────────────────────────────────────────────────────────────

/// Mouse button identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MouseButton {
    Left = 0x01,
    Right = 0x02,
    Other = 0x03,
}

impl TryFrom<u8> for MouseButton {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MouseButton::Left),
            0x02 => Ok(MouseButton::Right),
            0x03 => Ok(MouseButton::Other),
            _ => Err(()),
        }
    }
}

/// Press/release state shared by button and key events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PressState {
    Down = 0x01,
    Up = 0x02,
}

impl TryFrom<u8> for PressState {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(PressState::Down),
            0x02 => Ok(PressState::Up),
            _ => Err(()),
        }
    }
}

/// A decoded HID event, as captured on the sender and injected on the
/// receiver.
///
/// `modifiers` is the OS-defined 64-bit modifier bitmask sampled at capture
/// time; it crosses the wire opaquely and must be replayed unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputEvent {
    /// Relative mouse motion in raw device pixels. `normalized` is the
    /// sender-side cursor position as a fraction of its virtual screen,
    /// informational only.
    MouseMove {
        dx: i32,
        dy: i32,
        normalized: Option<(f64, f64)>,
        modifiers: u64,
    },
    MouseButton {
        button: MouseButton,
        state: PressState,
        modifiers: u64,
    },
    /// Continuous scroll deltas in pixel units.
    Scroll { dx: f64, dy: f64, modifiers: u64 },
    Key {
        keycode: u16,
        state: PressState,
        modifiers: u64,
    },
    FlagsChanged { modifiers: u64 },
}

impl InputEvent {
    /// The modifier bitmask carried by every event kind.
    pub fn modifiers(&self) -> u64 {
        match self {
            InputEvent::MouseMove { modifiers, .. }
            | InputEvent::MouseButton { modifiers, .. }
            | InputEvent::Scroll { modifiers, .. }
            | InputEvent::Key { modifiers, .. }
            | InputEvent::FlagsChanged { modifiers } => *modifiers,
        }
    }

    /// `true` for the kinds the coalescer accumulates rather than passes
    /// through.
    pub fn is_coalescable(&self) -> bool {
        matches!(
            self,
            InputEvent::MouseMove { .. } | InputEvent::Scroll { .. }
        )
    }
}

// ── Control payloads ──────────────────────────────────────────────────────────

/// Payload of [`MessageType::Activate`]: the vertical crossing coordinate as
/// a fraction of the sender's virtual-screen height. The horizontal
/// component of the crossing is always the boundary itself, so only Y is
/// conveyed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActivatePayload {
    pub normalized_y: f64,
}

/// Payload of [`MessageType::Deactivate`]: the return crossing Y as a
/// fraction of the receiver's virtual-screen height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeactivatePayload {
    pub normalized_y: f64,
}

/// Payload of [`MessageType::Hello`]: announced once per connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Friendly display name of the peer (hostname by default).
    pub device_name: String,
}

/// Clamps a normalized coordinate into `[0, 1]`.
pub fn clamp_normalized(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_round_trips_through_u8() {
        for ty in [
            MessageType::Hello,
            MessageType::Activate,
            MessageType::Activated,
            MessageType::Deactivate,
            MessageType::Deactivated,
            MessageType::PairRequest,
            MessageType::PairAccept,
            MessageType::InputEvent,
        ] {
            assert_eq!(MessageType::try_from(ty as u8), Ok(ty));
        }
    }

    #[test]
    fn test_message_type_rejects_unknown_byte() {
        assert!(MessageType::try_from(0x7E).is_err());
        assert!(MessageType::try_from(0x00).is_err());
    }

    #[test]
    fn test_modifiers_accessor_covers_every_kind() {
        let events = [
            InputEvent::MouseMove { dx: 1, dy: 2, normalized: None, modifiers: 7 },
            InputEvent::MouseButton {
                button: MouseButton::Left,
                state: PressState::Down,
                modifiers: 7,
            },
            InputEvent::Scroll { dx: 0.5, dy: -0.5, modifiers: 7 },
            InputEvent::Key { keycode: 4, state: PressState::Up, modifiers: 7 },
            InputEvent::FlagsChanged { modifiers: 7 },
        ];
        for event in events {
            assert_eq!(event.modifiers(), 7);
        }
    }

    #[test]
    fn test_only_moves_and_scrolls_are_coalescable() {
        assert!(InputEvent::MouseMove { dx: 0, dy: 0, normalized: None, modifiers: 0 }
            .is_coalescable());
        assert!(InputEvent::Scroll { dx: 0.0, dy: 0.0, modifiers: 0 }.is_coalescable());
        assert!(!InputEvent::FlagsChanged { modifiers: 0 }.is_coalescable());
        assert!(!InputEvent::Key { keycode: 1, state: PressState::Down, modifiers: 0 }
            .is_coalescable());
    }

    #[test]
    fn test_clamp_normalized_bounds_and_nan() {
        assert_eq!(clamp_normalized(-0.5), 0.0);
        assert_eq!(clamp_normalized(1.5), 1.0);
        assert_eq!(clamp_normalized(0.25), 0.25);
        assert_eq!(clamp_normalized(f64::NAN), 0.0);
    }
}
