//! Binary codec for framing and envelope/payload serialization.
//!
//! Wire format of one frame:
//! ```text
//! [frame_len:4][envelope:frame_len]
//! ```
//! Envelope layout inside the frame:
//! ```text
//! [version:1][msg_type:1][reserved:2][seq:8][monotonic_ns:8]
//! [device_id_len:2][device_id:N][payload:rest]
//! ```
//! All multi-byte integers are big-endian. Floating-point fields travel as
//! IEEE-754 bit patterns in big-endian byte order.

use thiserror::Error;

use crate::protocol::messages::{
    clamp_normalized, ActivatePayload, DeactivatePayload, Envelope, HelloPayload, InputEvent,
    MessageType, MouseButton, PressState, ENVELOPE_FIXED_SIZE, PROTOCOL_VERSION,
};

/// Upper bound on a declared frame length. Anything larger is treated as a
/// corrupt length prefix rather than an instruction to buffer gigabytes.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Errors that can occur during framing, envelope, or payload decode.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The message type byte in the header is not a recognized value.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// The protocol version in the header is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// A frame declared a length beyond [`MAX_FRAME_LEN`].
    #[error("frame length {declared} exceeds maximum {max}")]
    FrameTooLarge { declared: usize, max: usize },

    /// The payload could not be parsed (field out of range, UTF-8 error, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

// ── Framing ───────────────────────────────────────────────────────────────────

/// Prepends the 4-byte big-endian length prefix to `payload`.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Reassembly buffer for the receiving side of a framed stream.
///
/// Bytes arrive in arbitrary chunks; [`drain_frames`](FrameBuffer::drain_frames)
/// consumes every complete frame currently buffered and leaves any partial
/// trailing bytes in place for the next read.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered (not yet consumed) bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes and returns all complete frames, in arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLarge`] on a corrupt length prefix;
    /// the buffer is cleared in that case because resynchronization within
    /// the stream is impossible.
    pub fn drain_frames(&mut self) -> Result<Vec<Vec<u8>>, ProtocolError> {
        let mut frames = Vec::new();
        let mut cursor = 0usize;

        loop {
            let remaining = &self.buf[cursor..];
            if remaining.len() < 4 {
                break;
            }
            let declared =
                u32::from_be_bytes([remaining[0], remaining[1], remaining[2], remaining[3]])
                    as usize;
            if declared > MAX_FRAME_LEN {
                self.buf.clear();
                return Err(ProtocolError::FrameTooLarge {
                    declared,
                    max: MAX_FRAME_LEN,
                });
            }
            if remaining.len() < 4 + declared {
                break;
            }
            frames.push(remaining[4..4 + declared].to_vec());
            cursor += 4 + declared;
        }

        self.buf.drain(..cursor);
        Ok(frames)
    }
}

// ── Envelope ──────────────────────────────────────────────────────────────────

/// Encodes an [`Envelope`] into the on-wire byte layout (without framing).
pub fn encode_envelope(envelope: &Envelope) -> Vec<u8> {
    let id_bytes = envelope.source_device_id.as_bytes();
    let id_len = id_bytes.len().min(u16::MAX as usize);

    let mut buf = Vec::with_capacity(ENVELOPE_FIXED_SIZE + id_len + envelope.payload.len());
    buf.push(envelope.version);
    buf.push(envelope.message_type as u8);
    buf.push(0x00); // reserved
    buf.push(0x00); // reserved
    buf.extend_from_slice(&envelope.sequence.to_be_bytes());
    buf.extend_from_slice(&envelope.monotonic_ns.to_be_bytes());
    buf.extend_from_slice(&(id_len as u16).to_be_bytes());
    buf.extend_from_slice(&id_bytes[..id_len]);
    buf.extend_from_slice(&envelope.payload);
    buf
}

/// Decodes an [`Envelope`] from one deframed payload.
///
/// The payload bytes are copied out verbatim; interpreting them requires the
/// per-kind payload decoders below.
///
/// # Errors
///
/// Returns [`ProtocolError::UnsupportedVersion`] or
/// [`ProtocolError::UnknownMessageType`] for headers this peer cannot
/// interpret; callers log and discard such frames without disconnecting.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, ProtocolError> {
    if bytes.len() < ENVELOPE_FIXED_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: ENVELOPE_FIXED_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let msg_type_byte = bytes[1];
    let message_type = MessageType::try_from(msg_type_byte)
        .map_err(|_| ProtocolError::UnknownMessageType(msg_type_byte))?;

    // bytes[2..4] are reserved – ignored on decode

    let sequence = read_u64(bytes, 4)?;
    let monotonic_ns = read_u64(bytes, 12)?;
    let (source_device_id, id_end) = read_length_prefixed_string(bytes, 20)?;
    let payload = bytes[id_end..].to_vec();

    Ok(Envelope {
        version,
        message_type,
        sequence,
        monotonic_ns,
        source_device_id,
        payload,
    })
}

// ── Input event payload ───────────────────────────────────────────────────────

const KIND_MOUSE_MOVE: u8 = 0x01;
const KIND_MOUSE_BUTTON: u8 = 0x02;
const KIND_SCROLL: u8 = 0x03;
const KIND_KEY: u8 = 0x04;
const KIND_FLAGS_CHANGED: u8 = 0x05;

/// Encodes an [`InputEvent`] payload.
///
/// Layout: `[kind:1][modifiers:8][kind-specific fields]`.
pub fn encode_input_event(event: &InputEvent) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    match event {
        InputEvent::MouseMove { dx, dy, normalized, modifiers } => {
            buf.push(KIND_MOUSE_MOVE);
            buf.extend_from_slice(&modifiers.to_be_bytes());
            buf.extend_from_slice(&dx.to_be_bytes());
            buf.extend_from_slice(&dy.to_be_bytes());
            match normalized {
                Some((nx, ny)) => {
                    buf.push(0x01);
                    buf.extend_from_slice(&clamp_normalized(*nx).to_bits().to_be_bytes());
                    buf.extend_from_slice(&clamp_normalized(*ny).to_bits().to_be_bytes());
                }
                None => buf.push(0x00),
            }
        }
        InputEvent::MouseButton { button, state, modifiers } => {
            buf.push(KIND_MOUSE_BUTTON);
            buf.extend_from_slice(&modifiers.to_be_bytes());
            buf.push(*button as u8);
            buf.push(*state as u8);
        }
        InputEvent::Scroll { dx, dy, modifiers } => {
            buf.push(KIND_SCROLL);
            buf.extend_from_slice(&modifiers.to_be_bytes());
            buf.extend_from_slice(&dx.to_bits().to_be_bytes());
            buf.extend_from_slice(&dy.to_bits().to_be_bytes());
        }
        InputEvent::Key { keycode, state, modifiers } => {
            buf.push(KIND_KEY);
            buf.extend_from_slice(&modifiers.to_be_bytes());
            buf.extend_from_slice(&keycode.to_be_bytes());
            buf.push(*state as u8);
        }
        InputEvent::FlagsChanged { modifiers } => {
            buf.push(KIND_FLAGS_CHANGED);
            buf.extend_from_slice(&modifiers.to_be_bytes());
        }
    }
    buf
}

/// Decodes an [`InputEvent`] payload.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] when the kind byte or any
/// kind-specific field is out of range or truncated.
pub fn decode_input_event(p: &[u8]) -> Result<InputEvent, ProtocolError> {
    require_len(p, 9, "InputEvent")?;
    let kind = p[0];
    let modifiers = read_u64(p, 1)?;
    let body = &p[9..];

    match kind {
        KIND_MOUSE_MOVE => {
            require_len(body, 9, "MouseMove")?;
            let dx = read_i32(body, 0)?;
            let dy = read_i32(body, 4)?;
            let normalized = match body[8] {
                0x00 => None,
                0x01 => {
                    require_len(body, 25, "MouseMove.normalized")?;
                    let nx = read_f64(body, 9)?;
                    let ny = read_f64(body, 17)?;
                    Some((clamp_normalized(nx), clamp_normalized(ny)))
                }
                other => {
                    return Err(ProtocolError::MalformedPayload(format!(
                        "invalid normalized-position flag: {other}"
                    )));
                }
            };
            Ok(InputEvent::MouseMove { dx, dy, normalized, modifiers })
        }
        KIND_MOUSE_BUTTON => {
            require_len(body, 2, "MouseButton")?;
            let button = MouseButton::try_from(body[0]).map_err(|_| {
                ProtocolError::MalformedPayload(format!("unknown mouse button: {}", body[0]))
            })?;
            let state = PressState::try_from(body[1]).map_err(|_| {
                ProtocolError::MalformedPayload(format!("unknown button state: {}", body[1]))
            })?;
            Ok(InputEvent::MouseButton { button, state, modifiers })
        }
        KIND_SCROLL => {
            require_len(body, 16, "Scroll")?;
            let dx = read_f64(body, 0)?;
            let dy = read_f64(body, 8)?;
            Ok(InputEvent::Scroll { dx, dy, modifiers })
        }
        KIND_KEY => {
            require_len(body, 3, "Key")?;
            let keycode = u16::from_be_bytes([body[0], body[1]]);
            let state = PressState::try_from(body[2]).map_err(|_| {
                ProtocolError::MalformedPayload(format!("unknown key state: {}", body[2]))
            })?;
            Ok(InputEvent::Key { keycode, state, modifiers })
        }
        KIND_FLAGS_CHANGED => Ok(InputEvent::FlagsChanged { modifiers }),
        other => Err(ProtocolError::MalformedPayload(format!(
            "unknown input event kind: 0x{other:02X}"
        ))),
    }
}

// ── Control payloads ──────────────────────────────────────────────────────────

/// Encodes an [`ActivatePayload`]. The normalized Y is clamped into `[0, 1]`.
pub fn encode_activate(payload: &ActivatePayload) -> Vec<u8> {
    clamp_normalized(payload.normalized_y)
        .to_bits()
        .to_be_bytes()
        .to_vec()
}

/// Decodes an [`ActivatePayload`], clamping the Y back into `[0, 1]`.
pub fn decode_activate(p: &[u8]) -> Result<ActivatePayload, ProtocolError> {
    let normalized_y = clamp_normalized(read_f64(p, 0)?);
    Ok(ActivatePayload { normalized_y })
}

/// Encodes a [`DeactivatePayload`].
pub fn encode_deactivate(payload: &DeactivatePayload) -> Vec<u8> {
    clamp_normalized(payload.normalized_y)
        .to_bits()
        .to_be_bytes()
        .to_vec()
}

/// Decodes a [`DeactivatePayload`].
pub fn decode_deactivate(p: &[u8]) -> Result<DeactivatePayload, ProtocolError> {
    let normalized_y = clamp_normalized(read_f64(p, 0)?);
    Ok(DeactivatePayload { normalized_y })
}

/// Encodes a [`HelloPayload`].
pub fn encode_hello(payload: &HelloPayload) -> Vec<u8> {
    let mut buf = Vec::new();
    write_length_prefixed_string(&mut buf, &payload.device_name);
    buf
}

/// Decodes a [`HelloPayload`].
pub fn decode_hello(p: &[u8]) -> Result<HelloPayload, ProtocolError> {
    let (device_name, _) = read_length_prefixed_string(p, 0)?;
    Ok(HelloPayload { device_name })
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn read_u64(buf: &[u8], offset: usize) -> Result<u64, ProtocolError> {
    if buf.len() < offset + 8 {
        return Err(ProtocolError::InsufficientData {
            needed: offset + 8,
            available: buf.len(),
        });
    }
    Ok(u64::from_be_bytes(
        buf[offset..offset + 8].try_into().unwrap(),
    ))
}

fn read_i32(buf: &[u8], offset: usize) -> Result<i32, ProtocolError> {
    if buf.len() < offset + 4 {
        return Err(ProtocolError::InsufficientData {
            needed: offset + 4,
            available: buf.len(),
        });
    }
    Ok(i32::from_be_bytes(
        buf[offset..offset + 4].try_into().unwrap(),
    ))
}

fn read_f64(buf: &[u8], offset: usize) -> Result<f64, ProtocolError> {
    Ok(f64::from_bits(read_u64(buf, offset)?))
}

/// Writes a 2-byte length prefix followed by the UTF-8 string bytes.
fn write_length_prefixed_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(u16::MAX as usize) as u16;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&bytes[..len as usize]);
}

/// Reads a 2-byte length prefix and then that many UTF-8 bytes.
/// Returns the string and the offset of the byte after the string.
fn read_length_prefixed_string(buf: &[u8], offset: usize) -> Result<(String, usize), ProtocolError> {
    if buf.len() < offset + 2 {
        return Err(ProtocolError::MalformedPayload(format!(
            "need 2 bytes for string length at offset {offset}"
        )));
    }
    let len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
    let start = offset + 2;
    if buf.len() < start + len {
        return Err(ProtocolError::MalformedPayload(format!(
            "string of length {len} at offset {start} exceeds buffer"
        )));
    }
    let s = std::str::from_utf8(&buf[start..start + len])
        .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8: {e}")))?
        .to_string();
    Ok((s, start + len))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
