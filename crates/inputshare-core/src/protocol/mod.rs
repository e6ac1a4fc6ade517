//! Wire protocol: message types, binary codec, framing, and sequence
//! numbering.

pub mod codec;
pub mod messages;
pub mod sequence;

pub use codec::{
    decode_activate, decode_deactivate, decode_envelope, decode_hello, decode_input_event,
    encode_activate, encode_deactivate, encode_envelope, encode_hello, encode_input_event, frame,
    FrameBuffer, ProtocolError, MAX_FRAME_LEN,
};
pub use messages::{
    ActivatePayload, DeactivatePayload, Envelope, HelloPayload, InputEvent, MessageType,
    MouseButton, PressState, PROTOCOL_VERSION,
};
pub use sequence::{SequenceCounter, SequenceObservation, SequenceTracker};
