//! # inputshare-core
//!
//! Shared library for inputshare containing the wire protocol codec, screen
//! geometry, and the handoff domain machines (edge detector, forwarding
//! state machine, mouse-move coalescer).
//!
//! This crate is used by both roles of a peer. It has zero dependencies on
//! OS APIs, UI frameworks, or network sockets.

pub mod domain;
pub mod protocol;

/// Re-export commonly used types at the crate root for convenience.
pub use domain::{
    Coalescer, DisplayRect, EdgeDetector, EdgeDetectorConfig, EdgeEvent, EdgeZone,
    ForwardingMachine, ForwardingState, GeometryError, HandshakeEffect, Point, ScreenGeometry,
};
pub use protocol::{
    decode_envelope, encode_envelope, Envelope, FrameBuffer, InputEvent, MessageType,
    ProtocolError, SequenceCounter, SequenceTracker, PROTOCOL_VERSION,
};
