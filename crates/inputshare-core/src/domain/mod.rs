//! Domain logic shared by both roles: screen geometry, the edge detector,
//! the forwarding state machine, and the mouse-move coalescer.

pub mod coalescer;
pub mod edge;
pub mod forwarding;
pub mod geometry;

pub use coalescer::{Coalescer, DEFAULT_FLUSH_INTERVAL};
pub use edge::{EdgeConfigError, EdgeDetector, EdgeDetectorConfig, EdgeEvent, EdgeZone};
pub use forwarding::{
    ForwardingMachine, ForwardingState, HandshakeEffect, DEFAULT_ACTIVATION_TIMEOUT,
};
pub use geometry::{DisplayRect, GeometryError, Point, ScreenGeometry};
