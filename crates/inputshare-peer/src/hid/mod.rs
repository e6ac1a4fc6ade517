//! HID capture and injection adapters over an OS-backend seam.
//!
//! The OS primitives — system-wide hooks, synthetic event posting, cursor
//! warping/association/visibility — are an external collaborator expressed
//! as the [`HidBackend`] trait. The adapters in [`capture`] and [`inject`]
//! carry the engineering the handoff depends on: provenance-based loop
//! suppression, virtual-cursor tracking while the physical cursor is
//! pinned, post-warp delta discarding, and drag-vs-move reconstruction from
//! held buttons.
//!
//! [`mock::MockHidBackend`] implements the seam in memory and loops posted
//! events back through the hook, which is exactly what makes the loop
//! suppression testable.

pub mod capture;
pub mod inject;
pub mod mock;

use std::sync::Arc;

use inputshare_core::domain::geometry::{DisplayRect, Point};
use inputshare_core::protocol::InputEvent;
use thiserror::Error;

/// Fixed 64-bit sentinel written into the user-data field of every injected
/// event. The capture hook recognizes it and never forwards such events,
/// breaking the inject→capture→inject loop.
pub const PROVENANCE_MARKER: u64 = 0x4953_4852_4556_3031; // "ISHREV01"

/// Errors from the HID layer.
#[derive(Debug, Error)]
pub enum HidError {
    /// The OS denied the capability to observe or post HID events.
    #[error("HID access not granted")]
    PermissionDenied,

    #[error("failed to install input hook: {0}")]
    HookInstall(String),

    /// The OS disabled the hook and re-enabling it failed.
    #[error("input hook disabled by the OS")]
    HookDisabled,

    #[error("failed to post synthetic event: {0}")]
    Post(String),

    #[error("no HID backend available on this platform")]
    UnsupportedPlatform,
}

/// What the hook should do with an observed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookDisposition {
    /// Pass the event on to local applications.
    Deliver,
    /// Drop the event from the local delivery path (HID suppression).
    Consume,
}

/// One event observed by the system-wide hook.
#[derive(Debug, Clone)]
pub struct HookEvent {
    pub event: InputEvent,
    /// Cursor position reported by the window server at observation time.
    pub position: Point,
    /// User-data marker; [`PROVENANCE_MARKER`] identifies our own output.
    pub marker: u64,
}

/// One event to synthesize against the OS HID layer.
#[derive(Debug, Clone)]
pub struct SyntheticEvent {
    pub event: InputEvent,
    /// Warp the cursor here before the event lands (receiver move path).
    pub warp_to: Option<Point>,
    /// Post as a drag rather than a plain move (a button is held).
    pub drag: bool,
    /// Always [`PROVENANCE_MARKER`] for events we originate.
    pub marker: u64,
}

/// Receives hook callbacks. Implementations run on the OS hook thread and
/// must return promptly.
pub trait HookHandler: Send + Sync {
    fn handle(&self, event: HookEvent) -> HookDisposition;

    /// The OS disabled the hook (callback timeout or user action).
    fn hook_disabled(&self) {}
}

/// The OS primitive seam.
pub trait HidBackend: Send + Sync {
    /// Installs the system-wide hook; `handler` is called synchronously for
    /// every observed event.
    fn install_hook(&self, handler: Arc<dyn HookHandler>) -> Result<(), HidError>;

    fn remove_hook(&self);

    /// Re-enables a hook the OS disabled, without reinstalling it.
    fn reenable_hook(&self) -> Result<(), HidError>;

    /// Posts a synthetic event carrying the provenance marker.
    fn post(&self, event: SyntheticEvent) -> Result<(), HidError>;

    fn warp_cursor(&self, to: Point);

    /// Attaches or detaches physical mouse motion from the on-screen cursor.
    fn set_cursor_associated(&self, associated: bool);

    fn set_cursor_hidden(&self, hidden: bool);

    fn cursor_position(&self) -> Point;

    /// Connected display rectangles in virtual-screen coordinates.
    fn displays(&self) -> Vec<DisplayRect>;

    /// Probes the HID capability grant. Absence is fatal for capture and
    /// injection but not for the transport layer.
    fn access_granted(&self) -> bool;
}

/// The platform backend for this build.
///
/// OS integrations (CGEventTap/SendInput/uinput) register here; none are
/// bundled with this crate, so production builds link one in separately and
/// development uses [`mock::MockHidBackend`].
///
/// # Errors
///
/// Returns [`HidError::UnsupportedPlatform`] when no backend is linked.
pub fn native_backend() -> Result<Arc<dyn HidBackend>, HidError> {
    Err(HidError::UnsupportedPlatform)
}
