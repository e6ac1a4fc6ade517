//! The injection adapter: posts synthetic input with provenance marking and
//! drag reconstruction.
//!
//! The wire carries drags as plain mouse moves; this side reconstructs
//! move-vs-drag from the set of currently held buttons. On the receiver's
//! forwarding path moves additionally warp the cursor to the tracked
//! position and keep the relative delta fields populated so applications
//! watching deltas see smooth motion.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use inputshare_core::domain::geometry::Point;
use inputshare_core::protocol::{InputEvent, MouseButton, PressState};

use super::{HidBackend, HidError, SyntheticEvent, PROVENANCE_MARKER};

/// The injection side of the HID adapter layer.
pub struct InjectionAdapter {
    backend: Arc<dyn HidBackend>,
    buttons_down: Mutex<HashSet<MouseButton>>,
}

impl InjectionAdapter {
    pub fn new(backend: Arc<dyn HidBackend>) -> Self {
        Self {
            backend,
            buttons_down: Mutex::new(HashSet::new()),
        }
    }

    /// Synthesizes `event` at the current cursor position.
    ///
    /// Button events update the held-button set before posting so a
    /// following move is classified correctly.
    ///
    /// # Errors
    ///
    /// Returns [`HidError::Post`] when the OS rejects the event.
    pub fn inject(&self, event: &InputEvent) -> Result<(), HidError> {
        if let InputEvent::MouseButton { button, state, .. } = event {
            let mut held = self.buttons_down.lock().expect("lock poisoned");
            match state {
                PressState::Down => {
                    held.insert(*button);
                }
                PressState::Up => {
                    held.remove(button);
                }
            }
        }

        self.backend.post(SyntheticEvent {
            event: event.clone(),
            warp_to: None,
            drag: self.is_dragging() && matches!(event, InputEvent::MouseMove { .. }),
            marker: PROVENANCE_MARKER,
        })
    }

    /// Receiver move path: warps the cursor to `target` and posts a move (or
    /// drag) whose delta fields carry the original relative motion.
    ///
    /// # Errors
    ///
    /// Returns [`HidError::Post`] when the OS rejects the event.
    pub fn inject_move_to(
        &self,
        target: Point,
        dx: i32,
        dy: i32,
        modifiers: u64,
    ) -> Result<(), HidError> {
        self.backend.post(SyntheticEvent {
            event: InputEvent::MouseMove { dx, dy, normalized: None, modifiers },
            warp_to: Some(target),
            drag: self.is_dragging(),
            marker: PROVENANCE_MARKER,
        })
    }

    /// `true` while any mouse button is held.
    pub fn is_dragging(&self) -> bool {
        !self.buttons_down.lock().expect("lock poisoned").is_empty()
    }

    /// Forgets all held buttons (connection loss, session teardown).
    pub fn reset(&self) {
        self.buttons_down.lock().expect("lock poisoned").clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
