//! The capture adapter: system-wide observation with provenance filtering
//! and HID suppression.
//!
//! While suppressing, the physical mouse is dissociated from the on-screen
//! cursor, the real cursor is pinned at the virtual-screen center, and a
//! *virtual* cursor seeded at the handoff crossing point is advanced from
//! raw deltas. The pin warp itself generates one spurious hook delta equal
//! to the warp distance, so the first few post-warp moves are discarded.

use std::sync::{Arc, Mutex};

use inputshare_core::domain::geometry::{DisplayRect, Point};
use inputshare_core::protocol::InputEvent;
use tracing::{debug, warn};

use super::{HidBackend, HidError, HookDisposition, HookEvent, HookHandler, PROVENANCE_MARKER};

/// Number of mouse-move hook events discarded right after suppression
/// begins; the entry warp manufactures that many spurious deltas.
pub const WARP_DISCARD_MOVES: u8 = 2;

/// Receives filtered capture output. Called from the hook thread; hand off
/// and return promptly.
pub trait CaptureSink: Send + Sync {
    fn on_input_event(&self, event: InputEvent);

    /// Current cursor position — physical while unsuppressed, virtual while
    /// suppressed.
    fn on_raw_mouse_move(&self, position: Point);

    /// The hook was disabled and could not be re-enabled.
    fn on_capture_lost(&self) {}
}

#[derive(Debug)]
struct Suppression {
    virtual_pos: Point,
    bounds: DisplayRect,
    discard_moves: u8,
    cursor_hidden: bool,
}

struct Shared {
    backend: Arc<dyn HidBackend>,
    sink: Mutex<Option<Arc<dyn CaptureSink>>>,
    suppression: Mutex<Option<Suppression>>,
}

/// The capture side of the HID adapter layer. Clone-able handle; clones
/// share state.
#[derive(Clone)]
pub struct CaptureAdapter {
    shared: Arc<Shared>,
}

impl CaptureAdapter {
    pub fn new(backend: Arc<dyn HidBackend>) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                sink: Mutex::new(None),
                suppression: Mutex::new(None),
            }),
        }
    }

    /// Installs the system-wide hook and routes filtered events to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`HidError::PermissionDenied`] when the capability probe
    /// fails and [`HidError::HookInstall`] when the hook cannot be placed.
    pub fn start(&self, sink: Arc<dyn CaptureSink>) -> Result<(), HidError> {
        if !self.shared.backend.access_granted() {
            return Err(HidError::PermissionDenied);
        }
        *self.shared.sink.lock().expect("lock poisoned") = Some(sink);
        let hook = Arc::new(CaptureHook { shared: Arc::clone(&self.shared) });
        self.shared.backend.install_hook(hook)
    }

    /// Tears the hook down and releases any active suppression.
    pub fn stop(&self) {
        self.stop_suppressing();
        self.shared.backend.remove_hook();
        *self.shared.sink.lock().expect("lock poisoned") = None;
    }

    /// Begins HID suppression: dissociates the physical mouse, pins the real
    /// cursor at `pin_point`, optionally hides it, and starts tracking a
    /// virtual cursor seeded at `virtual_start` and clamped to `bounds`.
    pub fn start_suppressing(
        &self,
        virtual_start: Point,
        bounds: DisplayRect,
        pin_point: Point,
        hide_cursor: bool,
    ) {
        let backend = &self.shared.backend;
        backend.set_cursor_associated(false);
        backend.warp_cursor(pin_point);
        if hide_cursor {
            backend.set_cursor_hidden(true);
        }
        *self.shared.suppression.lock().expect("lock poisoned") = Some(Suppression {
            virtual_pos: virtual_start,
            bounds,
            discard_moves: WARP_DISCARD_MOVES,
            cursor_hidden: hide_cursor,
        });
        debug!(?virtual_start, hide_cursor, "HID suppression engaged");
    }

    /// Ends suppression: reattaches the physical cursor and unhides it.
    /// Idempotent; every session exit path runs through here.
    pub fn stop_suppressing(&self) {
        let released = self
            .shared
            .suppression
            .lock()
            .expect("lock poisoned")
            .take();
        if let Some(sup) = released {
            let backend = &self.shared.backend;
            backend.set_cursor_associated(true);
            if sup.cursor_hidden {
                backend.set_cursor_hidden(false);
            }
            debug!("HID suppression released");
        }
    }

    pub fn is_suppressing(&self) -> bool {
        self.shared
            .suppression
            .lock()
            .expect("lock poisoned")
            .is_some()
    }

    /// The tracked virtual cursor, while suppressing.
    pub fn virtual_cursor(&self) -> Option<Point> {
        self.shared
            .suppression
            .lock()
            .expect("lock poisoned")
            .as_ref()
            .map(|s| s.virtual_pos)
    }
}

/// Pairs [`CaptureAdapter::start_suppressing`] with a guaranteed release:
/// dropping the guard (normal exit or unwind) reattaches the cursor.
pub struct SuppressionGuard {
    capture: CaptureAdapter,
}

impl SuppressionGuard {
    pub fn engage(
        capture: &CaptureAdapter,
        virtual_start: Point,
        bounds: DisplayRect,
        pin_point: Point,
        hide_cursor: bool,
    ) -> Self {
        capture.start_suppressing(virtual_start, bounds, pin_point, hide_cursor);
        Self { capture: capture.clone() }
    }
}

impl Drop for SuppressionGuard {
    fn drop(&mut self) {
        self.capture.stop_suppressing();
    }
}

struct CaptureHook {
    shared: Arc<Shared>,
}

impl HookHandler for CaptureHook {
    fn handle(&self, hook_event: HookEvent) -> HookDisposition {
        // Our own injected events are never forwarded to the sink; they are
        // meant for local applications.
        if hook_event.marker == PROVENANCE_MARKER {
            return HookDisposition::Deliver;
        }

        let sink = self.shared.sink.lock().expect("lock poisoned").clone();
        let Some(sink) = sink else {
            return HookDisposition::Deliver;
        };

        let mut suppression = self.shared.suppression.lock().expect("lock poisoned");
        match suppression.as_mut() {
            Some(state) => {
                if let InputEvent::MouseMove { dx, dy, .. } = &hook_event.event {
                    if state.discard_moves > 0 {
                        state.discard_moves -= 1;
                        debug!(dx, dy, "discarding post-warp mouse delta");
                        return HookDisposition::Consume;
                    }
                    state.virtual_pos.x =
                        (state.virtual_pos.x + f64::from(*dx)).clamp(
                            state.bounds.x,
                            state.bounds.right() - 1.0,
                        );
                    state.virtual_pos.y =
                        (state.virtual_pos.y + f64::from(*dy)).clamp(
                            state.bounds.y,
                            state.bounds.bottom() - 1.0,
                        );
                    let position = state.virtual_pos;
                    drop(suppression);
                    sink.on_raw_mouse_move(position);
                    sink.on_input_event(hook_event.event);
                    return HookDisposition::Consume;
                }
                drop(suppression);
                sink.on_input_event(hook_event.event);
                HookDisposition::Consume
            }
            None => {
                drop(suppression);
                if matches!(hook_event.event, InputEvent::MouseMove { .. }) {
                    sink.on_raw_mouse_move(hook_event.position);
                }
                sink.on_input_event(hook_event.event);
                HookDisposition::Deliver
            }
        }
    }

    fn hook_disabled(&self) {
        // One re-enable attempt on the same hook; a second failure is a
        // permission-level loss.
        match self.shared.backend.reenable_hook() {
            Ok(()) => warn!("input hook was disabled by the OS; re-enabled"),
            Err(e) => {
                warn!("input hook re-enable failed: {e}");
                if let Some(sink) = self.shared.sink.lock().expect("lock poisoned").clone() {
                    sink.on_capture_lost();
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hid::mock::MockHidBackend;
    use crate::hid::SyntheticEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<InputEvent>>,
        raw_moves: Mutex<Vec<Point>>,
        capture_lost: AtomicUsize,
    }

    impl CaptureSink for RecordingSink {
        fn on_input_event(&self, event: InputEvent) {
            self.events.lock().unwrap().push(event);
        }

        fn on_raw_mouse_move(&self, position: Point) {
            self.raw_moves.lock().unwrap().push(position);
        }

        fn on_capture_lost(&self) {
            self.capture_lost.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn mv(dx: i32, dy: i32) -> InputEvent {
        InputEvent::MouseMove { dx, dy, normalized: None, modifiers: 0 }
    }

    fn setup() -> (Arc<MockHidBackend>, CaptureAdapter, Arc<RecordingSink>) {
        let backend = MockHidBackend::new(vec![DisplayRect::new(0.0, 0.0, 2000.0, 1200.0)]);
        let capture = CaptureAdapter::new(backend.clone() as Arc<dyn HidBackend>);
        let sink = Arc::new(RecordingSink::default());
        capture.start(sink.clone()).expect("start");
        (backend, capture, sink)
    }

    #[test]
    fn test_start_fails_without_access_grant() {
        let backend = MockHidBackend::new(vec![DisplayRect::new(0.0, 0.0, 100.0, 100.0)]);
        backend.set_access_granted(false);
        let capture = CaptureAdapter::new(backend as Arc<dyn HidBackend>);
        let result = capture.start(Arc::new(RecordingSink::default()));
        assert!(matches!(result, Err(HidError::PermissionDenied)));
    }

    #[test]
    fn test_unsuppressed_events_reach_sink_and_local_apps() {
        let (backend, _capture, sink) = setup();
        backend.emit(mv(5, 3));

        assert_eq!(sink.events.lock().unwrap().len(), 1);
        assert_eq!(sink.raw_moves.lock().unwrap().len(), 1);
        assert_eq!(backend.delivered_locally().len(), 1, "deliverable while unsuppressed");
    }

    #[test]
    fn test_provenance_marked_events_never_reach_sink() {
        let (backend, _capture, sink) = setup();

        for _ in 0..500 {
            backend
                .post(SyntheticEvent {
                    event: mv(1, 1),
                    warp_to: None,
                    drag: false,
                    marker: PROVENANCE_MARKER,
                })
                .unwrap();
        }

        assert!(sink.events.lock().unwrap().is_empty(), "loop suppression failed");
        assert!(sink.raw_moves.lock().unwrap().is_empty());
        // The synthetic events still reach local applications.
        assert_eq!(backend.delivered_locally().len(), 500);
    }

    #[test]
    fn test_suppression_discards_post_warp_deltas_then_tracks_virtually() {
        let (backend, capture, sink) = setup();
        let bounds = DisplayRect::new(0.0, 0.0, 2000.0, 1200.0);
        capture.start_suppressing(
            Point::new(0.0, 600.0),
            bounds,
            Point::new(1000.0, 600.0),
            true,
        );

        // The warp to the pin point manufactures spurious deltas.
        backend.emit(mv(998, 0));
        backend.emit(mv(3, 3));
        assert!(sink.events.lock().unwrap().is_empty(), "warp deltas must be discarded");

        // Real motion after the discard window advances the virtual cursor.
        backend.emit(mv(10, -20));
        backend.emit(mv(5, 5));

        assert_eq!(capture.virtual_cursor(), Some(Point::new(15.0, 585.0)));
        assert_eq!(
            *sink.raw_moves.lock().unwrap(),
            vec![Point::new(10.0, 580.0), Point::new(15.0, 585.0)]
        );
        // Suppressed events are consumed, not delivered to local apps.
        assert_eq!(backend.delivered_locally().len(), 0);
        assert_eq!(backend.consumed().len(), 4);
    }

    #[test]
    fn test_virtual_cursor_clamps_to_bounds() {
        let (backend, capture, _sink) = setup();
        let bounds = DisplayRect::new(0.0, 0.0, 2000.0, 1200.0);
        capture.start_suppressing(Point::new(0.0, 600.0), bounds, Point::new(1000.0, 600.0), true);

        backend.emit(mv(0, 0)); // discarded
        backend.emit(mv(0, 0)); // discarded
        backend.emit(mv(-500, -5000));

        assert_eq!(capture.virtual_cursor(), Some(Point::new(0.0, 0.0)));
    }

    #[test]
    fn test_suppression_consumes_keys_but_forwards_them() {
        let (backend, capture, sink) = setup();
        let bounds = DisplayRect::new(0.0, 0.0, 2000.0, 1200.0);
        capture.start_suppressing(Point::new(0.0, 0.0), bounds, Point::new(1000.0, 600.0), true);

        let key = InputEvent::Key {
            keycode: 4,
            state: inputshare_core::protocol::PressState::Down,
            modifiers: 0,
        };
        backend.emit(key.clone());

        assert_eq!(*sink.events.lock().unwrap(), vec![key]);
        assert!(backend.delivered_locally().is_empty());
    }

    #[test]
    fn test_suppression_engage_release_restores_cursor_state() {
        let (backend, capture, _sink) = setup();
        let bounds = DisplayRect::new(0.0, 0.0, 2000.0, 1200.0);

        capture.start_suppressing(Point::new(0.0, 0.0), bounds, Point::new(1000.0, 600.0), true);
        assert!(!backend.is_associated());
        assert!(backend.is_hidden());
        assert_eq!(backend.cursor(), Point::new(1000.0, 600.0), "pinned at center");

        capture.stop_suppressing();
        assert!(backend.is_associated());
        assert!(!backend.is_hidden());
        assert!(!capture.is_suppressing());

        // Idempotent.
        capture.stop_suppressing();
        assert!(backend.is_associated());
    }

    #[test]
    fn test_suppression_guard_releases_on_drop() {
        let (backend, capture, _sink) = setup();
        let bounds = DisplayRect::new(0.0, 0.0, 2000.0, 1200.0);
        {
            let _guard = SuppressionGuard::engage(
                &capture,
                Point::new(0.0, 0.0),
                bounds,
                Point::new(1000.0, 600.0),
                true,
            );
            assert!(capture.is_suppressing());
        }
        assert!(!capture.is_suppressing());
        assert!(backend.is_associated());
        assert!(!backend.is_hidden());
    }

    #[test]
    fn test_hook_disabled_reenables_without_losing_capture() {
        let (backend, _capture, sink) = setup();
        backend.simulate_hook_disabled();
        assert_eq!(sink.capture_lost.load(Ordering::SeqCst), 0);

        backend.emit(mv(1, 1));
        assert_eq!(sink.events.lock().unwrap().len(), 1, "capture still live");
    }

    #[test]
    fn test_hook_disabled_with_failed_reenable_reports_loss() {
        let (backend, _capture, sink) = setup();
        backend.set_fail_reenable(true);
        backend.simulate_hook_disabled();
        assert_eq!(sink.capture_lost.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_removes_hook_and_releases_suppression() {
        let (backend, capture, _sink) = setup();
        let bounds = DisplayRect::new(0.0, 0.0, 2000.0, 1200.0);
        capture.start_suppressing(Point::new(0.0, 0.0), bounds, Point::new(1000.0, 600.0), true);

        capture.stop();

        assert!(!backend.hook_installed());
        assert!(backend.is_associated());
    }
}
