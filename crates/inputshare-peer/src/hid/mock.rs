//! In-memory HID backend for tests and the `--mock-hid` development mode.
//!
//! The mock models the pieces of window-server behavior the adapters depend
//! on: the cursor advances on emitted mouse moves only while associated,
//! and every posted synthetic event is looped back through the installed
//! hook the way a real OS re-observes injected input.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use inputshare_core::domain::geometry::{DisplayRect, Point};
use inputshare_core::protocol::InputEvent;

use super::{HidBackend, HidError, HookDisposition, HookEvent, HookHandler, SyntheticEvent};

#[derive(Default)]
struct MockState {
    handler: Option<Arc<dyn HookHandler>>,
    cursor: Point,
    hidden: bool,
    posted: Vec<SyntheticEvent>,
    delivered_locally: Vec<InputEvent>,
    consumed: Vec<InputEvent>,
    warps: Vec<Point>,
}

/// Scriptable [`HidBackend`] double.
pub struct MockHidBackend {
    state: Mutex<MockState>,
    displays: Vec<DisplayRect>,
    associated: AtomicBool,
    access: AtomicBool,
    fail_reenable: AtomicBool,
}

impl MockHidBackend {
    pub fn new(displays: Vec<DisplayRect>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState::default()),
            displays,
            associated: AtomicBool::new(true),
            access: AtomicBool::new(true),
            fail_reenable: AtomicBool::new(false),
        })
    }

    /// Simulates a hardware event. Mouse moves advance the mock cursor by
    /// their delta while the cursor is associated; while dissociated the
    /// cursor stays pinned, like a real warp-locked window server.
    pub fn emit(&self, event: InputEvent) {
        let (handler, position) = {
            let mut state = self.state.lock().expect("lock poisoned");
            if let InputEvent::MouseMove { dx, dy, .. } = &event {
                if self.associated.load(Ordering::SeqCst) {
                    state.cursor.x += f64::from(*dx);
                    state.cursor.y += f64::from(*dy);
                }
            }
            (state.handler.clone(), state.cursor)
        };
        self.dispatch(handler, event, position, 0);
    }

    /// Simulates a hardware event observed at an explicit cursor position.
    pub fn emit_at(&self, event: InputEvent, position: Point) {
        let handler = {
            let mut state = self.state.lock().expect("lock poisoned");
            state.cursor = position;
            state.handler.clone()
        };
        self.dispatch(handler, event, position, 0);
    }

    /// Simulates the OS disabling the installed hook.
    pub fn simulate_hook_disabled(&self) {
        let handler = self.state.lock().expect("lock poisoned").handler.clone();
        if let Some(h) = handler {
            h.hook_disabled();
        }
    }

    pub fn set_access_granted(&self, granted: bool) {
        self.access.store(granted, Ordering::SeqCst);
    }

    pub fn set_fail_reenable(&self, fail: bool) {
        self.fail_reenable.store(fail, Ordering::SeqCst);
    }

    // ── Observers for assertions ──────────────────────────────────────────────

    pub fn posted(&self) -> Vec<SyntheticEvent> {
        self.state.lock().expect("lock poisoned").posted.clone()
    }

    pub fn delivered_locally(&self) -> Vec<InputEvent> {
        self.state.lock().expect("lock poisoned").delivered_locally.clone()
    }

    pub fn consumed(&self) -> Vec<InputEvent> {
        self.state.lock().expect("lock poisoned").consumed.clone()
    }

    pub fn warps(&self) -> Vec<Point> {
        self.state.lock().expect("lock poisoned").warps.clone()
    }

    pub fn cursor(&self) -> Point {
        self.state.lock().expect("lock poisoned").cursor
    }

    pub fn is_associated(&self) -> bool {
        self.associated.load(Ordering::SeqCst)
    }

    pub fn is_hidden(&self) -> bool {
        self.state.lock().expect("lock poisoned").hidden
    }

    pub fn hook_installed(&self) -> bool {
        self.state.lock().expect("lock poisoned").handler.is_some()
    }

    fn dispatch(
        &self,
        handler: Option<Arc<dyn HookHandler>>,
        event: InputEvent,
        position: Point,
        marker: u64,
    ) {
        let Some(handler) = handler else { return };
        let disposition = handler.handle(HookEvent { event: event.clone(), position, marker });
        let mut state = self.state.lock().expect("lock poisoned");
        match disposition {
            HookDisposition::Deliver => state.delivered_locally.push(event),
            HookDisposition::Consume => state.consumed.push(event),
        }
    }
}

impl HidBackend for MockHidBackend {
    fn install_hook(&self, handler: Arc<dyn HookHandler>) -> Result<(), HidError> {
        if !self.access.load(Ordering::SeqCst) {
            return Err(HidError::PermissionDenied);
        }
        self.state.lock().expect("lock poisoned").handler = Some(handler);
        Ok(())
    }

    fn remove_hook(&self) {
        self.state.lock().expect("lock poisoned").handler = None;
    }

    fn reenable_hook(&self) -> Result<(), HidError> {
        if self.fail_reenable.load(Ordering::SeqCst) {
            Err(HidError::HookDisabled)
        } else {
            Ok(())
        }
    }

    fn post(&self, event: SyntheticEvent) -> Result<(), HidError> {
        let (handler, position) = {
            let mut state = self.state.lock().expect("lock poisoned");
            if let Some(target) = event.warp_to {
                state.cursor = target;
                state.warps.push(target);
            }
            state.posted.push(event.clone());
            (state.handler.clone(), state.cursor)
        };
        // Loop the synthetic event back through the hook: a real window
        // server re-observes injected input the same way.
        self.dispatch(handler, event.event, position, event.marker);
        Ok(())
    }

    fn warp_cursor(&self, to: Point) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.cursor = to;
        state.warps.push(to);
    }

    fn set_cursor_associated(&self, associated: bool) {
        self.associated.store(associated, Ordering::SeqCst);
    }

    fn set_cursor_hidden(&self, hidden: bool) {
        self.state.lock().expect("lock poisoned").hidden = hidden;
    }

    fn cursor_position(&self) -> Point {
        self.state.lock().expect("lock poisoned").cursor
    }

    fn displays(&self) -> Vec<DisplayRect> {
        self.displays.clone()
    }

    fn access_granted(&self) -> bool {
        self.access.load(Ordering::SeqCst)
    }
}
