//! The forwarding state machine: the sender-side authority over input
//! ownership.
//!
//! ```text
//!           edge_triggered            received_activated
//!   Idle ───────────────► Activating ──────────────────► Forwarding
//!    ▲                        │                              │
//!    │   activation timeout   │        return_triggered      │
//!    ├────────────────────────┘   ┌──────────────────────────┤
//!    │                            ▼                          │
//!    │   received_deactivated  Returning                     │
//!    ├────────────────────────────┘     received_deactivate  │
//!    └───────────────────────────────────────────────────────┘
//! ```
//!
//! Every input method returns the protocol effect the caller must perform,
//! if any; inputs that do not match the current state are ignored. All calls
//! happen on the session's serial task, which gives a total order over
//! transitions.

use std::time::{Duration, Instant};

/// Default time the sender waits for `Activated` before giving up.
pub const DEFAULT_ACTIVATION_TIMEOUT: Duration = Duration::from_secs(2);

/// Observable states of the machine.
///
/// `Candidate` is an internal stop between `Idle` and `Activating`; the
/// machine never rests there between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardingState {
    Idle,
    Candidate,
    Activating,
    Forwarding,
    Returning,
}

/// Outbound protocol effect requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeEffect {
    /// Send `Activate` to the peer. Produced exactly once per
    /// Idle→Activating edge.
    SendActivate,
    /// Send `Deactivate` to the peer. Produced exactly once per
    /// Forwarding→Returning edge.
    SendDeactivate,
}

/// Sender-side forwarding state machine.
#[derive(Debug)]
pub struct ForwardingMachine {
    state: ForwardingState,
    activation_timeout: Duration,
    activation_deadline: Option<Instant>,
}

impl ForwardingMachine {
    pub fn new(activation_timeout: Duration) -> Self {
        Self {
            state: ForwardingState::Idle,
            activation_timeout,
            activation_deadline: None,
        }
    }

    pub fn state(&self) -> ForwardingState {
        self.state
    }

    pub fn is_forwarding(&self) -> bool {
        self.state == ForwardingState::Forwarding
    }

    /// Deadline by which `Activated` must arrive, while activating.
    pub fn activation_deadline(&self) -> Option<Instant> {
        self.activation_deadline
    }

    /// The local edge fired. Ignored unless idle.
    pub fn edge_triggered(&mut self, now: Instant) -> Option<HandshakeEffect> {
        if self.state != ForwardingState::Idle {
            return None;
        }
        // Candidate is passed through atomically; callers observe Activating.
        self.state = ForwardingState::Candidate;
        self.state = ForwardingState::Activating;
        self.activation_deadline = Some(now + self.activation_timeout);
        Some(HandshakeEffect::SendActivate)
    }

    /// The peer acknowledged activation. Returns `true` when the machine
    /// entered `Forwarding`; a late ack (after the timeout fired) is ignored.
    pub fn received_activated(&mut self) -> bool {
        if self.state != ForwardingState::Activating {
            return false;
        }
        self.state = ForwardingState::Forwarding;
        self.activation_deadline = None;
        true
    }

    /// The activation window elapsed. Returns `true` when this dropped the
    /// machine back to `Idle` (no `Deactivate` is owed: forwarding never
    /// started).
    pub fn activation_timed_out(&mut self, now: Instant) -> bool {
        match self.activation_deadline {
            Some(deadline) if self.state == ForwardingState::Activating && now >= deadline => {
                self.state = ForwardingState::Idle;
                self.activation_deadline = None;
                true
            }
            _ => false,
        }
    }

    /// The local return edge fired on the receiving host's behalf — used by
    /// the side that is currently forwarding when its own detector reports
    /// the return crossing. Ignored unless forwarding.
    pub fn return_triggered(&mut self) -> Option<HandshakeEffect> {
        if self.state != ForwardingState::Forwarding {
            return None;
        }
        self.state = ForwardingState::Returning;
        Some(HandshakeEffect::SendDeactivate)
    }

    /// The peer acknowledged the return. Returns `true` when the machine
    /// reached `Idle`.
    pub fn received_deactivated(&mut self) -> bool {
        if self.state != ForwardingState::Returning {
            return false;
        }
        self.state = ForwardingState::Idle;
        true
    }

    /// The receiver initiated the return itself (`Deactivate` arrived while
    /// forwarding). Terminal for the handoff: no local emit is owed. Returns
    /// `true` when the machine reached `Idle`.
    pub fn received_deactivate(&mut self) -> bool {
        if self.state != ForwardingState::Forwarding {
            return false;
        }
        self.state = ForwardingState::Idle;
        true
    }

    /// Connection lost or user disconnect: force `Idle` from any state and
    /// clear the pending timeout. Idempotent.
    pub fn reset(&mut self) {
        self.state = ForwardingState::Idle;
        self.activation_deadline = None;
    }
}

impl Default for ForwardingMachine {
    fn default() -> Self {
        Self::new(DEFAULT_ACTIVATION_TIMEOUT)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> ForwardingMachine {
        ForwardingMachine::new(Duration::from_secs(2))
    }

    #[test]
    fn test_initial_state_is_idle() {
        assert_eq!(machine().state(), ForwardingState::Idle);
    }

    #[test]
    fn test_edge_trigger_emits_activate_exactly_once() {
        let mut m = machine();
        let now = Instant::now();

        assert_eq!(m.edge_triggered(now), Some(HandshakeEffect::SendActivate));
        assert_eq!(m.state(), ForwardingState::Activating);
        assert_eq!(m.activation_deadline(), Some(now + Duration::from_secs(2)));

        // A second trigger while not idle is ignored and emits nothing.
        assert_eq!(m.edge_triggered(now), None);
    }

    #[test]
    fn test_activated_moves_to_forwarding_and_cancels_timeout() {
        let mut m = machine();
        m.edge_triggered(Instant::now());

        assert!(m.received_activated());

        assert_eq!(m.state(), ForwardingState::Forwarding);
        assert_eq!(m.activation_deadline(), None);
    }

    #[test]
    fn test_activation_timeout_returns_to_idle() {
        let mut m = machine();
        let now = Instant::now();
        m.edge_triggered(now);

        assert!(!m.activation_timed_out(now + Duration::from_secs(1)), "too early");
        assert!(m.activation_timed_out(now + Duration::from_secs(2)));
        assert_eq!(m.state(), ForwardingState::Idle);
    }

    #[test]
    fn test_late_activated_after_timeout_is_ignored() {
        let mut m = machine();
        let now = Instant::now();
        m.edge_triggered(now);
        m.activation_timed_out(now + Duration::from_secs(3));

        assert!(!m.received_activated());
        assert_eq!(m.state(), ForwardingState::Idle);
    }

    #[test]
    fn test_return_trigger_emits_deactivate_exactly_once() {
        let mut m = machine();
        m.edge_triggered(Instant::now());
        m.received_activated();

        assert_eq!(m.return_triggered(), Some(HandshakeEffect::SendDeactivate));
        assert_eq!(m.state(), ForwardingState::Returning);

        // Repeated return triggers while not forwarding emit nothing.
        assert_eq!(m.return_triggered(), None);
    }

    #[test]
    fn test_return_trigger_ignored_unless_forwarding() {
        let mut m = machine();
        assert_eq!(m.return_triggered(), None);

        m.edge_triggered(Instant::now());
        assert_eq!(m.return_triggered(), None, "ignored while activating");
    }

    #[test]
    fn test_deactivated_completes_return() {
        let mut m = machine();
        m.edge_triggered(Instant::now());
        m.received_activated();
        m.return_triggered();

        assert!(m.received_deactivated());
        assert_eq!(m.state(), ForwardingState::Idle);
    }

    #[test]
    fn test_receiver_initiated_deactivate_is_terminal_without_emit() {
        let mut m = machine();
        m.edge_triggered(Instant::now());
        m.received_activated();

        assert!(m.received_deactivate());
        assert_eq!(m.state(), ForwardingState::Idle);
        // Returning never happened, so a stray Deactivated ack is ignored.
        assert!(!m.received_deactivated());
    }

    #[test]
    fn test_received_deactivate_ignored_outside_forwarding() {
        let mut m = machine();
        assert!(!m.received_deactivate());
        m.edge_triggered(Instant::now());
        assert!(!m.received_deactivate());
    }

    #[test]
    fn test_reset_from_any_state_reaches_idle() {
        let now = Instant::now();

        let mut activating = machine();
        activating.edge_triggered(now);
        activating.reset();
        assert_eq!(activating.state(), ForwardingState::Idle);
        assert_eq!(activating.activation_deadline(), None);

        let mut forwarding = machine();
        forwarding.edge_triggered(now);
        forwarding.received_activated();
        forwarding.reset();
        assert_eq!(forwarding.state(), ForwardingState::Idle);

        // Idempotent.
        forwarding.reset();
        assert_eq!(forwarding.state(), ForwardingState::Idle);
    }

    #[test]
    fn test_full_cycle_emits_each_effect_exactly_once() {
        let mut m = machine();
        let now = Instant::now();
        let mut activates = 0;
        let mut deactivates = 0;

        if m.edge_triggered(now).is_some() {
            activates += 1;
        }
        m.received_activated();
        if m.return_triggered().is_some() {
            deactivates += 1;
        }
        m.received_deactivated();

        // Second full cycle.
        if m.edge_triggered(now).is_some() {
            activates += 1;
        }
        m.received_activated();
        if m.return_triggered().is_some() {
            deactivates += 1;
        }
        m.received_deactivated();

        assert_eq!(activates, 2);
        assert_eq!(deactivates, 2);
    }
}
