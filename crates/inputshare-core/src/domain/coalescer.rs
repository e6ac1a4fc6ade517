//! Rate-limiting accumulator for the sender's forwarding path.
//!
//! Mouse-move deltas and scroll ticks are summed into at most one pending
//! event each and drained on a fixed interval, bounding the per-second
//! message count while preserving total motion exactly. Any other event kind
//! flushes the pending accumulators first so ordering across kinds is kept.

use std::time::Duration;

use crate::protocol::messages::InputEvent;

/// Default drain interval while forwarding (≈250 Hz).
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(4);

/// Delta accumulator for moves and scrolls.
#[derive(Debug, Default)]
pub struct Coalescer {
    pending_move: Option<InputEvent>,
    pending_scroll: Option<InputEvent>,
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorbs one captured event.
    ///
    /// Returns the events that must be sent immediately, in order. Moves and
    /// scrolls are absorbed (empty return); any other kind returns the
    /// drained accumulators followed by the event itself.
    pub fn absorb(&mut self, event: InputEvent) -> Vec<InputEvent> {
        match event {
            InputEvent::MouseMove { dx, dy, normalized, modifiers } => {
                self.pending_move = Some(match self.pending_move.take() {
                    Some(InputEvent::MouseMove {
                        dx: pdx,
                        dy: pdy,
                        normalized: prev_norm,
                        ..
                    }) => InputEvent::MouseMove {
                        dx: pdx + dx,
                        dy: pdy + dy,
                        // Newest position wins; fall back to the previous one
                        // when the new event carries none.
                        normalized: normalized.or(prev_norm),
                        modifiers,
                    },
                    _ => InputEvent::MouseMove { dx, dy, normalized, modifiers },
                });
                Vec::new()
            }
            InputEvent::Scroll { dx, dy, modifiers } => {
                self.pending_scroll = Some(match self.pending_scroll.take() {
                    Some(InputEvent::Scroll { dx: pdx, dy: pdy, .. }) => InputEvent::Scroll {
                        dx: pdx + dx,
                        dy: pdy + dy,
                        modifiers,
                    },
                    _ => InputEvent::Scroll { dx, dy, modifiers },
                });
                Vec::new()
            }
            other => {
                let mut out = self.drain();
                out.push(other);
                out
            }
        }
    }

    /// Drains the pending move and scroll (move first), clearing both.
    /// Called on every flush tick and when forwarding stops.
    pub fn drain(&mut self) -> Vec<InputEvent> {
        let mut out = Vec::with_capacity(2);
        if let Some(m) = self.pending_move.take() {
            out.push(m);
        }
        if let Some(s) = self.pending_scroll.take() {
            out.push(s);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.pending_move.is_none() && self.pending_scroll.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{MouseButton, PressState};

    fn mv(dx: i32, dy: i32) -> InputEvent {
        InputEvent::MouseMove { dx, dy, normalized: None, modifiers: 0 }
    }

    #[test]
    fn test_moves_accumulate_into_single_pending_event() {
        let mut c = Coalescer::new();
        assert!(c.absorb(mv(3, -1)).is_empty());
        assert!(c.absorb(mv(2, 5)).is_empty());
        assert!(c.absorb(mv(-1, -1)).is_empty());

        assert_eq!(c.drain(), vec![mv(4, 3)]);
        assert!(c.is_empty());
    }

    #[test]
    fn test_move_sum_is_exact_over_many_events() {
        let mut c = Coalescer::new();
        let deltas: Vec<(i32, i32)> = (0..100).map(|i| (i % 7 - 3, i % 5 - 2)).collect();
        for (dx, dy) in &deltas {
            c.absorb(mv(*dx, *dy));
        }
        let expected: (i32, i32) = deltas
            .iter()
            .fold((0, 0), |(ax, ay), (dx, dy)| (ax + dx, ay + dy));

        match c.drain().as_slice() {
            [InputEvent::MouseMove { dx, dy, .. }] => assert_eq!((*dx, *dy), expected),
            other => panic!("expected one coalesced move, got {other:?}"),
        }
    }

    #[test]
    fn test_newest_normalized_position_and_modifiers_win() {
        let mut c = Coalescer::new();
        c.absorb(InputEvent::MouseMove {
            dx: 1,
            dy: 1,
            normalized: Some((0.1, 0.1)),
            modifiers: 0,
        });
        c.absorb(InputEvent::MouseMove {
            dx: 1,
            dy: 1,
            normalized: Some((0.9, 0.9)),
            modifiers: 0x20,
        });

        assert_eq!(
            c.drain(),
            vec![InputEvent::MouseMove {
                dx: 2,
                dy: 2,
                normalized: Some((0.9, 0.9)),
                modifiers: 0x20,
            }]
        );
    }

    #[test]
    fn test_previous_normalized_kept_when_newest_has_none() {
        let mut c = Coalescer::new();
        c.absorb(InputEvent::MouseMove {
            dx: 1,
            dy: 0,
            normalized: Some((0.5, 0.5)),
            modifiers: 0,
        });
        c.absorb(mv(1, 0));

        match c.drain().as_slice() {
            [InputEvent::MouseMove { normalized, .. }] => {
                assert_eq!(*normalized, Some((0.5, 0.5)));
            }
            other => panic!("expected one move, got {other:?}"),
        }
    }

    #[test]
    fn test_scrolls_accumulate_separately_from_moves() {
        let mut c = Coalescer::new();
        c.absorb(mv(1, 0));
        c.absorb(InputEvent::Scroll { dx: 0.0, dy: 1.5, modifiers: 0 });
        c.absorb(InputEvent::Scroll { dx: -0.5, dy: 2.5, modifiers: 0 });

        assert_eq!(
            c.drain(),
            vec![mv(1, 0), InputEvent::Scroll { dx: -0.5, dy: 4.0, modifiers: 0 }]
        );
    }

    #[test]
    fn test_other_kind_flushes_pending_before_itself() {
        let mut c = Coalescer::new();
        c.absorb(mv(4, 4));
        c.absorb(InputEvent::Scroll { dx: 0.0, dy: 1.0, modifiers: 0 });

        let click = InputEvent::MouseButton {
            button: MouseButton::Left,
            state: PressState::Down,
            modifiers: 0,
        };
        let out = c.absorb(click.clone());

        // Pending move and scroll precede the click so the receiver applies
        // all motion before the button lands.
        assert_eq!(
            out,
            vec![mv(4, 4), InputEvent::Scroll { dx: 0.0, dy: 1.0, modifiers: 0 }, click]
        );
        assert!(c.is_empty());
    }

    #[test]
    fn test_non_coalescable_passes_through_when_nothing_pending() {
        let mut c = Coalescer::new();
        let key = InputEvent::Key { keycode: 4, state: PressState::Down, modifiers: 0 };
        assert_eq!(c.absorb(key.clone()), vec![key]);
    }

    #[test]
    fn test_drain_on_empty_returns_nothing() {
        let mut c = Coalescer::new();
        assert!(c.drain().is_empty());
    }
}
