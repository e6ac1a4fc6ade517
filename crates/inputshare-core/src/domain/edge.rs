//! Dwell-based edge trigger with hysteresis.
//!
//! The detector watches cursor positions and fires after the cursor has
//! stayed inside a configured edge zone for the dwell duration. Hysteresis
//! (a larger exit threshold) keeps small jitter at the boundary from
//! oscillating the zone state, and [`EdgeDetector::arm_after_entry`] prevents
//! an immediate re-trigger right after a handoff returns the cursor to the
//! boundary.
//!
//! The detector is a pure state machine over `(position, Instant)`; the
//! caller owns the actual timer and polls [`EdgeDetector::poll_dwell`] when
//! the deadline from [`EdgeDetector::dwell_deadline`] elapses.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::domain::geometry::{Point, ScreenGeometry};

/// Which edge of the virtual screen the detector watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeZone {
    Left,
    Right,
    TopLeft,
    TopRight,
}

/// Errors from constructing an [`EdgeDetector`].
#[derive(Debug, Error, PartialEq)]
pub enum EdgeConfigError {
    /// The exit threshold must be strictly greater than the enter threshold.
    #[error("exit threshold {exit} must exceed enter threshold {enter}")]
    ThresholdOrder { enter: f64, exit: f64 },
}

/// Detector configuration for one edge zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeDetectorConfig {
    pub zone: EdgeZone,
    /// Pixels from the boundary at which the cursor counts as in-zone.
    pub enter_threshold: f64,
    /// Pixels from the boundary at which the cursor counts as out-of-zone.
    /// Strictly greater than `enter_threshold`.
    pub exit_threshold: f64,
    /// How long the cursor must remain in zone before the trigger fires.
    pub dwell: Duration,
}

impl EdgeDetectorConfig {
    pub fn new(zone: EdgeZone) -> Self {
        Self {
            zone,
            enter_threshold: 2.0,
            exit_threshold: 16.0,
            dwell: Duration::from_millis(100),
        }
    }
}

/// Events emitted by the detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EdgeEvent {
    /// The cursor moved inside the enter threshold.
    Entered,
    /// The dwell elapsed while still in zone; carries the most recent
    /// observed position.
    Triggered(Point),
    /// The cursor left the exit threshold after a trigger had fired.
    Exited,
}

/// Dwell-based edge trigger for one configured zone.
#[derive(Debug)]
pub struct EdgeDetector {
    config: EdgeDetectorConfig,
    in_zone: bool,
    has_triggered: bool,
    dwell_deadline: Option<Instant>,
    last_position: Point,
}

impl EdgeDetector {
    /// # Errors
    ///
    /// Returns [`EdgeConfigError::ThresholdOrder`] unless
    /// `exit_threshold > enter_threshold`.
    pub fn new(config: EdgeDetectorConfig) -> Result<Self, EdgeConfigError> {
        if config.exit_threshold <= config.enter_threshold {
            return Err(EdgeConfigError::ThresholdOrder {
                enter: config.enter_threshold,
                exit: config.exit_threshold,
            });
        }
        Ok(Self {
            config,
            in_zone: false,
            has_triggered: false,
            dwell_deadline: None,
            last_position: Point::default(),
        })
    }

    pub fn zone(&self) -> EdgeZone {
        self.config.zone
    }

    pub fn is_in_zone(&self) -> bool {
        self.in_zone
    }

    /// The pending dwell deadline, if the cursor is in zone and untriggered.
    pub fn dwell_deadline(&self) -> Option<Instant> {
        self.dwell_deadline
    }

    /// Feeds a cursor position observed at `now`.
    ///
    /// Movement between two side-by-side displays never enters a Left/Right
    /// zone: the zone distance is infinite across an interior seam, so only
    /// true screen boundaries arm the dwell.
    pub fn update(
        &mut self,
        position: Point,
        geometry: &ScreenGeometry,
        now: Instant,
    ) -> Option<EdgeEvent> {
        self.last_position = position;
        let distance = self.zone_distance(position, geometry);

        if !self.in_zone && distance <= self.config.enter_threshold {
            self.in_zone = true;
            self.has_triggered = false;
            self.dwell_deadline = Some(now + self.config.dwell);
            return Some(EdgeEvent::Entered);
        }

        if self.in_zone && distance > self.config.exit_threshold {
            self.in_zone = false;
            self.dwell_deadline = None;
            let fired = self.has_triggered;
            self.has_triggered = false;
            return fired.then_some(EdgeEvent::Exited);
        }

        None
    }

    /// Checks the dwell deadline against `now`; fires the trigger when the
    /// cursor dwelled in zone for the configured duration.
    pub fn poll_dwell(&mut self, now: Instant) -> Option<EdgeEvent> {
        let deadline = self.dwell_deadline?;
        if now < deadline {
            return None;
        }
        self.dwell_deadline = None;
        if self.in_zone && !self.has_triggered {
            self.has_triggered = true;
            Some(EdgeEvent::Triggered(self.last_position))
        } else {
            None
        }
    }

    /// Marks the zone as entered-but-spent after a handoff returned the
    /// cursor to the boundary: the cursor must leave the exit threshold and
    /// re-enter before the next trigger can fire.
    pub fn arm_after_entry(&mut self) {
        self.in_zone = true;
        self.has_triggered = false;
        self.dwell_deadline = None;
    }

    /// Returns the detector to its initial state.
    pub fn reset(&mut self) {
        self.in_zone = false;
        self.has_triggered = false;
        self.dwell_deadline = None;
    }

    fn zone_distance(&self, p: Point, geometry: &ScreenGeometry) -> f64 {
        match self.config.zone {
            EdgeZone::Left => geometry.distance_to_left_boundary(p),
            EdgeZone::Right => geometry.distance_to_right_boundary(p),
            // Corner zones require proximity to the top boundary and the
            // respective side boundary simultaneously.
            EdgeZone::TopLeft => geometry
                .distance_to_left_boundary(p)
                .max(geometry.distance_to_top_boundary(p)),
            EdgeZone::TopRight => geometry
                .distance_to_right_boundary(p)
                .max(geometry.distance_to_top_boundary(p)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
