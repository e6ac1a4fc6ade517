//! The session controller: binds capture, injection, the edge detectors,
//! the forwarding state machine, the coalescer, and the framed transports
//! into one symmetric peer.
//!
//! # Scheduling model
//!
//! Everything runs on one serial tokio task driven by a single input
//! channel plus three timers (edge dwell, activation timeout, coalescer
//! flush). Capture hooks and transport tasks hand their events to the
//! channel and return promptly; because the loop processes one input at a
//! time there is a total order over state transitions and no lock guards
//! any session state.
//!
//! # Roles
//!
//! A peer is symmetric. It becomes the *sender* when its own edge detector
//! triggers (outbound connection, state machine, suppression with hidden
//! cursor, coalesced forwarding) and the *receiver* when the remote peer
//! activates it (inbound connection, visible controlled cursor, injection,
//! return-edge detection).

pub mod status;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use inputshare_core::domain::coalescer::Coalescer;
use inputshare_core::domain::edge::{
    EdgeConfigError, EdgeDetector, EdgeDetectorConfig, EdgeEvent, EdgeZone,
};
use inputshare_core::domain::forwarding::{ForwardingMachine, HandshakeEffect};
use inputshare_core::domain::geometry::{DisplayRect, Point, ScreenGeometry};
use inputshare_core::protocol::{
    decode_activate, decode_deactivate, decode_envelope, decode_hello, decode_input_event,
    encode_activate, encode_deactivate, encode_envelope, encode_hello, encode_input_event,
    ActivatePayload, DeactivatePayload, Envelope, HelloPayload, InputEvent, MessageType,
    SequenceCounter, SequenceTracker, PROTOCOL_VERSION,
};

use crate::hid::capture::{CaptureAdapter, CaptureSink, SuppressionGuard};
use crate::hid::inject::InjectionAdapter;
use crate::hid::{HidBackend, HidError};
use crate::transport::{FramedTransport, TransportEvent, TransportState};

use status::{ConnectionStatus, StatusPublisher};

/// Errors that terminate a session run.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error(transparent)]
    Hid(#[from] HidError),

    #[error(transparent)]
    EdgeConfig(#[from] EdgeConfigError),
}

/// Tuning for one session, resolved from config and CLI.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub device_name: String,
    /// Stable per-launch identifier carried in every envelope.
    pub device_id: String,
    pub enter_threshold: f64,
    pub exit_threshold: f64,
    pub dwell: Duration,
    pub activation_timeout: Duration,
    pub coalesce_interval: Duration,
}

impl SessionSettings {
    pub fn from_config(cfg: &crate::config::AppConfig, device_name: String) -> Self {
        Self {
            device_id: format!("{device_name}-{}", uuid::Uuid::new_v4()),
            device_name,
            enter_threshold: cfg.edge.enter_threshold,
            exit_threshold: cfg.edge.exit_threshold,
            dwell: cfg.edge.dwell(),
            activation_timeout: cfg.edge.activation_timeout(),
            coalesce_interval: cfg.edge.coalesce_interval(),
        }
    }
}

/// Everything that can reach the serial session loop.
pub enum SessionInput {
    /// A captured HID event (hook thread).
    Captured(InputEvent),
    /// Physical-or-virtual cursor position (hook thread).
    RawMouseMove(Point),
    /// Event from the outbound (sender-role) connection.
    SenderTransport(TransportEvent),
    /// Event from the inbound (receiver-role) connection.
    ReceiverTransport(TransportEvent),
    /// The listener accepted and authenticated a new inbound connection.
    InboundConnected {
        transport: FramedTransport,
        events: mpsc::Receiver<TransportEvent>,
    },
    /// User asked to pull control back while forwarding.
    TakeBack,
    /// HID capture permission was lost after a failed hook re-enable.
    CaptureLost,
    /// User disconnect; synchronous and idempotent.
    Shutdown,
}

/// Clonable handle for feeding and observing a running session.
#[derive(Clone)]
pub struct SessionHandle {
    input_tx: mpsc::UnboundedSender<SessionInput>,
    pub status: watch::Receiver<ConnectionStatus>,
}

impl SessionHandle {
    pub fn shutdown(&self) {
        let _ = self.input_tx.send(SessionInput::Shutdown);
    }

    pub fn take_back(&self) {
        let _ = self.input_tx.send(SessionInput::TakeBack);
    }

    /// Hands an accepted inbound connection to the session loop.
    pub fn inbound_connected(
        &self,
        transport: FramedTransport,
        events: mpsc::Receiver<TransportEvent>,
    ) {
        let _ = self
            .input_tx
            .send(SessionInput::InboundConnected { transport, events });
    }
}

/// Capture-hook → session-channel bridge. Runs on the hook thread.
struct SessionCaptureSink {
    tx: mpsc::UnboundedSender<SessionInput>,
}

impl CaptureSink for SessionCaptureSink {
    fn on_input_event(&self, event: InputEvent) {
        let _ = self.tx.send(SessionInput::Captured(event));
    }

    fn on_raw_mouse_move(&self, position: Point) {
        let _ = self.tx.send(SessionInput::RawMouseMove(position));
    }

    fn on_capture_lost(&self) {
        let _ = self.tx.send(SessionInput::CaptureLost);
    }
}

enum Flow {
    Continue,
    Stop,
}

/// The symmetric peer session.
pub struct SessionController {
    settings: SessionSettings,
    geometry: ScreenGeometry,
    backend: Arc<dyn HidBackend>,
    capture: CaptureAdapter,
    injector: InjectionAdapter,
    status: StatusPublisher,

    machine: ForwardingMachine,
    edge: EdgeDetector,
    return_edge: EdgeDetector,
    coalescer: Coalescer,
    sequence: SequenceCounter,
    inbound_sequence: SequenceTracker,
    epoch: Instant,

    input_tx: mpsc::UnboundedSender<SessionInput>,
    input_rx: Option<mpsc::UnboundedReceiver<SessionInput>>,
    sender_link: Option<FramedTransport>,
    receiver_link: Option<FramedTransport>,

    suppression: Option<SuppressionGuard>,
    crossing: Option<Point>,
    controlled: bool,
    receiver_cursor: Point,
    next_flush: Option<Instant>,
    outbound_role: bool,
}

impl SessionController {
    /// # Errors
    ///
    /// Returns [`SessionError::EdgeConfig`] when the configured thresholds
    /// are inconsistent.
    pub fn new(
        settings: SessionSettings,
        geometry: ScreenGeometry,
        backend: Arc<dyn HidBackend>,
    ) -> Result<(Self, SessionHandle), SessionError> {
        let capture = CaptureAdapter::new(Arc::clone(&backend));
        let injector = InjectionAdapter::new(Arc::clone(&backend));
        let (status, status_rx) = StatusPublisher::new();
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        let edge = EdgeDetector::new(EdgeDetectorConfig {
            zone: EdgeZone::Right,
            enter_threshold: settings.enter_threshold,
            exit_threshold: settings.exit_threshold,
            dwell: settings.dwell,
        })?;
        let return_edge = EdgeDetector::new(EdgeDetectorConfig {
            zone: EdgeZone::Left,
            enter_threshold: settings.enter_threshold,
            exit_threshold: settings.exit_threshold,
            dwell: settings.dwell,
        })?;

        let machine = ForwardingMachine::new(settings.activation_timeout);

        let handle = SessionHandle {
            input_tx: input_tx.clone(),
            status: status_rx,
        };

        let controller = Self {
            settings,
            geometry,
            backend,
            capture,
            injector,
            status,
            machine,
            edge,
            return_edge,
            coalescer: Coalescer::new(),
            sequence: SequenceCounter::new(),
            inbound_sequence: SequenceTracker::new(),
            epoch: Instant::now(),
            input_tx,
            input_rx: Some(input_rx),
            sender_link: None,
            receiver_link: None,
            suppression: None,
            crossing: None,
            controlled: false,
            receiver_cursor: Point::default(),
            next_flush: None,
            outbound_role: false,
        };
        Ok((controller, handle))
    }

    /// Installs the capture hook and routes its output into the loop.
    ///
    /// # Errors
    ///
    /// Returns [`HidError::PermissionDenied`] when the capability probe
    /// fails.
    pub fn start_capture(&self) -> Result<(), HidError> {
        self.capture.start(Arc::new(SessionCaptureSink {
            tx: self.input_tx.clone(),
        }))
    }

    /// Adopts the outbound connection; its events flow into the loop as
    /// [`SessionInput::SenderTransport`].
    pub fn attach_sender_link(
        &mut self,
        transport: FramedTransport,
        mut events: mpsc::Receiver<TransportEvent>,
    ) {
        self.outbound_role = true;
        let tx = self.input_tx.clone();
        tokio::spawn(async move {
            while let Some(ev) = events.recv().await {
                if tx.send(SessionInput::SenderTransport(ev)).is_err() {
                    break;
                }
            }
        });
        self.sender_link = Some(transport);
    }

    fn attach_receiver_link(
        &mut self,
        transport: FramedTransport,
        mut events: mpsc::Receiver<TransportEvent>,
    ) {
        if let Some(old) = self.receiver_link.take() {
            debug!("replacing existing inbound connection");
            old.cancel();
        }
        let tx = self.input_tx.clone();
        tokio::spawn(async move {
            while let Some(ev) = events.recv().await {
                if tx.send(SessionInput::ReceiverTransport(ev)).is_err() {
                    break;
                }
            }
        });
        self.receiver_link = Some(transport);
    }

    /// Runs the serial session loop until shutdown or a fatal error.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConnectionLost`] when the outbound link of a
    /// sending peer fails, after local control has been restored.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let mut inputs = self.input_rx.take().expect("run() called twice");

        let result = loop {
            let deadline = self.next_deadline();
            let sleep_target =
                deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                maybe = inputs.recv() => match maybe {
                    Some(input) => match self.handle_input(input).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Stop) => break Ok(()),
                        Err(e) => break Err(e),
                    },
                    None => break Ok(()),
                },
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(sleep_target)),
                    if deadline.is_some() =>
                {
                    if let Err(e) = self.handle_deadlines(Instant::now()).await {
                        break Err(e);
                    }
                }
            }
        };

        // Failure paths restore on the way out; a clean shutdown does it
        // here so every exit leaves the cursor attached and visible.
        if !matches!(self.status.current(), ConnectionStatus::Disconnected { .. }) {
            self.restore_local_control("session shutdown");
        }
        self.capture.stop();
        result
    }

    // ── Input dispatch ────────────────────────────────────────────────────────

    async fn handle_input(&mut self, input: SessionInput) -> Result<Flow, SessionError> {
        match input {
            SessionInput::RawMouseMove(position) => {
                match self.edge.update(position, &self.geometry, Instant::now()) {
                    Some(EdgeEvent::Entered) => trace!(?position, "edge zone entered"),
                    Some(EdgeEvent::Exited) => trace!("edge zone exited"),
                    // Triggers come from the dwell timer, never from updates.
                    Some(EdgeEvent::Triggered(_)) | None => {}
                }
                Ok(Flow::Continue)
            }
            SessionInput::Captured(event) => {
                if self.machine.is_forwarding() {
                    let ready = self.coalescer.absorb(event);
                    for out in ready {
                        self.send_input_event(&out).await;
                    }
                }
                Ok(Flow::Continue)
            }
            SessionInput::SenderTransport(event) => self.on_sender_transport(event).await,
            SessionInput::ReceiverTransport(event) => self.on_receiver_transport(event).await,
            SessionInput::InboundConnected { transport, events } => {
                self.attach_receiver_link(transport, events);
                Ok(Flow::Continue)
            }
            SessionInput::TakeBack => {
                self.on_take_back().await;
                Ok(Flow::Continue)
            }
            SessionInput::CaptureLost => {
                self.restore_local_control("HID capture lost");
                Err(SessionError::Hid(HidError::HookDisabled))
            }
            SessionInput::Shutdown => Ok(Flow::Stop),
        }
    }

    async fn handle_deadlines(&mut self, now: Instant) -> Result<(), SessionError> {
        if let Some(EdgeEvent::Triggered(position)) = self.edge.poll_dwell(now) {
            self.on_edge_triggered(position, now).await;
        }
        if let Some(EdgeEvent::Triggered(position)) = self.return_edge.poll_dwell(now) {
            self.on_return_edge_triggered(position).await;
        }
        if self.machine.activation_timed_out(now) {
            // The peer never answered: forget the crossing; suppression was
            // never engaged, so there is nothing else to unwind.
            info!("activation timed out; returning to idle");
            self.crossing = None;
        }
        if let Some(flush_at) = self.next_flush {
            if now >= flush_at {
                self.flush_coalescer().await;
                self.next_flush = self
                    .machine
                    .is_forwarding()
                    .then(|| now + self.settings.coalesce_interval);
            }
        }
        Ok(())
    }

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.edge.dwell_deadline(),
            self.return_edge.dwell_deadline(),
            self.machine.activation_deadline(),
            self.next_flush,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    // ── Sender role ───────────────────────────────────────────────────────────

    async fn on_edge_triggered(&mut self, position: Point, now: Instant) {
        if self.sender_link.is_none() {
            debug!("edge triggered with no peer connection; ignoring");
            return;
        }
        if self.controlled {
            // The remote peer currently drives this host; its cursor sits at
            // our boundary by construction and must not bounce straight back.
            return;
        }
        if let Some(HandshakeEffect::SendActivate) = self.machine.edge_triggered(now) {
            self.crossing = Some(position);
            info!(?position, "edge handoff requested");
            let payload = encode_activate(&ActivatePayload {
                normalized_y: self.geometry.normalized_y(position.y),
            });
            let frame = self.envelope(MessageType::Activate, payload);
            if let Some(link) = &self.sender_link {
                if link.send_control(frame).await.is_err() {
                    debug!("activate not sent; transport closing");
                }
            }
        }
    }

    async fn on_sender_transport(&mut self, event: TransportEvent) -> Result<Flow, SessionError> {
        match event {
            TransportEvent::State(TransportState::Connecting) => {
                self.status.set(ConnectionStatus::Connecting);
                Ok(Flow::Continue)
            }
            TransportEvent::State(TransportState::Ready) => {
                self.status.set(ConnectionStatus::Connected);
                let hello = self.envelope(
                    MessageType::Hello,
                    encode_hello(&HelloPayload {
                        device_name: self.settings.device_name.clone(),
                    }),
                );
                if let Some(link) = &self.sender_link {
                    let _ = link.send_control(hello).await;
                }
                Ok(Flow::Continue)
            }
            TransportEvent::State(TransportState::Failed)
            | TransportEvent::State(TransportState::Cancelled) => self.on_connection_lost("peer connection lost"),
            TransportEvent::Frame(bytes) => {
                self.on_sender_frame(&bytes).await;
                Ok(Flow::Continue)
            }
        }
    }

    async fn on_sender_frame(&mut self, bytes: &[u8]) {
        let Some(envelope) = self.decode_inbound(bytes) else {
            return;
        };
        match envelope.message_type {
            MessageType::Hello => {
                if let Ok(hello) = decode_hello(&envelope.payload) {
                    info!(peer = %hello.device_name, "connected to peer");
                }
            }
            MessageType::Activated => {
                if self.machine.received_activated() {
                    self.enter_forwarding();
                } else {
                    debug!("late or unexpected Activated ignored");
                }
            }
            MessageType::Deactivate => {
                // The controlled peer reached its return edge.
                let normalized_y = decode_deactivate(&envelope.payload)
                    .map(|p| p.normalized_y)
                    .unwrap_or_else(|e| {
                        warn!("malformed Deactivate payload: {e}; using crossing Y");
                        self.crossing
                            .map(|c| self.geometry.normalized_y(c.y))
                            .unwrap_or(0.5)
                    });
                if self.machine.received_deactivate() {
                    let target = self.return_warp_target(normalized_y);
                    let ack = self.envelope(MessageType::Deactivated, Vec::new());
                    if let Some(link) = &self.sender_link {
                        let _ = link.send_control(ack).await;
                    }
                    self.leave_forwarding(Some(target));
                }
            }
            MessageType::Deactivated => {
                // Ack for a locally initiated return.
                if self.machine.received_deactivated() {
                    let target = self
                        .crossing
                        .map(|c| self.return_warp_target(self.geometry.normalized_y(c.y)));
                    self.leave_forwarding(target);
                }
            }
            MessageType::PairRequest | MessageType::PairAccept => {
                debug!("pairing message ignored; provisioning is external");
            }
            MessageType::Activate | MessageType::InputEvent => {
                debug!(ty = ?envelope.message_type, "unexpected message on outbound link");
            }
        }
    }

    fn enter_forwarding(&mut self) {
        let bounds = self.geometry.virtual_bounds();
        let crossing = self.crossing.unwrap_or(Point::new(bounds.right() - 1.0, bounds.y));
        // The virtual cursor continues from the opposite edge of our screen
        // space, mirroring where the cursor appeared on the peer.
        let virtual_start = Point::new(bounds.x, crossing.y);
        let pin = Point::new(bounds.x + bounds.width / 2.0, bounds.y + bounds.height / 2.0);

        self.suppression = Some(SuppressionGuard::engage(
            &self.capture,
            virtual_start,
            bounds,
            pin,
            true,
        ));
        self.coalescer = Coalescer::new();
        self.next_flush = Some(Instant::now() + self.settings.coalesce_interval);
        self.status.set(ConnectionStatus::Forwarding);
        info!("forwarding to peer");
    }

    fn leave_forwarding(&mut self, warp_target: Option<Point>) {
        self.next_flush = None;
        self.coalescer = Coalescer::new();
        self.suppression = None; // guard drop reattaches and unhides
        if let Some(target) = warp_target {
            self.backend.warp_cursor(target);
        }
        self.edge.arm_after_entry();
        self.crossing = None;
        self.status.set(ConnectionStatus::Connected);
        info!("forwarding ended; local control restored");
    }

    async fn flush_coalescer(&mut self) {
        let pending = self.coalescer.drain();
        for event in pending {
            self.send_input_event(&event).await;
        }
    }

    async fn send_input_event(&self, event: &InputEvent) {
        let Some(link) = &self.sender_link else { return };
        let frame = self.envelope(MessageType::InputEvent, encode_input_event(event));
        match event {
            InputEvent::MouseMove { .. } => {
                // Coalesced moves may be dropped under pressure; the next
                // flush carries the accumulated remainder of the motion.
                let _ = link.try_send_move(frame);
            }
            _ => {
                if link.send_control(frame).await.is_err() {
                    debug!("event not sent; transport closing");
                }
            }
        }
    }

    async fn on_take_back(&mut self) {
        if let Some(HandshakeEffect::SendDeactivate) = self.machine.return_triggered() {
            info!("pulling control back from peer");
            self.flush_coalescer().await;
            let normalized_y = self
                .crossing
                .map(|c| self.geometry.normalized_y(c.y))
                .unwrap_or(0.5);
            let frame = self.envelope(
                MessageType::Deactivate,
                encode_deactivate(&DeactivatePayload { normalized_y }),
            );
            if let Some(link) = &self.sender_link {
                let _ = link.send_control(frame).await;
            }
        }
    }

    fn return_warp_target(&self, normalized_y: f64) -> Point {
        let y = self.geometry.denormalize_y(normalized_y);
        let display = self.geometry.display_at_right_boundary(y).unwrap_or_else(|| {
            // No true boundary at that Y (topology changed mid-handoff);
            // fall back to the rightmost display.
            rightmost_display(&self.geometry)
        });
        let clamped = ScreenGeometry::clamp_y_within(&display, y);
        Point::new(display.right() - 2.0, clamped)
    }

    // ── Receiver role ─────────────────────────────────────────────────────────

    async fn on_receiver_transport(&mut self, event: TransportEvent) -> Result<Flow, SessionError> {
        match event {
            TransportEvent::State(TransportState::Connecting) => Ok(Flow::Continue),
            TransportEvent::State(TransportState::Ready) => {
                if matches!(
                    self.status.current(),
                    ConnectionStatus::Disconnected { .. } | ConnectionStatus::Connecting
                ) {
                    self.status.set(ConnectionStatus::Connected);
                }
                let hello = self.envelope(
                    MessageType::Hello,
                    encode_hello(&HelloPayload {
                        device_name: self.settings.device_name.clone(),
                    }),
                );
                if let Some(link) = &self.receiver_link {
                    let _ = link.send_control(hello).await;
                }
                Ok(Flow::Continue)
            }
            TransportEvent::State(TransportState::Failed)
            | TransportEvent::State(TransportState::Cancelled) => self.on_connection_lost("peer connection lost"),
            TransportEvent::Frame(bytes) => {
                self.on_receiver_frame(&bytes).await;
                Ok(Flow::Continue)
            }
        }
    }

    async fn on_receiver_frame(&mut self, bytes: &[u8]) {
        let Some(envelope) = self.decode_inbound(bytes) else {
            return;
        };
        match envelope.message_type {
            MessageType::Hello => {
                if let Ok(hello) = decode_hello(&envelope.payload) {
                    info!(peer = %hello.device_name, "peer connected");
                }
            }
            MessageType::Activate => {
                match decode_activate(&envelope.payload) {
                    Ok(payload) => self.on_activate(payload).await,
                    Err(e) => warn!("malformed Activate payload dropped: {e}"),
                }
            }
            MessageType::InputEvent => {
                if !self.controlled {
                    // Ordering guarantee: nothing is injected before
                    // Activate in the same session.
                    debug!("input event before Activate ignored");
                    return;
                }
                match decode_input_event(&envelope.payload) {
                    Ok(event) => self.on_remote_input(event, Instant::now()),
                    Err(e) => warn!("malformed input event dropped: {e}"),
                }
            }
            MessageType::Deactivate => {
                // The controlling peer is taking its input back.
                if self.controlled {
                    self.end_controlled();
                    let ack = self.envelope(MessageType::Deactivated, Vec::new());
                    if let Some(link) = &self.receiver_link {
                        let _ = link.send_control(ack).await;
                    }
                }
            }
            MessageType::Deactivated => {
                debug!("return acknowledged by peer");
            }
            MessageType::PairRequest | MessageType::PairAccept => {
                debug!("pairing message ignored; provisioning is external");
            }
            MessageType::Activated => {
                debug!("unexpected Activated on inbound link");
            }
        }
    }

    async fn on_activate(&mut self, payload: ActivatePayload) {
        if self.controlled {
            debug!("duplicate Activate while controlled; re-acking");
        } else {
            let y = self.geometry.denormalize_y(payload.normalized_y);
            let display = self
                .geometry
                .display_at_left_boundary(y)
                .unwrap_or_else(|| leftmost_display(&self.geometry));
            let clamped = ScreenGeometry::clamp_y_within(&display, y);
            let entry = Point::new(display.x + 2.0, clamped);

            // The cursor stays visible while remotely controlled; suppression
            // only detaches the local physical mouse.
            self.suppression = Some(SuppressionGuard::engage(
                &self.capture,
                entry,
                self.geometry.virtual_bounds(),
                entry,
                false,
            ));
            self.receiver_cursor = entry;
            self.controlled = true;
            self.return_edge.reset();
            self.return_edge.arm_after_entry();
            self.status.set(ConnectionStatus::Forwarding);
            info!(?entry, "controlled by peer");
        }

        let ack = self.envelope(MessageType::Activated, Vec::new());
        if let Some(link) = &self.receiver_link {
            let _ = link.send_control(ack).await;
        }
    }

    fn on_remote_input(&mut self, event: InputEvent, now: Instant) {
        match event {
            InputEvent::MouseMove { dx, dy, modifiers, .. } => {
                self.receiver_cursor.x += f64::from(dx);
                self.receiver_cursor.y += f64::from(dy);
                self.receiver_cursor = self.geometry.clamp_to_virtual_bounds(self.receiver_cursor);
                if let Err(e) =
                    self.injector
                        .inject_move_to(self.receiver_cursor, dx, dy, modifiers)
                {
                    warn!("move injection failed: {e}");
                }
                if let Some(edge_event) =
                    self.return_edge.update(self.receiver_cursor, &self.geometry, now)
                {
                    trace!(?edge_event, "return edge");
                }
            }
            other => {
                if let Err(e) = self.injector.inject(&other) {
                    warn!("injection failed: {e}");
                }
            }
        }
    }

    async fn on_return_edge_triggered(&mut self, position: Point) {
        if !self.controlled {
            return;
        }
        info!(?position, "return edge reached; handing control back");
        let frame = self.envelope(
            MessageType::Deactivate,
            encode_deactivate(&DeactivatePayload {
                normalized_y: self.geometry.normalized_y(position.y),
            }),
        );
        if let Some(link) = &self.receiver_link {
            let _ = link.send_control(frame).await;
        }
        // The controlling side treats Deactivate as terminal, so local
        // control comes back immediately rather than waiting for the ack.
        self.end_controlled();
    }

    fn end_controlled(&mut self) {
        self.controlled = false;
        self.suppression = None;
        self.injector.reset();
        self.return_edge.reset();
        self.status.set(ConnectionStatus::Connected);
        info!("local control restored");
    }

    // ── Failsafe ──────────────────────────────────────────────────────────────

    fn on_connection_lost(&mut self, reason: &str) -> Result<Flow, SessionError> {
        if self.sender_link.is_none() && self.receiver_link.is_none() {
            // Stale event from an already-torn-down transport.
            return Ok(Flow::Continue);
        }
        self.restore_local_control(reason);
        if self.outbound_role {
            Err(SessionError::ConnectionLost(reason.to_string()))
        } else {
            Ok(Flow::Continue)
        }
    }

    /// Restores full local control regardless of prior role: stops
    /// coalescing, releases suppression, resets the state machine, cancels
    /// both transports, reattaches the physical cursor, and shows it.
    fn restore_local_control(&mut self, reason: &str) {
        self.next_flush = None;
        self.coalescer = Coalescer::new();
        self.suppression = None; // reattaches + unhides via guard drop
        self.machine.reset();
        self.controlled = false;
        self.injector.reset();
        self.edge.reset();
        self.return_edge.reset();
        self.crossing = None;
        self.inbound_sequence.reset();
        if let Some(link) = self.sender_link.take() {
            link.cancel();
        }
        if let Some(link) = self.receiver_link.take() {
            link.cancel();
        }
        self.status.set(ConnectionStatus::Disconnected {
            reason: Some(reason.to_string()),
        });
        info!(reason, "local control restored");
    }

    // ── Envelope helpers ──────────────────────────────────────────────────────

    fn envelope(&self, message_type: MessageType, payload: Vec<u8>) -> Vec<u8> {
        encode_envelope(&Envelope {
            version: PROTOCOL_VERSION,
            message_type,
            sequence: self.sequence.next(),
            monotonic_ns: self.epoch.elapsed().as_nanos() as u64,
            source_device_id: self.settings.device_id.clone(),
            payload,
        })
    }

    fn decode_inbound(&mut self, bytes: &[u8]) -> Option<Envelope> {
        match decode_envelope(bytes) {
            Ok(envelope) => {
                self.inbound_sequence.observe(envelope.sequence);
                Some(envelope)
            }
            Err(e) => {
                // Contained at the frame boundary: log, drop, keep the
                // connection.
                warn!("dropping undecodable frame: {e}");
                None
            }
        }
    }
}

fn leftmost_display(geometry: &ScreenGeometry) -> DisplayRect {
    *geometry
        .displays()
        .iter()
        .min_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal))
        .expect("geometry always holds at least one display")
}

fn rightmost_display(geometry: &ScreenGeometry) -> DisplayRect {
    *geometry
        .displays()
        .iter()
        .max_by(|a, b| a.right().partial_cmp(&b.right()).unwrap_or(std::cmp::Ordering::Equal))
        .expect("geometry always holds at least one display")
}
