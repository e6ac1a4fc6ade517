//! `mock-receive`: a development-only receiver that accepts any peer.
//!
//! Listens with an ephemeral self-signed identity and no client
//! authentication, prints every received `InputEvent` as one JSON line on
//! stdout, and answers `Activate`/`Deactivate` with the matching ack so a
//! real sender can exercise its full handshake against it. No HID access is
//! required.

use std::net::SocketAddr;
use std::time::Instant;

use anyhow::Context;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

use inputshare_core::protocol::{
    decode_activate, decode_deactivate, decode_envelope, decode_hello, decode_input_event,
    encode_envelope, Envelope, MessageType, SequenceCounter, SequenceTracker, PROTOCOL_VERSION,
};

use crate::transport::tls::{acceptor, TlsIdentity};
use crate::transport::{FramedTransport, TransportEvent, EVENT_QUEUE_DEPTH};

/// Runs the mock receiver until the process is interrupted.
///
/// # Errors
///
/// Returns an error when the listener cannot bind or the ephemeral
/// identity cannot be generated.
pub async fn run(bind_address: &str, port: u16) -> anyhow::Result<()> {
    let identity =
        TlsIdentity::generate("inputshare-mock-receive").context("generating TLS identity")?;
    info!("mock-receive TLS fingerprint (pin this on the sender): {}", identity.fingerprint);

    let tls = acceptor(&identity, None).context("building TLS acceptor")?;
    let listener = TcpListener::bind((bind_address, port))
        .await
        .with_context(|| format!("binding {bind_address}:{port}"))?;
    info!("mock-receive listening on {bind_address}:{port}");

    loop {
        let (tcp, addr) = listener.accept().await.context("accepting connection")?;
        let tls = tls.clone();
        tokio::spawn(async move {
            match tls.accept(tcp).await {
                Ok(stream) => handle_connection(stream, addr).await,
                Err(e) => warn!(%addr, "TLS handshake failed: {e}"),
            }
        });
    }
}

async fn handle_connection<S>(stream: S, addr: SocketAddr)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
{
    info!(%addr, "peer connected");
    let (events_tx, mut events) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let transport = FramedTransport::spawn(stream, events_tx);

    let sequence = SequenceCounter::new();
    let mut inbound = SequenceTracker::new();
    let epoch = Instant::now();
    let device_id = format!("mock-receive-{}", uuid::Uuid::new_v4());

    let reply = |ty: MessageType| {
        encode_envelope(&Envelope {
            version: PROTOCOL_VERSION,
            message_type: ty,
            sequence: sequence.next(),
            monotonic_ns: epoch.elapsed().as_nanos() as u64,
            source_device_id: device_id.clone(),
            payload: Vec::new(),
        })
    };

    while let Some(event) = events.recv().await {
        let bytes = match event {
            TransportEvent::Frame(bytes) => bytes,
            TransportEvent::State(state) => {
                info!(%addr, ?state, "transport state");
                continue;
            }
        };

        let envelope = match decode_envelope(&bytes) {
            Ok(env) => env,
            Err(e) => {
                warn!(%addr, "dropping undecodable frame: {e}");
                continue;
            }
        };
        inbound.observe(envelope.sequence);

        match envelope.message_type {
            MessageType::Hello => {
                if let Ok(hello) = decode_hello(&envelope.payload) {
                    info!(%addr, peer = %hello.device_name, "hello");
                }
            }
            MessageType::InputEvent => match decode_input_event(&envelope.payload) {
                Ok(input) => {
                    let record = json!({
                        "seq": envelope.sequence,
                        "monotonic_ns": envelope.monotonic_ns,
                        "source": envelope.source_device_id,
                        "event": input,
                    });
                    println!("{record}");
                }
                Err(e) => warn!(%addr, "malformed input event: {e}"),
            },
            MessageType::Activate => {
                match decode_activate(&envelope.payload) {
                    Ok(p) => info!(%addr, normalized_y = p.normalized_y, "activate"),
                    Err(e) => warn!(%addr, "malformed activate payload: {e}"),
                }
                if transport.send_control(reply(MessageType::Activated)).await.is_err() {
                    break;
                }
            }
            MessageType::Deactivate => {
                match decode_deactivate(&envelope.payload) {
                    Ok(p) => info!(%addr, normalized_y = p.normalized_y, "deactivate"),
                    Err(e) => warn!(%addr, "malformed deactivate payload: {e}"),
                }
                if transport.send_control(reply(MessageType::Deactivated)).await.is_err() {
                    break;
                }
            }
            other => info!(%addr, ?other, "control message"),
        }
    }
    info!(%addr, "peer disconnected");
}
