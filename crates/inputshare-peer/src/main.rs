//! inputshare peer entry point.
//!
//! Three subcommands:
//! - `send`          — connect to a receiving peer; hand input off when the
//!                     cursor dwells at the right screen edge.
//! - `receive`       — listen for a sending peer; inject its forwarded
//!                     input and hand control back at the left edge.
//! - `mock-receive`  — development mode: accept any peer and print every
//!                     received input event as a JSON line.
//!
//! Exit status: 0 on clean termination, 2 on argument errors (clap), and
//! non-zero on I/O or handshake failures.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use inputshare_core::domain::geometry::{DisplayRect, ScreenGeometry};

use inputshare_peer::config::{self, AppConfig};
use inputshare_peer::discovery;
use inputshare_peer::hid::{self, mock::MockHidBackend, HidBackend};
use inputshare_peer::mock_receive;
use inputshare_peer::session::{SessionController, SessionHandle, SessionSettings};
use inputshare_peer::transport::tls::{self, PinSha256, TlsIdentity};
use inputshare_peer::transport::{self, FramedTransport, EVENT_QUEUE_DEPTH};

#[derive(Parser)]
#[command(name = "inputshare", version, about = "Share one mouse and keyboard across two hosts")]
struct Cli {
    /// Alternate config file (default: the platform config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to a receiving peer and forward input across the right edge.
    Send {
        /// Receiver address. Discovered over mDNS when omitted.
        #[arg(long)]
        host: Option<String>,

        #[arg(long, default_value_t = 4242)]
        port: u16,

        /// Friendly name announced to the peer; overrides the config file.
        #[arg(long)]
        name: Option<String>,

        #[command(flatten)]
        tls: TlsArgs,

        /// Use the in-memory HID backend (development only).
        #[arg(long, hide = true)]
        mock_hid: bool,
    },
    /// Accept a sending peer and inject its forwarded input.
    Receive {
        #[arg(long, default_value_t = 4242)]
        port: u16,

        /// Friendly name announced to the peer and advertised over mDNS;
        /// overrides the config file.
        #[arg(long)]
        name: Option<String>,

        /// Skip the mDNS advertisement.
        #[arg(long)]
        no_advertise: bool,

        #[command(flatten)]
        tls: TlsArgs,

        /// Use the in-memory HID backend (development only).
        #[arg(long, hide = true)]
        mock_hid: bool,
    },
    /// Accept any peer and print received input events (development only).
    MockReceive {
        #[arg(long, default_value_t = 4242)]
        port: u16,
    },
}

#[derive(Args)]
struct TlsArgs {
    /// PEM certificate chain identifying this peer. An ephemeral
    /// self-signed identity is generated when omitted.
    #[arg(long, requires = "identity_key")]
    identity_cert: Option<PathBuf>,

    /// PEM private key for the identity certificate.
    #[arg(long, requires = "identity_cert")]
    identity_key: Option<PathBuf>,

    /// Expected SHA-256 fingerprint of the remote peer's leaf certificate
    /// (64 hex chars, `:` separators allowed).
    #[arg(long)]
    pin_sha256: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.clone()).context("loading configuration")?;
    init_logging(&cfg);

    match cli.command {
        Command::Send { host, port, name, tls, mock_hid } => {
            run_send(cfg, host, port, name, tls, mock_hid).await
        }
        Command::Receive { port, name, no_advertise, tls, mock_hid } => {
            run_receive(cfg, port, name, no_advertise, tls, mock_hid).await
        }
        Command::MockReceive { port } => mock_receive::run(&cfg.network.bind_address, port).await,
    }
}

fn init_logging(cfg: &AppConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cfg.peer.log_level.clone())),
        )
        .init();
}

async fn run_send(
    cfg: AppConfig,
    host: Option<String>,
    port: u16,
    name: Option<String>,
    tls_args: TlsArgs,
    mock_hid: bool,
) -> anyhow::Result<()> {
    let pin: PinSha256 = tls_args.pin_sha256.parse().context("parsing --pin-sha256")?;
    let device_name = resolve_name(name, &cfg);
    let identity = load_or_generate_identity(&tls_args, &device_name)?;
    let backend = backend_for(mock_hid)?;
    probe_hid_access(&backend)?;
    let geometry =
        ScreenGeometry::new(backend.displays()).context("resolving display geometry")?;

    let (host, port) = match host {
        Some(h) => (h, port),
        None => {
            info!("no --host given; browsing the local link for a receiver");
            let record =
                tokio::task::spawn_blocking(|| discovery::browse_first(Duration::from_secs(5)))
                    .await
                    .context("discovery task failed")??;
            let record = record.context("no receiving peer found on the local link")?;
            let addr = record
                .addresses
                .first()
                .context("discovered peer advertised no address")?;
            info!(name = %record.name, %addr, port = record.port, "using discovered peer");
            (addr.to_string(), record.port)
        }
    };

    let settings = SessionSettings::from_config(&cfg, device_name);
    let (mut session, handle) = SessionController::new(settings, geometry, backend)?;
    session.start_capture().context("installing input hook")?;

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let connector = tls::connector(&identity, pin)?;
    let link = transport::connect_tls(&host, port, connector, events_tx)
        .await
        .with_context(|| format!("connecting to {host}:{port}"))?;
    session.attach_sender_link(link, events_rx);

    spawn_ctrl_c(handle);
    session.run().await?;
    Ok(())
}

async fn run_receive(
    cfg: AppConfig,
    port: u16,
    name: Option<String>,
    no_advertise: bool,
    tls_args: TlsArgs,
    mock_hid: bool,
) -> anyhow::Result<()> {
    let pin: PinSha256 = tls_args.pin_sha256.parse().context("parsing --pin-sha256")?;
    let device_name = resolve_name(name, &cfg);
    let identity = load_or_generate_identity(&tls_args, &device_name)?;
    let backend = backend_for(mock_hid)?;
    probe_hid_access(&backend)?;
    let geometry =
        ScreenGeometry::new(backend.displays()).context("resolving display geometry")?;

    let acceptor = tls::acceptor(&identity, Some(pin))?;
    let bind_address = cfg.network.bind_address.clone();
    let listener = TcpListener::bind((bind_address.as_str(), port))
        .await
        .with_context(|| format!("binding {bind_address}:{port}"))?;
    info!("listening on {bind_address}:{port}");
    info!("local TLS fingerprint (pin this on the sender): {}", identity.fingerprint);

    let advertiser = if cfg.network.advertise && !no_advertise {
        match discovery::ServiceAdvertiser::register(
            &device_name,
            port,
            &identity.fingerprint.to_string(),
        ) {
            Ok(adv) => Some(adv),
            Err(e) => {
                warn!("mDNS advertisement unavailable: {e}");
                None
            }
        }
    } else {
        None
    };

    let settings = SessionSettings::from_config(&cfg, device_name);
    let (session, handle) = SessionController::new(settings, geometry, backend)?;
    session.start_capture().context("installing input hook")?;

    let accept_handle = handle.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((tcp, addr)) => {
                    info!(%addr, "inbound connection");
                    let acceptor = acceptor.clone();
                    let handle = accept_handle.clone();
                    tokio::spawn(async move {
                        match acceptor.accept(tcp).await {
                            Ok(stream) => {
                                let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
                                let link = FramedTransport::spawn(stream, tx);
                                handle.inbound_connected(link, rx);
                            }
                            Err(e) => warn!(%addr, "TLS handshake rejected: {e}"),
                        }
                    });
                }
                Err(e) => warn!("accept error: {e}"),
            }
        }
    });

    spawn_ctrl_c(handle);
    let result = session.run().await;
    if let Some(adv) = advertiser {
        adv.unregister();
    }
    result?;
    Ok(())
}

/// `--name` wins over the config file, which wins over the hostname.
fn resolve_name(cli_name: Option<String>, cfg: &AppConfig) -> String {
    match cli_name {
        Some(name) if !name.is_empty() => name,
        _ => config::resolve_device_name(cfg),
    }
}

fn load_or_generate_identity(tls_args: &TlsArgs, name: &str) -> anyhow::Result<TlsIdentity> {
    match (&tls_args.identity_cert, &tls_args.identity_key) {
        (Some(cert), Some(key)) => {
            TlsIdentity::load(cert, key).context("loading identity material")
        }
        _ => {
            let identity = TlsIdentity::generate(name).context("generating identity")?;
            info!("using ephemeral identity; fingerprint: {}", identity.fingerprint);
            Ok(identity)
        }
    }
}

fn backend_for(mock_hid: bool) -> anyhow::Result<Arc<dyn HidBackend>> {
    if mock_hid {
        Ok(MockHidBackend::new(vec![DisplayRect::new(0.0, 0.0, 1920.0, 1080.0)])
            as Arc<dyn HidBackend>)
    } else {
        hid::native_backend().context("no HID backend available on this platform")
    }
}

/// One startup probe; absence of the grant is fatal for capture and
/// injection but the transport layer never needs it.
fn probe_hid_access(backend: &Arc<dyn HidBackend>) -> anyhow::Result<()> {
    if backend.access_granted() {
        Ok(())
    } else {
        anyhow::bail!(
            "HID access not granted; allow input monitoring for this binary and run again"
        )
    }
}

fn spawn_ctrl_c(handle: SessionHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            handle.shutdown();
        }
    });
}
