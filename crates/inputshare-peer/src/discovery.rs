//! mDNS advertisement and browsing for `_inputshare._tcp`.
//!
//! A receiving peer registers itself on the local link so the sending side
//! can be pointed at it without manual IP entry; the advertisement carries
//! the protocol version and a truncated TLS fingerprint in TXT records.
//!
//! # TXT record keys
//!
//! | Key       | Value                                     |
//! |-----------|-------------------------------------------|
//! | `version` | Protocol version (`"1"`)                  |
//! | `fp`      | First 16 hex chars of the TLS fingerprint |

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use thiserror::Error;
use tracing::{debug, info, warn};

use inputshare_core::protocol::PROTOCOL_VERSION;

pub const SERVICE_TYPE: &str = "_inputshare._tcp.local.";

/// Errors from the discovery layer.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("mDNS error: {0}")]
    Mdns(#[from] mdns_sd::Error),
}

/// A peer found on the local link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    /// Friendly instance name from the advertisement.
    pub name: String,
    pub addresses: Vec<IpAddr>,
    pub port: u16,
    /// Truncated TLS fingerprint from the `fp` TXT record, when present.
    pub fingerprint_hint: Option<String>,
}

/// Active mDNS service advertisement. Call
/// [`unregister`](ServiceAdvertiser::unregister) on shutdown.
pub struct ServiceAdvertiser {
    daemon: ServiceDaemon,
    fullname: String,
}

impl ServiceAdvertiser {
    /// Registers this peer on the local mDNS domain.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Mdns`] when the daemon cannot start or the
    /// service info is rejected.
    pub fn register(
        instance_name: &str,
        port: u16,
        fingerprint: &str,
    ) -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new()?;

        let raw_host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "inputshare-peer".to_owned());
        let host_fullname = format!("{raw_host}.local.");

        let fp_short: String = fingerprint
            .chars()
            .filter(|c| c.is_ascii_hexdigit())
            .take(16)
            .collect();

        let mut properties = HashMap::new();
        properties.insert("version".to_string(), PROTOCOL_VERSION.to_string());
        properties.insert("fp".to_string(), fp_short);

        let info = ServiceInfo::new(
            SERVICE_TYPE,
            instance_name,
            &host_fullname,
            "",
            port,
            properties,
        )?
        .enable_addr_auto();

        let fullname = info.get_fullname().to_string();
        daemon.register(info)?;
        info!(%fullname, port, "advertising on the local link");

        Ok(Self { daemon, fullname })
    }

    /// Withdraws the advertisement. Errors are logged, not propagated — the
    /// daemon is going away either way.
    pub fn unregister(self) {
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            warn!("failed to unregister mDNS service: {e}");
        }
        let _ = self.daemon.shutdown();
    }
}

/// Browses the local link and returns the first resolved peer within
/// `timeout`, or `None` when nothing answers.
///
/// Blocking by design — call from startup code or wrap in
/// `spawn_blocking`.
///
/// # Errors
///
/// Returns [`DiscoveryError::Mdns`] when browsing cannot start.
pub fn browse_first(timeout: Duration) -> Result<Option<PeerRecord>, DiscoveryError> {
    let daemon = ServiceDaemon::new()?;
    let receiver = daemon.browse(SERVICE_TYPE)?;
    let deadline = Instant::now() + timeout;

    let record = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break None;
        }
        match receiver.recv_timeout(remaining) {
            Ok(ServiceEvent::ServiceResolved(info)) => {
                let record = PeerRecord {
                    name: info.get_fullname().to_string(),
                    addresses: info.get_addresses().iter().copied().collect(),
                    port: info.get_port(),
                    fingerprint_hint: info.get_property_val_str("fp").map(str::to_string),
                };
                debug!(?record, "resolved peer");
                break Some(record);
            }
            Ok(other) => debug!(?other, "discovery event"),
            Err(_) => break None,
        }
    };

    let _ = daemon.stop_browse(SERVICE_TYPE);
    let _ = daemon.shutdown();
    Ok(record)
}
