//! # inputshare-peer
//!
//! The peer application: framed TLS transport with fingerprint pinning,
//! HID capture/injection adapters over an OS-backend seam, mDNS discovery,
//! TOML configuration, and the session controller that binds them into the
//! sender and receiver roles.

pub mod config;
pub mod discovery;
pub mod hid;
pub mod mock_receive;
pub mod session;
pub mod transport;
