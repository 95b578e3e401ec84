//! Typed configuration shapes loaded from the bracketed config file
//! (SPEC_FULL.md §6.2).

use std::net::SocketAddr;
use std::path::PathBuf;

/// The `[general]` section: process-wide settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneralConfig {
    pub log_file: Option<PathBuf>,
    /// Accepted and logged at startup; privilege dropping is out of scope
    /// (SPEC_FULL.md §6.4).
    pub user: Option<String>,
    pub group: Option<String>,
}

/// One `[server]` section: a single listen address, optionally with TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerListenerConfig {
    pub address: SocketAddr,
    pub tls: Option<TlsListenerConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsListenerConfig {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
    pub private_key_password: Option<String>,
}

/// The fully parsed, validated configuration: one `[general]` section and
/// one or more repeatable `[server]` sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub general: GeneralConfig,
    pub servers: Vec<ServerListenerConfig>,
}
