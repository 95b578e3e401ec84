//! Optional transport security for `[server]` listener sections that
//! configure a certificate and private key (SPEC_FULL.md §6.2).
//!
//! This is deliberately thin: the core protocol's own non-goals (spec.md
//! §1) exclude payload encryption beyond the chosen transport and any
//! form of client authentication, so there is no mTLS, no client
//! certificate verification, nothing beyond wrapping an accepted
//! `TcpStream` in a server-only TLS session.

#[cfg(feature = "tls")]
pub mod tls;

#[cfg(feature = "tls")]
pub use tls::build_server_config;
