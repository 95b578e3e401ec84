#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_excessive_bools,
    clippy::too_many_arguments,
    clippy::too_many_lines,
    clippy::similar_names
)]

//! # tilewire
//!
//! A real-time multiplayer anagram-game networking core: a custom binary
//! protocol carried over a WebSocket (RFC 6455) frame subset, client and
//! server connection engines built as sans-I/O state machines, and the
//! authoritative conversation (game) model they drive.
//!
//! The library crate (`tilewire_core`) is pure protocol and game logic —
//! no sockets. [`server::listener`] and `main.rs`, in the `tilewire-server`
//! binary, are the only places that touch an actual `TcpStream`.

/// Client-side connection engine: reconnect backoff, outbound coalescing,
/// and the state machine driving a single server connection.
pub mod client;

/// Server configuration: the bracketed config file format and CLI/env
/// overrides.
pub mod config;

/// The conversation (game) model, the monotonic clock seam, and the
/// conversation/person registries.
pub mod game;

/// Structured logging setup.
pub mod logging;

/// The wire protocol: WebSocket frame codec and the tilewire command codec.
pub mod protocol;

/// Optional TLS support for `[server]` listener sections.
pub mod security;

/// The server-side per-connection engine and the accept loop that drives
/// it against real sockets.
pub mod server;
