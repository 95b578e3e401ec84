//! The server half of the protocol: the per-socket connection engine
//! (spec.md §3.7, §4.4) and the accept loop that drives a registry of
//! them against real sockets (SPEC_FULL.md §5).

mod bitset;
pub mod connection;
pub mod listener;

pub use bitset::{PlayerBits, TileBits};
pub use connection::{ConnState, ServerConnection};
pub use listener::{run, Listener};
