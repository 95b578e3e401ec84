//! The client connection engine (spec.md §4.3): configuration, reconnect
//! backoff, input coalescing, and the event bus an embedder drives a real
//! socket against.

pub mod backoff;
pub mod engine;
pub mod events;

pub use backoff::{Backoff, INITIAL_BACKOFF_US, MAX_BACKOFF_US, STABLE_THRESHOLD_US};
pub use engine::{ClientEngine, ClientState, KEEP_ALIVE_INTERVAL_US};
pub use events::ClientEvent;
