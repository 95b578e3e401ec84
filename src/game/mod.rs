//! The conversation (game) model: players, tiles, chat log, turn
//! ordering, and the registries that own conversations and persons
//! (spec.md §3.3–§3.6, §4.5–§4.6).

pub mod clock;
pub mod conversation;
pub mod person;
pub mod player;
pub mod registry;
pub mod tile;

pub use clock::{Clock, SystemClock, TestClock};
pub use conversation::{Conversation, ConversationEvent, ConversationState, Message, TileNotInPlay, TurnError, SHOUT_WINDOW_US};
pub use person::{Person, SILENCE_TIMEOUT_US};
pub use player::Player;
pub use registry::{ConversationRegistry, PersonRegistry};
pub use tile::{default_tile_set, lookup_tile_set, Tile, TileSet};
