//! Wire protocol: the WebSocket frame subset and the command codec carried
//! inside it, plus the shared scalar types both layers and the game model
//! build on.

pub mod command;
pub mod error;
pub mod frame;
pub mod name;
pub mod types;

pub use command::{ClientCommand, Field, PayloadReader, ServerCommand};
pub use error::{BufferTooSmall, CommandError, FrameError};
pub use frame::{FrameEvent, FrameParser};
pub use name::normalize_name;
pub use types::{
    utf8_safe_truncate, ConversationId, PersonId, PlayerFlags, PlayerNum,
    MAX_CONTROL_FRAME_PAYLOAD, MAX_MESSAGE_LENGTH, MAX_NAME_LENGTH, MAX_PAYLOAD_SIZE, MAX_PLAYERS,
    MAX_TILES, NO_PLAYER,
};
