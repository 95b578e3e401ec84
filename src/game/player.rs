//! Player records (spec.md §3.3).

use crate::protocol::types::PlayerFlags;

/// One seat in a conversation. Lives for the conversation's lifetime;
/// `LEAVE` clears [`PlayerFlags::CONNECTED`] rather than removing the
/// player, since `num` indices and message history stay stable.
#[derive(Debug, Clone)]
pub struct Player {
    pub num: u8,
    pub name: String,
    pub flags: PlayerFlags,
}

impl Player {
    #[must_use]
    pub fn new(num: u8, name: String) -> Self {
        Self {
            num,
            name,
            flags: PlayerFlags::CONNECTED,
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.flags.contains(PlayerFlags::CONNECTED)
    }

    #[must_use]
    pub fn has_next_turn(&self) -> bool {
        self.flags.contains(PlayerFlags::NEXT_TURN)
    }
}
