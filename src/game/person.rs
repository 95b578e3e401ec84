//! Person records (spec.md §3.6): the server-side binding of an
//! authenticated player identity to a conversation and a seat within it.

use crate::protocol::types::{ConversationId, PersonId};

/// Binds a person to the conversation they joined, remembering where in
/// the conversation's message log they joined (so reconnects resume from
/// the right point) and when they were last heard from (for silence GC).
#[derive(Debug, Clone)]
pub struct Person {
    pub id: PersonId,
    pub conversation_id: ConversationId,
    pub player_num: u8,
    /// Message count at join time; client-visible message indices are
    /// relative to this offset (spec.md §3.6).
    pub message_offset: u32,
    /// Monotonic microsecond timestamp of last activity.
    pub last_noise_time: i64,
}

impl Person {
    #[must_use]
    pub fn new(
        id: PersonId,
        conversation_id: ConversationId,
        player_num: u8,
        message_offset: u32,
        now_us: i64,
    ) -> Self {
        Self {
            id,
            conversation_id,
            player_num,
            message_offset,
            last_noise_time: now_us,
        }
    }

    pub fn touch(&mut self, now_us: i64) {
        self.last_noise_time = now_us;
    }

    /// A person is silent after this many microseconds without activity
    /// (spec.md §3.6: 5 minutes).
    #[must_use]
    pub fn is_silent(&self, now_us: i64, silence_timeout_us: i64) -> bool {
        now_us - self.last_noise_time >= silence_timeout_us
    }
}

/// Silence timeout: 5 minutes (spec.md §3.6, §5).
pub const SILENCE_TIMEOUT_US: i64 = 5 * 60 * 1_000_000;
