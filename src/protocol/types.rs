//! Shared scalar types used across the frame codec, command codec, and
//! the game model.

use std::fmt;

/// Maximum number of players a single conversation can hold (spec.md §3.3).
pub const MAX_PLAYERS: usize = 32;

/// Maximum number of tiles a conversation can hold (spec.md §3.4).
pub const MAX_TILES: usize = 256;

/// Maximum payload a single frame or command may carry (spec.md §3.1/§4.2).
pub const MAX_PAYLOAD_SIZE: usize = 1024;

/// Maximum bytes allowed in a room or player name, post-normalization.
pub const MAX_NAME_LENGTH: usize = 256;

/// Maximum bytes allowed in a single chat message.
pub const MAX_MESSAGE_LENGTH: usize = 1000;

/// WebSocket control frames may not exceed this many payload bytes.
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Sentinel `last_player` value meaning "no player has touched this tile".
pub const NO_PLAYER: u8 = 255;

/// A player's index within a conversation, `0..MAX_PLAYERS`.
pub type PlayerNum = u8;

/// Opaque 64-bit person identifier, generated by [`crate::game::PersonRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PersonId(pub u64);

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque 64-bit conversation identifier, generated by
/// [`crate::game::ConversationRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(pub u64);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Truncates `s` to at most `max_bytes` bytes without splitting a UTF-8
/// multi-byte sequence, by scanning backward while the candidate boundary
/// falls on a continuation byte (`0b10xxxxxx`) (spec.md §9 "UTF-8 boundary
/// clipping").
#[must_use]
pub fn utf8_safe_truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && (s.as_bytes()[end] & 0xC0) == 0x80 {
        end -= 1;
    }
    &s[..end]
}

bitflags::bitflags! {
    /// Per-player flags mirrored to clients via `PLAYER_FLAGS` (spec.md §3.3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PlayerFlags: u8 {
        const CONNECTED = 1 << 0;
        const TYPING = 1 << 1;
        const NEXT_TURN = 1 << 2;
    }
}

#[cfg(test)]
mod truncate_tests {
    use super::*;

    #[test]
    fn truncate_noop_when_within_limit() {
        assert_eq!(utf8_safe_truncate("hello", 10), "hello");
    }

    #[test]
    fn truncate_backs_off_a_multibyte_boundary() {
        // "é" is 2 bytes (0xC3 0xA9); truncating to 1 byte would split it.
        let s = "é";
        assert_eq!(utf8_safe_truncate(s, 1), "");
    }

    #[test]
    fn truncate_keeps_whole_graphemes() {
        let s = "aébc";
        // byte layout: a(1) é(2) b(1) c(1) = 5 bytes total, 'é' at [1..3)
        assert_eq!(utf8_safe_truncate(s, 2), "a");
        assert_eq!(utf8_safe_truncate(s, 3), "aé");
    }
}

#[cfg(test)]
mod truncate_proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn truncate_never_produces_invalid_utf8(s in "\\PC*", max_bytes in 0usize..64) {
            let truncated = utf8_safe_truncate(&s, max_bytes);
            prop_assert!(std::str::from_utf8(truncated.as_bytes()).is_ok());
            prop_assert!(truncated.len() <= max_bytes);
            prop_assert!(s.starts_with(truncated));
        }
    }
}
