//! Events the client connection engine raises for its embedder (spec.md
//! §4.3's event bus, §6.5's `POLL_CHANGED` contract).

use crate::protocol::types::{ConversationId, PersonId, PlayerNum};

/// Every event but `PollChanged` and `RunningStateChanged` carries `synced`:
/// whether a `SYNC` command has been received since the connection was last
/// (re)established. An embedder replaying state into a UI can use this to
/// tell "still catching up after a reconnect" apart from "live update".
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The server accepted us and assigned identity (from `PLAYER_ID`).
    Header { person_id: PersonId, self_num: PlayerNum, synced: bool },
    ConversationId { id: ConversationId, synced: bool },
    NTilesChanged { total: u8, synced: bool },
    LanguageChanged { code: String, synced: bool },
    PlayerNameChanged { num: PlayerNum, name: String, synced: bool },
    PlayerFlagsChanged { num: PlayerNum, flags: u8, synced: bool },
    TileChanged {
        num: u8,
        x: i16,
        y: i16,
        letter: String,
        last_player: u8,
        synced: bool,
    },
    /// `message_num` is relative to this connection's own view, i.e. the
    /// zero-based count of messages received so far this session plus any
    /// carried over by a `RECONNECT`.
    Message { sender: PlayerNum, message_num: u32, text: String, synced: bool },
    PlayerShouted { num: PlayerNum, synced: bool },
    End { synced: bool },
    /// The set of things the embedder should wait on (and until when)
    /// changed; it should recompute its poll/select arguments.
    PollChanged,
    RunningStateChanged { running: bool },
    /// A non-reconnecting domain error (`BAD_PLAYER_ID`, `BAD_CONVERSATION_ID`,
    /// `CONVERSATION_FULL`) or a transport failure. `reconnecting` is true
    /// when the engine will itself retry; false when it has given up and
    /// `running` has been forced to false.
    Error { message: String, reconnecting: bool },
}
