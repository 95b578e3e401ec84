//! Typed command payloads (spec.md §3.2, §4.2).
//!
//! [`Field`] drives the generic writer; [`PayloadReader`] drives typed
//! decoding of an already-extracted frame payload. [`ServerCommand`] and
//! [`ClientCommand`] are the closed vocabularies for each direction.

use super::error::{BufferTooSmall, CommandError};
use super::frame::{header_len_for_payload, write_frame_header, OPCODE_BINARY};
use super::types::{ConversationId, PersonId, PlayerNum, NO_PLAYER};

/// Opcodes sent server-to-client.
pub mod s2c {
    pub const PLAYER_ID: u8 = 0x00;
    pub const MESSAGE: u8 = 0x01;
    pub const N_TILES: u8 = 0x02;
    pub const TILE: u8 = 0x03;
    pub const PLAYER_NAME: u8 = 0x04;
    pub const PLAYER_FLAGS: u8 = 0x05;
    pub const PLAYER_SHOUTED: u8 = 0x06;
    pub const SYNC: u8 = 0x07;
    pub const END: u8 = 0x08;
    pub const BAD_PLAYER_ID: u8 = 0x09;
    pub const CONVERSATION_ID: u8 = 0x0A;
    pub const BAD_CONVERSATION_ID: u8 = 0x0B;
    pub const LANGUAGE: u8 = 0x0C;
    pub const CONVERSATION_FULL: u8 = 0x0D;
}

/// Opcodes sent client-to-server.
pub mod c2s {
    pub const NEW_PLAYER: u8 = 0x80;
    pub const RECONNECT: u8 = 0x81;
    pub const KEEP_ALIVE: u8 = 0x83;
    pub const LEAVE: u8 = 0x84;
    pub const SEND_MESSAGE: u8 = 0x85;
    pub const START_TYPING: u8 = 0x86;
    pub const STOP_TYPING: u8 = 0x87;
    pub const MOVE_TILE: u8 = 0x88;
    pub const TURN: u8 = 0x89;
    pub const SHOUT: u8 = 0x8A;
    pub const SET_N_TILES: u8 = 0x8B;
    pub const NEW_PRIVATE_GAME: u8 = 0x8C;
    pub const JOIN_GAME: u8 = 0x8D;
    pub const SET_LANGUAGE: u8 = 0x8E;
}

/// Returns the human-readable name used in error messages like "The server
/// sent an invalid `<name>` command" (spec.md §7).
#[must_use]
pub fn s2c_opcode_name(opcode: u8) -> &'static str {
    match opcode {
        s2c::PLAYER_ID => "player_id",
        s2c::MESSAGE => "message",
        s2c::N_TILES => "n_tiles",
        s2c::TILE => "tile",
        s2c::PLAYER_NAME => "player_name",
        s2c::PLAYER_FLAGS => "player_flags",
        s2c::PLAYER_SHOUTED => "player_shouted",
        s2c::SYNC => "sync",
        s2c::END => "end",
        s2c::BAD_PLAYER_ID => "bad_player_id",
        s2c::CONVERSATION_ID => "conversation_id",
        s2c::BAD_CONVERSATION_ID => "bad_conversation_id",
        s2c::LANGUAGE => "language",
        s2c::CONVERSATION_FULL => "conversation_full",
        _ => "unknown",
    }
}

/// One field value passed to [`write_command`], mirroring the original's
/// `VsxProtoType` tagged varargs.
#[derive(Debug, Clone, Copy)]
pub enum Field<'a> {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I16(i16),
    Str(&'a str),
    Blob(&'a [u8]),
}

impl Field<'_> {
    fn encoded_len(self) -> usize {
        match self {
            Field::U8(_) => 1,
            Field::U16(_) => 2,
            Field::U32(_) => 4,
            Field::U64(_) => 8,
            Field::I16(_) => 2,
            Field::Str(s) => s.len() + 1,
            Field::Blob(b) => b.len(),
        }
    }

    fn write_into(self, buf: &mut [u8]) {
        match self {
            Field::U8(v) => buf[0] = v,
            Field::U16(v) => buf[..2].copy_from_slice(&v.to_le_bytes()),
            Field::U32(v) => buf[..4].copy_from_slice(&v.to_le_bytes()),
            Field::U64(v) => buf[..8].copy_from_slice(&v.to_le_bytes()),
            Field::I16(v) => buf[..2].copy_from_slice(&v.to_le_bytes()),
            Field::Str(s) => {
                buf[..s.len()].copy_from_slice(s.as_bytes());
                buf[s.len()] = 0;
            }
            Field::Blob(b) => buf[..b.len()].copy_from_slice(b),
        }
    }
}

/// Writes a complete outbound frame — header, opcode, and fields — into
/// `buf`. Returns the number of bytes written, or [`BufferTooSmall`] if
/// `buf` cannot hold the encoded command.
///
/// A `Field::Blob` must be the last field, as its length is implicit
/// (it runs to the end of the payload).
pub fn write_command(buf: &mut [u8], opcode: u8, fields: &[Field<'_>]) -> Result<usize, BufferTooSmall> {
    let fields_len: usize = fields.iter().map(|f| f.encoded_len()).sum();
    let payload_len = 1 + fields_len;
    let header_len = header_len_for_payload(payload_len);
    let total_len = header_len + payload_len;

    if buf.len() < total_len {
        return Err(BufferTooSmall);
    }

    write_frame_header(&mut buf[..header_len], OPCODE_BINARY, payload_len);
    buf[header_len] = opcode;

    let mut pos = header_len + 1;
    for field in fields {
        let len = field.encoded_len();
        field.write_into(&mut buf[pos..pos + len]);
        pos += len;
    }

    Ok(total_len)
}

/// Sequentially decodes typed fields out of an already-extracted frame
/// payload (spec.md §4.2).
pub struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CommandError> {
        if self.data.len() - self.pos < len {
            return Err(CommandError::Truncated);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, CommandError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, CommandError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    #[allow(dead_code)]
    pub fn u32(&mut self) -> Result<u32, CommandError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64, CommandError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn i16(&mut self) -> Result<i16, CommandError> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    /// Reads a NUL-terminated, UTF-8-validated string.
    pub fn string(&mut self) -> Result<&'a str, CommandError> {
        let rest = &self.data[self.pos..];
        let nul_pos = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(CommandError::UnterminatedString)?;
        let bytes = &rest[..nul_pos];
        let s = std::str::from_utf8(bytes).map_err(|_| CommandError::InvalidUtf8)?;
        self.pos += nul_pos + 1;
        Ok(s)
    }

    /// Consumes the remainder of the payload as a raw blob. Must be the
    /// final field read.
    #[allow(dead_code)]
    pub fn blob(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    /// Asserts no bytes remain; call after the expected field sequence.
    pub fn finish(self) -> Result<(), CommandError> {
        if self.pos == self.data.len() {
            Ok(())
        } else {
            Err(CommandError::TrailingData)
        }
    }
}

/// Server-to-client command vocabulary (spec.md §3.2).
#[derive(Debug, Clone, PartialEq)]
pub enum ServerCommand {
    PlayerId { person_id: PersonId, self_num: PlayerNum },
    Message { sender: PlayerNum, text: String },
    NTiles { total: u8 },
    Tile {
        num: u8,
        x: i16,
        y: i16,
        letter: String,
        last_player: u8,
    },
    PlayerName { num: PlayerNum, name: String },
    PlayerFlags { num: PlayerNum, flags: u8 },
    PlayerShouted { num: PlayerNum },
    Sync,
    End,
    BadPlayerId,
    ConversationId { id: ConversationId },
    BadConversationId,
    Language { code: String },
    ConversationFull,
}

impl ServerCommand {
    /// Encodes this command as a complete outbound frame.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, BufferTooSmall> {
        use s2c::*;
        match self {
            ServerCommand::PlayerId { person_id, self_num } => {
                write_command(buf, PLAYER_ID, &[Field::U64(person_id.0), Field::U8(*self_num)])
            }
            ServerCommand::Message { sender, text } => {
                write_command(buf, MESSAGE, &[Field::U8(*sender), Field::Str(text)])
            }
            ServerCommand::NTiles { total } => write_command(buf, N_TILES, &[Field::U8(*total)]),
            ServerCommand::Tile { num, x, y, letter, last_player } => write_command(
                buf,
                TILE,
                &[
                    Field::U8(*num),
                    Field::I16(*x),
                    Field::I16(*y),
                    Field::Str(letter),
                    Field::U8(*last_player),
                ],
            ),
            ServerCommand::PlayerName { num, name } => {
                write_command(buf, PLAYER_NAME, &[Field::U8(*num), Field::Str(name)])
            }
            ServerCommand::PlayerFlags { num, flags } => {
                write_command(buf, PLAYER_FLAGS, &[Field::U8(*num), Field::U8(*flags)])
            }
            ServerCommand::PlayerShouted { num } => {
                write_command(buf, PLAYER_SHOUTED, &[Field::U8(*num)])
            }
            ServerCommand::Sync => write_command(buf, SYNC, &[]),
            ServerCommand::End => write_command(buf, END, &[]),
            ServerCommand::BadPlayerId => write_command(buf, BAD_PLAYER_ID, &[]),
            ServerCommand::ConversationId { id } => {
                write_command(buf, CONVERSATION_ID, &[Field::U64(id.0)])
            }
            ServerCommand::BadConversationId => write_command(buf, BAD_CONVERSATION_ID, &[]),
            ServerCommand::Language { code } => write_command(buf, LANGUAGE, &[Field::Str(code)]),
            ServerCommand::ConversationFull => write_command(buf, CONVERSATION_FULL, &[]),
        }
    }

    /// Decodes a command from an already-extracted frame payload.
    pub fn decode(payload: &[u8]) -> Result<Self, CommandError> {
        let opcode = *payload.first().ok_or(CommandError::Truncated)?;
        let mut r = PayloadReader::new(&payload[1..]);
        let cmd = match opcode {
            s2c::PLAYER_ID => {
                let person_id = PersonId(r.u64()?);
                let self_num = r.u8()?;
                r.finish()?;
                ServerCommand::PlayerId { person_id, self_num }
            }
            s2c::MESSAGE => {
                let sender = r.u8()?;
                let text = r.string()?.to_string();
                r.finish()?;
                ServerCommand::Message { sender, text }
            }
            s2c::N_TILES => {
                let total = r.u8()?;
                r.finish()?;
                ServerCommand::NTiles { total }
            }
            s2c::TILE => {
                let num = r.u8()?;
                let x = r.i16()?;
                let y = r.i16()?;
                let letter = r.string()?.to_string();
                let last_player = r.u8()?;
                r.finish()?;
                ServerCommand::Tile { num, x, y, letter, last_player }
            }
            s2c::PLAYER_NAME => {
                let num = r.u8()?;
                let name = r.string()?.to_string();
                r.finish()?;
                ServerCommand::PlayerName { num, name }
            }
            s2c::PLAYER_FLAGS => {
                let num = r.u8()?;
                let flags = r.u8()?;
                r.finish()?;
                ServerCommand::PlayerFlags { num, flags }
            }
            s2c::PLAYER_SHOUTED => {
                let num = r.u8()?;
                r.finish()?;
                ServerCommand::PlayerShouted { num }
            }
            s2c::SYNC => {
                r.finish()?;
                ServerCommand::Sync
            }
            s2c::END => {
                r.finish()?;
                ServerCommand::End
            }
            s2c::BAD_PLAYER_ID => {
                r.finish()?;
                ServerCommand::BadPlayerId
            }
            s2c::CONVERSATION_ID => {
                let id = ConversationId(r.u64()?);
                r.finish()?;
                ServerCommand::ConversationId { id }
            }
            s2c::BAD_CONVERSATION_ID => {
                r.finish()?;
                ServerCommand::BadConversationId
            }
            s2c::LANGUAGE => {
                let code = r.string()?.to_string();
                r.finish()?;
                ServerCommand::Language { code }
            }
            s2c::CONVERSATION_FULL => {
                r.finish()?;
                ServerCommand::ConversationFull
            }
            other => return Err(CommandError::UnknownOpcode(other)),
        };
        Ok(cmd)
    }
}

/// Client-to-server command vocabulary (spec.md §3.2).
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    NewPlayer { room: String, name: String },
    Reconnect { person_id: PersonId, n_messages_received: u16 },
    KeepAlive,
    Leave,
    SendMessage { text: String },
    StartTyping,
    StopTyping,
    MoveTile { num: u8, x: i16, y: i16 },
    Turn,
    Shout,
    SetNTiles { n: u8 },
    NewPrivateGame { language: String, name: String },
    JoinGame { conversation_id: ConversationId, name: String },
    SetLanguage { code: String },
}

impl ClientCommand {
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, BufferTooSmall> {
        use c2s::*;
        match self {
            ClientCommand::NewPlayer { room, name } => {
                write_command(buf, NEW_PLAYER, &[Field::Str(room), Field::Str(name)])
            }
            ClientCommand::Reconnect { person_id, n_messages_received } => write_command(
                buf,
                RECONNECT,
                &[Field::U64(person_id.0), Field::U16(*n_messages_received)],
            ),
            ClientCommand::KeepAlive => write_command(buf, KEEP_ALIVE, &[]),
            ClientCommand::Leave => write_command(buf, LEAVE, &[]),
            ClientCommand::SendMessage { text } => {
                write_command(buf, SEND_MESSAGE, &[Field::Str(text)])
            }
            ClientCommand::StartTyping => write_command(buf, START_TYPING, &[]),
            ClientCommand::StopTyping => write_command(buf, STOP_TYPING, &[]),
            ClientCommand::MoveTile { num, x, y } => {
                write_command(buf, MOVE_TILE, &[Field::U8(*num), Field::I16(*x), Field::I16(*y)])
            }
            ClientCommand::Turn => write_command(buf, TURN, &[]),
            ClientCommand::Shout => write_command(buf, SHOUT, &[]),
            ClientCommand::SetNTiles { n } => write_command(buf, SET_N_TILES, &[Field::U8(*n)]),
            ClientCommand::NewPrivateGame { language, name } => {
                write_command(buf, NEW_PRIVATE_GAME, &[Field::Str(language), Field::Str(name)])
            }
            ClientCommand::JoinGame { conversation_id, name } => write_command(
                buf,
                JOIN_GAME,
                &[Field::U64(conversation_id.0), Field::Str(name)],
            ),
            ClientCommand::SetLanguage { code } => {
                write_command(buf, SET_LANGUAGE, &[Field::Str(code)])
            }
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self, CommandError> {
        let opcode = *payload.first().ok_or(CommandError::Truncated)?;
        let mut r = PayloadReader::new(&payload[1..]);
        let cmd = match opcode {
            c2s::NEW_PLAYER => {
                let room = r.string()?.to_string();
                let name = r.string()?.to_string();
                r.finish()?;
                ClientCommand::NewPlayer { room, name }
            }
            c2s::RECONNECT => {
                let person_id = PersonId(r.u64()?);
                let n_messages_received = r.u16()?;
                r.finish()?;
                ClientCommand::Reconnect { person_id, n_messages_received }
            }
            c2s::KEEP_ALIVE => {
                r.finish()?;
                ClientCommand::KeepAlive
            }
            c2s::LEAVE => {
                r.finish()?;
                ClientCommand::Leave
            }
            c2s::SEND_MESSAGE => {
                let text = r.string()?.to_string();
                r.finish()?;
                ClientCommand::SendMessage { text }
            }
            c2s::START_TYPING => {
                r.finish()?;
                ClientCommand::StartTyping
            }
            c2s::STOP_TYPING => {
                r.finish()?;
                ClientCommand::StopTyping
            }
            c2s::MOVE_TILE => {
                let num = r.u8()?;
                let x = r.i16()?;
                let y = r.i16()?;
                r.finish()?;
                ClientCommand::MoveTile { num, x, y }
            }
            c2s::TURN => {
                r.finish()?;
                ClientCommand::Turn
            }
            c2s::SHOUT => {
                r.finish()?;
                ClientCommand::Shout
            }
            c2s::SET_N_TILES => {
                let n = r.u8()?;
                r.finish()?;
                ClientCommand::SetNTiles { n }
            }
            c2s::NEW_PRIVATE_GAME => {
                let language = r.string()?.to_string();
                let name = r.string()?.to_string();
                r.finish()?;
                ClientCommand::NewPrivateGame { language, name }
            }
            c2s::JOIN_GAME => {
                let conversation_id = ConversationId(r.u64()?);
                let name = r.string()?.to_string();
                r.finish()?;
                ClientCommand::JoinGame { conversation_id, name }
            }
            c2s::SET_LANGUAGE => {
                let code = r.string()?.to_string();
                r.finish()?;
                ClientCommand::SetLanguage { code }
            }
            other => return Err(CommandError::UnknownOpcode(other)),
        };
        Ok(cmd)
    }
}

/// Convenience constant mirroring the original's `last_player == -1`
/// ("unowned") sentinel, re-exported here for callers building [`ServerCommand::Tile`].
pub const UNOWNED_TILE: u8 = NO_PLAYER;

/// Renders a command-decode failure the way the server reports a
/// misbehaving peer (spec.md §7's "Client sent ..." contract list).
/// `opcode` is the first payload byte the caller peeked before calling
/// [`ClientCommand::decode`] — these strings are test contracts, do not
/// reword them.
#[must_use]
pub fn describe_client_command_violation(opcode: u8, err: &CommandError) -> String {
    if let CommandError::UnknownOpcode(op) = err {
        return format!("Client sent an unknown message ID (0x{op:x})");
    }
    if opcode == c2s::NEW_PLAYER {
        return "Invalid new player command received".to_string();
    }
    format!("Client sent a malformed command (0x{opcode:x}): {err}")
}

/// Renders a command-decode failure the way the client reports a
/// misbehaving server (spec.md §7's "The server sent an invalid `<name>`
/// command" pattern).
#[must_use]
pub fn describe_server_command_violation(opcode: u8) -> String {
    format!("The server sent an invalid {} command", s2c_opcode_name(opcode))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_server(cmd: ServerCommand) {
        let mut buf = [0u8; 1039];
        let len = cmd.encode(&mut buf).unwrap();
        // Strip the frame header back off before decoding, mirroring what
        // the frame layer would hand the command layer.
        let hlen = if buf[1] & 0x7F < 126 {
            2
        } else if buf[1] & 0x7F == 126 {
            4
        } else {
            10
        };
        let payload = &buf[hlen..len];
        let decoded = ServerCommand::decode(payload).unwrap();
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn roundtrip_all_server_commands() {
        roundtrip_server(ServerCommand::PlayerId { person_id: PersonId(42), self_num: 3 });
        roundtrip_server(ServerCommand::Message { sender: 1, text: "hi".into() });
        roundtrip_server(ServerCommand::NTiles { total: 100 });
        roundtrip_server(ServerCommand::Tile {
            num: 5,
            x: -10,
            y: 20,
            letter: "g".into(),
            last_player: NO_PLAYER,
        });
        roundtrip_server(ServerCommand::PlayerName { num: 0, name: "gustavo".into() });
        roundtrip_server(ServerCommand::PlayerFlags { num: 0, flags: 0b101 });
        roundtrip_server(ServerCommand::PlayerShouted { num: 2 });
        roundtrip_server(ServerCommand::Sync);
        roundtrip_server(ServerCommand::End);
        roundtrip_server(ServerCommand::BadPlayerId);
        roundtrip_server(ServerCommand::ConversationId { id: ConversationId(99) });
        roundtrip_server(ServerCommand::BadConversationId);
        roundtrip_server(ServerCommand::Language { code: "eo".into() });
        roundtrip_server(ServerCommand::ConversationFull);
    }

    fn roundtrip_client(cmd: ClientCommand) {
        let mut buf = [0u8; 1039];
        let len = cmd.encode(&mut buf).unwrap();
        let hlen = if buf[1] & 0x7F < 126 {
            2
        } else if buf[1] & 0x7F == 126 {
            4
        } else {
            10
        };
        let payload = &buf[hlen..len];
        let decoded = ClientCommand::decode(payload).unwrap();
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn roundtrip_all_client_commands() {
        roundtrip_client(ClientCommand::NewPlayer { room: "r".into(), name: "n".into() });
        roundtrip_client(ClientCommand::Reconnect {
            person_id: PersonId(7),
            n_messages_received: 2,
        });
        roundtrip_client(ClientCommand::KeepAlive);
        roundtrip_client(ClientCommand::Leave);
        roundtrip_client(ClientCommand::SendMessage { text: "hello".into() });
        roundtrip_client(ClientCommand::StartTyping);
        roundtrip_client(ClientCommand::StopTyping);
        roundtrip_client(ClientCommand::MoveTile { num: 1, x: 3, y: 4 });
        roundtrip_client(ClientCommand::Turn);
        roundtrip_client(ClientCommand::Shout);
        roundtrip_client(ClientCommand::SetNTiles { n: 50 });
        roundtrip_client(ClientCommand::NewPrivateGame { language: "eo".into(), name: "n".into() });
        roundtrip_client(ClientCommand::JoinGame {
            conversation_id: ConversationId(123),
            name: "n".into(),
        });
        roundtrip_client(ClientCommand::SetLanguage { code: "fr".into() });
    }

    #[test]
    fn missing_nul_terminator_fails() {
        let payload = [s2c::LANGUAGE, b'e', b'o'];
        let err = ServerCommand::decode(&payload).unwrap_err();
        assert_eq!(err, CommandError::UnterminatedString);
    }

    #[test]
    fn trailing_garbage_fails() {
        let mut buf = [0u8; 32];
        let len = ServerCommand::Sync.encode(&mut buf).unwrap();
        buf[len] = 0xFF;
        let hlen = 2;
        let payload = &buf[hlen..len + 1];
        let err = ServerCommand::decode(payload).unwrap_err();
        assert_eq!(err, CommandError::TrailingData);
    }

    #[test]
    fn invalid_utf8_string_fails() {
        let payload = [s2c::LANGUAGE, 0xFF, 0x00];
        let err = ServerCommand::decode(&payload).unwrap_err();
        assert_eq!(err, CommandError::InvalidUtf8);
    }

    #[test]
    fn example_scenario_new_player_frame() {
        // spec.md §8 scenario 1: `82 17 80 "test_room\0test_player\0"`
        let cmd = ClientCommand::NewPlayer {
            room: "test_room".into(),
            name: "test_player".into(),
        };
        let mut buf = [0u8; 64];
        let len = cmd.encode(&mut buf).unwrap();
        assert_eq!(&buf[..2], &[0x82, 0x17]);
        assert_eq!(len, 2 + 0x17);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    // Strings must never contain an embedded NUL: that byte is the wire
    // terminator (spec.md §3.2), so a generated payload containing one
    // isn't a valid command in the first place.
    fn safe_string() -> impl Strategy<Value = String> {
        prop::collection::vec(any::<char>().prop_filter("no NUL", |c| *c != '\0'), 0..24)
            .prop_map(|chars| chars.into_iter().collect())
    }

    fn arb_server_command() -> impl Strategy<Value = ServerCommand> {
        prop_oneof![
            (any::<u64>(), any::<u8>())
                .prop_map(|(id, n)| ServerCommand::PlayerId { person_id: PersonId(id), self_num: n }),
            (any::<u8>(), safe_string()).prop_map(|(s, t)| ServerCommand::Message { sender: s, text: t }),
            any::<u8>().prop_map(|total| ServerCommand::NTiles { total }),
            (any::<u8>(), any::<i16>(), any::<i16>(), safe_string(), any::<u8>()).prop_map(
                |(num, x, y, letter, last_player)| ServerCommand::Tile { num, x, y, letter, last_player }
            ),
            (any::<u8>(), safe_string()).prop_map(|(n, name)| ServerCommand::PlayerName { num: n, name }),
            (any::<u8>(), any::<u8>())
                .prop_map(|(n, flags)| ServerCommand::PlayerFlags { num: n, flags }),
            any::<u8>().prop_map(|n| ServerCommand::PlayerShouted { num: n }),
            Just(ServerCommand::Sync),
            Just(ServerCommand::End),
            Just(ServerCommand::BadPlayerId),
            any::<u64>().prop_map(|id| ServerCommand::ConversationId { id: ConversationId(id) }),
            Just(ServerCommand::BadConversationId),
            safe_string().prop_map(|code| ServerCommand::Language { code }),
            Just(ServerCommand::ConversationFull),
        ]
    }

    fn arb_client_command() -> impl Strategy<Value = ClientCommand> {
        prop_oneof![
            (safe_string(), safe_string()).prop_map(|(room, name)| ClientCommand::NewPlayer { room, name }),
            (any::<u64>(), any::<u16>()).prop_map(|(id, n)| ClientCommand::Reconnect {
                person_id: PersonId(id),
                n_messages_received: n,
            }),
            Just(ClientCommand::KeepAlive),
            Just(ClientCommand::Leave),
            safe_string().prop_map(|text| ClientCommand::SendMessage { text }),
            Just(ClientCommand::StartTyping),
            Just(ClientCommand::StopTyping),
            (any::<u8>(), any::<i16>(), any::<i16>())
                .prop_map(|(num, x, y)| ClientCommand::MoveTile { num, x, y }),
            Just(ClientCommand::Turn),
            Just(ClientCommand::Shout),
            any::<u8>().prop_map(|n| ClientCommand::SetNTiles { n }),
            (safe_string(), safe_string())
                .prop_map(|(language, name)| ClientCommand::NewPrivateGame { language, name }),
            (any::<u64>(), safe_string()).prop_map(|(id, name)| ClientCommand::JoinGame {
                conversation_id: ConversationId(id),
                name,
            }),
            safe_string().prop_map(|code| ClientCommand::SetLanguage { code }),
        ]
    }

    fn payload_after_header(buf: &[u8], len: usize) -> &[u8] {
        let hlen = if buf[1] & 0x7F < 126 {
            2
        } else if buf[1] & 0x7F == 126 {
            4
        } else {
            10
        };
        &buf[hlen..len]
    }

    proptest! {
        #[test]
        fn server_command_roundtrips(cmd in arb_server_command()) {
            let mut buf = [0u8; 1039];
            let len = cmd.encode(&mut buf).unwrap();
            let decoded = ServerCommand::decode(payload_after_header(&buf, len)).unwrap();
            prop_assert_eq!(decoded, cmd);
        }

        #[test]
        fn client_command_roundtrips(cmd in arb_client_command()) {
            let mut buf = [0u8; 1039];
            let len = cmd.encode(&mut buf).unwrap();
            let decoded = ClientCommand::decode(payload_after_header(&buf, len)).unwrap();
            prop_assert_eq!(decoded, cmd);
        }
    }
}
