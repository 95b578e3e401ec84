//! The client connection engine (spec.md §4.3): a sans-I/O state machine
//! that turns configuration and inbound bytes into outbound bytes and
//! [`ClientEvent`]s. The embedder owns the actual socket; it feeds bytes in
//! via [`ClientEngine::feed_bytes`], drains bytes to write via
//! [`ClientEngine::drain_output`], and drives time with
//! [`ClientEngine::tick`].

use std::collections::VecDeque;

use crate::protocol::command::{describe_server_command_violation, ClientCommand, ServerCommand};
use crate::protocol::frame::{find_header_end, FrameEvent, FrameParser};
use crate::protocol::types::{utf8_safe_truncate, ConversationId, PersonId};
use crate::protocol::types::{MAX_MESSAGE_LENGTH, MAX_NAME_LENGTH};

use super::backoff::Backoff;
pub use super::backoff::STABLE_THRESHOLD_US;
use super::events::ClientEvent;

/// Keep-alive is sent after this many microseconds of write silence
/// (spec.md §4.3).
pub const KEEP_ALIVE_INTERVAL_US: i64 = 150_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    WaitingForConfiguration,
    WaitingForReconnect,
    Reconnecting,
    Running,
}

/// Write-once connection parameters (spec.md §4.3 "Configuration").
#[derive(Debug, Default, Clone)]
struct Identity {
    address: Option<String>,
    room: Option<String>,
    player_name: Option<String>,
    person_id: Option<PersonId>,
    conversation_id: Option<ConversationId>,
}

impl Identity {
    fn has_min_config(&self) -> bool {
        self.address.is_some()
    }
}

/// The client-side connection engine.
pub struct ClientEngine {
    state: ClientState,
    identity: Identity,
    running: bool,
    typing: bool,
    typing_dirty: bool,
    queued_moves: Vec<(u8, i16, i16)>,
    queued_messages: VecDeque<String>,
    next_message_num: u32,
    synced: bool,
    backoff: Backoff,
    next_retry_at_us: Option<i64>,
    stable_since_us: Option<i64>,
    last_write_at_us: i64,
    handshake_pending: bool,
    header_buf: Vec<u8>,
    frame_parser: FrameParser,
    events: VecDeque<ClientEvent>,
}

impl ClientEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ClientState::Disconnected,
            identity: Identity::default(),
            running: false,
            typing: false,
            typing_dirty: false,
            queued_moves: Vec::new(),
            queued_messages: VecDeque::new(),
            next_message_num: 0,
            synced: false,
            backoff: Backoff::new(),
            next_retry_at_us: None,
            stable_since_us: None,
            last_write_at_us: 0,
            handshake_pending: true,
            header_buf: Vec::new(),
            frame_parser: FrameParser::new(),
            events: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ClientState {
        self.state
    }

    // --- write-once configuration -----------------------------------

    pub fn set_address(&mut self, address: impl Into<String>, now_us: i64) {
        if self.identity.address.is_none() {
            self.identity.address = Some(address.into());
            self.reconsider_configuration(now_us);
        }
    }

    pub fn set_room(&mut self, room: impl Into<String>) {
        if self.identity.room.is_none() {
            self.identity.room = Some(room.into());
        }
    }

    pub fn set_player_name(&mut self, name: impl Into<String>) {
        if self.identity.player_name.is_none() {
            let name = name.into();
            let clipped = utf8_safe_truncate(&name, MAX_NAME_LENGTH).to_string();
            self.identity.player_name = Some(clipped);
        }
    }

    pub fn set_person_id(&mut self, id: PersonId) {
        if self.identity.person_id.is_none() {
            self.identity.person_id = Some(id);
        }
    }

    pub fn set_conversation_id(&mut self, id: ConversationId) {
        if self.identity.conversation_id.is_none() {
            self.identity.conversation_id = Some(id);
        }
    }

    /// Starts or stops the engine. Starting when configuration is already
    /// complete schedules an immediate first connect attempt; stopping
    /// leaves configuration untouched (only [`Self::reset`] clears it).
    pub fn set_running(&mut self, running: bool, now_us: i64) {
        if self.running == running {
            return;
        }
        self.running = running;
        self.events.push_back(ClientEvent::RunningStateChanged { running });
        if running {
            self.reconsider_configuration(now_us);
        } else {
            self.state = ClientState::Disconnected;
            self.next_retry_at_us = None;
            self.events.push_back(ClientEvent::PollChanged);
        }
    }

    fn reconsider_configuration(&mut self, now_us: i64) {
        if !self.running {
            return;
        }
        if self.identity.has_min_config() {
            if self.state == ClientState::WaitingForConfiguration || self.state == ClientState::Disconnected {
                self.state = ClientState::WaitingForReconnect;
                self.next_retry_at_us = Some(now_us);
                self.events.push_back(ClientEvent::PollChanged);
            }
        } else {
            self.state = ClientState::WaitingForConfiguration;
        }
    }

    /// Clears everything: configuration, queues, timers, and state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    // --- application-level intent -------------------------------------

    pub fn set_typing(&mut self, typing: bool) {
        if self.typing != typing {
            self.typing = typing;
            self.typing_dirty = true;
        }
    }

    /// Queues `(num, x, y)`, replacing any queued move for the same tile
    /// rather than appending (spec.md §4.3 "Input coalescing").
    pub fn move_tile(&mut self, num: u8, x: i16, y: i16) {
        if let Some(entry) = self.queued_moves.iter_mut().find(|(n, _, _)| *n == num) {
            entry.1 = x;
            entry.2 = y;
        } else {
            self.queued_moves.push((num, x, y));
        }
    }

    /// Queues a chat message (FIFO), clipped to [`MAX_MESSAGE_LENGTH`]
    /// bytes on a UTF-8 boundary, and resets typing to false.
    pub fn send_message(&mut self, text: &str) {
        let clipped = utf8_safe_truncate(text, MAX_MESSAGE_LENGTH).to_string();
        self.queued_messages.push_back(clipped);
        self.set_typing(false);
    }

    // --- transport-facing surface --------------------------------------

    /// Whether the embedder should open a fresh TCP connection right now.
    #[must_use]
    pub fn wants_connect(&self, now_us: i64) -> bool {
        self.state == ClientState::WaitingForReconnect
            && self.next_retry_at_us.is_some_and(|t| now_us >= t)
    }

    /// The embedder has successfully opened (and, if applicable, connected)
    /// a TCP socket. Returns the bytes to write first: the fixed WebSocket
    /// handshake request followed by the chosen greeting command.
    pub fn connection_opened(&mut self, now_us: i64) -> Vec<u8> {
        self.handshake_pending = true;
        self.header_buf.clear();
        self.frame_parser = FrameParser::new();
        self.synced = false;
        self.last_write_at_us = now_us;

        let mut out = Vec::from(crate::protocol::frame::CLIENT_HANDSHAKE_REQUEST);
        out.extend_from_slice(&self.encode_greeting());
        self.state = ClientState::Running;
        out
    }

    fn encode_greeting(&self) -> Vec<u8> {
        let name = self.identity.player_name.clone().unwrap_or_default();
        let cmd = if let Some(person_id) = self.identity.person_id {
            ClientCommand::Reconnect {
                person_id,
                n_messages_received: self.next_message_num.min(u32::from(u16::MAX)) as u16,
            }
        } else if let Some(conversation_id) = self.identity.conversation_id {
            ClientCommand::JoinGame { conversation_id, name }
        } else if let Some(room) = self.identity.room.clone() {
            ClientCommand::NewPlayer { room, name }
        } else {
            ClientCommand::NewPrivateGame { language: "eo".to_string(), name }
        };
        let mut buf = [0u8; crate::protocol::types::MAX_PAYLOAD_SIZE + 16];
        let len = cmd.encode(&mut buf).expect("greeting command always fits");
        buf[..len].to_vec()
    }

    /// Records a connection failure (refused connect, reset, or unexpected
    /// EOF) and schedules the next retry per the backoff schedule.
    pub fn connection_failed(&mut self, now_us: i64, message: impl Into<String>) {
        let was_stable = self
            .stable_since_us
            .is_some_and(|t| now_us - t >= STABLE_THRESHOLD_US);
        let delay = self.backoff.on_failure(was_stable);
        self.stable_since_us = None;
        self.synced = false;

        self.events.push_back(ClientEvent::Error {
            message: message.into(),
            reconnecting: self.running,
        });
        if self.running {
            self.state = ClientState::WaitingForReconnect;
            self.next_retry_at_us = Some(now_us + delay);
        } else {
            self.state = ClientState::Disconnected;
            self.next_retry_at_us = None;
        }
        self.events.push_back(ClientEvent::PollChanged);
    }

    /// Feeds freshly read bytes from the socket. `data` may contain a
    /// partial frame; call again once more bytes arrive.
    pub fn feed_bytes(&mut self, data: &[u8], now_us: i64) -> Result<(), String> {
        self.header_buf.extend_from_slice(data);

        if self.handshake_pending {
            match find_header_end(&self.header_buf) {
                Some(end) => {
                    self.header_buf.drain(..end);
                    self.handshake_pending = false;
                }
                None => return Ok(()),
            }
        }

        loop {
            let outcome = self
                .frame_parser
                .parse_one(&self.header_buf)
                .map_err(|e| e.as_server_violation())?;
            let Some((consumed, event)) = outcome else {
                break;
            };
            self.header_buf.drain(..consumed);
            match event {
                Some(FrameEvent::Binary(payload)) => {
                    self.handle_command(&payload, now_us)?;
                }
                Some(FrameEvent::Ping(_)) => {
                    // The server never pings; nothing to reply with here
                    // (the engine-level wire is one-directional for
                    // control frames in this direction).
                }
                Some(FrameEvent::Pong | FrameEvent::Close) | None => {}
            }
        }
        Ok(())
    }

    fn handle_command(&mut self, payload: &[u8], now_us: i64) -> Result<(), String> {
        let opcode = *payload.first().unwrap_or(&0xFF);
        let cmd = ServerCommand::decode(payload)
            .map_err(|_| describe_server_command_violation(opcode))?;
        let synced = self.synced;
        match cmd {
            ServerCommand::PlayerId { person_id, self_num } => {
                if self.identity.person_id.is_none() {
                    self.identity.person_id = Some(person_id);
                }
                self.stable_since_us = Some(now_us);
                self.backoff = Backoff::new();
                self.events.push_back(ClientEvent::Header { person_id, self_num, synced });
            }
            ServerCommand::ConversationId { id } => {
                if self.identity.conversation_id.is_none() {
                    self.identity.conversation_id = Some(id);
                }
                self.events.push_back(ClientEvent::ConversationId { id, synced });
            }
            ServerCommand::NTiles { total } => {
                self.events.push_back(ClientEvent::NTilesChanged { total, synced });
            }
            ServerCommand::Tile { num, x, y, letter, last_player } => {
                self.events.push_back(ClientEvent::TileChanged {
                    num,
                    x,
                    y,
                    letter,
                    last_player,
                    synced,
                });
            }
            ServerCommand::PlayerName { num, name } => {
                self.events.push_back(ClientEvent::PlayerNameChanged { num, name, synced });
            }
            ServerCommand::PlayerFlags { num, flags } => {
                self.events.push_back(ClientEvent::PlayerFlagsChanged { num, flags, synced });
            }
            ServerCommand::PlayerShouted { num } => {
                self.events.push_back(ClientEvent::PlayerShouted { num, synced });
            }
            ServerCommand::Message { sender, text } => {
                let message_num = self.next_message_num;
                self.next_message_num += 1;
                self.events.push_back(ClientEvent::Message { sender, message_num, text, synced });
            }
            ServerCommand::Language { code } => {
                self.events.push_back(ClientEvent::LanguageChanged { code, synced });
            }
            ServerCommand::Sync => {
                self.synced = true;
            }
            ServerCommand::End => {
                self.events.push_back(ClientEvent::End { synced });
            }
            ServerCommand::BadPlayerId => {
                self.give_up("The player ID no longer exists".to_string());
            }
            ServerCommand::BadConversationId => {
                self.give_up("The conversation ID no longer exists".to_string());
            }
            ServerCommand::ConversationFull => {
                self.give_up("The conversation is full".to_string());
            }
        }
        Ok(())
    }

    fn give_up(&mut self, message: String) {
        self.running = false;
        self.state = ClientState::Disconnected;
        self.next_retry_at_us = None;
        self.events.push_back(ClientEvent::Error { message, reconnecting: false });
        self.events.push_back(ClientEvent::RunningStateChanged { running: false });
    }

    #[must_use]
    pub fn next_wakeup_us(&self) -> Option<i64> {
        match self.state {
            ClientState::WaitingForReconnect => self.next_retry_at_us,
            ClientState::Running => Some(self.last_write_at_us + KEEP_ALIVE_INTERVAL_US),
            _ => None,
        }
    }

    /// Drains queued outgoing application data (moves, messages, typing
    /// state, keep-alive) into wire bytes, ready to write to the socket.
    pub fn drain_output(&mut self, now_us: i64) -> Vec<u8> {
        if self.state != ClientState::Running {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut buf = [0u8; crate::protocol::types::MAX_PAYLOAD_SIZE + 16];

        if self.typing_dirty {
            self.typing_dirty = false;
            let cmd = if self.typing { ClientCommand::StartTyping } else { ClientCommand::StopTyping };
            let len = cmd.encode(&mut buf).expect("typing command always fits");
            out.extend_from_slice(&buf[..len]);
        }

        for (num, x, y) in self.queued_moves.drain(..) {
            let len = ClientCommand::MoveTile { num, x, y }
                .encode(&mut buf)
                .expect("move_tile command always fits");
            out.extend_from_slice(&buf[..len]);
        }

        while let Some(text) = self.queued_messages.pop_front() {
            let len = ClientCommand::SendMessage { text }
                .encode(&mut buf)
                .expect("send_message command always fits");
            out.extend_from_slice(&buf[..len]);
        }

        if out.is_empty() && now_us - self.last_write_at_us >= KEEP_ALIVE_INTERVAL_US {
            let len = ClientCommand::KeepAlive.encode(&mut buf).expect("keep_alive always fits");
            out.extend_from_slice(&buf[..len]);
        }

        if !out.is_empty() {
            self.last_write_at_us = now_us;
        }
        out
    }

    /// Encodes an immediate command (turn, shout, set_n_tiles, set_language,
    /// leave) as a frame ready to write now, bypassing the drain queue.
    pub fn encode_now(&mut self, cmd: ClientCommand, now_us: i64) -> Vec<u8> {
        let mut buf = [0u8; crate::protocol::types::MAX_PAYLOAD_SIZE + 16];
        let len = cmd.encode(&mut buf).expect("immediate command always fits");
        self.last_write_at_us = now_us;
        buf[..len].to_vec()
    }

    /// Drains and returns every event raised since the last call.
    pub fn poll_events(&mut self) -> Vec<ClientEvent> {
        self.events.drain(..).collect()
    }
}

impl Default for ClientEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake_response(engine: &mut ClientEngine, now_us: i64) {
        let resp = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n";
        engine.feed_bytes(resp, now_us).unwrap();
    }

    #[test]
    fn waits_for_configuration_until_address_known() {
        let mut engine = ClientEngine::new();
        engine.set_running(true, 0);
        assert_eq!(engine.state(), ClientState::WaitingForConfiguration);
        engine.set_address("game.example:9000", 0);
        assert_eq!(engine.state(), ClientState::WaitingForReconnect);
        assert!(engine.wants_connect(0));
    }

    #[test]
    fn first_connect_is_immediate() {
        let mut engine = ClientEngine::new();
        engine.set_address("game.example:9000", 0);
        engine.set_room("lobby");
        engine.set_player_name("ana");
        engine.set_running(true, 1_000);
        assert_eq!(engine.next_wakeup_us(), Some(1_000));
    }

    #[test]
    fn greeting_prefers_person_id_then_conversation_then_room_then_private() {
        let mut engine = ClientEngine::new();
        engine.set_address("x", 0);
        engine.set_room("lobby");
        engine.set_player_name("ana");
        let bytes = engine.connection_opened(0);
        let frame_start = crate::protocol::frame::CLIENT_HANDSHAKE_REQUEST.len();
        assert_eq!(bytes[frame_start + 2], 0x80); // NEW_PLAYER opcode
    }

    #[test]
    fn move_tile_coalesces_by_num_preserving_first_slot_order() {
        let mut engine = ClientEngine::new();
        engine.set_address("x", 0);
        engine.set_player_name("ana");
        engine.connection_opened(0);

        engine.move_tile(0, 1, 2);
        engine.move_tile(1, 3, 4);
        engine.move_tile(0, 5, 6);

        let out = engine.drain_output(0);
        // Two MOVE_TILE frames: num=0 (x=5,y=6) first, then num=1 (x=3,y=4).
        let mut parser = FrameParser::new();
        let mut frames = Vec::new();
        let mut rest = &out[..];
        while let Some((consumed, Some(FrameEvent::Binary(payload)))) =
            parser.parse_one(rest).unwrap()
        {
            frames.push(ClientCommand::decode(&payload).unwrap());
            rest = &rest[consumed..];
        }
        assert_eq!(
            frames,
            vec![
                ClientCommand::MoveTile { num: 0, x: 5, y: 6 },
                ClientCommand::MoveTile { num: 1, x: 3, y: 4 },
            ]
        );
    }

    #[test]
    fn sending_a_message_resets_typing() {
        let mut engine = ClientEngine::new();
        engine.set_address("x", 0);
        engine.connection_opened(0);
        engine.set_typing(true);
        engine.send_message("hi");
        assert!(!engine.typing);
        assert!(engine.typing_dirty);
    }

    #[test]
    fn message_text_is_clipped_on_a_utf8_boundary() {
        let mut engine = ClientEngine::new();
        let long = "é".repeat(2000);
        engine.send_message(&long);
        let queued = engine.queued_messages.front().unwrap();
        assert!(queued.len() <= MAX_MESSAGE_LENGTH);
        assert!(std::str::from_utf8(queued.as_bytes()).is_ok());
    }

    #[test]
    fn player_id_marks_connection_stable_after_threshold() {
        let mut engine = ClientEngine::new();
        engine.set_address("x", 0);
        engine.set_running(true, 0);
        engine.connection_opened(0);
        handshake_response(&mut engine, 0);

        let mut buf = [0u8; 64];
        let len = ServerCommand::PlayerId { person_id: PersonId(7), self_num: 0 }
            .encode(&mut buf)
            .unwrap();
        engine.feed_bytes(&buf[..len], 0).unwrap();
        engine.poll_events();

        engine.connection_failed(20_000_000, "reset");
        // Stable for >=15s: backoff resets to 0, so the retry is immediate.
        assert_eq!(engine.next_wakeup_us(), Some(20_000_000));
    }

    #[test]
    fn repeated_failures_before_player_id_use_growing_backoff() {
        let mut engine = ClientEngine::new();
        engine.set_address("x", 0);
        engine.set_running(true, 0);

        engine.connection_failed(0, "refused");
        assert_eq!(engine.next_wakeup_us(), Some(16_000_000));

        engine.connection_failed(16_000_000, "refused");
        assert_eq!(engine.next_wakeup_us(), Some(16_000_000 + 32_000_000));
    }

    #[test]
    fn bad_player_id_stops_reconnecting() {
        let mut engine = ClientEngine::new();
        engine.set_address("x", 0);
        engine.set_running(true, 0);
        engine.connection_opened(0);
        handshake_response(&mut engine, 0);

        let mut buf = [0u8; 16];
        let len = ServerCommand::BadPlayerId.encode(&mut buf).unwrap();
        engine.feed_bytes(&buf[..len], 0).unwrap();

        let events = engine.poll_events();
        assert!(events.iter().any(|e| matches!(e, ClientEvent::Error { reconnecting: false, .. })));
        assert!(!engine.running);
        assert_eq!(engine.state(), ClientState::Disconnected);
    }

    #[test]
    fn keep_alive_sent_after_write_silence() {
        let mut engine = ClientEngine::new();
        engine.set_address("x", 0);
        engine.connection_opened(0);
        let out = engine.drain_output(KEEP_ALIVE_INTERVAL_US);
        assert!(!out.is_empty());
        let mut parser = FrameParser::new();
        let (_, event) = parser.parse_one(&out).unwrap().unwrap();
        match event.unwrap() {
            FrameEvent::Binary(payload) => {
                assert_eq!(ClientCommand::decode(&payload).unwrap(), ClientCommand::KeepAlive);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn reset_clears_configuration_and_state() {
        let mut engine = ClientEngine::new();
        engine.set_address("x", 0);
        engine.set_running(true, 0);
        engine.reset();
        assert_eq!(engine.state(), ClientState::Disconnected);
        assert!(!engine.running);
    }
}
