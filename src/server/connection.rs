//! The server-side per-socket connection engine (spec.md §3.7, §4.4).
//!
//! A [`ServerConnection`] is sans-I/O: the surrounding accept loop
//! (`crate::server::listener`) owns the actual `TcpStream`, feeds inbound
//! bytes to [`ServerConnection::feed_bytes`], and repeatedly calls
//! [`ServerConnection::drain_one`] to get the next frame to write. The
//! connection never stores a `Conversation` itself — only the
//! [`ConversationId`]/[`PersonId`] handles — looking state up through the
//! registries on every access, per the arena+handle design in
//! `crate::game::conversation`.

use std::collections::VecDeque;
use std::net::SocketAddr;

use crate::game::{Clock, ConversationEvent, ConversationRegistry, PersonRegistry};
use crate::protocol::command::{describe_client_command_violation, s2c, ClientCommand, ServerCommand};
use crate::protocol::error::FrameError;
use crate::protocol::frame::{
    build_handshake_response, encode_control_frame, find_header_end, parse_websocket_key,
    FrameEvent, FrameParser, OPCODE_PONG,
};
use crate::protocol::name::normalize_name;
use crate::protocol::types::{ConversationId, PersonId};

use super::bitset::{PlayerBits, TileBits};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    ReadingWsHeaders,
    WritingData,
    Done,
}

/// Why the connection is winding down, tracked so [`ServerConnection::drain_one`]
/// knows to emit a `PENDING_ERROR`/`END` frame before reaching [`ConnState::Done`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Closing {
    /// A domain error the client already understands (spec.md §4.4): send
    /// the opcode, then stop.
    DomainError(u8),
    /// This connection's own player has left and every diff has drained:
    /// send `END`, then stop.
    Graceful,
    /// A framing/protocol violation with no opcode to report back;
    /// stop writing immediately.
    Abrupt,
}

/// Per-socket connection state (spec.md §3.7).
pub struct ServerConnection {
    state: ConnState,
    peer: SocketAddr,
    header_buf: Vec<u8>,
    handshake_done: bool,
    frame_parser: FrameParser,

    person_id: Option<PersonId>,
    conversation_id: Option<ConversationId>,
    player_num: Option<u8>,
    first_command_seen: bool,

    handshake_reply_pending: bool,
    handshake_response: String,
    pending_pong: Option<Vec<u8>>,
    player_id_pending: bool,
    conversation_id_pending: bool,
    n_tiles_pending: bool,
    language_pending: bool,
    dirty_players: PlayerBits,
    named_players: u8,
    pending_shouts: VecDeque<u8>,
    dirty_tiles: TileBits,
    message_num: u32,
    sync_pending: bool,

    closing: Option<Closing>,
    /// The literal spec.md §7 contract string explaining why `closing` was
    /// set, for logging and for the surrounding accept loop to surface.
    closing_reason: Option<String>,
    pub last_message_time: i64,

    /// Events this connection's own commands produced this tick, for the
    /// listener to fan out to every other connection following the same
    /// conversation (spec.md §9's event-bus split: the engine never talks
    /// to sibling connections directly).
    outbound_events: Vec<ConversationEvent>,
}

impl ServerConnection {
    #[must_use]
    pub fn new(peer: SocketAddr, now_us: i64) -> Self {
        Self {
            state: ConnState::ReadingWsHeaders,
            peer,
            header_buf: Vec::new(),
            handshake_done: false,
            frame_parser: FrameParser::new(),
            person_id: None,
            conversation_id: None,
            player_num: None,
            first_command_seen: false,
            handshake_reply_pending: false,
            handshake_response: String::new(),
            pending_pong: None,
            player_id_pending: false,
            conversation_id_pending: false,
            n_tiles_pending: false,
            language_pending: false,
            dirty_players: PlayerBits::default(),
            named_players: 0,
            pending_shouts: VecDeque::new(),
            dirty_tiles: TileBits::default(),
            message_num: 0,
            sync_pending: false,
            closing: None,
            closing_reason: None,
            last_message_time: now_us,
            outbound_events: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnState {
        self.state
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state == ConnState::Done
    }

    #[must_use]
    pub fn person_id(&self) -> Option<PersonId> {
        self.person_id
    }

    #[must_use]
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.conversation_id
    }

    /// The literal spec.md §7 contract string for why this connection is
    /// closing, if it was terminated by a protocol violation.
    #[must_use]
    pub fn closing_reason(&self) -> Option<&str> {
        self.closing_reason.as_deref()
    }

    /// Ends the connection abruptly with `reason` as the logged,
    /// test-contract-exact violation string (spec.md §7).
    fn terminate(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(peer = %self.peer, reason = %reason, "closing connection after a protocol violation");
        self.closing_reason = Some(reason);
        self.closing = Some(Closing::Abrupt);
    }

    /// Drains the events this connection's own commands produced since
    /// the last call, for the listener to fan out to sibling connections.
    pub fn take_events(&mut self) -> Vec<ConversationEvent> {
        std::mem::take(&mut self.outbound_events)
    }

    /// Feeds freshly read bytes. Processes the WebSocket handshake first,
    /// then any complete frames/commands. On a fatal framing error the
    /// connection starts closing (spec.md §4.1 "Failure semantics").
    pub fn feed_bytes(
        &mut self,
        data: &[u8],
        now_us: i64,
        conversations: &mut ConversationRegistry,
        persons: &mut PersonRegistry,
        clock: &dyn Clock,
    ) {
        if self.closing.is_some() {
            return;
        }
        self.header_buf.extend_from_slice(data);
        self.last_message_time = now_us;

        if !self.handshake_done {
            let Some(end) = find_header_end(&self.header_buf) else {
                return;
            };
            let key = parse_websocket_key(&self.header_buf[..end]).unwrap_or_default();
            self.header_buf.drain(..end);
            self.handshake_done = true;
            self.handshake_reply_pending = true;
            self.state = ConnState::WritingData;
            self.handshake_response = build_handshake_response(&key);
        }

        loop {
            let outcome = self.frame_parser.parse_one(&self.header_buf);
            match outcome {
                Ok(Some((consumed, event))) => {
                    self.header_buf.drain(..consumed);
                    match event {
                        Some(FrameEvent::Binary(payload)) => {
                            self.handle_payload(&payload, now_us, conversations, persons, clock);
                            if self.closing.is_some() {
                                return;
                            }
                        }
                        Some(FrameEvent::Ping(payload)) => {
                            self.pending_pong = Some(payload);
                        }
                        Some(FrameEvent::Pong | FrameEvent::Close) | None => {}
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    self.fail_transport(err);
                    return;
                }
            }
        }
    }

    fn fail_transport(&mut self, err: FrameError) {
        self.terminate(err.as_client_violation());
    }

    fn handle_payload(
        &mut self,
        payload: &[u8],
        now_us: i64,
        conversations: &mut ConversationRegistry,
        persons: &mut PersonRegistry,
        clock: &dyn Clock,
    ) {
        let cmd = match ClientCommand::decode(payload) {
            Ok(cmd) => cmd,
            Err(err) => {
                let opcode = payload.first().copied().unwrap_or(0xFF);
                self.terminate(describe_client_command_violation(opcode, &err));
                return;
            }
        };

        let is_identity_command = matches!(
            cmd,
            ClientCommand::NewPlayer { .. }
                | ClientCommand::Reconnect { .. }
                | ClientCommand::NewPrivateGame { .. }
                | ClientCommand::JoinGame { .. }
        );

        if is_identity_command {
            if self.first_command_seen {
                self.terminate("Client sent a new player request but already specified a player");
                return;
            }
            self.first_command_seen = true;
        } else if self.person_id.is_none() {
            self.terminate("Client sent a command without a person");
            return;
        }

        match cmd {
            ClientCommand::NewPlayer { room, name } => {
                let Some(room) = normalize_name(&room) else {
                    self.terminate("Client sent an invalid room name");
                    return;
                };
                let Some(name) = normalize_name(&name) else {
                    self.terminate("Client sent an invalid player name");
                    return;
                };
                let tile_set = crate::game::default_tile_set();
                let conv_id = conversations.get_or_create_pending(&room, self.peer, tile_set);
                self.bind_new_player(conv_id, name, now_us, conversations, persons);
            }
            ClientCommand::NewPrivateGame { language, name } => {
                let Some(name) = normalize_name(&name) else {
                    self.terminate("Client sent an invalid player name");
                    return;
                };
                let tile_set = crate::game::lookup_tile_set(&language).unwrap_or_else(crate::game::default_tile_set);
                let conv_id = conversations.create_private(self.peer, tile_set);
                self.bind_new_player(conv_id, name, now_us, conversations, persons);
            }
            ClientCommand::JoinGame { conversation_id, name } => {
                let Some(name) = normalize_name(&name) else {
                    self.terminate("Client sent an invalid player name");
                    return;
                };
                let Some(conv) = conversations.get(conversation_id) else {
                    self.closing = Some(Closing::DomainError(s2c::BAD_CONVERSATION_ID));
                    return;
                };
                if conv.is_full() {
                    self.closing = Some(Closing::DomainError(s2c::CONVERSATION_FULL));
                    return;
                }
                self.bind_new_player(conversation_id, name, now_us, conversations, persons);
            }
            ClientCommand::Reconnect { person_id, n_messages_received } => {
                let Some(person) = persons.get(person_id) else {
                    self.closing = Some(Closing::DomainError(s2c::BAD_PLAYER_ID));
                    return;
                };
                let conv_id = person.conversation_id;
                let player_num = person.player_num;
                let message_offset = person.message_offset;
                let available = conversations.get(conv_id).map_or(0, |c| c.messages().len() as u32);
                if u32::from(n_messages_received) > available {
                    self.terminate(format!(
                        "Client claimed to have received {n_messages_received} messages but only {available} are available"
                    ));
                    return;
                }
                if let Some(p) = persons.get_mut(person_id) {
                    p.touch(now_us);
                }
                if let Some(conv) = conversations.get_mut(conv_id) {
                    let events = conv.rejoin(player_num);
                    conversations.apply_events(conv_id, &events);
                    self.outbound_events.extend(events);
                }
                self.bind_existing(
                    person_id,
                    conv_id,
                    player_num,
                    message_offset + u32::from(n_messages_received),
                    conversations,
                );
            }
            ClientCommand::KeepAlive => {}
            ClientCommand::Leave => {
                self.apply_leave(conversations);
                self.closing = Some(Closing::Graceful);
            }
            ClientCommand::SendMessage { text } => {
                if let (Some(conv_id), Some(num)) = (self.conversation_id, self.player_num) {
                    if let Some(conv) = conversations.get_mut(conv_id) {
                        let events = conv.send_message(num, &text);
                        conversations.apply_events(conv_id, &events);
                        self.outbound_events.extend(events);
                    }
                }
            }
            ClientCommand::StartTyping | ClientCommand::StopTyping => {
                if let (Some(conv_id), Some(num)) = (self.conversation_id, self.player_num) {
                    if let Some(conv) = conversations.get_mut(conv_id) {
                        let typing = matches!(cmd, ClientCommand::StartTyping);
                        let events = conv.set_typing(num, typing);
                        self.outbound_events.extend(events);
                    }
                }
            }
            ClientCommand::MoveTile { num, x, y } => {
                if let (Some(conv_id), Some(mover)) = (self.conversation_id, self.player_num) {
                    if let Some(conv) = conversations.get_mut(conv_id) {
                        if let Ok(events) = conv.move_tile(mover, num, x, y) {
                            self.outbound_events.extend(events);
                        }
                    }
                }
            }
            ClientCommand::Turn => {
                if let (Some(conv_id), Some(num)) = (self.conversation_id, self.player_num) {
                    if let Some(conv) = conversations.get_mut(conv_id) {
                        if let Ok(events) = conv.turn(num, clock) {
                            conversations.apply_events(conv_id, &events);
                            self.outbound_events.extend(events);
                        }
                    }
                }
            }
            ClientCommand::Shout => {
                if let (Some(conv_id), Some(num)) = (self.conversation_id, self.player_num) {
                    if let Some(conv) = conversations.get_mut(conv_id) {
                        let events = conv.shout(num, clock);
                        self.outbound_events.extend(events);
                    }
                }
            }
            ClientCommand::SetNTiles { n } => {
                if let Some(conv_id) = self.conversation_id {
                    if let Some(conv) = conversations.get_mut(conv_id) {
                        let events = conv.set_n_tiles(n);
                        self.outbound_events.extend(events);
                    }
                }
            }
            ClientCommand::SetLanguage { code } => {
                if let (Some(conv_id), Some(num)) = (self.conversation_id, self.player_num) {
                    if let Some(tile_set) = crate::game::lookup_tile_set(&code) {
                        if let Some(conv) = conversations.get_mut(conv_id) {
                            let events = conv.set_language(num, tile_set);
                            if events.is_empty() {
                                self.sync_pending = true;
                            } else {
                                self.outbound_events.extend(events);
                            }
                        }
                    } else {
                        self.sync_pending = true;
                    }
                }
            }
        }
    }

    fn bind_new_player(
        &mut self,
        conv_id: ConversationId,
        name: String,
        now_us: i64,
        conversations: &mut ConversationRegistry,
        persons: &mut PersonRegistry,
    ) {
        let Some(conv) = conversations.get_mut(conv_id) else {
            self.closing = Some(Closing::DomainError(s2c::BAD_CONVERSATION_ID));
            return;
        };
        let Some((num, events)) = conv.join(name) else {
            self.closing = Some(Closing::DomainError(s2c::CONVERSATION_FULL));
            return;
        };
        conversations.apply_events(conv_id, &events);
        self.outbound_events.extend(events);
        let message_offset = conversations.get(conv_id).map_or(0, |c| c.messages().len() as u32);
        let person_id = persons.create(self.peer, conv_id, num, message_offset, now_us);
        self.bind_existing(person_id, conv_id, num, message_offset, conversations);
    }

    fn bind_existing(
        &mut self,
        person_id: PersonId,
        conv_id: ConversationId,
        player_num: u8,
        message_num: u32,
        conversations: &ConversationRegistry,
    ) {
        self.person_id = Some(person_id);
        self.conversation_id = Some(conv_id);
        self.player_num = Some(player_num);
        self.message_num = message_num;

        self.player_id_pending = true;
        self.conversation_id_pending = true;
        self.n_tiles_pending = true;
        self.language_pending = true;
        self.named_players = 0;
        self.dirty_players = PlayerBits::default();
        self.dirty_tiles = TileBits::default();
        self.sync_pending = true;

        if let Some(conv) = conversations.get(conv_id) {
            self.dirty_players.set_all_below(conv.players().len() as u8);
            self.dirty_tiles.set_all_below(conv.n_tiles_in_play());
        }
    }

    fn apply_leave(&mut self, conversations: &mut ConversationRegistry) {
        if let (Some(conv_id), Some(num)) = (self.conversation_id, self.player_num) {
            if let Some(conv) = conversations.get_mut(conv_id) {
                let events = conv.leave(num);
                conversations.apply_events(conv_id, &events);
                self.outbound_events.extend(events);
            }
        }
    }

    /// Called by the accept loop when this connection's person has gone
    /// silent (spec.md §4.6 silence-GC).
    pub fn force_leave(&mut self, conversations: &mut ConversationRegistry) {
        self.apply_leave(conversations);
        self.closing = Some(Closing::Abrupt);
    }

    /// Called by the accept loop when the peer's socket reports a clean EOF
    /// (as opposed to a read/write error). Classifies the disconnect against
    /// spec.md §7's three literal "Client closed the connection ..."
    /// contracts, in order of how far the connection had progressed.
    pub fn peer_closed(&mut self, conversations: &mut ConversationRegistry) {
        self.apply_leave(conversations);
        let reason = if !self.handshake_done {
            Some("Client closed the connection before finishing WebSocket negotiation")
        } else if !self.header_buf.is_empty() || self.frame_parser.has_partial_message() {
            Some("Client closed the connection in the middle of a frame")
        } else if self.person_id.is_some() && !matches!(self.closing, Some(Closing::Graceful)) {
            Some("Client closed the connection before sending a LEAVE command")
        } else {
            None
        };
        if let Some(reason) = reason {
            tracing::debug!(peer = %self.peer, reason, "peer disconnected");
            self.closing_reason = Some(reason.to_string());
        }
        self.closing = Some(Closing::Abrupt);
    }

    /// Produces the next single frame to write, in the fixed priority
    /// order from spec.md §4.4, or `None` if nothing is owed right now.
    /// At most one frame is returned per call so the output buffer bound
    /// holds.
    pub fn drain_one(&mut self, conversations: &ConversationRegistry) -> Option<Vec<u8>> {
        if self.handshake_reply_pending {
            self.handshake_reply_pending = false;
            return Some(self.handshake_response.clone().into_bytes());
        }
        if let Some(payload) = self.pending_pong.take() {
            return Some(encode_control_frame(OPCODE_PONG, &payload));
        }

        let conv = self.conversation_id.and_then(|id| conversations.get(id));

        if self.player_id_pending {
            self.player_id_pending = false;
            if let Some(person_id) = self.person_id {
                return Some(self.encode(&ServerCommand::PlayerId {
                    person_id,
                    self_num: self.player_num.unwrap_or(0),
                }));
            }
        }
        if self.conversation_id_pending {
            self.conversation_id_pending = false;
            if let Some(id) = self.conversation_id {
                return Some(self.encode(&ServerCommand::ConversationId { id }));
            }
        }
        if self.n_tiles_pending {
            self.n_tiles_pending = false;
            if let Some(conv) = conv {
                return Some(self.encode(&ServerCommand::NTiles { total: conv.total_n_tiles() as u8 }));
            }
        }
        if self.language_pending {
            self.language_pending = false;
            if let Some(conv) = conv {
                return Some(self.encode(&ServerCommand::Language { code: conv.language_code().to_string() }));
            }
        }
        if let Some(conv) = conv {
            if (self.named_players as usize) < conv.players().len() {
                let num = self.named_players;
                self.named_players += 1;
                let name = conv.player(num).map(|p| p.name.clone()).unwrap_or_default();
                return Some(self.encode(&ServerCommand::PlayerName { num, name }));
            }
        }
        if let Some(num) = self.dirty_players.take_lowest() {
            if let Some(conv) = conv {
                let flags = conv.player(num).map_or(0, |p| p.flags.bits());
                return Some(self.encode(&ServerCommand::PlayerFlags { num, flags }));
            }
        }
        if let Some(num) = self.pending_shouts.pop_front() {
            return Some(self.encode(&ServerCommand::PlayerShouted { num }));
        }
        if let Some(num) = self.dirty_tiles.take_lowest() {
            if let Some(conv) = conv {
                if let Some(tile) = conv.tile(num) {
                    return Some(self.encode(&ServerCommand::Tile {
                        num,
                        x: tile.x,
                        y: tile.y,
                        letter: tile.letter.clone(),
                        last_player: tile.last_player,
                    }));
                }
            }
        }
        if let Some(conv) = conv {
            if (self.message_num as usize) < conv.messages().len() {
                let msg = &conv.messages()[self.message_num as usize];
                let sender = msg.player_num;
                let text = msg.text.clone();
                self.message_num += 1;
                return Some(self.encode(&ServerCommand::Message { sender, text }));
            }
        }

        // Priority order ends ...MESSAGE, END, SYNC, PENDING_ERROR (spec.md
        // §4.4 "Outbound scheduling").
        if matches!(self.closing, Some(Closing::Graceful)) {
            self.closing = None;
            self.state = ConnState::Done;
            return Some(self.encode(&ServerCommand::End));
        }

        if self.sync_pending {
            self.sync_pending = false;
            return Some(self.encode(&ServerCommand::Sync));
        }

        match self.closing {
            Some(Closing::DomainError(opcode)) => {
                self.closing = None;
                self.state = ConnState::Done;
                Some(self.encode_opcode_only(opcode))
            }
            Some(Closing::Abrupt) => {
                self.state = ConnState::Done;
                None
            }
            Some(Closing::Graceful) | None => None,
        }
    }

    fn encode(&self, cmd: &ServerCommand) -> Vec<u8> {
        let mut buf = [0u8; crate::protocol::types::MAX_PAYLOAD_SIZE + 16];
        let len = cmd.encode(&mut buf).expect("server command always fits the frame");
        buf[..len].to_vec()
    }

    fn encode_opcode_only(&self, opcode: u8) -> Vec<u8> {
        let cmd = match opcode {
            s2c::BAD_PLAYER_ID => ServerCommand::BadPlayerId,
            s2c::BAD_CONVERSATION_ID => ServerCommand::BadConversationId,
            s2c::CONVERSATION_FULL => ServerCommand::ConversationFull,
            _ => unreachable!("only identity-error opcodes are queued this way"),
        };
        self.encode(&cmd)
    }

    /// Marks this connection dirty in response to a conversation-level
    /// event (spec.md §4.4 "Outbound scheduling"); called by the listener
    /// for every connection following a conversation that just changed.
    pub fn notify(&mut self, event: crate::game::ConversationEvent) {
        use crate::game::ConversationEvent as E;
        match event {
            E::PlayerJoined { num } | E::PlayerFlagsChanged { num } => {
                self.dirty_players.set(num);
            }
            E::PlayerShouted { num } => self.pending_shouts.push_back(num),
            E::TileChanged { num } => self.dirty_tiles.set(num),
            E::NTilesChanged => self.n_tiles_pending = true,
            E::LanguageChanged => self.language_pending = true,
            E::MessageAdded { .. } | E::Started | E::Emptied => {}
        }
    }
}
