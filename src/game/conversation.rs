//! The conversation model (spec.md §3.5, §4.5): authoritative game state
//! shared by every connection following one game instance.
//!
//! A `Conversation` never talks to the network or to listeners directly —
//! mutating methods return a small batch of [`ConversationEvent`]s. The
//! caller (the server's connection manager, see `crate::server::listener`)
//! fans those events out to every connection currently following this
//! conversation's [`ConversationId`], setting the matching dirty bits. This
//! sidesteps the cyclic listener/connection reference problem spec.md §9
//! flags, per its own "arena + handle" recommendation.

use std::fmt;

use crate::protocol::types::{ConversationId, PlayerFlags, NO_PLAYER};
use crate::protocol::utf8_safe_truncate;

use super::clock::Clock;
use super::player::Player;
use super::tile::{Tile, TileSet};

/// Logical board size the original fixes tile placement against
/// (SPEC_FULL.md §3 "Board center").
const TILE_SIZE: i32 = 48;
const TILE_GAP: i32 = 2;
const STRIDE: i32 = TILE_SIZE + TILE_GAP;
const BOARD_CENTER_X: i32 = 300 - TILE_SIZE / 2;
const BOARD_CENTER_Y: i32 = 180 - TILE_SIZE / 2;

/// Window after a shout during which further shouts and turns are
/// suppressed (SPEC_FULL.md §3 "Shout timing", resolving spec.md §9's open
/// question).
pub const SHOUT_WINDOW_US: i64 = 3_000_000;

/// A conversation's lifecycle stage (spec.md §3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    AwaitingStart,
    InProgress,
}

/// One append-only chat log entry (spec.md §3.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub player_num: u8,
    pub text: String,
}

/// A change a mutating [`Conversation`] method made, for the caller to
/// fan out to following connections as dirty bits (spec.md §9
/// "dirty-bit coalescing vs event log" — note this carries *what* changed,
/// never *to what*, so a listener re-reads current state off the
/// conversation when it drains the bit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationEvent {
    PlayerJoined { num: u8 },
    PlayerFlagsChanged { num: u8 },
    PlayerShouted { num: u8 },
    TileChanged { num: u8 },
    NTilesChanged,
    LanguageChanged,
    MessageAdded { index: usize },
    /// Left `AwaitingStart` for `InProgress`; the registry moves the
    /// conversation from `pending` to `other` on this event (spec.md §4.6).
    Started,
    /// No connected player remains; the registry destroys the conversation
    /// on this event (spec.md §3.5 "Ownership").
    Emptied,
}

/// Returned by [`Conversation::move_tile`]: the literal test-contract
/// message from spec.md §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileNotInPlay;

impl fmt::Display for TileNotInPlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Player tried to move a tile that is not in play")
    }
}

impl std::error::Error for TileNotInPlay {}

/// Why a `TURN` command was rejected (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnError {
    NotYourTurn,
    ShoutActive,
}

/// Authoritative state for one game instance (spec.md §3.5).
pub struct Conversation {
    id: ConversationId,
    state: ConversationState,
    players: Vec<Player>,
    tiles: Vec<Tile>,
    tile_set_code: &'static str,
    messages: Vec<Message>,
    total_n_tiles: usize,
    n_tiles_in_play: usize,
    last_shout_time: Option<i64>,
}

impl Conversation {
    /// Creates a conversation over a freshly shuffled copy of `tile_set`'s
    /// deck (spec.md §4.5). Every tile starts at `(0, 0)`; positions are
    /// assigned only on `turn()`.
    #[must_use]
    pub fn new(id: ConversationId, tile_set: TileSet) -> Self {
        let mut tiles = tile_set.deck();
        shuffle_tiles(&mut tiles);
        let total_n_tiles = tiles.len();
        Self {
            id,
            state: ConversationState::AwaitingStart,
            players: Vec::new(),
            tiles,
            tile_set_code: tile_set.language_code,
            messages: Vec::new(),
            total_n_tiles,
            n_tiles_in_play: 0,
            last_shout_time: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> ConversationId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> ConversationState {
        self.state
    }

    #[must_use]
    pub fn players(&self) -> &[Player] {
        &self.players
    }

    #[must_use]
    pub fn player(&self, num: u8) -> Option<&Player> {
        self.players.get(num as usize)
    }

    #[must_use]
    pub fn tiles_in_play(&self) -> &[Tile] {
        &self.tiles[..self.n_tiles_in_play]
    }

    #[must_use]
    pub fn tile(&self, num: u8) -> Option<&Tile> {
        self.tiles.get(num as usize).filter(|_| (num as usize) < self.n_tiles_in_play)
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn total_n_tiles(&self) -> usize {
        self.total_n_tiles
    }

    #[must_use]
    pub fn n_tiles_in_play(&self) -> usize {
        self.n_tiles_in_play
    }

    #[must_use]
    pub fn language_code(&self) -> &'static str {
        self.tile_set_code
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.players.len() >= crate::protocol::types::MAX_PLAYERS
    }

    #[must_use]
    pub fn has_connected_players(&self) -> bool {
        self.players.iter().any(Player::is_connected)
    }

    #[must_use]
    pub fn is_shouting(&self, clock: &dyn Clock) -> bool {
        match self.last_shout_time {
            Some(t) => clock.now_us() - t < SHOUT_WINDOW_US,
            None => false,
        }
    }

    /// Adds a new player, returning its assigned `num` and change events.
    /// `None` if the conversation is already at [`crate::protocol::types::MAX_PLAYERS`].
    pub fn join(&mut self, name: String) -> Option<(u8, Vec<ConversationEvent>)> {
        if self.is_full() {
            return None;
        }
        let num = self.players.len() as u8;
        self.players.push(Player::new(num, name));
        let mut events = vec![ConversationEvent::PlayerJoined { num }];
        if self.is_full() && self.state == ConversationState::AwaitingStart {
            self.state = ConversationState::InProgress;
            events.push(ConversationEvent::Started);
        }
        Some((num, events))
    }

    /// `LEAVE`: marks `num` disconnected, transferring `NEXT_TURN` onward
    /// if it held it (spec.md §4.4).
    pub fn leave(&mut self, num: u8) -> Vec<ConversationEvent> {
        let Some(player) = self.players.get_mut(num as usize) else {
            return Vec::new();
        };
        if !player.is_connected() {
            return Vec::new();
        }
        let had_next_turn = player.has_next_turn();
        player.flags.remove(PlayerFlags::CONNECTED | PlayerFlags::TYPING | PlayerFlags::NEXT_TURN);
        let mut events = vec![ConversationEvent::PlayerFlagsChanged { num }];

        if had_next_turn && self.n_tiles_in_play < self.total_n_tiles {
            events.extend(self.advance_next_turn(num as usize));
        }

        if !self.has_connected_players() {
            events.push(ConversationEvent::Emptied);
        }
        events
    }

    /// `RECONNECT`: re-marks a previously-disconnected player as connected.
    /// No-op if the player was never marked disconnected (e.g. a
    /// reconnect race that lost to a keep-alive).
    pub fn rejoin(&mut self, num: u8) -> Vec<ConversationEvent> {
        let Some(player) = self.players.get_mut(num as usize) else {
            return Vec::new();
        };
        if player.is_connected() {
            return Vec::new();
        }
        player.flags.insert(PlayerFlags::CONNECTED);
        vec![ConversationEvent::PlayerFlagsChanged { num }]
    }

    /// `SEND_MESSAGE`: appends a log entry, clipping at
    /// [`crate::protocol::types::MAX_MESSAGE_LENGTH`] bytes, and clears typing.
    pub fn send_message(&mut self, num: u8, text: &str) -> Vec<ConversationEvent> {
        let clipped = utf8_safe_truncate(text, crate::protocol::types::MAX_MESSAGE_LENGTH);
        let index = self.messages.len();
        self.messages.push(Message { player_num: num, text: clipped.to_string() });
        let mut events = vec![ConversationEvent::MessageAdded { index }];
        events.extend(self.set_typing(num, false));
        events
    }

    /// `START_TYPING`/`STOP_TYPING`: no-op if the player has left.
    pub fn set_typing(&mut self, num: u8, typing: bool) -> Vec<ConversationEvent> {
        let Some(player) = self.players.get_mut(num as usize) else {
            return Vec::new();
        };
        if !player.is_connected() {
            return Vec::new();
        }
        let was_typing = player.flags.contains(PlayerFlags::TYPING);
        if was_typing == typing {
            return Vec::new();
        }
        player.flags.set(PlayerFlags::TYPING, typing);
        vec![ConversationEvent::PlayerFlagsChanged { num }]
    }

    /// `MOVE_TILE`: the tile must already be in play.
    pub fn move_tile(&mut self, mover: u8, tile_num: u8, x: i16, y: i16) -> Result<Vec<ConversationEvent>, TileNotInPlay> {
        if (tile_num as usize) >= self.n_tiles_in_play {
            return Err(TileNotInPlay);
        }
        let tile = &mut self.tiles[tile_num as usize];
        tile.x = x;
        tile.y = y;
        tile.last_player = mover;
        Ok(vec![ConversationEvent::TileChanged { num: tile_num }])
    }

    /// `TURN`: draws the next tile from the deck for `num`, placing it at
    /// a collision-free location (spec.md §4.4, §4.5).
    pub fn turn(&mut self, num: u8, clock: &dyn Clock) -> Result<Vec<ConversationEvent>, TurnError> {
        if self.is_shouting(clock) {
            return Err(TurnError::ShoutActive);
        }
        let first_turn = self.n_tiles_in_play == 0;
        if !first_turn {
            let has_turn = self.players.get(num as usize).is_some_and(Player::has_next_turn);
            if !has_turn {
                return Err(TurnError::NotYourTurn);
            }
        } else {
            let player_exists = self.players.get(num as usize).is_some();
            if !player_exists {
                return Err(TurnError::NotYourTurn);
            }
        }

        if self.n_tiles_in_play >= self.total_n_tiles {
            return Err(TurnError::NotYourTurn);
        }

        let (x, y) = self.find_free_location();
        let tile_num = self.n_tiles_in_play;
        {
            let tile = &mut self.tiles[tile_num];
            tile.x = x;
            tile.y = y;
        }
        self.n_tiles_in_play += 1;

        let mut events = vec![ConversationEvent::TileChanged { num: tile_num as u8 }];

        if self.state == ConversationState::AwaitingStart {
            self.state = ConversationState::InProgress;
            events.push(ConversationEvent::Started);
        }

        if self.n_tiles_in_play >= self.total_n_tiles {
            events.extend(self.clear_all_next_turn());
        } else {
            events.extend(self.advance_next_turn(num as usize));
        }

        Ok(events)
    }

    /// `SHOUT`: rate-limited by [`SHOUT_WINDOW_US`]; a no-op while already
    /// shouting (spec.md §4.4, §4.5).
    pub fn shout(&mut self, num: u8, clock: &dyn Clock) -> Vec<ConversationEvent> {
        if self.is_shouting(clock) {
            return Vec::new();
        }
        self.last_shout_time = Some(clock.now_us());
        vec![ConversationEvent::PlayerShouted { num }]
    }

    /// `SET_N_TILES`: only effective while [`ConversationState::AwaitingStart`];
    /// clamped to the tile set's deck length.
    pub fn set_n_tiles(&mut self, n: u8) -> Vec<ConversationEvent> {
        if self.state != ConversationState::AwaitingStart {
            return Vec::new();
        }
        let clamped = (n as usize).clamp(1, self.tiles.len());
        if clamped == self.total_n_tiles {
            return Vec::new();
        }
        self.total_n_tiles = clamped;
        vec![ConversationEvent::NTilesChanged]
    }

    /// `SET_LANGUAGE`: only effective while awaiting start, from player 0,
    /// and only for a recognized code (spec.md §4.4).
    pub fn set_language(&mut self, requesting_player: u8, tile_set: TileSet) -> Vec<ConversationEvent> {
        if self.state != ConversationState::AwaitingStart || requesting_player != 0 {
            return Vec::new();
        }
        let mut tiles = tile_set.deck();
        shuffle_tiles(&mut tiles);
        self.total_n_tiles = tiles.len().min(self.total_n_tiles.max(1));
        self.tiles = tiles;
        self.tile_set_code = tile_set.language_code;
        vec![ConversationEvent::LanguageChanged, ConversationEvent::NTilesChanged]
    }

    fn clear_all_next_turn(&mut self) -> Vec<ConversationEvent> {
        let mut events = Vec::new();
        for player in &mut self.players {
            if player.has_next_turn() {
                player.flags.remove(PlayerFlags::NEXT_TURN);
                events.push(ConversationEvent::PlayerFlagsChanged { num: player.num });
            }
        }
        events
    }

    /// Scans forward from `from_index` (exclusive, modulo `n_players`) for
    /// the next connected player and gives it `NEXT_TURN`, clearing the
    /// flag everywhere else (spec.md §4.5 "Next-player advancement").
    fn advance_next_turn(&mut self, from_index: usize) -> Vec<ConversationEvent> {
        let n = self.players.len();
        if n == 0 {
            return Vec::new();
        }
        let mut next = None;
        for offset in 1..=n {
            let idx = (from_index + offset) % n;
            if self.players[idx].is_connected() {
                next = Some(idx);
                break;
            }
        }

        let mut events = Vec::new();
        for (idx, player) in self.players.iter_mut().enumerate() {
            let should_have = Some(idx) == next;
            if player.has_next_turn() != should_have {
                player.flags.set(PlayerFlags::NEXT_TURN, should_have);
                events.push(ConversationEvent::PlayerFlagsChanged { num: player.num });
            }
        }
        events
    }

    /// Spiral-scans outward from the board center for the first
    /// axis-aligned `TILE_SIZE`-square rectangle that overlaps no placed
    /// tile (spec.md §4.5, SPEC_FULL.md §3 "Free-location spiral").
    ///
    /// Nesting order (`y`, `x`, `sign_x` outer, `sign_y` inner, each sign
    /// trying -1 then +1) matches `find_free_location` in
    /// `original_source/server/vsx-conversation.c` exactly, so placement
    /// order is bit-for-bit reproducible against the original for a given
    /// sequence of already-placed tiles.
    fn find_free_location(&self) -> (i16, i16) {
        let placed = &self.tiles[..self.n_tiles_in_play];

        for y in 0..2000i32 {
            for x in 0..9i32 {
                for &sx in &[-1i32, 1i32] {
                    for &sy in &[-1i32, 1i32] {
                        let cx = BOARD_CENTER_X + sx * x * STRIDE;
                        let cy = BOARD_CENTER_Y + sy * y * STRIDE;
                        if !placed.iter().any(|t| overlaps(cx, cy, t.x as i32, t.y as i32)) {
                            return (cx as i16, cy as i16);
                        }
                    }
                }
            }
        }
        unreachable!("free-location search must terminate well within 2000 spiral rings");
    }
}

fn overlaps(ax: i32, ay: i32, bx: i32, by: i32) -> bool {
    (ax - bx).abs() < TILE_SIZE && (ay - by).abs() < TILE_SIZE
}

fn shuffle_tiles(tiles: &mut [Tile]) {
    // Fisher-Yates (spec.md §4.5).
    for i in (1..tiles.len()).rev() {
        let j = fastrand::usize(..=i);
        tiles.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::clock::TestClock;
    use crate::game::tile::default_tile_set;

    fn new_conversation() -> Conversation {
        Conversation::new(ConversationId(1), default_tile_set())
    }

    #[test]
    fn join_assigns_sequential_nums() {
        let mut conv = new_conversation();
        let (num0, _) = conv.join("alice".into()).unwrap();
        let (num1, _) = conv.join("bob".into()).unwrap();
        assert_eq!(num0, 0);
        assert_eq!(num1, 1);
    }

    #[test]
    fn reaching_max_players_forces_in_progress() {
        let mut conv = new_conversation();
        let mut started = false;
        for i in 0..32 {
            let (_, events) = conv.join(format!("p{i}")).unwrap();
            if events.contains(&ConversationEvent::Started) {
                started = true;
            }
        }
        assert!(started);
        assert_eq!(conv.state(), ConversationState::InProgress);
        assert!(conv.join("overflow".into()).is_none());
    }

    #[test]
    fn first_turn_is_free_for_all_and_starts_the_game() {
        let mut conv = new_conversation();
        conv.join("alice".into()).unwrap();
        conv.join("bob".into()).unwrap();
        let clock = TestClock::new(0);
        let events = conv.turn(1, clock.as_ref()).unwrap();
        assert!(events.contains(&ConversationEvent::Started));
        assert_eq!(conv.n_tiles_in_play(), 1);
    }

    #[test]
    fn turn_ordering_alternates_and_rebounds_from_disconnect() {
        let mut conv = new_conversation();
        conv.join("alice".into()).unwrap();
        conv.join("bob".into()).unwrap();
        let clock = TestClock::new(0);

        conv.turn(0, clock.as_ref()).unwrap();
        assert!(conv.player(1).unwrap().has_next_turn());

        conv.turn(1, clock.as_ref()).unwrap();
        assert!(conv.player(0).unwrap().has_next_turn());

        // player 1 disconnects while it's about to become their turn again
        conv.turn(0, clock.as_ref()).unwrap();
        assert!(conv.player(1).unwrap().has_next_turn());
        conv.leave(1);
        assert!(conv.player(0).unwrap().has_next_turn());
    }

    #[test]
    fn non_holder_cannot_turn_after_first_turn() {
        let mut conv = new_conversation();
        conv.join("alice".into()).unwrap();
        conv.join("bob".into()).unwrap();
        let clock = TestClock::new(0);
        conv.turn(0, clock.as_ref()).unwrap();
        // now player 1 has NEXT_TURN; player 0 tries again
        assert_eq!(conv.turn(0, clock.as_ref()), Err(TurnError::NotYourTurn));
    }

    #[test]
    fn shout_rate_limiting() {
        let mut conv = new_conversation();
        conv.join("alice".into()).unwrap();
        let clock = TestClock::new(0);

        let first = conv.shout(0, clock.as_ref());
        assert_eq!(first, vec![ConversationEvent::PlayerShouted { num: 0 }]);

        clock.advance_us(1_000_000);
        let second = conv.shout(0, clock.as_ref());
        assert!(second.is_empty());

        clock.advance_us(SHOUT_WINDOW_US);
        let third = conv.shout(0, clock.as_ref());
        assert_eq!(third, vec![ConversationEvent::PlayerShouted { num: 0 }]);
    }

    #[test]
    fn turn_blocked_while_shouting() {
        let mut conv = new_conversation();
        conv.join("alice".into()).unwrap();
        let clock = TestClock::new(0);
        conv.shout(0, clock.as_ref());
        assert_eq!(conv.turn(0, clock.as_ref()), Err(TurnError::ShoutActive));
    }

    #[test]
    fn move_tile_rejects_tiles_not_in_play() {
        let mut conv = new_conversation();
        conv.join("alice".into()).unwrap();
        let err = conv.move_tile(0, 5, 1, 1).unwrap_err();
        assert_eq!(err.to_string(), "Player tried to move a tile that is not in play");
    }

    #[test]
    fn move_tile_stamps_last_player() {
        let mut conv = new_conversation();
        conv.join("alice".into()).unwrap();
        let clock = TestClock::new(0);
        conv.turn(0, clock.as_ref()).unwrap();
        conv.move_tile(0, 0, 10, 20).unwrap();
        let tile = conv.tile(0).unwrap();
        assert_eq!((tile.x, tile.y, tile.last_player), (10, 20, 0));
    }

    #[test]
    fn placed_tiles_never_overlap() {
        let mut conv = new_conversation();
        conv.join("alice".into()).unwrap();
        let clock = TestClock::new(0);
        for _ in 0..conv.total_n_tiles().min(60) {
            conv.turn(0, clock.as_ref()).unwrap();
        }
        let placed: Vec<_> = conv.tiles_in_play().to_vec();
        for i in 0..placed.len() {
            for j in (i + 1)..placed.len() {
                assert!(!overlaps(
                    placed[i].x as i32,
                    placed[i].y as i32,
                    placed[j].x as i32,
                    placed[j].y as i32
                ));
            }
        }
    }

    #[test]
    fn send_message_clips_and_clears_typing() {
        let mut conv = new_conversation();
        conv.join("alice".into()).unwrap();
        conv.set_typing(0, true);
        let long = "x".repeat(2000);
        let events = conv.send_message(0, &long);
        assert!(events.contains(&ConversationEvent::MessageAdded { index: 0 }));
        assert!(events.contains(&ConversationEvent::PlayerFlagsChanged { num: 0 }));
        assert_eq!(conv.messages()[0].text.len(), crate::protocol::types::MAX_MESSAGE_LENGTH);
        assert!(!conv.player(0).unwrap().flags.contains(PlayerFlags::TYPING));
    }

    #[test]
    fn leave_empties_conversation_when_last_player_disconnects() {
        let mut conv = new_conversation();
        conv.join("alice".into()).unwrap();
        let events = conv.leave(0);
        assert!(events.contains(&ConversationEvent::Emptied));
    }

    #[test]
    fn set_n_tiles_only_effective_while_awaiting_start() {
        let mut conv = new_conversation();
        conv.join("alice".into()).unwrap();
        let events = conv.set_n_tiles(10);
        assert_eq!(events, vec![ConversationEvent::NTilesChanged]);
        assert_eq!(conv.total_n_tiles(), 10);

        let clock = TestClock::new(0);
        for _ in 0..10 {
            conv.turn(0, clock.as_ref()).unwrap();
        }
        assert_eq!(conv.state(), ConversationState::InProgress);
        assert!(conv.set_n_tiles(50).is_empty());
        assert_eq!(conv.total_n_tiles(), 10);
    }
}
