//! The conversation and person registries (spec.md §4.6).
//!
//! Both registries own their records outright (the "arena" half of
//! spec.md §9's arena+handle recommendation): callers hold a
//! [`ConversationId`]/[`PersonId`] handle and look the record up through
//! the registry on every access, rather than holding a reference-counted
//! pointer into it.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use crate::protocol::types::{ConversationId, PersonId};

use super::conversation::{Conversation, ConversationEvent};
use super::person::Person;
use super::tile::TileSet;

/// 64-bit IDs are rand-sourced and XORed with the peer's socket address
/// octets, so address diversity helps even if RNG state were predictable
/// (spec.md §4.6). Regenerated on collision.
fn mix_addr(addr: SocketAddr) -> u64 {
    let mut buf = [0u8; 8];
    match addr.ip() {
        IpAddr::V4(v4) => {
            buf[0..4].copy_from_slice(&v4.octets());
            buf[4..6].copy_from_slice(&addr.port().to_le_bytes());
        }
        IpAddr::V6(v6) => {
            buf.copy_from_slice(&v6.octets()[0..8]);
            let port_mix = u64::from(addr.port()).wrapping_mul(0x9E37_79B9_7F4A_7C15);
            return u64::from_le_bytes(buf) ^ port_mix;
        }
    }
    u64::from_le_bytes(buf)
}

fn random_u64() -> u64 {
    use rand::Rng;
    rand::rng().random()
}

/// Registry of live conversations (spec.md §4.6). Keeps a `pending` index
/// of conversations still joinable by room name, separate from the full
/// `other` set; a conversation moves out of `pending` the moment it
/// leaves [`super::conversation::ConversationState::AwaitingStart`].
#[derive(Default)]
pub struct ConversationRegistry {
    conversations: HashMap<ConversationId, Conversation>,
    pending_by_room: HashMap<String, ConversationId>,
    other: Vec<ConversationId>,
}

impl ConversationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self, peer: SocketAddr) -> ConversationId {
        loop {
            let candidate = ConversationId(random_u64() ^ mix_addr(peer));
            if !self.conversations.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// `NEW_PLAYER`: looks up a pending conversation for `room`, creating
    /// one if none exists.
    pub fn get_or_create_pending(
        &mut self,
        room: &str,
        peer: SocketAddr,
        tile_set: TileSet,
    ) -> ConversationId {
        if let Some(&id) = self.pending_by_room.get(room) {
            return id;
        }
        let id = self.allocate_id(peer);
        self.conversations.insert(id, Conversation::new(id, tile_set));
        self.pending_by_room.insert(room.to_string(), id);
        self.other.push(id);
        id
    }

    /// `NEW_PRIVATE_GAME`: always creates a fresh conversation, never
    /// discoverable by room name.
    pub fn create_private(&mut self, peer: SocketAddr, tile_set: TileSet) -> ConversationId {
        let id = self.allocate_id(peer);
        self.conversations.insert(id, Conversation::new(id, tile_set));
        self.other.push(id);
        id
    }

    #[must_use]
    pub fn get(&self, id: ConversationId) -> Option<&Conversation> {
        self.conversations.get(&id)
    }

    pub fn get_mut(&mut self, id: ConversationId) -> Option<&mut Conversation> {
        self.conversations.get_mut(&id)
    }

    /// Applies the bookkeeping side effects of a batch of events a
    /// conversation method returned: moves it out of `pending` on
    /// [`ConversationEvent::Started`], destroys it on
    /// [`ConversationEvent::Emptied`].
    pub fn apply_events(&mut self, id: ConversationId, events: &[ConversationEvent]) {
        for event in events {
            match event {
                ConversationEvent::Started => self.promote_from_pending(id),
                ConversationEvent::Emptied => self.destroy(id),
                _ => {}
            }
        }
    }

    fn promote_from_pending(&mut self, id: ConversationId) {
        self.pending_by_room.retain(|_, &mut v| v != id);
    }

    pub fn destroy(&mut self, id: ConversationId) {
        self.conversations.remove(&id);
        self.pending_by_room.retain(|_, &mut v| v != id);
        self.other.retain(|&v| v != id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

/// Registry of live persons (spec.md §4.6), with the silence-GC sweep.
#[derive(Default)]
pub struct PersonRegistry {
    persons: HashMap<PersonId, Person>,
}

impl PersonRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self, peer: SocketAddr) -> PersonId {
        loop {
            let candidate = PersonId(random_u64() ^ mix_addr(peer));
            if !self.persons.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    pub fn create(
        &mut self,
        peer: SocketAddr,
        conversation_id: ConversationId,
        player_num: u8,
        message_offset: u32,
        now_us: i64,
    ) -> PersonId {
        let id = self.allocate_id(peer);
        self.persons.insert(
            id,
            Person::new(id, conversation_id, player_num, message_offset, now_us),
        );
        id
    }

    #[must_use]
    pub fn get(&self, id: PersonId) -> Option<&Person> {
        self.persons.get(&id)
    }

    pub fn get_mut(&mut self, id: PersonId) -> Option<&mut Person> {
        self.persons.get_mut(&id)
    }

    pub fn remove(&mut self, id: PersonId) -> Option<Person> {
        self.persons.remove(&id)
    }

    /// Removes every person silent for at least `timeout_us`, returning
    /// them so the caller can make each one leave its conversation
    /// (spec.md §3.6, §4.6).
    pub fn collect_silent(&mut self, now_us: i64, timeout_us: i64) -> Vec<Person> {
        let silent_ids: Vec<PersonId> = self
            .persons
            .values()
            .filter(|p| p.is_silent(now_us, timeout_us))
            .map(|p| p.id)
            .collect();
        silent_ids.into_iter().filter_map(|id| self.persons.remove(&id)).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.persons.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::tile::default_tile_set;
    use std::net::Ipv4Addr;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    #[test]
    fn room_lookup_reuses_pending_conversation() {
        let mut registry = ConversationRegistry::new();
        let id1 = registry.get_or_create_pending("room", peer(1), default_tile_set());
        let id2 = registry.get_or_create_pending("room", peer(2), default_tile_set());
        assert_eq!(id1, id2);
    }

    #[test]
    fn private_games_are_never_joinable_by_room() {
        let mut registry = ConversationRegistry::new();
        let private_id = registry.create_private(peer(1), default_tile_set());
        let room_id = registry.get_or_create_pending("room", peer(2), default_tile_set());
        assert_ne!(private_id, room_id);
    }

    #[test]
    fn started_conversation_leaves_pending_index() {
        let mut registry = ConversationRegistry::new();
        let id = registry.get_or_create_pending("room", peer(1), default_tile_set());
        registry.apply_events(id, &[ConversationEvent::Started]);
        let id_again = registry.get_or_create_pending("room", peer(2), default_tile_set());
        assert_ne!(id, id_again);
    }

    #[test]
    fn emptied_conversation_is_destroyed() {
        let mut registry = ConversationRegistry::new();
        let id = registry.create_private(peer(1), default_tile_set());
        registry.apply_events(id, &[ConversationEvent::Emptied]);
        assert!(registry.get(id).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn silence_gc_collects_only_expired_persons() {
        let mut registry = PersonRegistry::new();
        let id_old = registry.create(peer(1), ConversationId(1), 0, 0, 0);
        let id_fresh = registry.create(peer(2), ConversationId(1), 1, 0, 1_000_000);

        let collected = registry.collect_silent(5_000_000, 5_000_000);
        let ids: Vec<_> = collected.iter().map(|p| p.id).collect();
        assert!(ids.contains(&id_old));
        assert!(!ids.contains(&id_fresh));
        assert!(registry.get(id_fresh).is_some());
    }
}
