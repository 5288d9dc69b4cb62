//! These types mirror the dat document shape: a `datafile` root holding one
//! optional `header` and any number of `game` elements, each owning `rom`
//! entries identified by content hashes.

/// One manifest entry: a single file belonging to a game, identified by its
/// content.
///
/// Hex digests are stored lowercase regardless of the case used in the
/// source document, so equality on `crc`/`sha1` is effectively
/// case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rom {
    /// Name of the game this rom belongs to (the parent `game` element)
    pub game: String,
    /// Expected basename of the file inside the game
    pub name: String,
    /// Uncompressed size in bytes
    pub size: u64,
    /// CRC-32 as 8 lowercase hex characters
    pub crc: String,
    /// SHA-1 as 40 lowercase hex characters
    pub sha1: String,
}

impl Rom {
    /// Identity within a manifest is `(game, name)`, not content. Two games
    /// may legitimately share identical content.
    pub fn identity(&self) -> (&str, &str) {
        (&self.game, &self.name)
    }
}

/// A named collection of roms. A game with no roms left is considered
/// completed and is pruned from the remaining view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Game {
    pub name: String,
    pub roms: Vec<Rom>,
}

/// The `header` element, kept as an ordered list of `(tag, text)` children
/// so unknown fields survive a round-trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub fields: Vec<(String, String)>,
}

impl Header {
    /// Replace the text of the first child with the given tag, or append a
    /// new child if none exists yet.
    pub fn set(&mut self, tag: impl Into<String>, text: impl Into<String>) {
        let tag = tag.into();
        let text = text.into();
        match self.fields.iter_mut().find(|(t, _)| *t == tag) {
            Some((_, existing)) => *existing = text,
            None => self.fields.push((tag, text)),
        }
    }

    pub fn get(&self, tag: &str) -> Option<&str> {
        self.fields.iter().find(|(t, _)| t == tag).map(|(_, text)| text.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
