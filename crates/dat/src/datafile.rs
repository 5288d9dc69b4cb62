//! The manifest index: one immutable catalogue plus one mutable remaining
//! view, both produced from a single parse.
//!
//! The catalogue answers "does this content match anything?" through two
//! lookup maps keyed by `(size, hash)`. The remaining view starts as a full
//! copy of the parsed games and shrinks as content is observed; marshalling
//! it after a run yields the residual manifest (whatever is still missing).

use crate::error::{ErrorKind, Result};
use crate::model::{Game, Header, Rom};
use crate::xml;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::instrument;

/// A parsed dat file, shared read-mostly between pipeline workers.
///
/// Content queries hit the immutable lookup maps and take no lock; every
/// mutation of the remaining view is serialised through one mutex, so each
/// rom is removed at most once no matter how many workers observe it.
pub struct Datafile {
    by_sha1: HashMap<(u64, String), Vec<Rom>>,
    by_crc: HashMap<(u64, String), Vec<Rom>>,
    remaining: Mutex<Remaining>,
}

struct Remaining {
    header: Header,
    games: Vec<Game>,
}

impl Datafile {
    /// Parse dat XML into a catalogue and a remaining view.
    #[instrument(skip_all, fields(bytes = bytes.len()))]
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let doc = xml::parse(bytes)?;

        let mut by_sha1: HashMap<(u64, String), Vec<Rom>> = HashMap::new();
        let mut by_crc: HashMap<(u64, String), Vec<Rom>> = HashMap::new();
        for game in &doc.games {
            for rom in &game.roms {
                by_sha1.entry((rom.size, rom.sha1.clone())).or_default().push(rom.clone());
                by_crc.entry((rom.size, rom.crc.clone())).or_default().push(rom.clone());
            }
        }

        Ok(Self {
            by_sha1,
            by_crc,
            remaining: Mutex::new(Remaining { header: doc.header, games: doc.games }),
        })
    }

    /// Every catalogue entry whose size and SHA-1 match. The same binary may
    /// be shared by several games; all owners are returned.
    pub fn find_by_sha1(&self, size: u64, sha1: &str) -> Vec<Rom> {
        self.by_sha1.get(&(size, sha1.to_ascii_lowercase())).cloned().unwrap_or_default()
    }

    /// Every catalogue entry whose size and CRC-32 match.
    pub fn find_by_crc(&self, size: u64, crc: &str) -> Vec<Rom> {
        self.by_crc.get(&(size, crc.to_ascii_lowercase())).cloned().unwrap_or_default()
    }

    /// Mark a rom as accounted for, removing it from the remaining view.
    ///
    /// A game left with no roms is pruned. Calling `seen` again for the same
    /// rom is a no-op. If the manifest itself contains two roms with the
    /// same `(game, name)` identity the observation is ambiguous and fails.
    pub fn seen(&self, rom: &Rom) -> Result<()> {
        let mut remaining = self.lock();

        let mut hit: Option<(usize, usize)> = None;
        for (gi, game) in remaining.games.iter().enumerate() {
            if game.name != rom.game {
                continue;
            }
            for (ri, candidate) in game.roms.iter().enumerate() {
                if candidate.name != rom.name {
                    continue;
                }
                if hit.is_some() {
                    exn::bail!(ErrorKind::AmbiguousRom {
                        game: rom.game.clone(),
                        name: rom.name.clone(),
                    });
                }
                hit = Some((gi, ri));
            }
        }

        if let Some((gi, ri)) = hit {
            remaining.games[gi].roms.remove(ri);
            if remaining.games[gi].roms.is_empty() {
                remaining.games.remove(gi);
            }
        }
        Ok(())
    }

    /// Append every `game` element of another dat file to the remaining
    /// view. `header` elements are skipped; anything else is rejected.
    pub fn merge(&self, bytes: &[u8]) -> Result<()> {
        let doc = xml::parse(bytes)?;
        if let Some(tag) = doc.unknown.into_iter().next() {
            exn::bail!(ErrorKind::BadElement(tag));
        }
        self.lock().games.extend(doc.games);
        Ok(())
    }

    /// Number of games still unaccounted for.
    pub fn games_remaining(&self) -> usize {
        self.lock().games.len()
    }

    /// Serialise the remaining view (the residual manifest).
    pub fn marshal(&self) -> Result<Vec<u8>> {
        let remaining = self.lock();
        xml::marshal(&remaining.header, &remaining.games)
    }

    /// Override a header field, creating it if absent.
    pub fn set_header_field(&self, tag: &str, text: &str) {
        self.lock().header.set(tag, text);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Remaining> {
        // A worker that panicked mid-observation cannot leave the game list
        // half-updated (removals are single operations), so a poisoned lock
        // is still usable.
        self.remaining.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<datafile>
	<header><name>Test</name></header>
	<game name="Foo (USA)">
		<rom name="foo.smc" size="4" crc="deadbeef" sha1="b858cb282617fb0956d960215c8e84d1ccf909c6"/>
	</game>
	<game name="Shared A">
		<rom name="shared.bin" size="8" crc="11112222" sha1="000000000000000000000000000000000000aaaa"/>
	</game>
	<game name="Shared B">
		<rom name="shared.bin" size="8" crc="11112222" sha1="000000000000000000000000000000000000aaaa"/>
	</game>
</datafile>"#;

    fn sample() -> Datafile {
        Datafile::parse(SAMPLE.as_bytes()).unwrap()
    }

    #[test]
    fn test_find_by_sha1_case_insensitive() {
        let dat = sample();
        let lower = dat.find_by_sha1(4, "b858cb282617fb0956d960215c8e84d1ccf909c6");
        let upper = dat.find_by_sha1(4, "B858CB282617FB0956D960215C8E84D1CCF909C6");
        assert_eq!(lower.len(), 1);
        assert_eq!(lower, upper);
        assert_eq!(lower[0].game, "Foo (USA)");
    }

    #[test]
    fn test_find_by_crc_requires_matching_size() {
        let dat = sample();
        assert_eq!(dat.find_by_crc(4, "DEADBEEF").len(), 1);
        assert!(dat.find_by_crc(5, "deadbeef").is_empty());
    }

    #[test]
    fn test_shared_content_returns_all_owners() {
        let dat = sample();
        let roms = dat.find_by_crc(8, "11112222");
        assert_eq!(roms.len(), 2);
        let mut games: Vec<_> = roms.iter().map(|r| r.game.as_str()).collect();
        games.sort_unstable();
        assert_eq!(games, vec!["Shared A", "Shared B"]);
    }

    #[test]
    fn test_seen_removes_rom_and_prunes_game() {
        let dat = sample();
        assert_eq!(dat.games_remaining(), 3);
        let rom = dat.find_by_sha1(4, "b858cb282617fb0956d960215c8e84d1ccf909c6").remove(0);
        dat.seen(&rom).unwrap();
        assert_eq!(dat.games_remaining(), 2);
    }

    #[test]
    fn test_seen_is_idempotent() {
        let dat = sample();
        let rom = dat.find_by_sha1(4, "b858cb282617fb0956d960215c8e84d1ccf909c6").remove(0);
        dat.seen(&rom).unwrap();
        dat.seen(&rom).unwrap();
        assert_eq!(dat.games_remaining(), 2);
    }

    #[test]
    fn test_seen_ambiguous_on_manifest_duplicates() {
        let input = r#"<datafile><game name="G">
            <rom name="a.bin" size="1" crc="00000001" sha1="0000000000000000000000000000000000000001"/>
            <rom name="a.bin" size="2" crc="00000002" sha1="0000000000000000000000000000000000000002"/>
        </game></datafile>"#;
        let dat = Datafile::parse(input.as_bytes()).unwrap();
        let rom = dat.find_by_sha1(1, "0000000000000000000000000000000000000001").remove(0);
        let err = dat.seen(&rom).unwrap_err();
        assert!(matches!(err.current_value(), ErrorKind::AmbiguousRom { .. }));
    }

    #[test]
    fn test_seen_both_owners_of_shared_content() {
        let dat = sample();
        for rom in dat.find_by_crc(8, "11112222") {
            dat.seen(&rom).unwrap();
        }
        assert_eq!(dat.games_remaining(), 1);
    }

    #[test]
    fn test_merge_appends_games_and_skips_header() {
        let dat = sample();
        let other = r#"<datafile>
            <header><name>Other</name></header>
            <game name="New Game">
                <rom name="n.bin" size="1" crc="00000009" sha1="0000000000000000000000000000000000000009"/>
            </game>
        </datafile>"#;
        dat.merge(other.as_bytes()).unwrap();
        assert_eq!(dat.games_remaining(), 4);
        // The base header survives unchanged.
        let out = String::from_utf8(dat.marshal().unwrap()).unwrap();
        assert!(out.contains("<name>Test</name>"));
        assert!(out.contains("New Game"));
    }

    #[test]
    fn test_merge_rejects_unknown_elements() {
        let dat = sample();
        let err = dat.merge(b"<datafile><machine name=\"x\"/></datafile>").unwrap_err();
        assert!(matches!(err.current_value(), ErrorKind::BadElement(tag) if tag == "machine"));
        // Nothing was appended.
        assert_eq!(dat.games_remaining(), 3);
    }

    #[test]
    fn test_marshal_emits_residual_only() {
        let dat = sample();
        let rom = dat.find_by_sha1(4, "b858cb282617fb0956d960215c8e84d1ccf909c6").remove(0);
        dat.seen(&rom).unwrap();
        let out = String::from_utf8(dat.marshal().unwrap()).unwrap();
        assert!(!out.contains("Foo (USA)"));
        assert!(out.contains("Shared A"));
    }

    #[test]
    fn test_set_header_field() {
        let dat = sample();
        dat.set_header_field("name", "Overridden");
        dat.set_header_field("author", "someone");
        let out = String::from_utf8(dat.marshal().unwrap()).unwrap();
        assert!(out.contains("<name>Overridden</name>"));
        assert!(out.contains("<author>someone</author>"));
    }

    #[test]
    fn test_roundtrip_through_marshal() {
        let dat = sample();
        let bytes = dat.marshal().unwrap();
        let again = Datafile::parse(&bytes).unwrap();
        assert_eq!(again.games_remaining(), dat.games_remaining());
        assert_eq!(
            again.find_by_sha1(4, "b858cb282617fb0956d960215c8e84d1ccf909c6"),
            dat.find_by_sha1(4, "b858cb282617fb0956d960215c8e84d1ccf909c6")
        );
    }
}
