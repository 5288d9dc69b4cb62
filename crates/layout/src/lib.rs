//! Layout strategies: where a rom belongs on disk.
//!
//! A [`Layout`] maps a manifest entry to its canonical location under an
//! export target (either a loose file or a member of a per-game zip) and
//! decides which paths in an existing tree are layout-owned bookkeeping
//! (firmware, save states, system caches) that scans must leave alone.
//!
//! Placement is pure: the same rom always maps to the same location.

pub mod error;

use crate::error::{ErrorKind, Result};
use regex::Regex;
use romset_dat::Rom;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

/// No-Intro dat files prefix BIOS images with this marker.
const BIOS_PREFIX: &str = "[BIOS] ";

/// Console tags that mark a `[BIOS] ` image as machine firmware rather than
/// a built-in game.
const MEGASD_BIOS_TAGS: [&str; 9] = [
    "32X",
    "Aiwa CSD-GM1",
    "LaserActive",
    "Mega-CD",
    "Multi-Mega",
    "Sega CD",
    "Sega Master System",
    "Sega Mega Drive",
    "WonderMega",
];

/// Multi-disc games must share one directory, so `(Disc N)` markers are
/// stripped from the game name when grouping.
static DISC_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+\(Disc\s\d+\)").unwrap());
// Some Redump entries carry further per-disc strings instead of (or on top
// of) a disc number; known ones are stripped too.
// Supreme Warrior (USA)
static DISC_SUPREME_WARRIOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+\((?:Fire\s&\sEarth|Wind\s&\sFang\sTu)\)").unwrap());
// Slam City with Scottie Pippen
static DISC_SLAM_CITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+\((?:Fingers|Juice|Mad\sDog|Smash)\)").unwrap());

/// The canonical on-disk location of a rom, relative to the export target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Stored as a plain file at this relative path.
    Loose(PathBuf),
    /// Stored as `member` inside the zip at `archive`.
    Archived { archive: PathBuf, member: String },
}

impl Placement {
    /// Relative path of the on-disk file this placement produces (the zip
    /// itself for archived roms).
    pub fn path(&self) -> &Path {
        match self {
            Placement::Loose(path) => path,
            Placement::Archived { archive, .. } => archive,
        }
    }
}

/// A stateless layout strategy. Variants dispatch directly; there is no
/// dynamic dispatch past construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Layout {
    /// One deterministic zip per game.
    #[default]
    Simple,
    /// Loose files for the Atari Jaguar SD cartridge.
    JaguarSd,
    /// Bucketed loose files for the Terraonion MegaSD.
    MegaSd,
    /// Loose files for the SD2SNES cartridge.
    Sd2Snes,
}

impl FromStr for Layout {
    type Err = error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simple" => Ok(Layout::Simple),
            "jaguar" => Ok(Layout::JaguarSd),
            "megasd" => Ok(Layout::MegaSd),
            "sd2snes" => Ok(Layout::Sd2Snes),
            _ => exn::bail!(ErrorKind::UnknownLayout(s.to_string())),
        }
    }
}

impl Layout {
    /// The names accepted by [`FromStr`], for CLI help text.
    pub const NAMES: [&'static str; 4] = ["simple", "jaguar", "megasd", "sd2snes"];

    /// Map a rom to its canonical location relative to the export target.
    pub fn export_path(&self, rom: &Rom) -> Result<Placement> {
        match self {
            Layout::Simple => Ok(Placement::Archived {
                archive: PathBuf::from(format!("{}.zip", rom.game)),
                member: rom.name.clone(),
            }),
            Layout::JaguarSd | Layout::Sd2Snes => Ok(Placement::Loose(PathBuf::from(&rom.name))),
            Layout::MegaSd => megasd_path(rom),
        }
    }

    /// Whether a path relative to the scan root is layout-owned bookkeeping
    /// that must be excluded from scans. Directories suppress their whole
    /// subtree.
    pub fn ignore_path(&self, rel: &Path) -> bool {
        match self {
            Layout::Simple => false,
            Layout::JaguarSd => {
                rel == Path::new("firmware.upd")
                    || matches!(extension(rel), Some("e2p" | "mrq"))
            },
            Layout::Sd2Snes => rel == Path::new("sd2snes"),
            Layout::MegaSd => megasd_ignore(rel),
        }
    }
}

/// Grouping directory for a game: the uppercased first letter of its name
/// (after any `[BIOS] ` prefix), with digits collapsing to `#`.
fn bucket(game: &str) -> Result<String> {
    let name = game.strip_prefix(BIOS_PREFIX).unwrap_or(game);
    for c in name.chars() {
        if c.is_ascii_alphabetic() {
            return Ok(c.to_ascii_uppercase().to_string());
        }
        if c.is_ascii_digit() {
            return Ok("#".to_string());
        }
    }
    exn::bail!(ErrorKind::NoAlphanumeric(game.to_string()))
}

fn megasd_path(rom: &Rom) -> Result<Placement> {
    let parent = bucket(&rom.game)?;

    // Machine BIOS images live in a dedicated BIOS directory (the MegaSD
    // needs the Mega CD/Sega CD BIOS there at least); built-in games fall
    // through and are stored as normal.
    if rom.name.starts_with(BIOS_PREFIX)
        && MEGASD_BIOS_TAGS.iter().any(|tag| rom.name.contains(tag))
    {
        return Ok(Placement::Loose(Path::new("BIOS").join(&rom.name)));
    }

    let rel = match extension(Path::new(&rom.name)) {
        Some("sms") => Path::new("Master System & Mark III").join(parent).join(&rom.name),
        Some("md") => Path::new("Mega Drive & Genesis").join(parent).join(&rom.name),
        Some("32x") => Path::new("32X").join(parent).join(&rom.name),
        Some("cue" | "bin") => {
            let group = disc_group(&rom.game);
            Path::new("Mega-CD & Sega CD").join(parent).join(group).join(&rom.name)
        },
        _ => Path::new(&parent).join(&rom.name),
    };
    Ok(Placement::Loose(rel))
}

/// Strip disc markers so every disc of a multi-disc game shares a directory.
fn disc_group(game: &str) -> String {
    let group = DISC_NUMBER.replace_all(game, "");
    let group = DISC_SUPREME_WARRIOR.replace_all(&group, "");
    DISC_SLAM_CITY.replace_all(&group, "").into_owned()
}

fn megasd_ignore(rel: &Path) -> bool {
    // System directories and configuration at fixed locations.
    if rel == Path::new("BUP")
        || rel == Path::new("CHEATS")
        || rel == Path::new("STATES")
        || rel == Path::new("lastmsd.cfg")
        || rel == Path::new("BIOS/bios.cfg")
    {
        return true;
    }
    // Optional metadata databases, anywhere in the tree.
    if rel.file_name().is_some_and(|name| name == "games.dbs") {
        return true;
    }
    // Firmware updates (the filename contains the unit serial number).
    matches!(extension(rel), Some("upd"))
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|ext| ext.to_str())
}
