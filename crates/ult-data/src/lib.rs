use anyhow::{bail, Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Grid cell that has no character behind it.
pub const EMPTY_SPOT: &str = "EMPTY";
/// Grid cell that picks a random character in-game. Never chosen by us.
pub const RANDOM_SPOT: &str = "RANDOM";

/// Number of costume colors available per character.
pub const COLOR_COUNT: u8 = 8;

/// Character select grid, in on-screen order (row-major, 12 per row).
#[rustfmt::skip]
const DEFAULT_CHARACTERS: &[&str] = &[
    "Mario", "DonkeyKong", "Link", "Samus", "DarkSamus", "Yoshi", "Kirby", "Fox", "Pikachu", "Luigi", "Ness", "CaptainFalcon",
    "Jigglypuff", "Peach", "Daisy", "Bowser", "IceClimbers", "Shiek", "Zelda", "DrMario", "Pichu", "Falco", "Marth", "Lucina",
    "YoungLink", "Ganondorf", "Mewtwo", "Roy", "Chrom", "GameAndWatch", "MetaKnight", "Pit", "DarkPit", "ZeroSuitSamus", "Wario", "Snake",
    "Ike", "PokemonTrainer", "DiddyKong", "Lucas", "Sonic", "KingDeDeDe", "Olimar", "Lucario", "ROB", "ToonLink", "Wolf", "Villager",
    "MegaMan", "WiiFitTrainer", "Rosalina", "LittleMac", "Greninja", "Palutena", "Pac-Man", "Robin", "Shulk", "BowserJr", "DuckHunt", "Ryu",
    "Ken", "Cloud", "Corrin", "Bayonetta", "Inkling", "Ridley", "Simon", "Richter", "KRool", "Isabelle", "Incineroar", "PiranhaPlant",
    EMPTY_SPOT, "Joker", "Hero", "BanjoKazooie", "Terry", "Byleth", "MinMin", "Steve", "Sephiroth", "Pyra", RANDOM_SPOT, EMPTY_SPOT,
];

/// One of the two local controller seats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Player {
    One,
    Two,
}

impl Player {
    pub fn number(self) -> u8 {
        match self {
            Player::One => 1,
            Player::Two => 2,
        }
    }

    pub fn other(self) -> Player {
        match self {
            Player::One => Player::Two,
            Player::Two => Player::One,
        }
    }
}

impl TryFrom<u8> for Player {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Player::One),
            2 => Ok(Player::Two),
            other => Err(format!("player must be 1 or 2, got {}", other)),
        }
    }
}

impl From<Player> for u8 {
    fn from(player: Player) -> u8 {
        player.number()
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player {}", self.number())
    }
}

/// Pixel geometry of the character select grid at the 1920x1080 reference resolution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GridGeometry {
    pub per_row: usize,
    pub origin_x: u32,
    pub origin_y: u32,
    pub cell_width: u32,
    pub cell_height: u32,
}

impl Default for GridGeometry {
    fn default() -> Self {
        Self {
            per_row: 12,
            origin_x: 30,
            origin_y: 30,
            cell_width: 144,
            cell_height: 80,
        }
    }
}

/// Position of a character on the select grid (1-based, like the on-screen layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSlot {
    pub row: u32,
    pub col: u32,
}

/// Raw roster.json file format
#[derive(Debug, Deserialize)]
struct RosterFile {
    characters: Vec<String>,
    #[serde(default)]
    grid: Option<GridGeometry>,
}

/// The playable character roster and where each character sits on the select screen.
#[derive(Debug, Clone)]
pub struct Roster {
    characters: Vec<String>,
    index_by_name: HashMap<String, usize>,
    pub grid: GridGeometry,
}

impl Default for Roster {
    fn default() -> Self {
        Self::from_names(
            DEFAULT_CHARACTERS.iter().map(|s| s.to_string()).collect(),
            GridGeometry::default(),
        )
    }
}

impl Roster {
    fn from_names(characters: Vec<String>, grid: GridGeometry) -> Self {
        let mut index_by_name = HashMap::new();
        for (i, name) in characters.iter().enumerate() {
            if name == EMPTY_SPOT || name == RANDOM_SPOT {
                continue;
            }
            index_by_name.entry(name.to_lowercase()).or_insert(i);
        }
        Self {
            characters,
            index_by_name,
            grid,
        }
    }

    /// Load the roster from `data_dir/roster.json`, falling back to the built-in roster.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let roster_path = data_dir.join("roster.json");
        if !roster_path.exists() {
            tracing::debug!(
                "No roster.json at {}, using the built-in roster",
                roster_path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&roster_path)
            .with_context(|| format!("Failed to read {}", roster_path.display()))?;
        let file: RosterFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", roster_path.display()))?;
        let roster = Self::from_names(file.characters, file.grid.unwrap_or_default());
        if roster.playable().next().is_none() {
            bail!("{} lists no playable characters", roster_path.display());
        }
        tracing::info!("Loaded {} characters", roster.playable().count());
        Ok(roster)
    }

    /// Every selectable character, in grid order.
    pub fn playable(&self) -> impl Iterator<Item = &str> {
        self.characters
            .iter()
            .map(String::as_str)
            .filter(|c| *c != EMPTY_SPOT && *c != RANDOM_SPOT)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_by_name.contains_key(&name.to_lowercase())
    }

    /// Roster spelling of `name`, matched case-insensitively.
    pub fn canonical_name(&self, name: &str) -> Option<&str> {
        let index = *self.index_by_name.get(&name.to_lowercase())?;
        self.characters.get(index).map(String::as_str)
    }

    /// Grid slot of a character, matched case-insensitively.
    pub fn slot_of(&self, name: &str) -> Option<GridSlot> {
        let index = *self.index_by_name.get(&name.to_lowercase())?;
        let per_row = self.grid.per_row.max(1);
        Some(GridSlot {
            row: (index / per_row) as u32 + 1,
            col: (index % per_row) as u32 + 1,
        })
    }

    /// Screen point the cursor should travel to for a slot.
    pub fn slot_point(&self, slot: GridSlot) -> (u32, u32) {
        (
            self.grid.origin_x + slot.col * self.grid.cell_width,
            self.grid.origin_y + slot.row * self.grid.cell_height,
        )
    }

    /// Uniformly random playable character.
    pub fn random_character<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        let playable: Vec<&str> = self.playable().collect();
        playable[rng.gen_range(0..playable.len())]
    }
}

/// Uniformly random costume color.
pub fn random_color<R: Rng + ?Sized>(rng: &mut R) -> u8 {
    rng.gen_range(0..COLOR_COUNT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_nonexistent_uses_default() {
        let roster = Roster::load(Path::new("/nonexistent")).unwrap();
        assert!(roster.contains("Mario"));
        assert!(!roster.contains(EMPTY_SPOT));
    }

    #[test]
    fn test_slot_of_is_one_based() {
        let roster = Roster::default();
        assert_eq!(roster.slot_of("Mario"), Some(GridSlot { row: 1, col: 1 }));
        assert_eq!(roster.slot_of("jigglypuff"), Some(GridSlot { row: 2, col: 1 }));
        assert_eq!(roster.slot_of("Joker"), Some(GridSlot { row: 7, col: 2 }));
        assert_eq!(roster.slot_of("Nobody"), None);
    }

    #[test]
    fn test_slot_point() {
        let roster = Roster::default();
        let slot = roster.slot_of("Link").unwrap();
        assert_eq!(roster.slot_point(slot), (30 + 3 * 144, 30 + 80));
    }

    #[test]
    fn test_random_character_never_picks_placeholders() {
        let roster = Roster::default();
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let c = roster.random_character(&mut rng);
            assert_ne!(c, EMPTY_SPOT);
            assert_ne!(c, RANDOM_SPOT);
        }
    }

    #[test]
    fn test_load_rejects_roster_without_playable_characters() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("roster.json"),
            r#"{"characters": ["EMPTY", "RANDOM"]}"#,
        )
        .unwrap();
        let err = Roster::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("no playable characters"));

        std::fs::write(dir.path().join("roster.json"), r#"{"characters": []}"#).unwrap();
        assert!(Roster::load(dir.path()).is_err());
    }

    #[test]
    fn test_canonical_name() {
        let roster = Roster::default();
        assert_eq!(roster.canonical_name("mArIo"), Some("Mario"));
        assert_eq!(roster.canonical_name("Nobody"), None);
        assert_eq!(roster.canonical_name(EMPTY_SPOT), None);
    }

    #[test]
    fn test_player_serde_as_number() {
        assert_eq!(serde_json::to_string(&Player::Two).unwrap(), "2");
        let p: Player = serde_json::from_str("1").unwrap();
        assert_eq!(p, Player::One);
        assert!(serde_json::from_str::<Player>("3").is_err());
    }

    #[test]
    fn test_load_custom_roster() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("roster.json"),
            r#"{"characters": ["Alpha", "EMPTY", "Beta"], "grid": {"per_row": 2}}"#,
        )
        .unwrap();
        let roster = Roster::load(dir.path()).unwrap();
        assert_eq!(roster.playable().collect::<Vec<_>>(), vec!["Alpha", "Beta"]);
        assert_eq!(roster.slot_of("Beta"), Some(GridSlot { row: 2, col: 1 }));
        assert_eq!(roster.grid.cell_width, 144);
    }
}
