use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ult_capture::Rect;

/// A fixed on-screen condition recognized by comparing one region against a reference crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Marker {
    /// Main menu with the Smash, Spirits, Vault entries
    MainMenu,
    /// Rule set picker
    Ruleset,
    /// Stage picker. The physical console skips this screen.
    StageSelection,
    CharacterSelect,
    /// Character select after the console dimmed it for inactivity
    CharacterSelectIdle,
    Player1Cpu,
    Player2Cpu,
    MatchOver,
    MatchOverIdle,
    /// In-match countdown clock
    MatchCountdown,
    Player1Won,
    Player2Won,
}

impl Marker {
    pub const ALL: [Marker; 12] = [
        Marker::MainMenu,
        Marker::Ruleset,
        Marker::StageSelection,
        Marker::CharacterSelect,
        Marker::CharacterSelectIdle,
        Marker::Player1Cpu,
        Marker::Player2Cpu,
        Marker::MatchOver,
        Marker::MatchOverIdle,
        Marker::MatchCountdown,
        Marker::Player1Won,
        Marker::Player2Won,
    ];

    /// Region checked for this marker, at the reference resolution.
    pub fn region(self) -> Rect {
        match self {
            Marker::MainMenu => Rect::new(1650, 872, 25, 25),
            Marker::Ruleset => Rect::new(150, 35, 25, 25),
            Marker::StageSelection => Rect::new(1222, 38, 50, 10),
            Marker::CharacterSelect | Marker::CharacterSelectIdle => Rect::new(45, 20, 25, 25),
            Marker::Player1Cpu => Rect::new(516, 1014, 25, 25),
            Marker::Player2Cpu => Rect::new(1436, 1014, 25, 25),
            Marker::MatchOver | Marker::MatchOverIdle => Rect::new(22, 900, 50, 50),
            Marker::MatchCountdown => Rect::new(1715, 73, 8, 8),
            Marker::Player1Won => Rect::new(696, 54, 50, 10),
            Marker::Player2Won => Rect::new(1492, 54, 50, 10),
        }
    }

    /// File stem of the reference image inside a profile directory.
    pub fn file_stem(self) -> &'static str {
        match self {
            Marker::MainMenu => "mainmenu",
            Marker::Ruleset => "ruleset",
            Marker::StageSelection => "stage",
            Marker::CharacterSelect => "css-clean",
            Marker::CharacterSelectIdle => "css-sleep",
            Marker::Player1Cpu => "p1cpu",
            Marker::Player2Cpu => "p2cpu",
            Marker::MatchOver => "matchover",
            Marker::MatchOverIdle => "matchover-sleep",
            Marker::MatchCountdown => "matchinprogress",
            Marker::Player1Won => "p1won",
            Marker::Player2Won => "p2won",
        }
    }

    /// Whether the screen exists when driving a physical console.
    pub fn exists_on_hardware(self) -> bool {
        !matches!(self, Marker::StageSelection)
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_stem())
    }
}

impl FromStr for Marker {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Marker::ALL
            .into_iter()
            .find(|m| m.file_stem().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let known: Vec<&str> = Marker::ALL.iter().map(|m| m.file_stem()).collect();
                format!("unknown marker '{}', expected one of: {}", s, known.join(", "))
            })
    }
}

/// Strip under each player's portrait that shows the picked character's name.
pub fn pick_strip(player_number: u8) -> Rect {
    if player_number == 1 {
        Rect::new(549, 856, 300, 10)
    } else {
        Rect::new(1464, 856, 300, 10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ult_capture::{REFERENCE_HEIGHT, REFERENCE_WIDTH};

    #[test]
    fn test_regions_fit_reference_viewport() {
        for marker in Marker::ALL {
            let r = marker.region();
            assert!(r.x + r.w <= REFERENCE_WIDTH, "{} overflows width", marker);
            assert!(r.y + r.h <= REFERENCE_HEIGHT, "{} overflows height", marker);
            assert!(r.w > 0 && r.h > 0, "{} is empty", marker);
        }
    }

    #[test]
    fn test_parse_marker_name() {
        assert_eq!("p1won".parse::<Marker>().unwrap(), Marker::Player1Won);
        assert_eq!("CSS-Sleep".parse::<Marker>().unwrap(), Marker::CharacterSelectIdle);
        assert!("nothing".parse::<Marker>().is_err());
    }
}
