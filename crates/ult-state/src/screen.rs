use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use ult_data::Player;
use ult_vision::{Marker, Matcher};

/// Every screen the runner knows how to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GameScreen {
    MainMenu,
    Ruleset,
    StageSelection,
    CharacterSelect,
    MatchInProgress,
    /// Results screen before the winner banner has rendered
    MatchFinished,
    /// A winner banner is visible
    CheckingWinner,
}

impl GameScreen {
    /// Pre-match screens in the order the game walks through them.
    pub const MENU_CASCADE: [GameScreen; 3] = [
        GameScreen::MainMenu,
        GameScreen::Ruleset,
        GameScreen::StageSelection,
    ];

    /// Menu steps still ahead when `self` is on screen, including `self`.
    pub fn cascade_from(self) -> &'static [GameScreen] {
        match Self::MENU_CASCADE.iter().position(|s| *s == self) {
            Some(i) => &Self::MENU_CASCADE[i..],
            None => &[],
        }
    }
}

impl fmt::Display for GameScreen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GameScreen::MainMenu => "main menu",
            GameScreen::Ruleset => "ruleset",
            GameScreen::StageSelection => "stage selection",
            GameScreen::CharacterSelect => "character select",
            GameScreen::MatchInProgress => "match in progress",
            GameScreen::MatchFinished => "match finished",
            GameScreen::CheckingWinner => "checking winner",
        };
        f.write_str(name)
    }
}

/// Marker that identifies each pre-match menu, in detection priority order.
const MENU_MARKERS: [(GameScreen, Marker); 3] = [
    (GameScreen::MainMenu, Marker::MainMenu),
    (GameScreen::Ruleset, Marker::Ruleset),
    (GameScreen::StageSelection, Marker::StageSelection),
];

pub fn is_character_select(matcher: &Matcher, frame: &RgbaImage) -> bool {
    matcher
        .classify(frame, &[Marker::CharacterSelect, Marker::CharacterSelectIdle])
        .is_some()
}

/// Side whose victory banner is showing, player 1 checked first.
pub fn winner(matcher: &Matcher, frame: &RgbaImage) -> Option<Player> {
    match matcher.classify(frame, &[Marker::Player1Won, Marker::Player2Won])? {
        Marker::Player1Won => Some(Player::One),
        _ => Some(Player::Two),
    }
}

fn menu_screen(matcher: &Matcher, frame: &RgbaImage, real_hardware: bool) -> Option<GameScreen> {
    let candidates: Vec<Marker> = MENU_MARKERS
        .iter()
        .map(|&(_, marker)| marker)
        .filter(|marker| !real_hardware || marker.exists_on_hardware())
        .collect();
    let found = matcher.classify(frame, &candidates)?;
    MENU_MARKERS
        .iter()
        .find(|&&(_, marker)| marker == found)
        .map(|&(screen, _)| screen)
}

/// Results screen without a running clock, or the dimmed results screen.
pub fn match_over(matcher: &Matcher, frame: &RgbaImage) -> bool {
    let standard = matcher.marker_present(frame, Marker::MatchOver)
        && !matcher.marker_present(frame, Marker::MatchCountdown);
    standard || matcher.marker_present(frame, Marker::MatchOverIdle)
}

pub fn cpu_ready(matcher: &Matcher, frame: &RgbaImage, player: Player) -> bool {
    let marker = match player {
        Player::One => Marker::Player1Cpu,
        Player::Two => Marker::Player2Cpu,
    };
    matcher.marker_present(frame, marker)
}

/// Classify one frame. Anything unrecognized counts as a match in progress.
pub fn detect_screen(matcher: &Matcher, frame: &RgbaImage, real_hardware: bool) -> GameScreen {
    if let Some(screen) = menu_screen(matcher, frame, real_hardware) {
        screen
    } else if is_character_select(matcher, frame) {
        GameScreen::CharacterSelect
    } else if winner(matcher, frame).is_some() {
        GameScreen::CheckingWinner
    } else if match_over(matcher, frame) {
        GameScreen::MatchFinished
    } else {
        GameScreen::MatchInProgress
    }
}
