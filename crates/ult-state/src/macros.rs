use crate::screen::GameScreen;
use anyhow::{anyhow, Result};
use std::time::Duration;
use tracing::debug;
use ult_data::{Player, Roster};
use ult_input::{Button, CommandBuilder, CommandGroup, Timing};

/// How the select-screen cursor moves while a direction is held.
///
/// Values were tuned by hand against the real game.
#[derive(Debug, Clone, Copy)]
pub struct CursorModel {
    /// Pixels per 100ms, horizontal
    pub speed_x: f64,
    /// Pixels per 100ms, vertical
    pub speed_y: f64,
    /// Travel time factor when moving on both axes at once
    pub diagonal_factor: f64,
    /// Where calibration (down+left) parks the cursor
    pub home: (f64, f64),
}

impl Default for CursorModel {
    fn default() -> Self {
        Self {
            speed_x: 390.0 / 5.0,
            speed_y: 390.0 / 5.0,
            diagonal_factor: 1.5,
            home: (0.0, 1023.0),
        }
    }
}

impl CursorModel {
    /// Hold times (ms) for the horizontal and vertical legs from home to `target`.
    pub fn travel_times(&self, target: (u32, u32)) -> (f64, f64) {
        let (x, y) = self.home;
        let (tx, ty) = (target.0 as f64, target.1 as f64);
        let mut time_x = (x - tx).abs() * (self.speed_x / 100.0);
        let mut time_y = (y - ty).abs() * (self.speed_y / 100.0);
        let delta = time_x - time_y;

        if delta != 0.0 {
            time_x *= self.diagonal_factor;
            time_y *= self.diagonal_factor;
        }
        // the longer leg finishes alone, at normal speed
        if delta > 0.0 {
            time_x -= (delta * 0.5).abs();
        } else if delta < 0.0 {
            time_y -= (delta * 0.5).abs();
        }
        (time_x, time_y)
    }
}

/// Navigation macros as command groups. Building is pure; the state machine executes them.
#[derive(Debug, Clone)]
pub struct Macros {
    timing: Timing,
    cursor: CursorModel,
}

impl Macros {
    pub fn new(timing: Timing) -> Self {
        Self {
            timing,
            cursor: CursorModel::default(),
        }
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    fn commands(&self) -> CommandBuilder {
        CommandBuilder::new(self.timing)
    }

    fn confirm_then_wait(&self, wait_ms: u64) -> CommandGroup {
        self.commands()
            .press(Button::A)
            .and_then()
            .wait_millis(wait_ms)
            .build()
    }

    /// Main menu into the ruleset list.
    pub fn main_menu(&self) -> CommandGroup {
        self.commands()
            .press(Button::A)
            .and_then()
            .wait_millis(1000)
            .and_then()
            .press(Button::A)
            .and_then()
            .wait_millis(2000)
            .build()
    }

    pub fn ruleset(&self) -> CommandGroup {
        self.confirm_then_wait(3000)
    }

    /// Accept the highlighted stage and sit through the loading screen.
    pub fn stage(&self) -> CommandGroup {
        self.confirm_then_wait(7000)
    }

    /// Macro for one pre-match menu step.
    pub fn menu_step(&self, screen: GameScreen) -> Option<CommandGroup> {
        match screen {
            GameScreen::MainMenu => Some(self.main_menu()),
            GameScreen::Ruleset => Some(self.ruleset()),
            GameScreen::StageSelection => Some(self.stage()),
            _ => None,
        }
    }

    pub fn win_screen(&self) -> CommandGroup {
        self.commands()
            .wait_millis(500)
            .and_then()
            .press(Button::A)
            .and_then()
            .wait_millis(2000)
            .build()
    }

    /// Click through the results back to the character select screen.
    pub fn finish(&self) -> CommandGroup {
        self.commands()
            .press(Button::A)
            .and_then()
            .wait_millis(2000)
            .and_then()
            .press(Button::A)
            .and_then()
            .wait_millis(2000)
            .and_then()
            .press(Button::A)
            .build()
    }

    pub fn start(&self) -> CommandGroup {
        self.commands().press(Button::Start).build()
    }

    /// Small stick movement that keeps the console awake and registers the pads.
    pub fn wiggle(&self) -> CommandGroup {
        self.commands()
            .hold(Button::Down)
            .for_millis(300)
            .and_then()
            .hold(Button::Up)
            .for_millis(300)
            .build()
    }

    fn calibrate(&self, builder: CommandBuilder) -> CommandBuilder {
        builder
            .hold(Button::Down)
            .hold(Button::Left)
            .for_millis(3000)
    }

    /// Park the cursor, walk it onto the player's CPU toggle and flip it.
    pub fn set_cpu(&self, player: Player) -> CommandGroup {
        let travel = 600 * player.number() as u64;
        self.calibrate(self.commands())
            .and_then()
            .hold(Button::Right)
            .for_millis(travel)
            .and_then()
            .press(Button::A)
            .and_then()
            .wait_millis(500)
            .build()
    }

    /// Drop any held token, park the cursor, travel to `character` and pick it.
    pub fn select_character(&self, roster: &Roster, character: &str) -> Result<CommandGroup> {
        let slot = roster
            .slot_of(character)
            .ok_or_else(|| anyhow!("{} is not on the roster", character))?;
        let target = roster.slot_point(slot);
        let (time_x, time_y) = self.cursor.travel_times(target);
        debug!(
            "Cursor to {} at {:?} (row {}, col {}): x {:.0}ms, y {:.0}ms",
            character, target, slot.row, slot.col, time_x, time_y
        );

        let mut builder = self.calibrate(self.commands().press(Button::B)).and_then();
        let (home_x, home_y) = self.cursor.home;
        let (tx, ty) = (target.0 as f64, target.1 as f64);
        if home_x < tx {
            builder = builder.hold(Button::Right).for_millis(time_x.round() as u64);
        } else if home_x > tx {
            builder = builder.hold(Button::Left).for_millis(time_x.round() as u64);
        }
        if home_y > ty {
            builder = builder.hold(Button::Up).for_millis(time_y.round() as u64);
        } else if home_y < ty {
            builder = builder.hold(Button::Down).for_millis(time_y.round() as u64);
        }
        Ok(builder.and_then().press(Button::A).build())
    }

    /// Cycle the costume `color` times.
    pub fn color(&self, color: u8) -> CommandGroup {
        (0..color)
            .fold(self.commands(), |b, _| b.press(Button::L).and_then())
            .build()
    }

    /// Skip the intro and get past the title screen after a cold start.
    pub fn boot(&self) -> CommandGroup {
        self.commands()
            .press(Button::A)
            .and_then()
            .wait(Duration::from_secs(5))
            .and_then()
            .press(Button::A)
            .and_then()
            .wait(Duration::from_secs(5))
            .build()
    }

    /// Every button once with pauses, for mapping a fresh bridge.
    pub fn input_check(&self) -> CommandGroup {
        let mut builder = self.commands();
        for button in Button::ALL {
            builder = builder
                .wait_millis(1500)
                .and_then()
                .hold(button)
                .for_millis(500)
                .and_then();
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn macros() -> Macros {
        Macros::new(Timing::default())
    }

    #[test]
    fn test_travel_times_diagonal() {
        let cursor = CursorModel::default();
        // Link: row 1, col 3
        let (x, y) = cursor.travel_times((462, 110));
        assert_eq!(x.round() as u64, 541);
        assert_eq!(y.round() as u64, 892);
    }

    #[test]
    fn test_select_character_group() {
        let roster = Roster::default();
        let group = macros().select_character(&roster, "Link").unwrap();
        assert_eq!(group.batches.len(), 3);

        let park = &group.batches[0];
        assert_eq!(park.buttons(), vec![Button::B, Button::Down, Button::Left]);
        assert_eq!(park.duration(), Duration::from_secs(3));

        let travel = &group.batches[1];
        assert_eq!(travel.buttons(), vec![Button::Right, Button::Up]);
        assert_eq!(travel.holds[0].duration, Duration::from_millis(541));
        assert_eq!(travel.holds[1].duration, Duration::from_millis(892));

        assert_eq!(group.batches[2].buttons(), vec![Button::A]);
    }

    #[test]
    fn test_unknown_character_is_an_error() {
        assert!(macros().select_character(&Roster::default(), "Nobody").is_err());
    }

    #[test]
    fn test_set_cpu_travel_depends_on_player() {
        let one = macros().set_cpu(Player::One);
        let two = macros().set_cpu(Player::Two);
        assert_eq!(one.batches[1].duration(), Duration::from_millis(600));
        assert_eq!(two.batches[1].duration(), Duration::from_millis(1200));
        assert_eq!(two.batches[2].buttons(), vec![Button::A]);
    }

    #[test]
    fn test_color_presses() {
        assert!(macros().color(0).is_empty());
        let group = macros().color(3);
        assert_eq!(group.batches.len(), 3);
        assert!(group.batches.iter().all(|b| b.buttons() == vec![Button::L]));
    }

    #[test]
    fn test_menu_steps() {
        let m = macros();
        assert_eq!(m.menu_step(GameScreen::Ruleset).unwrap().total_duration(), Duration::from_millis(3120));
        assert!(m.menu_step(GameScreen::CharacterSelect).is_none());
        assert_eq!(m.finish().batches.len(), 5);
    }
}
