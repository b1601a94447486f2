use crate::macros::Macros;
use crate::screen::{cpu_ready, detect_screen, is_character_select, winner, GameScreen};
use crate::stabilizer::{PerceivedState, Stabilizer, READ_SPACING};
use anyhow::Result;
use image::RgbaImage;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use ult_capture::{crop_region, FrameSource};
use ult_data::{Player, Roster};
use ult_input::{CommandGroup, ControllerPair, LowLevelController};
use ult_vision::{pick_strip, Perception};

/// Attempts at flipping both pads to CPU before giving up for this tick.
pub const CPU_SETUP_ATTEMPTS: usize = 5;

/// What a tick found that the match loop may act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickSignal {
    /// Nothing actionable
    Idle,
    /// On the select screen with both pads set to CPU
    ReadyForMatch,
    MatchInProgress,
    PlayerWon(Player),
}

/// Result of one tick plus how long to wait before the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub signal: TickSignal,
    pub next_delay: Duration,
}

/// Suggested waits after each kind of tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickDelays {
    pub ready: Duration,
    pub finished: Duration,
    pub winner_found: Duration,
    pub no_winner: Duration,
    pub in_progress: Duration,
    pub idle: Duration,
}

impl Default for TickDelays {
    fn default() -> Self {
        Self {
            ready: Duration::from_secs(1),
            finished: Duration::from_secs(1),
            winner_found: Duration::from_secs(8),
            no_winner: Duration::from_millis(500),
            in_progress: Duration::from_secs(5),
            idle: Duration::from_secs(2),
        }
    }
}

/// Looks at the screen, works out where the game is and drives the pads through it.
///
/// Owns both controllers; nothing else sends inputs.
pub struct GameStateMachine<S, C> {
    perception: Perception<S>,
    controllers: ControllerPair<C>,
    macros: Macros,
    roster: Roster,
    stabilizer: Stabilizer,
    delays: TickDelays,
    real_hardware: bool,
}

impl<S: FrameSource, C: LowLevelController> GameStateMachine<S, C> {
    pub fn new(
        perception: Perception<S>,
        controllers: ControllerPair<C>,
        roster: Roster,
        real_hardware: bool,
    ) -> Self {
        let macros = Macros::new(controllers.one.timing());
        Self {
            perception,
            controllers,
            macros,
            roster,
            stabilizer: Stabilizer::default(),
            delays: TickDelays::default(),
            real_hardware,
        }
    }

    pub fn with_delays(mut self, delays: TickDelays) -> Self {
        self.delays = delays;
        self
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn macros(&self) -> &Macros {
        &self.macros
    }

    pub fn perception_mut(&mut self) -> &mut Perception<S> {
        &mut self.perception
    }

    /// One full tick: stabilize, act on the screen, report.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        let screen = self.stabilized_screen().await?;
        info!("Screen: {}", screen);

        let outcome = match screen {
            GameScreen::MainMenu | GameScreen::Ruleset | GameScreen::StageSelection => {
                self.run_menu_cascade(screen).await?;
                self.ready_outcome().await?
            }
            GameScreen::CharacterSelect => self.ready_outcome().await?,
            GameScreen::MatchFinished => {
                let group = self.macros.win_screen();
                self.controllers.one.execute(&group).await?;
                self.outcome(TickSignal::Idle, self.delays.finished)
            }
            GameScreen::CheckingWinner => {
                let frame = self.perception.sample().await?;
                match winner(self.perception.matcher(), &frame) {
                    Some(player) => {
                        info!("{} won", player);
                        let group = self.macros.finish();
                        self.controllers.one.execute(&group).await?;
                        self.outcome(TickSignal::PlayerWon(player), self.delays.winner_found)
                    }
                    None => {
                        debug!("Winner banner not rendered yet");
                        self.outcome(TickSignal::Idle, self.delays.no_winner)
                    }
                }
            }
            GameScreen::MatchInProgress => {
                self.outcome(TickSignal::MatchInProgress, self.delays.in_progress)
            }
        };
        Ok(outcome)
    }

    fn outcome(&self, signal: TickSignal, next_delay: Duration) -> TickOutcome {
        TickOutcome { signal, next_delay }
    }

    async fn ready_outcome(&mut self) -> Result<TickOutcome> {
        if self.ensure_cpus().await? {
            Ok(self.outcome(TickSignal::ReadyForMatch, self.delays.ready))
        } else {
            Ok(self.outcome(TickSignal::Idle, self.delays.idle))
        }
    }

    /// Sample until the last reads agree, spacing reads out. Unbounded.
    pub async fn stabilized_screen(&mut self) -> Result<GameScreen> {
        self.stabilizer.reset();
        loop {
            let frame = self.perception.sample().await?;
            let read = PerceivedState {
                screen: detect_screen(self.perception.matcher(), &frame, self.real_hardware),
                sampled_at: Instant::now(),
            };
            if let Some(screen) = self.stabilizer.push(read) {
                return Ok(screen);
            }
            sleep(READ_SPACING).await;
        }
    }

    /// Walk from `screen` down the menus towards character select, one macro per step.
    ///
    /// Steps assume the previous one landed. If it did not, the next tick starts over
    /// from whatever is on screen, which can repeat a step.
    async fn run_menu_cascade(&mut self, screen: GameScreen) -> Result<()> {
        for &step in screen.cascade_from() {
            if let Some(group) = self.macros.menu_step(step) {
                debug!("Menu step: {}", step);
                self.controllers.one.execute(&group).await?;
            }
        }
        Ok(())
    }

    /// Make sure both pads are CPUs. Returns false if it did not converge or the
    /// select screen went away.
    async fn ensure_cpus(&mut self) -> Result<bool> {
        let frame = self.perception.sample().await?;
        if !is_character_select(self.perception.matcher(), &frame) {
            debug!("Not on character select anymore");
            return Ok(false);
        }
        let (mut one, mut two) = self.cpu_flags(&frame);
        if !(one && two) {
            let wiggle = self.macros.wiggle();
            self.controllers.execute_mirrored(&wiggle).await?;
            let frame = self.perception.sample().await?;
            (one, two) = self.cpu_flags(&frame);
        }

        let mut attempts = 0;
        while attempts < CPU_SETUP_ATTEMPTS && !(one && two) {
            let group_one = self.cpu_setup_for(Player::One, one);
            let group_two = self.cpu_setup_for(Player::Two, two);
            self.controllers.execute_both(&group_one, &group_two).await?;

            let frame = self.perception.sample().await?;
            if !is_character_select(self.perception.matcher(), &frame) {
                debug!("Left character select while setting CPUs");
                return Ok(false);
            }
            (one, two) = self.cpu_flags(&frame);
            attempts += 1;
            debug!("CPU setup attempt {}: p1 {}, p2 {}", attempts, one, two);
        }

        if !(one && two) {
            warn!("Pads are not both CPUs after {} attempts", attempts);
        }
        Ok(one && two)
    }

    fn cpu_setup_for(&self, player: Player, ready: bool) -> CommandGroup {
        if ready {
            CommandGroup::default()
        } else {
            self.macros.set_cpu(player)
        }
    }

    fn cpu_flags(&self, frame: &RgbaImage) -> (bool, bool) {
        let matcher = self.perception.matcher();
        (
            cpu_ready(matcher, frame, Player::One),
            cpu_ready(matcher, frame, Player::Two),
        )
    }

    /// Whether the select screen is (still) up, after stabilizing.
    pub async fn on_character_select(&mut self) -> Result<bool> {
        Ok(self.stabilized_screen().await? == GameScreen::CharacterSelect)
    }

    pub async fn select_character(&mut self, player: Player, character: &str) -> Result<()> {
        info!("{} picks {}", player, character);
        let group = self.macros.select_character(&self.roster, character)?;
        self.controllers.player(player).execute(&group).await
    }

    pub async fn set_color(&mut self, player: Player, color: u8) -> Result<()> {
        let group = self.macros.color(color);
        self.controllers.player(player).execute(&group).await
    }

    /// Current name strip under a player's portrait.
    pub async fn pick_strip(&mut self, player: Player) -> Result<RgbaImage> {
        let frame = self.perception.sample().await?;
        Ok(crop_region(&frame, &pick_strip(player.number())))
    }

    /// Press start, falling back to player 2's pad. Returns whether the select screen
    /// went away.
    pub async fn start_match(&mut self) -> Result<bool> {
        let start = self.macros.start();
        self.controllers.one.execute(&start).await?;
        sleep(Duration::from_secs(2)).await;

        if self.on_character_select().await? {
            debug!("Start on player 1 did nothing, trying player 2");
            self.controllers.two.execute(&start).await?;
        }
        sleep(Duration::from_secs(2)).await;

        Ok(!self.on_character_select().await?)
    }

    pub async fn keep_alive(&mut self) -> Result<()> {
        let wiggle = self.macros.wiggle();
        self.controllers.execute_mirrored(&wiggle).await
    }

    /// Title screen sequence after the game process was (re)started.
    pub async fn boot(&mut self) -> Result<()> {
        info!("Playing boot sequence");
        let group = self.macros.boot();
        self.controllers.one.execute(&group).await
    }

    pub async fn release_all(&mut self) -> Result<()> {
        self.controllers.release_all().await
    }
}
