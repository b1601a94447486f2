use crate::config::LoopConfig;
use crate::supervisor::{ProcessControl, Supervisor};
use anyhow::Result;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use ult_capture::FrameSource;
use ult_data::{random_color, Player};
use ult_dispatch::{DispatcherTransport, MatchDispatcher, PlayerMeta};
use ult_input::LowLevelController;
use ult_state::{GameStateMachine, TickSignal};
use ult_vision::{CharacterReferences, PickCheck};

/// The outer loop: ticks the state machine and turns what it reports into dispatcher
/// traffic and match setup.
///
/// Without a dispatcher it plays random matches and only logs the winners.
pub struct MatchLoop<S, C, T> {
    machine: GameStateMachine<S, C>,
    dispatcher: Option<MatchDispatcher<T>>,
    references: Option<CharacterReferences>,
    settings: LoopConfig,
    last_signal: TickSignal,
    ready_streak: u32,
    in_progress_streak: u32,
}

impl<S, C, T> MatchLoop<S, C, T>
where
    S: FrameSource,
    C: LowLevelController,
    T: DispatcherTransport,
{
    pub fn new(machine: GameStateMachine<S, C>, dispatcher: MatchDispatcher<T>) -> Self {
        Self::build(machine, Some(dispatcher))
    }

    pub fn solo(machine: GameStateMachine<S, C>) -> Self {
        Self::build(machine, None)
    }

    fn build(machine: GameStateMachine<S, C>, dispatcher: Option<MatchDispatcher<T>>) -> Self {
        Self {
            machine,
            dispatcher,
            references: None,
            settings: LoopConfig::default(),
            last_signal: TickSignal::Idle,
            ready_streak: 0,
            in_progress_streak: 0,
        }
    }

    /// Check every pick against the stored name strips.
    pub fn with_references(mut self, references: CharacterReferences) -> Self {
        self.references = Some(references);
        self
    }

    pub fn with_settings(mut self, settings: LoopConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn machine_mut(&mut self) -> &mut GameStateMachine<S, C> {
        &mut self.machine
    }

    pub fn dispatcher(&self) -> Option<&MatchDispatcher<T>> {
        self.dispatcher.as_ref()
    }

    /// Parked on the select screen waiting for the dispatcher to let us start.
    pub fn idling(&self) -> bool {
        self.last_signal == TickSignal::ReadyForMatch
            && self
                .dispatcher
                .as_ref()
                .is_some_and(|d| !d.snapshot().start_signal)
    }

    /// One tick plus whatever it calls for. Returns how long to wait before the next one.
    pub async fn step(&mut self) -> Duration {
        if let Some(dispatcher) = self.dispatcher.as_mut() {
            dispatcher.poll_inbound().await;
        }

        let outcome = match self.machine.tick().await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Tick failed: {:#}", e);
                self.release_after_error().await;
                return self.backoff();
            }
        };
        self.last_signal = outcome.signal;

        match self.handle(outcome.signal).await {
            Ok(()) => outcome.next_delay,
            Err(e) => {
                warn!("Acting on {:?} failed: {:#}", outcome.signal, e);
                self.release_after_error().await;
                self.backoff()
            }
        }
    }

    fn backoff(&self) -> Duration {
        Duration::from_millis(self.settings.error_backoff_ms)
    }

    async fn release_after_error(&mut self) {
        if let Err(e) = self.machine.release_all().await {
            warn!("Could not release the pads: {:#}", e);
        }
    }

    async fn handle(&mut self, signal: TickSignal) -> Result<()> {
        if signal == TickSignal::ReadyForMatch {
            self.ready_streak += 1;
        } else {
            self.ready_streak = 0;
        }
        if signal == TickSignal::MatchInProgress {
            self.in_progress_streak += 1;
        } else {
            self.in_progress_streak = 0;
        }

        match signal {
            TickSignal::Idle => Ok(()),
            TickSignal::ReadyForMatch if self.dispatcher.is_some() => self.on_ready().await,
            TickSignal::ReadyForMatch => self.start_random_match().await,
            TickSignal::MatchInProgress => self.on_in_progress().await,
            TickSignal::PlayerWon(player) => {
                match self.dispatcher.as_mut() {
                    Some(dispatcher) => dispatcher.record_winner(player).await,
                    None => info!("Player {} won", player.number()),
                }
                Ok(())
            }
        }
    }

    async fn on_ready(&mut self) -> Result<()> {
        let Some(dispatcher) = self.dispatcher.as_mut() else {
            return Ok(());
        };
        if self.ready_streak > self.settings.ready_reemit_every {
            self.ready_streak = 0;
            info!("Ready for a while, asking for the match again");
            dispatcher.request_redelivery().await;
        }

        let snapshot = dispatcher.snapshot();
        let Some(assignment) = snapshot.assignment.clone() else {
            info!("Ready without a match, asking for it again");
            dispatcher.request_redelivery().await;
            return Ok(());
        };

        for player in [Player::One, Player::Two] {
            if snapshot.selection_done(player) {
                continue;
            }
            if self.pick(player, assignment.player(player)).await? {
                if let Some(dispatcher) = self.dispatcher.as_mut() {
                    dispatcher.mark_selected(player);
                }
            }
        }

        let Some(dispatcher) = self.dispatcher.as_mut() else {
            return Ok(());
        };
        let snapshot = dispatcher.snapshot();
        if !snapshot.both_selected() {
            return Ok(());
        }
        if !snapshot.start_signal {
            debug!(
                "Match {} is set up, waiting for the start signal",
                assignment.match_id
            );
            return Ok(());
        }

        info!("Starting match {}", assignment.match_id);
        if !self.machine.start_match().await? {
            warn!(
                "Match {} did not start, selecting characters again",
                assignment.match_id
            );
            if let Some(dispatcher) = self.dispatcher.as_mut() {
                dispatcher.reset_selection();
            }
        }
        Ok(())
    }

    /// Select, color and verify one player's character. Returns whether the pick stands.
    async fn pick(&mut self, player: Player, meta: &PlayerMeta) -> Result<bool> {
        let known = self
            .machine
            .roster()
            .canonical_name(&meta.character)
            .map(str::to_string);
        let character = if let Some(name) = known {
            name
        } else {
            let fallback = self
                .machine
                .roster()
                .random_character(&mut rand::thread_rng())
                .to_string();
            warn!(
                target: "important",
                "{} asked for unknown character {}, playing {} instead",
                meta.name, meta.character, fallback
            );
            fallback
        };
        let color = meta
            .color
            .unwrap_or_else(|| random_color(&mut rand::thread_rng()));

        self.machine.select_character(player, &character).await?;
        self.machine.set_color(player, color).await?;

        let Some(references) = self.references.as_mut() else {
            return Ok(true);
        };
        let strip = self.machine.pick_strip(player).await?;
        let check = references.verify_pick(&character, &strip)?;
        match &check {
            PickCheck::Confirmed => debug!("{} pick confirmed as {}", player, character),
            PickCheck::Learned => info!("Learned what {} looks like", character),
            PickCheck::Unrecognized => {
                warn!("{} pick does not look like {} or anyone else", player, character)
            }
            PickCheck::Ambiguous(others) => warn!(
                target: "important",
                "No reference for {} yet, but the pick looks like {}",
                character,
                others.join(", ")
            ),
            PickCheck::Wrong(other) => warn!(
                target: "important",
                "{} landed on {} instead of {}, selecting again",
                player, other, character
            ),
        }
        Ok(check.accepted())
    }

    async fn on_in_progress(&mut self) -> Result<()> {
        let every = self.settings.keep_alive_every.max(1);
        if self.in_progress_streak % every == 0 {
            debug!("Keep-alive inputs");
            self.machine.keep_alive().await?;
        }
        if let Some(dispatcher) = self.dispatcher.as_mut() {
            if dispatcher.snapshot().assignment.is_none() {
                info!("Match running without an assignment, asking for it");
                dispatcher.request_redelivery().await;
            }
        }
        Ok(())
    }

    async fn start_random_match(&mut self) -> Result<()> {
        for player in [Player::One, Player::Two] {
            let character = self
                .machine
                .roster()
                .random_character(&mut rand::thread_rng())
                .to_string();
            self.machine.select_character(player, &character).await?;
        }
        if !self.machine.start_match().await? {
            warn!("Solo match did not start");
        }
        Ok(())
    }
}

/// Run the loop forever, giving the supervisor a turn between ticks when it is due.
pub async fn run_forever<S, C, T, P>(
    mut match_loop: MatchLoop<S, C, T>,
    mut supervisor: Option<Supervisor<P>>,
    supervise_every: Duration,
) where
    S: FrameSource,
    C: LowLevelController,
    T: DispatcherTransport,
    P: ProcessControl,
{
    if let Some(supervisor) = supervisor.as_mut() {
        supervisor.tick(match_loop.machine_mut(), false).await;
    }
    let mut last_supervised = Instant::now();

    loop {
        let delay = match_loop.step().await;

        if let Some(supervisor) = supervisor.as_mut() {
            if last_supervised.elapsed() >= supervise_every {
                let idle = match_loop.idling();
                supervisor.tick(match_loop.machine_mut(), idle).await;
                last_supervised = Instant::now();
            }
        }

        sleep(delay).await;
    }
}
