use crate::command::{Batch, CommandBuilder, CommandGroup, Timing};
use crate::controller::{Button, LowLevelController};
use anyhow::Result;
use std::collections::BTreeSet;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, warn};
use ult_data::Player;

/// Runs command groups against one controller, tracking which buttons are down.
pub struct InputScheduler<C> {
    controller: C,
    timing: Timing,
    held: BTreeSet<Button>,
}

impl<C: LowLevelController> InputScheduler<C> {
    pub fn new(controller: C, timing: Timing) -> Self {
        Self {
            controller,
            timing,
            held: BTreeSet::new(),
        }
    }

    /// Start a new command group with this scheduler's timing.
    pub fn commands(&self) -> CommandBuilder {
        CommandBuilder::new(self.timing)
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn held(&self) -> &BTreeSet<Button> {
        &self.held
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    /// Play the group to completion. On failure every held button is released before
    /// the error is returned.
    pub async fn execute(&mut self, group: &CommandGroup) -> Result<()> {
        if let Err(e) = self.run(group).await {
            warn!("Command group failed, releasing all buttons: {:#}", e);
            if let Err(release_err) = self.release_all().await {
                warn!("Release after failure also failed: {:#}", release_err);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn run(&mut self, group: &CommandGroup) -> Result<()> {
        for (i, batch) in group.batches.iter().enumerate() {
            if i > 0 && !group.pause.is_zero() {
                sleep(group.pause).await;
            }
            self.run_batch(batch).await?;
        }
        Ok(())
    }

    async fn run_batch(&mut self, batch: &Batch) -> Result<()> {
        let start = Instant::now();
        for button in batch.buttons() {
            self.hold(button).await?;
        }

        let mut holds: Vec<_> = batch.holds.iter().collect();
        holds.sort_by_key(|h| h.duration);
        for hold in holds {
            sleep_until(start + hold.duration).await;
            for &button in &hold.buttons {
                self.release(button).await?;
            }
        }

        sleep_until(start + batch.duration()).await;
        Ok(())
    }

    pub async fn hold(&mut self, button: Button) -> Result<()> {
        self.controller.hold(button).await?;
        self.held.insert(button);
        Ok(())
    }

    /// Releasing a button that is not down sends nothing.
    pub async fn release(&mut self, button: Button) -> Result<()> {
        if !self.held.contains(&button) {
            return Ok(());
        }
        self.controller.release(button).await?;
        self.held.remove(&button);
        Ok(())
    }

    pub async fn release_all(&mut self) -> Result<()> {
        self.held.clear();
        self.controller.release_all().await
    }
}

/// Both local controllers. Owned by the state machine; nothing else touches the pads.
pub struct ControllerPair<C> {
    pub one: InputScheduler<C>,
    pub two: InputScheduler<C>,
}

impl<C: LowLevelController> ControllerPair<C> {
    pub fn new(one: C, two: C, timing: Timing) -> Self {
        Self {
            one: InputScheduler::new(one, timing),
            two: InputScheduler::new(two, timing),
        }
    }

    pub fn player(&mut self, player: Player) -> &mut InputScheduler<C> {
        match player {
            Player::One => &mut self.one,
            Player::Two => &mut self.two,
        }
    }

    pub fn commands(&self) -> CommandBuilder {
        self.one.commands()
    }

    /// Run one group per pad at the same time; returns once both are done.
    pub async fn execute_both(&mut self, one: &CommandGroup, two: &CommandGroup) -> Result<()> {
        let (a, b) = tokio::join!(self.one.execute(one), self.two.execute(two));
        a.and(b)
    }

    /// Same group on both pads.
    pub async fn execute_mirrored(&mut self, group: &CommandGroup) -> Result<()> {
        self.execute_both(group, group).await
    }

    pub async fn release_all(&mut self) -> Result<()> {
        debug!("Releasing all buttons on both controllers");
        let (a, b) = tokio::join!(self.one.release_all(), self.two.release_all());
        a.and(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{RecordingController, SignalKind};
    use anyhow::bail;
    use std::time::Duration;

    fn kinds(rec: &RecordingController) -> Vec<SignalKind> {
        rec.signals().into_iter().map(|s| s.kind).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_run_sequentially_with_pause() {
        let rec = RecordingController::new();
        let mut scheduler = InputScheduler::new(rec.clone(), Timing::default());
        let start = Instant::now();
        let group = scheduler
            .commands()
            .hold(Button::Down)
            .for_millis(300)
            .and_then()
            .hold(Button::Up)
            .for_millis(300)
            .build();
        scheduler.execute(&group).await.unwrap();

        let signals = rec.signals();
        assert_eq!(
            kinds(&rec),
            vec![
                SignalKind::Hold(Button::Down),
                SignalKind::Release(Button::Down),
                SignalKind::Hold(Button::Up),
                SignalKind::Release(Button::Up),
            ]
        );
        assert_eq!(signals[1].at - signals[0].at, Duration::from_millis(300));
        assert_eq!(signals[2].at - signals[1].at, Duration::from_millis(20));
        assert_eq!(start.elapsed(), Duration::from_millis(620));
        assert!(scheduler.held().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_buttons_release_together() {
        let rec = RecordingController::new();
        let mut scheduler = InputScheduler::new(rec.clone(), Timing::default());
        let group = scheduler
            .commands()
            .hold(Button::Down)
            .hold(Button::Left)
            .for_millis(3000)
            .build();
        scheduler.execute(&group).await.unwrap();

        let signals = rec.signals();
        assert_eq!(signals.len(), 4);
        assert_eq!(signals[0].at, signals[1].at);
        assert_eq!(signals[2].at - signals[0].at, Duration::from_secs(3));
        assert_eq!(signals[2].at, signals[3].at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_holds_in_a_batch_release_on_their_own_deadline() {
        let rec = RecordingController::new();
        let mut scheduler = InputScheduler::new(rec.clone(), Timing::default());
        let start = Instant::now();
        let group = scheduler
            .commands()
            .hold(Button::Right)
            .for_millis(900)
            .hold(Button::Up)
            .for_millis(400)
            .and_then()
            .press(Button::A)
            .build();
        scheduler.execute(&group).await.unwrap();

        let signals = rec.signals();
        assert_eq!(
            kinds(&rec),
            vec![
                SignalKind::Hold(Button::Right),
                SignalKind::Hold(Button::Up),
                SignalKind::Release(Button::Up),
                SignalKind::Release(Button::Right),
                SignalKind::Hold(Button::A),
                SignalKind::Release(Button::A),
            ]
        );
        assert_eq!(signals[2].at - start, Duration::from_millis(400));
        assert_eq!(signals[3].at - start, Duration::from_millis(900));
        assert_eq!(signals[4].at - start, Duration::from_millis(920));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_batch_only_waits() {
        let rec = RecordingController::new();
        let mut scheduler = InputScheduler::new(rec.clone(), Timing::default());
        let start = Instant::now();
        let group = scheduler.commands().wait_millis(500).build();
        scheduler.execute(&group).await.unwrap();
        assert!(rec.signals().is_empty());
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_release_of_unheld_button_is_noop() {
        let rec = RecordingController::new();
        let mut scheduler = InputScheduler::new(rec.clone(), Timing::default());
        scheduler.release(Button::A).await.unwrap();
        assert!(rec.signals().is_empty());
    }

    /// Accepts the first `budget` holds, then fails.
    struct FlakyController {
        rec: RecordingController,
        budget: usize,
    }

    impl LowLevelController for FlakyController {
        async fn hold(&mut self, button: Button) -> Result<()> {
            if self.budget == 0 {
                bail!("bridge went away");
            }
            self.budget -= 1;
            self.rec.hold(button).await
        }

        async fn release(&mut self, button: Button) -> Result<()> {
            self.rec.release(button).await
        }

        async fn release_all(&mut self) -> Result<()> {
            self.rec.release_all().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_releases_everything() {
        let rec = RecordingController::new();
        let flaky = FlakyController {
            rec: rec.clone(),
            budget: 1,
        };
        let mut scheduler = InputScheduler::new(flaky, Timing::default());
        let group = scheduler
            .commands()
            .hold(Button::Down)
            .hold(Button::Left)
            .for_millis(100)
            .build();

        assert!(scheduler.execute(&group).await.is_err());
        assert_eq!(
            kinds(&rec),
            vec![SignalKind::Hold(Button::Down), SignalKind::ReleaseAll]
        );
        assert!(scheduler.held().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pair_runs_streams_concurrently() {
        let p1 = RecordingController::new();
        let p2 = RecordingController::new();
        let mut pair = ControllerPair::new(p1.clone(), p2.clone(), Timing::default());
        let start = Instant::now();

        let long = pair.commands().hold(Button::Right).for_millis(1200).build();
        let short = pair.commands().press(Button::B).build();
        pair.execute_both(&long, &short).await.unwrap();

        // both start together; total time is the longer stream, not the sum
        assert_eq!(start.elapsed(), Duration::from_millis(1200));
        assert_eq!(p1.signals()[0].at, p2.signals()[0].at);
        assert_eq!(p2.signals()[1].at - start, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_pair_player_lookup() {
        let p1 = RecordingController::new();
        let p2 = RecordingController::new();
        let mut pair = ControllerPair::new(p1.clone(), p2.clone(), Timing::default());
        pair.player(Player::Two).hold(Button::A).await.unwrap();
        assert!(p1.signals().is_empty());
        assert_eq!(kinds(&p2), vec![SignalKind::Hold(Button::A)]);
    }
}
