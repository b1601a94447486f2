use crate::controller::Button;
use std::time::Duration;

/// Default press and pacing for every command group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// How long `press` holds a button
    pub press: Duration,
    /// Pause between two sequential batches
    pub between_batches: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            press: Duration::from_millis(100),
            between_batches: Duration::from_millis(20),
        }
    }
}

/// Buttons pressed at the same instant and released together after `duration`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hold {
    pub buttons: Vec<Button>,
    pub duration: Duration,
}

/// Holds that all start together. The batch lasts as long as its longest hold
/// (or its wait), and each hold is released when its own duration runs out.
///
/// No holds at all makes the batch a plain wait.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Batch {
    pub holds: Vec<Hold>,
    pub wait: Duration,
}

impl Batch {
    pub fn duration(&self) -> Duration {
        self.holds
            .iter()
            .map(|h| h.duration)
            .fold(self.wait, Duration::max)
    }

    /// Every button pressed in this batch, in press order.
    pub fn buttons(&self) -> Vec<Button> {
        let mut buttons = Vec::new();
        for b in self.holds.iter().flat_map(|h| h.buttons.iter().copied()) {
            if !buttons.contains(&b) {
                buttons.push(b);
            }
        }
        buttons
    }

    fn is_empty(&self) -> bool {
        self.holds.is_empty() && self.wait.is_zero()
    }
}

/// Ordered batches for one controller. Built, executed once, then dropped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandGroup {
    pub batches: Vec<Batch>,
    pub pause: Duration,
}

impl CommandGroup {
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Wall time the group takes to run, pauses included.
    pub fn total_duration(&self) -> Duration {
        let holds: Duration = self.batches.iter().map(Batch::duration).sum();
        let gaps = self.batches.len().saturating_sub(1) as u32;
        holds + self.pause * gaps
    }
}

/// Chainable builder for a [`CommandGroup`].
///
/// `hold` queues buttons, `for_duration` fixes how long the queued buttons stay down,
/// `and_then` closes the current batch. Everything between two `and_then` starts at
/// once; the next batch waits for the longest of them.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    timing: Timing,
    batches: Vec<Batch>,
    current: Batch,
    pending: Vec<Button>,
}

impl CommandBuilder {
    pub fn new(timing: Timing) -> Self {
        Self {
            timing,
            batches: Vec::new(),
            current: Batch::default(),
            pending: Vec::new(),
        }
    }

    pub fn hold(mut self, button: Button) -> Self {
        self.pending.push(button);
        self
    }

    /// Hold for the default press time.
    pub fn press(self, button: Button) -> Self {
        let press = self.timing.press;
        self.hold(button).for_duration(press)
    }

    pub fn for_duration(mut self, duration: Duration) -> Self {
        self.queue_pending(duration);
        self
    }

    pub fn for_millis(self, ms: u64) -> Self {
        self.for_duration(Duration::from_millis(ms))
    }

    /// Sequential barrier: what comes next starts after the current batch and a short pause.
    pub fn and_then(mut self) -> Self {
        self.close_batch();
        self
    }

    /// Idle inside the current batch.
    pub fn wait(mut self, duration: Duration) -> Self {
        self.current.wait = self.current.wait.max(duration);
        self
    }

    pub fn wait_millis(self, ms: u64) -> Self {
        self.wait(Duration::from_millis(ms))
    }

    pub fn build(mut self) -> CommandGroup {
        self.close_batch();
        CommandGroup {
            batches: self.batches,
            pause: self.timing.between_batches,
        }
    }

    fn queue_pending(&mut self, duration: Duration) {
        if self.pending.is_empty() {
            return;
        }
        let buttons = std::mem::take(&mut self.pending);
        self.current.holds.push(Hold { buttons, duration });
    }

    fn close_batch(&mut self) {
        // buttons held without a duration default to a press
        let press = self.timing.press;
        self.queue_pending(press);
        let batch = std::mem::take(&mut self.current);
        if !batch.is_empty() {
            self.batches.push(batch);
        }
    }
}
