use crate::screen::GameScreen;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Consecutive agreeing reads needed before a screen is acted on.
pub const AGREEING_READS: usize = 3;
/// Minimum spacing between two reads.
pub const READ_SPACING: Duration = Duration::from_millis(500);

/// One classified sample. Only ever derived from the latest frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerceivedState {
    pub screen: GameScreen,
    pub sampled_at: Instant,
}

/// Debounces screen reads: a screen counts only once the trailing window agrees.
///
/// There is no cap on how many reads it takes; menu transitions can disagree for a while.
#[derive(Debug)]
pub struct Stabilizer {
    window: VecDeque<PerceivedState>,
    required: usize,
}

impl Default for Stabilizer {
    fn default() -> Self {
        Self::new(AGREEING_READS)
    }
}

impl Stabilizer {
    pub fn new(required: usize) -> Self {
        let required = required.max(1);
        Self {
            window: VecDeque::with_capacity(required),
            required,
        }
    }

    /// Feed a read; returns the screen once the last `required` reads agree.
    pub fn push(&mut self, read: PerceivedState) -> Option<GameScreen> {
        if self.window.len() == self.required {
            self.window.pop_front();
        }
        self.window.push_back(read);

        if self.window.len() < self.required {
            return None;
        }
        let first = self.window[0].screen;
        if self.window.iter().all(|r| r.screen == first) {
            Some(first)
        } else {
            debug!(
                "Reads disagree: {:?}",
                self.window.iter().map(|r| r.screen).collect::<Vec<_>>()
            );
            None
        }
    }

    /// Forget previous reads; every tick stabilizes from scratch.
    pub fn reset(&mut self) {
        self.window.clear();
    }
}
