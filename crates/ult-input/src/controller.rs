use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tracing::trace;

/// Buttons the runner ever needs. The stick is driven as a d-pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Button {
    A,
    B,
    Start,
    L,
    R,
    Up,
    Right,
    Down,
    Left,
}

impl Button {
    pub const ALL: [Button; 9] = [
        Button::A,
        Button::B,
        Button::Start,
        Button::L,
        Button::R,
        Button::Up,
        Button::Right,
        Button::Down,
        Button::Left,
    ];
}

/// Raw button line of one virtual controller. Implemented by the hardware bridges.
pub trait LowLevelController: Send {
    fn hold(&mut self, button: Button) -> impl Future<Output = Result<()>> + Send;
    fn release(&mut self, button: Button) -> impl Future<Output = Result<()>> + Send;
    fn release_all(&mut self) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Hold(Button),
    Release(Button),
    ReleaseAll,
}

/// One low-level signal and when it was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal {
    pub kind: SignalKind,
    pub at: Instant,
}

/// Controller that sends nothing and remembers every signal.
///
/// Used for dry runs without a bridge attached, and by tests to inspect timing.
#[derive(Debug, Clone, Default)]
pub struct RecordingController {
    log: Arc<Mutex<Vec<Signal>>>,
}

impl RecordingController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far (shared between clones).
    pub fn signals(&self) -> Vec<Signal> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut l) = self.log.lock() {
            l.clear();
        }
    }

    fn record(&self, kind: SignalKind) {
        trace!("{:?}", kind);
        if let Ok(mut l) = self.log.lock() {
            l.push(Signal {
                kind,
                at: Instant::now(),
            });
        }
    }
}

impl LowLevelController for RecordingController {
    async fn hold(&mut self, button: Button) -> Result<()> {
        self.record(SignalKind::Hold(button));
        Ok(())
    }

    async fn release(&mut self, button: Button) -> Result<()> {
        self.record(SignalKind::Release(button));
        Ok(())
    }

    async fn release_all(&mut self) -> Result<()> {
        self.record(SignalKind::ReleaseAll);
        Ok(())
    }
}
