mod macros;
mod machine;
mod screen;
mod stabilizer;

#[cfg(any(test, feature = "test-support"))]
pub mod fixtures;

pub use machine::{GameStateMachine, TickDelays, TickOutcome, TickSignal, CPU_SETUP_ATTEMPTS};
pub use macros::{CursorModel, Macros};
pub use screen::{detect_screen, is_character_select, winner, GameScreen};
pub use stabilizer::{PerceivedState, Stabilizer, AGREEING_READS, READ_SPACING};
