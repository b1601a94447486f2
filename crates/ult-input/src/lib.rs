mod bridge;
mod command;
mod controller;
mod scheduler;

pub use bridge::{BridgeController, BridgeLink};
pub use command::{Batch, CommandBuilder, CommandGroup, Hold, Timing};
pub use controller::{Button, LowLevelController, RecordingController, Signal, SignalKind};
pub use scheduler::{ControllerPair, InputScheduler};
