mod client;
mod protocol;
mod transport;

pub use client::{DispatchSnapshot, DispatchTimings, MatchDispatcher};
pub use protocol::{
    Identify, InboundEvent, MatchAssignment, MatchId, OutboundEvent, PlayerId, PlayerMeta,
    Ruleset, WinnerReport,
};
pub use transport::{DispatcherTransport, TransportEvent, WsTransport, RECONNECT_DELAY};

#[cfg(any(test, feature = "test-support"))]
pub use transport::MockTransport;
