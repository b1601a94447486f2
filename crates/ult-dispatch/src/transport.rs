use crate::protocol::{Identify, InboundEvent, OutboundEvent};
use anyhow::{anyhow, bail, Context, Result};
use futures_util::{Sink, SinkExt, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Pause between connection attempts. Reconnection never gives up.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything the transport can tell the client, drained once per tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connection is up and we have identified. `reconnect` is false only the first time.
    Connected { reconnect: bool },
    Disconnected,
    Inbound(InboundEvent),
}

/// Bidirectional event stream to the match dispatcher.
pub trait DispatcherTransport: Send {
    /// Resolves once the event was written to the connection.
    fn send(&mut self, event: OutboundEvent) -> impl Future<Output = Result<()>> + Send;

    /// Next buffered event, without waiting.
    fn try_recv(&mut self) -> Option<TransportEvent>;
}

type Outgoing = (OutboundEvent, oneshot::Sender<Result<()>>);

/// Websocket connection to the dispatcher, kept alive by a background task.
pub struct WsTransport {
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    outbound: mpsc::UnboundedSender<Outgoing>,
    connected: watch::Receiver<bool>,
}

impl WsTransport {
    /// Start connecting in the background. Identifies with `key` on every connection.
    pub fn spawn(url: String, key: String) -> Self {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (connected_tx, connected) = watch::channel(false);
        tokio::spawn(run_connection(url, key, inbound_tx, outbound_rx, connected_tx));
        Self {
            inbound,
            outbound,
            connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }
}

impl DispatcherTransport for WsTransport {
    async fn send(&mut self, event: OutboundEvent) -> Result<()> {
        if !self.is_connected() {
            bail!("dispatcher is not connected");
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        self.outbound
            .send((event, ack_tx))
            .map_err(|_| anyhow!("dispatcher connection task stopped"))?;
        match timeout(SEND_TIMEOUT, ack_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => bail!("connection dropped before the event was sent"),
            Err(_) => bail!("timed out sending to the dispatcher"),
        }
    }

    fn try_recv(&mut self) -> Option<TransportEvent> {
        self.inbound.try_recv().ok()
    }
}

async fn send_event<S>(sink: &mut S, event: &OutboundEvent) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let payload = serde_json::to_string(event).context("Failed to encode event")?;
    sink.send(Message::Text(payload))
        .await
        .context("Failed to write to dispatcher socket")
}

/// Write one queued event and ack it. Returns false once the socket is unusable.
///
/// A sender that already gave up waiting has dropped its ack receiver and will retry on
/// its own, so its event is discarded rather than written late and delivered twice.
async fn forward<S>(sink: &mut S, event: &OutboundEvent, ack: oneshot::Sender<Result<()>>) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    if ack.is_closed() {
        debug!(?event, "Dropping event its sender stopped waiting for");
        return true;
    }
    let result = send_event(sink, event).await;
    let written = result.is_ok();
    let _ = ack.send(result);
    written
}

async fn run_connection(
    url: String,
    key: String,
    inbound: mpsc::UnboundedSender<TransportEvent>,
    mut outbound: mpsc::UnboundedReceiver<Outgoing>,
    connected: watch::Sender<bool>,
) {
    let mut reconnecting = false;
    loop {
        match connect_async(url.as_str()).await {
            Ok((socket, _response)) => {
                info!("Connected to dispatcher at {}", url);
                let (mut sink, mut stream) = socket.split();
                let identify = OutboundEvent::Identify(Identify {
                    key: key.clone(),
                    reconnecting,
                });

                match send_event(&mut sink, &identify).await {
                    Err(err) => warn!("Failed to identify with dispatcher: {:#}", err),
                    Ok(()) => {
                        let _ = connected.send(true);
                        if inbound
                            .send(TransportEvent::Connected {
                                reconnect: reconnecting,
                            })
                            .is_err()
                        {
                            return;
                        }
                        reconnecting = true;

                        loop {
                            tokio::select! {
                                next = stream.next() => match next {
                                    Some(Ok(Message::Text(text))) => {
                                        match serde_json::from_str::<InboundEvent>(&text) {
                                            Ok(event) => {
                                                if inbound.send(TransportEvent::Inbound(event)).is_err() {
                                                    return;
                                                }
                                            }
                                            Err(err) => {
                                                debug!(?err, payload = %text, "Ignoring unknown dispatcher message");
                                            }
                                        }
                                    }
                                    Some(Ok(Message::Close(_))) | None => break,
                                    Some(Ok(_)) => {}
                                    Some(Err(err)) => {
                                        warn!(?err, "Dispatcher read error");
                                        break;
                                    }
                                },
                                outgoing = outbound.recv() => match outgoing {
                                    Some((event, ack)) => {
                                        if !forward(&mut sink, &event, ack).await {
                                            break;
                                        }
                                    }
                                    // transport handle dropped
                                    None => return,
                                },
                            }
                        }

                        let _ = connected.send(false);
                        warn!("Disconnected from dispatcher, reconnecting");
                        if inbound.send(TransportEvent::Disconnected).is_err() {
                            return;
                        }
                    }
                }
            }
            Err(err) => warn!(?err, "Failed to connect to dispatcher, retrying"),
        }

        // anything queued for the dead connection fails now
        while let Ok((_, ack)) = outbound.try_recv() {
            let _ = ack.send(Err(anyhow!("dispatcher is not connected")));
        }
        sleep(RECONNECT_DELAY).await;
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use mock::MockTransport;

#[cfg(any(test, feature = "test-support"))]
mod mock {
    use super::*;
    use crate::protocol::{MatchAssignment, WinnerReport};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MockState {
        inbound: VecDeque<TransportEvent>,
        sent: Vec<OutboundEvent>,
        failures_left: usize,
        attempts: usize,
    }

    /// In-memory dispatcher. Clones share state so tests can script it while the client owns it.
    #[derive(Clone, Default)]
    pub struct MockTransport {
        state: Arc<Mutex<MockState>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> Option<R> {
            self.state.lock().ok().map(|mut s| f(&mut s))
        }

        pub fn push(&self, event: TransportEvent) {
            self.with_state(|s| s.inbound.push_back(event));
        }

        pub fn deliver(&self, assignment: MatchAssignment) {
            self.push(TransportEvent::Inbound(InboundEvent::Match(assignment)));
        }

        pub fn start_signal(&self) {
            self.push(TransportEvent::Inbound(InboundEvent::StartMatch));
        }

        /// Simulate a dropped connection coming back.
        pub fn reconnect(&self) {
            self.push(TransportEvent::Disconnected);
            self.push(TransportEvent::Connected { reconnect: true });
        }

        /// The next `n` sends fail.
        pub fn fail_next(&self, n: usize) {
            self.with_state(|s| s.failures_left = n);
        }

        pub fn sent(&self) -> Vec<OutboundEvent> {
            self.with_state(|s| s.sent.clone()).unwrap_or_default()
        }

        pub fn send_attempts(&self) -> usize {
            self.with_state(|s| s.attempts).unwrap_or_default()
        }

        pub fn winners(&self) -> Vec<WinnerReport> {
            self.sent()
                .into_iter()
                .filter_map(|e| match e {
                    OutboundEvent::Winner(r) => Some(r),
                    _ => None,
                })
                .collect()
        }

        pub fn reemit_requests(&self) -> usize {
            self.sent()
                .iter()
                .filter(|e| matches!(e, OutboundEvent::ReemitLast))
                .count()
        }
    }

    impl DispatcherTransport for MockTransport {
        async fn send(&mut self, event: OutboundEvent) -> Result<()> {
            let outcome = self.with_state(|s| {
                s.attempts += 1;
                if s.failures_left > 0 {
                    s.failures_left -= 1;
                    false
                } else {
                    s.sent.push(event);
                    true
                }
            });
            match outcome {
                Some(true) => Ok(()),
                _ => bail!("mock dispatcher refused the event"),
            }
        }

        fn try_recv(&mut self) -> Option<TransportEvent> {
            self.with_state(|s| s.inbound.pop_front()).flatten()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_after_send_timeout_is_not_written() {
        let mut sink: Vec<Message> = Vec::new();

        let (ack, ack_rx) = oneshot::channel();
        drop(ack_rx);
        assert!(forward(&mut sink, &OutboundEvent::ReemitLast, ack).await);
        assert!(sink.is_empty());

        let (ack, ack_rx) = oneshot::channel();
        assert!(forward(&mut sink, &OutboundEvent::ReemitLast, ack).await);
        assert_eq!(sink.len(), 1);
        assert!(ack_rx.await.unwrap().is_ok());
    }
}
