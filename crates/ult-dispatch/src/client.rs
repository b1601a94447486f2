use crate::protocol::{InboundEvent, MatchAssignment, MatchId, OutboundEvent, WinnerReport};
use crate::transport::{DispatcherTransport, TransportEvent};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use ult_data::Player;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTimings {
    /// Wait between two attempts at reporting a winner
    pub report_retry: Duration,
    /// After a report, how long before a start signal is honored again
    pub start_cooldown: Duration,
}

impl Default for DispatchTimings {
    fn default() -> Self {
        Self {
            report_retry: Duration::from_secs(5),
            start_cooldown: Duration::from_secs(35),
        }
    }
}

/// All dispatcher-related state. Only [`MatchDispatcher`] mutates it.
#[derive(Debug, Default)]
struct MatchSlot {
    assignment: Option<MatchAssignment>,
    start_signal: bool,
    buffered_winner: Option<Player>,
    /// Match id of the last confirmed report; re-deliveries of it are stale
    last_reported: Option<MatchId>,
    /// A report went through and no new assignment arrived yet
    awaiting_next: bool,
    start_not_before: Option<Instant>,
    selected: [bool; 2],
}

/// Read-only view handed to the match loop each tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSnapshot {
    pub assignment: Option<MatchAssignment>,
    /// Start signal received and the post-report cooldown is over
    pub start_signal: bool,
    pub buffered_winner: Option<Player>,
    selected: [bool; 2],
}

impl DispatchSnapshot {
    pub fn selection_done(&self, player: Player) -> bool {
        self.selected[slot_index(player)]
    }

    pub fn both_selected(&self) -> bool {
        self.selected.iter().all(|s| *s)
    }
}

fn slot_index(player: Player) -> usize {
    match player {
        Player::One => 0,
        Player::Two => 1,
    }
}

/// Single-flight match assignment client.
///
/// Holds at most one assignment, reports winners until the dispatcher accepts them and
/// reconciles duplicate or missed deliveries.
pub struct MatchDispatcher<T> {
    transport: T,
    slot: MatchSlot,
    timings: DispatchTimings,
}

impl<T: DispatcherTransport> MatchDispatcher<T> {
    pub fn new(transport: T, timings: DispatchTimings) -> Self {
        Self {
            transport,
            slot: MatchSlot::default(),
            timings,
        }
    }

    pub fn snapshot(&self) -> DispatchSnapshot {
        let cooled_down = self
            .slot
            .start_not_before
            .map_or(true, |t| Instant::now() >= t);
        DispatchSnapshot {
            assignment: self.slot.assignment.clone(),
            start_signal: self.slot.start_signal && cooled_down,
            buffered_winner: self.slot.buffered_winner,
            selected: self.slot.selected,
        }
    }

    /// Drain everything the transport received since the last tick.
    pub async fn poll_inbound(&mut self) {
        while let Some(event) = self.transport.try_recv() {
            match event {
                TransportEvent::Connected { reconnect: false } => {
                    info!("Dispatcher connected");
                }
                TransportEvent::Connected { reconnect: true } => {
                    info!("Dispatcher reconnected");
                    if let Some(held) = self.slot.assignment.clone() {
                        info!("Re-delivering held match {} locally", held.match_id);
                        self.accept_assignment(held).await;
                    }
                }
                TransportEvent::Disconnected => warn!("Dispatcher connection lost"),
                TransportEvent::Inbound(InboundEvent::Match(assignment)) => {
                    self.on_assignment(assignment).await;
                }
                TransportEvent::Inbound(InboundEvent::StartMatch) => {
                    info!("Start signal received");
                    self.slot.start_signal = true;
                }
            }
        }
    }

    async fn on_assignment(&mut self, assignment: MatchAssignment) {
        let id = assignment.match_id;
        if self.slot.last_reported == Some(id) {
            debug!("Ignoring re-delivery of already reported match {}", id);
            return;
        }
        if let Some(held) = &self.slot.assignment {
            if held.match_id == id {
                debug!("Ignoring duplicate delivery of match {}", id);
                return;
            }
            warn!(
                "Match {} replaces unfinished match {}",
                id, held.match_id
            );
        }
        info!(
            "Received match {}: {} ({}) vs {} ({})",
            id,
            assignment.first.name,
            assignment.first.character,
            assignment.second.name,
            assignment.second.character
        );
        self.accept_assignment(assignment).await;
    }

    /// Take `assignment` as the current one, or report a buffered winner against it.
    async fn accept_assignment(&mut self, assignment: MatchAssignment) {
        self.slot.awaiting_next = false;
        if let Some(winner) = self.slot.buffered_winner {
            info!(
                "Reporting buffered {} win against match {}",
                winner.number(),
                assignment.match_id
            );
            self.report(&assignment, winner).await;
            return;
        }
        if self.slot.assignment.as_ref() != Some(&assignment) {
            self.slot.selected = [false; 2];
        }
        self.slot.assignment = Some(assignment);
    }

    /// The tick loop saw a winner banner.
    pub async fn record_winner(&mut self, winner: Player) {
        if self.slot.awaiting_next {
            debug!("Already reported this match, ignoring {} win", winner.number());
            return;
        }
        match self.slot.assignment.clone() {
            Some(assignment) => {
                info!("Player {} won match {}", winner.number(), assignment.match_id);
                self.report(&assignment, winner).await;
            }
            None => {
                info!(
                    "Player {} won but no match is held, buffering",
                    winner.number()
                );
                self.slot.buffered_winner = Some(winner);
                self.request_redelivery().await;
            }
        }
    }

    /// Report until the dispatcher takes it, then clear the slot and ask for the next match.
    async fn report(&mut self, assignment: &MatchAssignment, winner: Player) {
        let report = WinnerReport::new(assignment, winner);
        let mut attempt = 1u32;
        while let Err(err) = self
            .transport
            .send(OutboundEvent::Winner(report.clone()))
            .await
        {
            warn!(
                "Winner report for match {} failed (attempt {}): {:#}",
                report.match_id, attempt, err
            );
            attempt += 1;
            sleep(self.timings.report_retry).await;
        }
        info!(
            "Reported match {}: {} beat {}",
            report.match_id, report.winner.name, report.loser.name
        );

        self.slot.last_reported = Some(report.match_id);
        self.slot.assignment = None;
        self.slot.buffered_winner = None;
        self.slot.start_signal = false;
        self.slot.selected = [false; 2];
        self.slot.awaiting_next = true;
        self.slot.start_not_before = Some(Instant::now() + self.timings.start_cooldown);

        self.send_reemit().await;
    }

    /// Ask the dispatcher to send its current assignment again. Failure is only logged;
    /// the next tick asks again.
    pub async fn request_redelivery(&mut self) {
        self.slot.selected = [false; 2];
        self.send_reemit().await;
    }

    async fn send_reemit(&mut self) {
        debug!("Requesting match re-delivery");
        if let Err(err) = self.transport.send(OutboundEvent::ReemitLast).await {
            warn!("Re-delivery request failed: {:#}", err);
        }
    }

    pub fn mark_selected(&mut self, player: Player) {
        self.slot.selected[slot_index(player)] = true;
    }

    /// The start did not take; pick characters again next time.
    pub fn reset_selection(&mut self) {
        self.slot.selected = [false; 2];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PlayerId, PlayerMeta, Ruleset};
    use crate::transport::MockTransport;

    fn player(id: i64, name: &str, character: &str) -> PlayerMeta {
        PlayerMeta {
            id: PlayerId::Number(id),
            name: name.into(),
            character: character.into(),
            color: None,
            temporary: None,
        }
    }

    fn assignment(match_id: MatchId) -> MatchAssignment {
        MatchAssignment {
            match_id,
            first: player(1, "alice", "Mario"),
            second: player(2, "bob", "Link"),
            is_custom_match: false,
            ruleset: Ruleset::Fair,
        }
    }

    fn client() -> (MatchDispatcher<MockTransport>, MockTransport) {
        let mock = MockTransport::new();
        (
            MatchDispatcher::new(mock.clone(), DispatchTimings::default()),
            mock,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_clears_assignment_and_requests_next() {
        let (mut client, mock) = client();
        mock.deliver(assignment(5));
        client.poll_inbound().await;
        assert_eq!(client.snapshot().assignment, Some(assignment(5)));

        client.record_winner(Player::One).await;
        let winners = mock.winners();
        assert_eq!(winners.len(), 1);
        assert!(winners[0].is_winner_first_player);
        assert_eq!(winners[0].winner.name, "alice");
        assert_eq!(client.snapshot().assignment, None);
        assert_eq!(mock.reemit_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_win_twice_reports_once() {
        let (mut client, mock) = client();
        mock.deliver(assignment(5));
        client.poll_inbound().await;

        client.record_winner(Player::Two).await;
        client.record_winner(Player::Two).await;
        // the stale re-send of the reported match is ignored too
        mock.deliver(assignment(5));
        client.poll_inbound().await;

        assert_eq!(mock.winners().len(), 1);
        assert_eq!(client.snapshot().assignment, None);
        assert_eq!(mock.reemit_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_retries_until_accepted() {
        let (mut client, mock) = client();
        mock.deliver(assignment(9));
        client.poll_inbound().await;
        mock.fail_next(3);

        let start = Instant::now();
        client.record_winner(Player::One).await;
        assert_eq!(start.elapsed(), Duration::from_secs(15));
        assert_eq!(mock.winners().len(), 1);
        assert_eq!(client.snapshot().assignment, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffered_winner_reported_against_next_assignment() {
        let (mut client, mock) = client();
        client.record_winner(Player::Two).await;
        assert_eq!(client.snapshot().buffered_winner, Some(Player::Two));
        assert_eq!(mock.reemit_requests(), 1);
        assert!(mock.winners().is_empty());

        mock.deliver(assignment(11));
        mock.deliver(assignment(11));
        client.poll_inbound().await;

        let winners = mock.winners();
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].match_id, 11);
        assert!(!winners[0].is_winner_first_player);
        let snapshot = client.snapshot();
        assert_eq!(snapshot.buffered_winner, None);
        assert_eq!(snapshot.assignment, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_keeps_held_assignment_without_asking() {
        let (mut client, mock) = client();
        mock.push(TransportEvent::Connected { reconnect: false });
        mock.deliver(assignment(3));
        client.poll_inbound().await;
        client.mark_selected(Player::One);

        mock.reconnect();
        client.poll_inbound().await;

        let snapshot = client.snapshot();
        assert_eq!(snapshot.assignment, Some(assignment(3)));
        assert!(snapshot.selection_done(Player::One));
        assert_eq!(mock.reemit_requests(), 0);
        assert!(mock.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_signal_waits_for_cooldown() {
        let (mut client, mock) = client();
        mock.deliver(assignment(1));
        mock.start_signal();
        client.poll_inbound().await;
        assert!(client.snapshot().start_signal);

        client.record_winner(Player::One).await;
        assert!(!client.snapshot().start_signal);

        mock.deliver(assignment(2));
        mock.start_signal();
        client.poll_inbound().await;
        assert!(!client.snapshot().start_signal);

        tokio::time::advance(Duration::from_secs(35)).await;
        assert!(client.snapshot().start_signal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_assignment_resets_selection() {
        let (mut client, mock) = client();
        mock.deliver(assignment(1));
        client.poll_inbound().await;
        client.mark_selected(Player::One);
        client.mark_selected(Player::Two);
        assert!(client.snapshot().both_selected());

        mock.deliver(assignment(2));
        client.poll_inbound().await;
        assert!(!client.snapshot().selection_done(Player::One));
        assert_eq!(client.snapshot().assignment.map(|a| a.match_id), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_redelivery_request_is_not_fatal() {
        let (mut client, mock) = client();
        mock.fail_next(1);
        client.request_redelivery().await;
        assert_eq!(mock.send_attempts(), 1);
        assert_eq!(mock.reemit_requests(), 0);
    }
}
