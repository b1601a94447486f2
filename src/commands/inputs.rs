use anyhow::Result;
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;
use ult_data::Player;
use ult_input::{ControllerPair, LowLevelController};
use ult_state::Macros;

const BETWEEN_PLAYERS: Duration = Duration::from_secs(5);

/// Press every button on player 1's pad, then player 2's, slowly enough to map them.
pub async fn setup_inputs<C: LowLevelController>(
    pads: &mut ControllerPair<C>,
    macros: &Macros,
) -> Result<()> {
    let check = macros.input_check();
    for player in [Player::One, Player::Two] {
        if player == Player::Two {
            info!("Waiting between players");
            sleep(BETWEEN_PLAYERS).await;
        }
        info!("Setting up {}", player);
        pads.player(player).execute(&check).await?;
    }
    pads.release_all().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use ult_input::{Button, RecordingController, SignalKind, Timing};

    #[tokio::test(start_paused = true)]
    async fn test_every_button_on_each_pad_in_turn() {
        let one = RecordingController::new();
        let two = RecordingController::new();
        let mut pads = ControllerPair::new(one.clone(), two.clone(), Timing::default());

        setup_inputs(&mut pads, &Macros::new(Timing::default()))
            .await
            .unwrap();

        for pad in [&one, &two] {
            let held: Vec<Button> = pad
                .signals()
                .iter()
                .filter_map(|s| match s.kind {
                    SignalKind::Hold(b) => Some(b),
                    _ => None,
                })
                .collect();
            assert_eq!(held, Button::ALL.to_vec());
        }

        let last_one = one
            .signals()
            .iter()
            .filter(|s| s.kind != SignalKind::ReleaseAll)
            .map(|s| s.at)
            .max()
            .unwrap();
        let first_two = two.signals().iter().map(|s| s.at).min().unwrap();
        assert!(first_two - last_one >= BETWEEN_PLAYERS);
    }
}
