use crate::controller::{Button, LowLevelController};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};
use tracing::{debug, info, trace};
use ult_data::Player;

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Line-oriented link to the controller bridge.
///
/// Both virtual pads share one link. Each signal is one ASCII line:
/// `<id>+` holds, `<id>-` releases, several ids may share a line separated by commas.
/// `r` resets every button on both pads.
#[derive(Clone)]
pub struct BridgeLink {
    writer: Arc<Mutex<Writer>>,
}

impl BridgeLink {
    /// Bridge on a serial port: 8N1, no flow control, raw mode so line endings go out as
    /// written.
    pub async fn open_serial(path: &Path, baud_rate: u32) -> Result<Self> {
        let port = tokio_serial::new(path.to_string_lossy(), baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .with_context(|| format!("Failed to open controller bridge {}", path.display()))?;
        info!("Controller bridge on {} at {} baud", path.display(), baud_rate);
        Ok(Self::from_writer(port))
    }

    /// Emulator-side bridge listening on a socket.
    pub async fn connect_tcp(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("Failed to connect to controller bridge at {}", addr))?;
        stream.set_nodelay(true)?;
        info!("Controller bridge at {}", addr);
        Ok(Self::from_writer(stream))
    }

    /// Discards every signal; for running without pads attached.
    pub fn dry_run() -> Self {
        info!("No controller bridge configured, inputs are discarded");
        Self::from_writer(tokio::io::sink())
    }

    pub fn from_writer<W: AsyncWrite + Send + Unpin + 'static>(writer: W) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    async fn send_line(&self, line: &str) -> Result<()> {
        trace!("bridge <- {}", line);
        let mut writer = self.writer.lock().await;
        writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .context("Controller bridge write failed")?;
        writer.flush().await.context("Controller bridge flush failed")?;
        Ok(())
    }

    /// Release everything on both pads.
    pub async fn clear(&self) -> Result<()> {
        debug!("Resetting controller bridge");
        self.send_line("r").await
    }

    pub fn controller(&self, player: Player) -> BridgeController {
        BridgeController {
            link: self.clone(),
            player,
        }
    }
}

/// One pad behind a [`BridgeLink`].
#[derive(Clone)]
pub struct BridgeController {
    link: BridgeLink,
    player: Player,
}

impl BridgeController {
    /// Bridge id of a button, or `None` if the bridge has no line for it.
    pub fn button_id(player: Player, button: Button) -> Option<u8> {
        let id = match (player, button) {
            (_, Button::R) => return None,
            (Player::One, Button::A) => 0,
            (Player::One, Button::B) => 1,
            (Player::One, Button::L) => 2,
            (Player::One, Button::Start) => 3,
            (Player::One, Button::Up) => 6,
            (Player::One, Button::Down) => 7,
            (Player::One, Button::Left) => 8,
            (Player::One, Button::Right) => 9,
            (Player::Two, Button::A) => 10,
            (Player::Two, Button::B) => 11,
            (Player::Two, Button::L) => 12,
            (Player::Two, Button::Start) => 13,
            (Player::Two, Button::Up) => 14,
            (Player::Two, Button::Down) => 15,
            (Player::Two, Button::Left) => 16,
            (Player::Two, Button::Right) => 17,
        };
        Some(id)
    }

    async fn signal(&self, buttons: &[Button], suffix: char) -> Result<()> {
        let commands: Vec<String> = buttons
            .iter()
            .filter_map(|&b| Self::button_id(self.player, b))
            .map(|id| format!("{}{}", id, suffix))
            .collect();
        if commands.is_empty() {
            trace!("{:?} is not wired on the bridge", buttons);
            return Ok(());
        }
        self.link.send_line(&commands.join(",")).await
    }
}

impl LowLevelController for BridgeController {
    async fn hold(&mut self, button: Button) -> Result<()> {
        self.signal(&[button], '+').await
    }

    async fn release(&mut self, button: Button) -> Result<()> {
        self.signal(&[button], '-').await
    }

    /// Only this pad's buttons; `r` would also drop the other player's.
    async fn release_all(&mut self) -> Result<()> {
        self.signal(&Button::ALL, '-').await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn read_n(reader: &mut (impl tokio::io::AsyncRead + Unpin), n: usize) -> String {
        let mut buf = vec![0u8; n];
        reader.read_exact(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn test_line_protocol_per_player() {
        let (client, mut server) = tokio::io::duplex(1024);
        let link = BridgeLink::from_writer(client);
        let mut one = link.controller(Player::One);
        let mut two = link.controller(Player::Two);

        one.hold(Button::A).await.unwrap();
        two.hold(Button::Start).await.unwrap();
        two.release(Button::Start).await.unwrap();
        one.hold(Button::R).await.unwrap();
        link.clear().await.unwrap();

        assert_eq!(read_n(&mut server, 13).await, "0+\n13+\n13-\nr\n");
    }

    #[tokio::test]
    async fn test_release_all_only_touches_own_pad() {
        let (client, mut server) = tokio::io::duplex(1024);
        let link = BridgeLink::from_writer(client);
        link.controller(Player::Two).release_all().await.unwrap();

        let expected = "10-,11-,13-,12-,14-,17-,15-,16-\n";
        assert_eq!(read_n(&mut server, expected.len()).await, expected);
    }

    #[tokio::test]
    async fn test_missing_serial_device_is_an_error() {
        let dir = std::env::temp_dir().join("ult-input-no-such-bridge");
        let err = BridgeLink::open_serial(&dir, 115_200).await.err().unwrap();
        assert!(format!("{:#}", err).contains("Failed to open controller bridge"));
    }

    #[test]
    fn test_button_ids() {
        assert_eq!(BridgeController::button_id(Player::One, Button::Right), Some(9));
        assert_eq!(BridgeController::button_id(Player::Two, Button::Up), Some(14));
        assert_eq!(BridgeController::button_id(Player::Two, Button::R), None);
    }
}
