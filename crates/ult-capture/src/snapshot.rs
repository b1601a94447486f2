use crate::{normalize_frame, FrameSource};
use anyhow::{bail, Context, Result};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error};

/// External grabber invocation, e.g. ffmpeg pulling one frame from a capture card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotCommand {
    pub program: String,
    pub args: Vec<String>,
    /// File the grabber writes; read back after every run.
    pub output: PathBuf,
}

impl Default for SnapshotCommand {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            args: [
                "-rtbufsize",
                "100M",
                "-f",
                "dshow",
                "-i",
                "video=OBS Virtual Camera",
                "-frames",
                "1",
                "-q:v",
                "1",
                "pic.jpg",
                "-y",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            output: PathBuf::from("pic.jpg"),
        }
    }
}

/// Frame source for a physical console behind a capture device (real hardware mode).
///
/// A failed grab is retried forever: without a picture there is nothing else to do.
pub struct SnapshotCapture {
    command: SnapshotCommand,
    retry_delay: Duration,
}

impl SnapshotCapture {
    pub fn new(command: SnapshotCommand) -> Self {
        Self {
            command,
            retry_delay: Duration::from_secs(2),
        }
    }

    async fn grab(&self) -> Result<RgbaImage> {
        let output = Command::new(&self.command.program)
            .args(&self.command.args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to spawn {}", self.command.program))?;
        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.command.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let path = self.command.output.clone();
        let frame = tokio::task::spawn_blocking(move || {
            image::open(&path)
                .with_context(|| format!("Failed to open snapshot {}", path.display()))
                .map(|img| img.to_rgba8())
        })
        .await
        .context("Snapshot decode task panicked")??;
        Ok(frame)
    }
}

impl FrameSource for SnapshotCapture {
    async fn sample(&mut self) -> Result<RgbaImage> {
        loop {
            match self.grab().await {
                Ok(frame) => {
                    debug!("Snapshot {}x{}", frame.width(), frame.height());
                    return Ok(normalize_frame(frame));
                }
                Err(e) => {
                    error!(target: "important", "Error when capturing screenshot: {:#}", e);
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}
