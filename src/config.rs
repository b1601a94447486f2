use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use ult_capture::snapshot::SnapshotCommand;
use ult_capture::ViewportOffset;
use ult_dispatch::DispatchTimings;
use ult_vision::{Marker, DEFAULT_TOLERANCE};

/// Environment variable holding the key we identify to the dispatcher with.
pub const DISPATCHER_KEY_ENV: &str = "ULT_DISPATCHER_KEY";

#[derive(Parser, Debug)]
#[command(name = "ult-runner")]
#[command(about = "Plays CPU exhibition matches unattended and reports the results")]
pub struct Cli {
    /// Runner configuration file, created with defaults when missing
    #[arg(long, global = true, default_value = "runner.json")]
    pub config: PathBuf,
    /// Drive a physical console through the capture device and bridge
    #[arg(long, global = true)]
    pub real_hardware: bool,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Play matches handed out by the dispatcher (default)
    Run,
    /// Play random matches without a dispatcher
    Solo,
    /// Save the current screen region of a marker as its reference
    CaptureReference {
        marker: Marker,
        /// Profile directory to write into; defaults to the first one for the environment
        #[arg(long)]
        profile: Option<String>,
    },
    /// Press every button on both pads so the bridge mapping can be checked
    SetupInputs,
}

/// How button signals leave the machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BridgeConfig {
    Serial {
        path: PathBuf,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
    Tcp { addr: String },
    /// Log signals and send nothing
    DryRun,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig::Serial {
            path: PathBuf::from("/dev/ttyACM0"),
            baud_rate: default_baud_rate(),
        }
    }
}

fn default_baud_rate() -> u32 {
    115_200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub url: String,
    pub report_retry_secs: u64,
    /// Delay after a reported match before a start signal is honored
    pub start_cooldown_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/".to_string(),
            report_retry_secs: 5,
            start_cooldown_secs: 35,
        }
    }
}

impl DispatcherConfig {
    pub fn timings(&self) -> DispatchTimings {
        DispatchTimings {
            report_retry: Duration::from_secs(self.report_retry_secs),
            start_cooldown: Duration::from_secs(self.start_cooldown_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    pub executable: PathBuf,
    pub game_image: PathBuf,
    /// Substring matched against process names
    pub process_name: String,
    pub window_title: String,
    /// Distance from the window's outer corner to the game picture
    pub window_inset: ViewportOffset,
    pub boot_wait_secs: u64,
    pub terminate_timeout_secs: u64,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("yuzu"),
            game_image: PathBuf::from("ultimate.nsp"),
            process_name: "yuzu".to_string(),
            window_title: "Super Smash Bros. Ultimate".to_string(),
            window_inset: ViewportOffset { x: 7, y: 52 },
            boot_wait_secs: 60,
            terminate_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub interval_secs: u64,
    /// Identical samples in a row that count as a freeze
    pub freeze_window: usize,
    /// Take a freeze sample every n-th supervisor tick
    pub sample_every: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            freeze_window: 5,
            sample_every: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Sleep after a tick failed
    pub error_backoff_ms: u64,
    /// Keep-alive inputs once every this many in-progress ticks in a row
    pub keep_alive_every: u32,
    /// Ask for the match again after this many ready ticks in a row
    pub ready_reemit_every: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            error_backoff_ms: 2000,
            keep_alive_every: 10,
            ready_reemit_every: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub real_hardware: bool,
    pub references_dir: PathBuf,
    pub characters_dir: PathBuf,
    /// Holds an optional roster.json
    pub data_dir: PathBuf,
    pub viewport_file: PathBuf,
    /// Durable log for things a human should look at
    pub log_file: PathBuf,
    pub tolerance: f64,
    pub bridge: BridgeConfig,
    pub snapshot: SnapshotCommand,
    pub dispatcher: DispatcherConfig,
    pub emulator: EmulatorConfig,
    pub supervisor: SupervisorConfig,
    #[serde(rename = "loop")]
    pub tick_loop: LoopConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            real_hardware: false,
            references_dir: PathBuf::from("references"),
            characters_dir: PathBuf::from("references/characters"),
            data_dir: PathBuf::from("data"),
            viewport_file: PathBuf::from("windowconfig.json"),
            log_file: PathBuf::from("runner-logs.log"),
            tolerance: DEFAULT_TOLERANCE,
            bridge: BridgeConfig::default(),
            snapshot: SnapshotCommand::default(),
            dispatcher: DispatcherConfig::default(),
            emulator: EmulatorConfig::default(),
            supervisor: SupervisorConfig::default(),
            tick_loop: LoopConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Read the config at `path`, writing the defaults there first if it does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let default = Self::default();
            default.save(path)?;
            tracing::info!("Wrote default configuration to {}", path.display());
            return Ok(default);
        }

        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let payload = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, payload).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Viewport offset from its own file. A missing file means the origin.
    pub fn viewport(&self) -> Result<ViewportOffset> {
        if !self.viewport_file.exists() {
            tracing::warn!(
                "No viewport file at {}, capturing from (0, 0)",
                self.viewport_file.display()
            );
            return Ok(ViewportOffset::default());
        }
        ViewportOffset::load(&self.viewport_file)
    }

    pub fn dispatcher_key() -> Result<String> {
        std::env::var(DISPATCHER_KEY_ENV)
            .with_context(|| format!("{} is not set", DISPATCHER_KEY_ENV))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.json");

        let config = RunnerConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert!(!config.real_hardware);
        assert_eq!(config.dispatcher.start_cooldown_secs, 35);

        let again = RunnerConfig::load_or_create(&path).unwrap();
        assert_eq!(again.viewport_file, config.viewport_file);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.json");
        fs::write(
            &path,
            r#"{"real_hardware": true, "bridge": {"kind": "tcp", "addr": "10.0.0.2:4000"}, "loop": {"keep_alive_every": 4}}"#,
        )
        .unwrap();

        let config = RunnerConfig::load_or_create(&path).unwrap();
        assert!(config.real_hardware);
        assert_eq!(
            config.bridge,
            BridgeConfig::Tcp {
                addr: "10.0.0.2:4000".into()
            }
        );
        assert_eq!(config.tick_loop.keep_alive_every, 4);
        assert_eq!(config.tick_loop.ready_reemit_every, 10);
        assert_eq!(config.supervisor.freeze_window, 5);
        assert_eq!(config.dispatcher.timings().report_retry, Duration::from_secs(5));
    }

    #[test]
    fn test_serial_bridge_baud_rate() {
        let bridge: BridgeConfig =
            serde_json::from_str(r#"{"kind": "serial", "path": "/dev/ttyUSB1"}"#).unwrap();
        assert_eq!(
            bridge,
            BridgeConfig::Serial {
                path: PathBuf::from("/dev/ttyUSB1"),
                baud_rate: 115_200,
            }
        );

        let bridge: BridgeConfig = serde_json::from_str(
            r#"{"kind": "serial", "path": "/dev/ttyUSB1", "baud_rate": 9600}"#,
        )
        .unwrap();
        assert!(matches!(bridge, BridgeConfig::Serial { baud_rate: 9600, .. }));
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.json");
        fs::write(&path, "{not json").unwrap();
        assert!(RunnerConfig::load_or_create(&path).is_err());
    }

    #[test]
    fn test_missing_viewport_defaults_to_origin() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunnerConfig {
            viewport_file: dir.path().join("windowconfig.json"),
            ..RunnerConfig::default()
        };
        assert_eq!(config.viewport().unwrap(), ViewportOffset::default());

        ViewportOffset { x: 12, y: 40 }.save(&config.viewport_file).unwrap();
        assert_eq!(config.viewport().unwrap(), ViewportOffset { x: 12, y: 40 });
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::parse_from(["ult-runner", "--real-hardware", "capture-reference", "p1won"]);
        assert!(cli.real_hardware);
        assert_eq!(
            cli.command,
            Some(Command::CaptureReference {
                marker: Marker::Player1Won,
                profile: None
            })
        );

        let cli = Cli::parse_from(["ult-runner"]);
        assert_eq!(cli.command, None);
        assert_eq!(cli.config, PathBuf::from("runner.json"));
    }
}
