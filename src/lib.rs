pub mod commands;
pub mod config;
pub mod logging;
pub mod pipeline;
pub mod supervisor;

use anyhow::Result;
use config::{BridgeConfig, Cli, Command, RunnerConfig};
use image::RgbaImage;
use pipeline::{run_forever, MatchLoop};
use std::time::Duration;
use supervisor::{EmulatorProcess, Supervisor, SupervisorSettings};
use tokio::sync::watch;
use tracing::{info, warn};
use ult_capture::{FrameSource, ScreenCapture, SnapshotCapture, ViewportOffset};
use ult_data::{Player, Roster};
use ult_dispatch::{MatchDispatcher, WsTransport};
use ult_input::{BridgeController, BridgeLink, ControllerPair, Timing};
use ult_state::{GameStateMachine, Macros};
use ult_vision::{CharacterReferences, Matcher, Perception, Profile, TemplateStore};

/// Where frames come from in each environment.
pub enum GameSource {
    /// Emulator window on the desktop
    Desktop(ScreenCapture),
    /// Capture device in front of a console
    Device(SnapshotCapture),
}

impl FrameSource for GameSource {
    async fn sample(&mut self) -> Result<RgbaImage> {
        match self {
            GameSource::Desktop(source) => source.sample().await,
            GameSource::Device(source) => source.sample().await,
        }
    }
}

type Machine = GameStateMachine<GameSource, BridgeController>;

async fn open_bridge(config: &BridgeConfig) -> Result<BridgeLink> {
    match config {
        BridgeConfig::Serial { path, baud_rate } => {
            BridgeLink::open_serial(path, *baud_rate).await
        }
        BridgeConfig::Tcp { addr } => BridgeLink::connect_tcp(addr).await,
        BridgeConfig::DryRun => Ok(BridgeLink::dry_run()),
    }
}

fn open_source(config: &RunnerConfig, viewport: watch::Receiver<ViewportOffset>) -> GameSource {
    if config.real_hardware {
        GameSource::Device(SnapshotCapture::new(config.snapshot.clone()))
    } else {
        GameSource::Desktop(ScreenCapture::new(viewport))
    }
}

fn controllers(link: &BridgeLink) -> ControllerPair<BridgeController> {
    ControllerPair::new(
        link.controller(Player::One),
        link.controller(Player::Two),
        Timing::default(),
    )
}

fn build_machine(
    config: &RunnerConfig,
    link: &BridgeLink,
    viewport: watch::Receiver<ViewportOffset>,
) -> Result<Machine> {
    let profiles = Profile::for_environment(config.real_hardware);
    let store = TemplateStore::load(&config.references_dir, profiles)?;
    let perception = Perception::new(
        open_source(config, viewport),
        Matcher::new(store, config.tolerance),
    );
    let roster = Roster::load(&config.data_dir)?;
    Ok(GameStateMachine::new(
        perception,
        controllers(link),
        roster,
        config.real_hardware,
    ))
}

fn emulator_supervisor(
    config: &RunnerConfig,
    viewport: watch::Sender<ViewportOffset>,
) -> Option<Supervisor<EmulatorProcess>> {
    if config.real_hardware {
        return None;
    }
    Some(Supervisor::new(
        EmulatorProcess::new(config.emulator.clone()),
        SupervisorSettings::from_config(config),
        viewport,
    ))
}

async fn execute(command: Command, config: &RunnerConfig, link: &BridgeLink) -> Result<()> {
    let (viewport_tx, viewport_rx) = watch::channel(config.viewport()?);
    let supervise_every = Duration::from_secs(config.supervisor.interval_secs);

    match command {
        Command::Run => {
            let key = RunnerConfig::dispatcher_key()?;
            let machine = build_machine(config, link, viewport_rx)?;
            let references = CharacterReferences::load(&config.characters_dir)?;
            let transport = WsTransport::spawn(config.dispatcher.url.clone(), key);
            let dispatcher = MatchDispatcher::new(transport, config.dispatcher.timings());
            let match_loop = MatchLoop::new(machine, dispatcher)
                .with_references(references)
                .with_settings(config.tick_loop.clone());
            info!("Running against dispatcher at {}", config.dispatcher.url);
            run_forever(
                match_loop,
                emulator_supervisor(config, viewport_tx),
                supervise_every,
            )
            .await;
        }
        Command::Solo => {
            let machine = build_machine(config, link, viewport_rx)?;
            let match_loop: MatchLoop<_, _, WsTransport> =
                MatchLoop::solo(machine).with_settings(config.tick_loop.clone());
            info!("Running solo matches");
            run_forever(
                match_loop,
                emulator_supervisor(config, viewport_tx),
                supervise_every,
            )
            .await;
        }
        Command::CaptureReference { marker, profile } => {
            let profile =
                commands::capture::resolve_profile(profile.as_deref(), config.real_hardware)?;
            let mut source = open_source(config, viewport_rx);
            commands::capture::capture_reference(
                &mut source,
                &config.references_dir,
                marker,
                profile,
            )
            .await?;
        }
        Command::SetupInputs => {
            let mut pads = controllers(link);
            commands::inputs::setup_inputs(&mut pads, &Macros::new(Timing::default())).await?;
        }
    }
    Ok(())
}

/// Load the configuration, wire everything up and run the chosen command until it ends
/// or the process is interrupted. The bridge is reset on the way out either way.
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = RunnerConfig::load_or_create(&cli.config)?;
    if cli.real_hardware {
        config.real_hardware = true;
    }
    logging::init(&config.log_file)?;
    info!(
        "Starting in {} mode",
        if config.real_hardware { "hardware" } else { "emulator" }
    );

    let link = open_bridge(&config.bridge).await?;
    let command = cli.command.unwrap_or(Command::Run);
    let result = tokio::select! {
        result = execute(command, &config, &link) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, releasing the pads");
            Ok(())
        }
    };

    if let Err(e) = link.clear().await {
        warn!("Failed to reset the bridge: {:#}", e);
    }
    result
}
