//! Keeps exactly one emulator running, follows its window and restarts it when the picture
//! stops changing.

use crate::config::{EmulatorConfig, RunnerConfig};
use anyhow::{bail, Context, Result};
use image::RgbaImage;
use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, Signal, System};
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use ult_capture::{find_window, FrameSource, ViewportOffset};
use ult_input::LowLevelController;
use ult_state::GameStateMachine;
use ult_vision::diff_percent;

/// Declares a freeze once a full window of samples shows the same picture.
pub struct FreezeDetector {
    samples: VecDeque<RgbaImage>,
    size: usize,
    tolerance: f64,
}

impl FreezeDetector {
    pub fn new(size: usize, tolerance: f64) -> Self {
        Self {
            samples: VecDeque::with_capacity(size),
            size: size.max(2),
            tolerance,
        }
    }

    /// Add a sample. Returns true when the window is full and every sample matches the
    /// oldest one; the window is emptied so the same freeze is reported once.
    pub fn push(&mut self, frame: RgbaImage) -> bool {
        if self.samples.len() >= self.size {
            self.samples.pop_front();
        }
        self.samples.push_back(frame);
        if self.samples.len() < self.size {
            return false;
        }

        let first = &self.samples[0];
        let frozen = self
            .samples
            .iter()
            .skip(1)
            .all(|s| diff_percent(first, s) <= self.tolerance);
        if frozen {
            self.reset();
        }
        frozen
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// The emulator process, as far as the supervisor needs to see it.
pub trait ProcessControl: Send {
    /// Pids of every running instance, oldest first.
    fn instances(&mut self) -> Vec<u32>;

    /// Start a detached instance and return its pid.
    fn launch(&mut self) -> Result<u32>;

    /// Ask the process to exit, killing it if it does not in time.
    fn terminate(&mut self, pid: u32) -> impl Future<Output = Result<()>> + Send;

    /// Desktop position of the game picture, if the window is visible.
    fn viewport(&mut self, pid: u32) -> Option<ViewportOffset>;
}

/// What the supervisor needs from the game side: a frame to compare and a way to get past
/// the title screens after a start.
pub trait GameHandle: Send {
    fn sample(&mut self) -> impl Future<Output = Result<RgbaImage>> + Send;
    fn boot(&mut self) -> impl Future<Output = Result<()>> + Send;
}

impl<S: FrameSource, C: LowLevelController> GameHandle for GameStateMachine<S, C> {
    async fn sample(&mut self) -> Result<RgbaImage> {
        self.perception_mut().sample().await
    }

    async fn boot(&mut self) -> Result<()> {
        GameStateMachine::boot(self).await
    }
}

/// Emulator found and controlled through sysinfo.
pub struct EmulatorProcess {
    system: System,
    config: EmulatorConfig,
    /// Instances this runner started, waited on once they exit
    children: Vec<Child>,
}

impl EmulatorProcess {
    pub fn new(config: EmulatorConfig) -> Self {
        Self {
            system: System::new(),
            config,
            children: Vec::new(),
        }
    }

    /// Collect the exit status of started instances that are gone. Returns how many are
    /// still running.
    fn reap(&mut self) -> usize {
        self.children.retain_mut(|child| match child.try_wait() {
            Ok(Some(status)) => {
                debug!("Emulator {} exited with {}", child.id(), status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!("Could not check emulator {}: {}", child.id(), e);
                false
            }
        });
        self.children.len()
    }

    fn alive(&mut self, pid: Pid) -> bool {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        self.system
            .process(pid)
            .is_some_and(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
    }
}

impl ProcessControl for EmulatorProcess {
    fn instances(&mut self) -> Vec<u32> {
        self.reap();
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        let needle = self.config.process_name.to_ascii_lowercase();
        let mut found: Vec<(u64, u32)> = self
            .system
            .processes()
            .values()
            .filter(|p| p.thread_kind().is_none())
            .filter(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
            .filter(|p| p.name().to_string_lossy().to_ascii_lowercase().contains(&needle))
            .map(|p| (p.start_time(), p.pid().as_u32()))
            .collect();
        found.sort();
        found.into_iter().map(|(_, pid)| pid).collect()
    }

    fn launch(&mut self) -> Result<u32> {
        let child = Command::new(&self.config.executable)
            .arg(&self.config.game_image)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| {
                format!("Failed to start {}", self.config.executable.display())
            })?;
        let pid = child.id();
        self.children.push(child);
        Ok(pid)
    }

    async fn terminate(&mut self, pid: u32) -> Result<()> {
        self.reap();
        let pid = Pid::from_u32(pid);
        if !self.alive(pid) {
            return Ok(());
        }
        let asked = self
            .system
            .process(pid)
            .and_then(|p| p.kill_with(Signal::Term))
            .unwrap_or(false);

        if asked {
            let deadline =
                Instant::now() + Duration::from_secs(self.config.terminate_timeout_secs);
            while Instant::now() < deadline {
                sleep(Duration::from_millis(500)).await;
                self.reap();
                if !self.alive(pid) {
                    debug!("Emulator {} exited", pid);
                    return Ok(());
                }
            }
            warn!("Emulator {} ignored the terminate request, killing it", pid);
        }

        let killed = self.system.process(pid).map(|p| p.kill()).unwrap_or(true);
        if !killed {
            bail!("Failed to kill emulator process {}", pid);
        }
        if let Some(index) = self.children.iter().position(|c| c.id() == pid.as_u32()) {
            let mut child = self.children.swap_remove(index);
            let _ = child.wait();
        }
        Ok(())
    }

    fn viewport(&mut self, pid: u32) -> Option<ViewportOffset> {
        let window = find_window(&self.config.window_title, Some(pid))?;
        let inset = self.config.window_inset;
        Some(ViewportOffset {
            x: window.x + inset.x,
            y: window.y + inset.y,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub freeze_window: usize,
    pub sample_every: u64,
    pub tolerance: f64,
    pub boot_wait: Duration,
    pub viewport_file: PathBuf,
}

impl SupervisorSettings {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            freeze_window: config.supervisor.freeze_window,
            sample_every: config.supervisor.sample_every.max(1),
            tolerance: config.tolerance,
            boot_wait: Duration::from_secs(config.emulator.boot_wait_secs),
            viewport_file: config.viewport_file.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    Healthy,
    /// Intentionally idle screen, or not a sampling tick
    NotSampled,
    Launched,
    Restarted,
    Failed,
}

pub struct Supervisor<P> {
    process: P,
    freeze: FreezeDetector,
    settings: SupervisorSettings,
    viewport: watch::Sender<ViewportOffset>,
    pid: Option<u32>,
    ticks: u64,
}

impl<P: ProcessControl> Supervisor<P> {
    pub fn new(
        process: P,
        settings: SupervisorSettings,
        viewport: watch::Sender<ViewportOffset>,
    ) -> Self {
        Self {
            process,
            freeze: FreezeDetector::new(settings.freeze_window, settings.tolerance),
            settings,
            viewport,
            pid: None,
            ticks: 0,
        }
    }

    /// One supervision pass. Never fails: problems go to the durable log and the next
    /// pass tries again.
    ///
    /// `idle` means the runner is parked on the select screen on purpose, where a still
    /// picture is expected.
    pub async fn tick<G: GameHandle>(&mut self, game: &mut G, idle: bool) -> SupervisorEvent {
        self.ticks += 1;

        match self.ensure_running(game).await {
            Ok(true) => return SupervisorEvent::Launched,
            Ok(false) => {}
            Err(e) => {
                error!(target: "important", "Could not start the emulator: {:#}", e);
                return SupervisorEvent::Failed;
            }
        }
        self.track_window();

        if idle {
            debug!("Runner is idling on the select screen, not checking for a freeze");
            self.freeze.reset();
            return SupervisorEvent::NotSampled;
        }
        if (self.ticks - 1) % self.settings.sample_every != 0 {
            return SupervisorEvent::NotSampled;
        }

        let frame = match game.sample().await {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Supervisor could not sample: {:#}", e);
                return SupervisorEvent::Healthy;
            }
        };
        if !self.freeze.push(frame) {
            return SupervisorEvent::Healthy;
        }

        error!(target: "important", "Freeze detected, restarting the emulator");
        match self.restart(game).await {
            Ok(()) => SupervisorEvent::Restarted,
            Err(e) => {
                error!(target: "important", "Emulator restart failed: {:#}", e);
                SupervisorEvent::Failed
            }
        }
    }

    /// Kill extra instances and start one if none is running. Returns whether it launched.
    async fn ensure_running<G: GameHandle>(&mut self, game: &mut G) -> Result<bool> {
        let instances = self.process.instances();
        if let Some((&first, extras)) = instances.split_first() {
            for &pid in extras {
                warn!("Killing extra emulator instance {}", pid);
                if let Err(e) = self.process.terminate(pid).await {
                    warn!("Could not kill emulator {}: {:#}", pid, e);
                }
            }
            self.pid = Some(first);
            return Ok(false);
        }

        self.launch(game).await?;
        Ok(true)
    }

    async fn launch<G: GameHandle>(&mut self, game: &mut G) -> Result<()> {
        info!("Starting the emulator");
        let pid = self.process.launch()?;
        self.pid = Some(pid);

        info!("Waiting {:?} for the game to boot", self.settings.boot_wait);
        sleep(self.settings.boot_wait).await;
        self.freeze.reset();
        game.boot().await
    }

    async fn restart<G: GameHandle>(&mut self, game: &mut G) -> Result<()> {
        if let Some(pid) = self.pid.take() {
            self.process
                .terminate(pid)
                .await
                .with_context(|| format!("Failed to stop emulator {}", pid))?;
        }
        let result = self.launch(game).await;
        self.freeze.reset();
        result
    }

    /// Follow the emulator window and persist the viewport when it moves.
    fn track_window(&mut self) {
        let Some(pid) = self.pid else { return };
        let Some(offset) = self.process.viewport(pid) else {
            debug!("Emulator window not visible");
            return;
        };
        if *self.viewport.borrow() == offset {
            return;
        }

        info!("Emulator window moved, viewport now at ({}, {})", offset.x, offset.y);
        if let Err(e) = offset.save(&self.settings.viewport_file) {
            warn!("{:#}", e);
        }
        self.viewport.send_replace(offset);
    }
}
