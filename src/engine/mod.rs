pub mod monitor;

pub use monitor::Monitor;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};

use crate::error::{Result, WatchdogError};
use crate::models::{EngineConfig, EngineSnapshot, LogEvent, LoopState, SettingsPatch};
use crate::services::{EventLog, SettingsStore, TargetStore};

const COMMAND_QUEUE: usize = 64;

type Reply<T> = oneshot::Sender<Result<T>>;

/// Where the engine persists its state
#[derive(Debug, Clone)]
pub struct Stores {
    pub settings: SettingsStore,
    pub targets: TargetStore,
}

enum Command {
    Start(Reply<()>),
    Pause(Reply<()>),
    Resume(Reply<()>),
    Stop(Reply<()>),
    AddTarget { name: String, reply: Reply<()> },
    RemoveTarget { name: String, reply: Reply<()> },
    ToggleEnabled { name: String, reply: Reply<bool> },
    SetExecutablePath { name: String, path: PathBuf, reply: Reply<()> },
    ResetThresholdTimer { name: String, reply: Reply<bool> },
    DiscoverExecutablePaths(Reply<usize>),
    Probe(Reply<()>),
    UpdateSettings { patch: SettingsPatch, reply: Reply<EngineConfig> },
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Stopped,
    StartupDelay { until: Instant },
    /// While paused the tick timer keeps running but ticks are idle
    Running { next_tick: Instant, paused: bool },
}

impl Phase {
    fn loop_state(&self) -> LoopState {
        match self {
            Phase::Stopped => LoopState::Stopped,
            Phase::StartupDelay { .. } => LoopState::StartupDelay,
            Phase::Running { paused: true, .. } => LoopState::Paused,
            Phase::Running { paused: false, .. } => LoopState::Running,
        }
    }

    fn deadline(&self) -> Option<Instant> {
        match *self {
            Phase::Stopped => None,
            Phase::StartupDelay { until } => Some(until),
            Phase::Running { next_tick, .. } => Some(next_tick),
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Background loop: the only writer of target state.
///
/// Commands from the foreground are queued and handled between ticks, so a
/// command never observes a half-finished tick.
struct Engine {
    monitor: Arc<Mutex<Monitor>>,
    events: EventLog,
    stores: Option<Stores>,
    commands: mpsc::Receiver<Command>,
    snapshots: watch::Sender<Arc<EngineSnapshot>>,
    phase: Phase,
}

impl Engine {
    fn lock(&self) -> MutexGuard<'_, Monitor> {
        self.monitor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on the blocking pool, sampling and restarts sleep
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Monitor) -> T + Send + 'static,
    {
        let monitor = self.monitor.clone();
        tokio::task::spawn_blocking(move || {
            let mut monitor = monitor.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut monitor)
        })
        .await
        .map_err(|e| WatchdogError::invalid_state(format!("monitor task failed: {}", e)))
    }

    fn publish(&self) {
        let snapshot = self.lock().snapshot(self.phase.loop_state());
        self.snapshots.send_replace(Arc::new(snapshot));
    }

    fn persist_targets(&self) {
        let Some(stores) = &self.stores else { return };
        let monitor = self.lock();
        if let Err(e) = stores.targets.save(monitor.targets()) {
            self.events.error(format!("{:#}", e));
        }
    }

    fn persist_settings(&self) {
        let Some(stores) = &self.stores else { return };
        let settings = self.lock().settings().clone();
        if let Err(e) = stores.settings.save(&settings) {
            self.events.error(format!("{:#}", e));
        }
    }

    async fn run(mut self) {
        self.publish();

        loop {
            let deadline = self.phase.deadline();
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Shutdown(done)) => {
                        self.shutdown();
                        let _ = done.send(());
                        return;
                    }
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = wait_until(deadline) => self.on_deadline().await,
            }
        }

        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.phase != Phase::Stopped {
            self.phase = Phase::Stopped;
            self.events.info("Stopped CPU monitoring");
        }
        self.persist_targets();
        self.persist_settings();
        self.publish();
        log::info!("Watchdog engine shut down");
    }

    async fn on_deadline(&mut self) {
        match self.phase {
            Phase::Stopped => {}
            Phase::StartupDelay { .. } => {
                self.phase = Phase::Running {
                    next_tick: Instant::now(),
                    paused: false,
                };
                self.events.info("Startup delay complete, CPU monitoring active");
                self.publish();
            }
            Phase::Running { paused: true, .. } => {
                self.schedule_next_tick(true);
            }
            Phase::Running { paused: false, .. } => {
                match self.blocking(|monitor| monitor.tick()).await {
                    Ok(report) => {
                        log::debug!(
                            "Tick done: {} sampled, {} restart(s), {} error(s)",
                            report.sampled,
                            report.restarts,
                            report.errors
                        );
                        if report.changed {
                            self.persist_targets();
                        }
                    }
                    Err(e) => self.events.error(format!("Error in monitoring loop: {}", e)),
                }
                self.schedule_next_tick(false);
                self.publish();
            }
        }
    }

    fn schedule_next_tick(&mut self, paused: bool) {
        let interval = self.lock().settings().check_interval();
        self.phase = Phase::Running {
            next_tick: Instant::now() + interval,
            paused,
        };
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                let result = self.start();
                let _ = reply.send(result);
            }
            Command::Pause(reply) => {
                let result = self.set_paused(true);
                let _ = reply.send(result);
            }
            Command::Resume(reply) => {
                let result = self.set_paused(false);
                let _ = reply.send(result);
            }
            Command::Stop(reply) => {
                let result = self.stop();
                let _ = reply.send(result);
            }
            Command::AddTarget { name, reply } => {
                let result = self.lock().add_target(&name);
                self.after_mutation(&result);
                let _ = reply.send(result);
            }
            Command::RemoveTarget { name, reply } => {
                let result = self.lock().remove_target(&name);
                self.after_mutation(&result);
                let _ = reply.send(result);
            }
            Command::ToggleEnabled { name, reply } => {
                let result = self.lock().toggle_enabled(&name);
                self.after_mutation(&result);
                let _ = reply.send(result);
            }
            Command::SetExecutablePath { name, path, reply } => {
                let result = self.lock().set_executable_path(&name, path);
                self.after_mutation(&result);
                let _ = reply.send(result);
            }
            Command::ResetThresholdTimer { name, reply } => {
                let result = self.lock().reset_threshold_timer(&name);
                self.after_mutation(&result);
                let _ = reply.send(result);
            }
            Command::DiscoverExecutablePaths(reply) => {
                let result = self
                    .blocking(|monitor| monitor.discover_executable_paths())
                    .await;
                self.after_mutation(&result);
                let _ = reply.send(result);
            }
            Command::Probe(reply) => {
                let result = self.blocking(|monitor| monitor.probe()).await;
                self.publish();
                let _ = reply.send(result);
            }
            Command::UpdateSettings { patch, reply } => {
                let merged = patch.apply(self.lock().settings());
                let result = self.update_settings(merged.clone()).map(|()| merged);
                let _ = reply.send(result);
            }
            // Handled by the run loop
            Command::Shutdown(_) => {}
        }
    }

    fn after_mutation<T>(&self, result: &Result<T>) {
        if result.is_ok() {
            self.persist_targets();
            self.publish();
        }
    }

    fn start(&mut self) -> Result<()> {
        if self.phase != Phase::Stopped {
            return Err(WatchdogError::invalid_state("Monitoring is already running"));
        }

        let delay = {
            let mut monitor = self.lock();
            monitor.prepare_start()?;
            monitor.settings().monitoring_startup_delay()
        };

        if delay.is_zero() {
            self.phase = Phase::Running {
                next_tick: Instant::now(),
                paused: false,
            };
            self.events.info("Started CPU monitoring");
        } else {
            self.phase = Phase::StartupDelay {
                until: Instant::now() + delay,
            };
            self.events.info(format!(
                "Starting monitoring in {} seconds to allow CPU to normalize...",
                delay.as_secs_f64()
            ));
        }
        self.publish();
        Ok(())
    }

    fn set_paused(&mut self, pause: bool) -> Result<()> {
        let Phase::Running { next_tick, paused } = self.phase else {
            return Err(WatchdogError::invalid_state("Monitoring is not running"));
        };
        if paused == pause {
            return Err(WatchdogError::invalid_state(if pause {
                "Monitoring is already paused"
            } else {
                "Monitoring is not paused"
            }));
        }

        self.phase = Phase::Running {
            next_tick,
            paused: pause,
        };
        self.events.info(if pause {
            "Paused CPU monitoring"
        } else {
            "Resumed CPU monitoring"
        });
        self.publish();
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.phase == Phase::Stopped {
            return Err(WatchdogError::invalid_state("Monitoring is not running"));
        }

        if matches!(self.phase, Phase::StartupDelay { .. }) {
            self.events.info("Cancelled pending monitoring start");
        }
        self.phase = Phase::Stopped;
        self.events.info("Stopped CPU monitoring");
        self.persist_targets();
        self.publish();
        Ok(())
    }

    fn update_settings(&mut self, settings: EngineConfig) -> Result<()> {
        if self.phase != Phase::Stopped {
            return Err(WatchdogError::invalid_state(
                "Settings can only be changed while monitoring is stopped",
            ));
        }

        self.lock().set_settings(settings)?;
        self.events.info("Settings saved successfully");
        self.persist_settings();
        self.publish();
        Ok(())
    }
}

/// Cloneable front-end to the engine task
#[derive(Clone)]
pub struct WatchdogHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Arc<EngineSnapshot>>,
    events: EventLog,
}

impl WatchdogHandle {
    /// Spawn the engine on the current tokio runtime
    pub fn spawn(monitor: Monitor, stores: Option<Stores>) -> Self {
        let events = monitor.events().clone();
        let initial = monitor.snapshot(LoopState::Stopped);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(initial));

        let engine = Engine {
            monitor: Arc::new(Mutex::new(monitor)),
            events: events.clone(),
            stores,
            commands: command_rx,
            snapshots: snapshot_tx,
            phase: Phase::Stopped,
        };
        tokio::spawn(engine.run());

        Self {
            commands: command_tx,
            snapshots: snapshot_rx,
            events,
        }
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| WatchdogError::EngineUnavailable)?;
        response.await.map_err(|_| WatchdogError::EngineUnavailable)?
    }

    pub async fn start(&self) -> Result<()> {
        self.request(Command::Start).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.request(Command::Resume).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.request(Command::Stop).await
    }

    pub async fn add_target(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.request(|reply| Command::AddTarget { name, reply }).await
    }

    pub async fn remove_target(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.request(|reply| Command::RemoveTarget { name, reply }).await
    }

    pub async fn toggle_enabled(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.request(|reply| Command::ToggleEnabled { name, reply }).await
    }

    pub async fn set_executable_path(&self, name: &str, path: PathBuf) -> Result<()> {
        let name = name.to_string();
        self.request(|reply| Command::SetExecutablePath { name, path, reply })
            .await
    }

    pub async fn reset_threshold_timer(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.request(|reply| Command::ResetThresholdTimer { name, reply })
            .await
    }

    pub async fn discover_executable_paths(&self) -> Result<usize> {
        self.request(Command::DiscoverExecutablePaths).await
    }

    pub async fn probe(&self) -> Result<()> {
        self.request(Command::Probe).await
    }

    /// Merge `patch` onto the current settings, returns the stored result
    pub async fn update_settings(&self, patch: SettingsPatch) -> Result<EngineConfig> {
        self.request(|reply| Command::UpdateSettings { patch, reply })
            .await
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<EngineSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<Arc<EngineSnapshot>> {
        self.snapshots.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<LogEvent> {
        self.events.subscribe()
    }

    pub fn recent_events(&self, limit: usize) -> Vec<LogEvent> {
        self.events.recent(limit)
    }

    /// Stop monitoring, flush both stores and end the engine task
    pub async fn shutdown(&self) {
        let (done, finished) = oneshot::channel();
        if self.commands.send(Command::Shutdown(done)).await.is_ok() {
            let _ = finished.await;
        }
    }
}
