//! AppController: central dispatcher for the panel
//!
//! Owns every piece of mutable application state (environment, working
//! configuration, run state, telemetry source, scheme cache) and processes
//! one `ControlMessage` at a time. Nothing in `dispatch` waits on the network:
//! round-trips run in spawned tasks that post their results back as
//! messages, so ordering is the order in which messages are dispatched.

use crate::channel::{ChannelEvent, EventChannel, RealtimeEvent};
use crate::command::{CommandPreview, CommandSynthesizer};
use crate::config::loader::{load_config_from_file, save_config_to_file};
use crate::config::validator::{validate_configuration, FieldAdvisory};
use crate::config::AppSettings;
use crate::error::{AppError, PreconditionError, SchemeError, TransportError};
use crate::host::{ExecuteRequest, ProcessHost, SchemeBackend, StartRequest};
use crate::log_collector::{level_from_server, SERVER_TARGET};
use crate::models::{
    CommandReceipt, Configuration, EnvironmentTag, Notice, ParamOverride, RequestAck, RunState, Scheme,
    SchemeId, TelemetryMode, DEFAULT_WSL_PATH,
};
use crate::orchestrator::{LifecycleController, LifecycleSignal, PreparedLaunch, StopMode};
use crate::schemes::{SaveTarget, SchemeChange, SchemeSignal, SchemeStoreClient};
use crate::telemetry::{TelemetryCoordinator, TelemetrySignal, TelemetryView};
use futures::future::FutureExt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const PANEL_EVENT_CAPACITY: usize = 256;
pub const TASK_CAPACITY: usize = 64;

/// Which override list a parameter edit targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamList {
    Custom,
    Quick,
}

/// Operator intent.
#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    SetEnvironment(EnvironmentTag),
    SetField { field: String, value: String },
    AddParam { list: ParamList, param: ParamOverride },
    ClearParams(ParamList),
    Preview,
    Start,
    Stop,
    RefreshSchemes,
    SaveScheme(SaveTarget),
    LoadScheme(SchemeId),
    PreviewScheme(SchemeId),
    RenameScheme { id: SchemeId, name: String },
    /// `confirmed` carries the operator's answer to the delete prompt
    DeleteScheme { id: SchemeId, confirmed: bool },
    Import(PathBuf),
    Export(PathBuf),
    Validate,
    /// Run a command in a separate terminal on the host
    Execute(String),
    FetchServerLogs,
    ClearServerLogs,
    /// Restart the event channel with a fresh retry budget
    Reconnect,
    /// Stop the server, shut the host down, then quit
    Exit,
    /// Quit the panel, leaving the host running
    Shutdown,
}

/// Results of round-trips the controller spawned itself.
#[derive(Debug)]
pub enum TaskSignal {
    Preview(CommandPreview),
    SchemePreview { name: String, preview: CommandPreview },
    Schemes(SchemeSignal),
    Executed {
        command: String,
        outcome: Result<CommandReceipt, TransportError>,
    },
    ServerLogs(Result<String, TransportError>),
    LogsCleared(Result<(), TransportError>),
    HostShutdown(Result<RequestAck, TransportError>),
}

/// Everything the controller reacts to.
#[derive(Debug)]
pub enum ControlMessage {
    Action(UserAction),
    Channel(ChannelEvent),
    Lifecycle(LifecycleSignal),
    Telemetry(TelemetrySignal),
    Task(TaskSignal),
}

/// What the presentation layer is told.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelEvent {
    Notice(Notice),
    RunState { state: RunState, label: &'static str },
    TelemetryMode(TelemetryMode),
    Telemetry(TelemetryView),
    Command(CommandPreview),
    SchemePreview { name: String, command: String },
    Schemes(Vec<Scheme>),
    Configuration { config: Configuration, env: EnvironmentTag },
    Advisories(Vec<FieldAdvisory>),
    /// Tail of the host's server log
    ServerLogs(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Where an application exit stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitStage {
    AwaitingStop,
    AwaitingHost,
}

/// Receivers for the controller's own background work.
pub struct ControllerInbox {
    pub lifecycle: mpsc::Receiver<LifecycleSignal>,
    pub telemetry: mpsc::Receiver<TelemetrySignal>,
    pub tasks: mpsc::Receiver<TaskSignal>,
}

/// The running event channel task and what is needed to start it again.
struct ChannelLink {
    channel: EventChannel,
    tx: mpsc::Sender<ChannelEvent>,
    handle: JoinHandle<()>,
}

pub struct AppController {
    settings: AppSettings,
    host: Arc<dyn ProcessHost>,
    environment: EnvironmentTag,
    configuration: Configuration,
    synthesizer: CommandSynthesizer,
    lifecycle: LifecycleController,
    telemetry: TelemetryCoordinator,
    schemes: SchemeStoreClient,
    panel_tx: mpsc::Sender<PanelEvent>,
    task_tx: mpsc::Sender<TaskSignal>,
    channel: Option<ChannelLink>,
    exit: Option<ExitStage>,
    last_state: RunState,
    last_label: &'static str,
}

impl AppController {
    pub fn new(
        settings: AppSettings,
        host: Arc<dyn ProcessHost>,
        backend: Arc<dyn SchemeBackend>,
        panel_tx: mpsc::Sender<PanelEvent>,
    ) -> (Self, ControllerInbox) {
        let environment = settings.environment;
        let mut configuration = settings.last_configuration.clone();
        configuration.env_type = environment;

        let (lifecycle, lifecycle_rx) = LifecycleController::new(host.clone(), settings.stop_display_delay());
        let (telemetry, telemetry_rx) =
            TelemetryCoordinator::new(host.clone(), settings.poll_interval(), environment);
        let (task_tx, task_rx) = mpsc::channel(TASK_CAPACITY);
        let synthesizer = CommandSynthesizer::with_detected(configuration.conda_path.clone());

        let controller = AppController {
            settings,
            host,
            environment,
            configuration,
            synthesizer,
            lifecycle,
            telemetry,
            schemes: SchemeStoreClient::new(backend),
            panel_tx,
            task_tx,
            channel: None,
            exit: None,
            last_state: RunState::Idle,
            last_label: RunState::Idle.as_str(),
        };
        let inbox = ControllerInbox {
            lifecycle: lifecycle_rx,
            telemetry: telemetry_rx,
            tasks: task_rx,
        };
        (controller, inbox)
    }

    pub fn state(&self) -> RunState {
        self.lifecycle.state()
    }

    pub fn status_label(&self) -> &'static str {
        self.lifecycle.status_label()
    }

    pub fn telemetry_mode(&self) -> TelemetryMode {
        self.telemetry.mode()
    }

    pub fn telemetry(&self) -> &TelemetryCoordinator {
        &self.telemetry
    }

    pub fn environment(&self) -> EnvironmentTag {
        self.environment
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn schemes(&self) -> &SchemeStoreClient {
        &self.schemes
    }

    pub fn synthesizer(&self) -> &CommandSynthesizer {
        &self.synthesizer
    }

    pub fn is_exiting(&self) -> bool {
        self.exit.is_some()
    }

    /// Startup: detect the host environment, load schemes, start the monitor.
    pub async fn initialize(&mut self) {
        match self.host.detect_environment().await {
            Ok(env) => {
                log::info!("[Controller] Host environment: {}", env.label());
                self.set_environment(env);
            }
            Err(e) => log::warn!("[Controller] Environment detection failed, keeping {}: {}", self.environment, e),
        }

        match self.host.detect_install_path().await {
            Ok(detection) => {
                if !detection.conda_path.trim().is_empty() {
                    log::info!("[Controller] Detected install path {}", detection.conda_path);
                    self.synthesizer.record_detected(&detection.conda_path);
                }
                if !detection.environments.is_empty() {
                    log::info!("[Controller] Environments: {}", detection.environments.join(", "));
                }
            }
            Err(e) => log::warn!("[Controller] Install path detection failed: {}", e),
        }

        match self.schemes.refresh().await {
            Ok(_) => self.emit_schemes(),
            Err(e) => self.fail(e.into()),
        }
        self.emit(PanelEvent::Configuration {
            config: self.configuration.clone(),
            env: self.environment,
        });

        let state = self.state();
        self.emit(PanelEvent::RunState {
            state,
            label: self.status_label(),
        });
        if let Some(mode) = self.telemetry.sync(state) {
            self.emit(PanelEvent::TelemetryMode(mode));
        }
    }

    /// Start the event channel task, feeding `tx`. Replaces a running one.
    pub fn attach_channel(&mut self, channel: EventChannel, tx: mpsc::Sender<ChannelEvent>) {
        if let Some(previous) = self.channel.take() {
            previous.handle.abort();
        }
        let handle = channel.clone().spawn(tx.clone());
        self.channel = Some(ChannelLink { channel, tx, handle });
    }

    /// Main loop. Returns the settings to persist once the operator quits.
    pub async fn run(
        mut self,
        mut inbox: ControllerInbox,
        mut actions: mpsc::Receiver<UserAction>,
        mut channel: mpsc::Receiver<ChannelEvent>,
    ) -> AppSettings {
        loop {
            let message = tokio::select! {
                Some(action) = actions.recv() => ControlMessage::Action(action),
                Some(event) = channel.recv() => ControlMessage::Channel(event),
                Some(signal) = inbox.lifecycle.recv() => ControlMessage::Lifecycle(signal),
                Some(signal) = inbox.telemetry.recv() => ControlMessage::Telemetry(signal),
                Some(signal) = inbox.tasks.recv() => ControlMessage::Task(signal),
                else => break,
            };
            if self.dispatch(message) == Flow::Exit {
                break;
            }
        }
        self.shutdown()
    }

    /// Central handler. Every state change funnels through here.
    pub fn dispatch(&mut self, message: ControlMessage) -> Flow {
        let flow = match message {
            ControlMessage::Action(action) => self.handle_action(action),
            ControlMessage::Channel(event) => {
                self.handle_channel(event);
                Flow::Continue
            }
            ControlMessage::Lifecycle(signal) => {
                self.handle_lifecycle(signal);
                Flow::Continue
            }
            ControlMessage::Telemetry(signal) => {
                if self.telemetry.apply(signal) {
                    self.emit(PanelEvent::Telemetry(self.telemetry.view().clone()));
                }
                Flow::Continue
            }
            ControlMessage::Task(signal) => self.handle_task(signal),
        };
        self.reconcile();
        flow
    }

    /// Publish run state changes and keep the telemetry source in line with them.
    fn reconcile(&mut self) {
        let state = self.state();
        let label = self.status_label();
        if state == self.last_state && label == self.last_label {
            return;
        }
        self.last_state = state;
        self.last_label = label;
        self.emit(PanelEvent::RunState { state, label });
        // Telemetry stays off once an exit is under way
        if self.exit.is_some() {
            return;
        }
        if let Some(mode) = self.telemetry.sync(state) {
            self.emit(PanelEvent::TelemetryMode(mode));
        }
    }

    fn handle_action(&mut self, action: UserAction) -> Flow {
        match action {
            UserAction::SetEnvironment(env) => {
                self.set_environment(env);
                self.notify(Notice::info(format!("Switched to {} environment", env.label())));
            }
            UserAction::SetField { field, value } => {
                match self.configuration.clone().with_field(&field, &value) {
                    Ok(config) => {
                        self.configuration = config;
                        if field == "envType" {
                            self.set_environment(self.configuration.env_type);
                        }
                    }
                    Err(msg) => self.fail(AppError::InvalidInput(msg)),
                }
            }
            UserAction::AddParam { list, param } => {
                if param.name.trim().is_empty() {
                    self.fail(AppError::InvalidInput("parameter name is empty".to_string()));
                } else {
                    self.params_mut(list).push(param);
                }
            }
            UserAction::ClearParams(list) => self.params_mut(list).clear(),
            UserAction::Preview => {
                let pending = self
                    .synthesizer
                    .preview_task(&self.working_configuration(), self.environment, self.host.as_ref());
                self.spawn_task(pending.map(TaskSignal::Preview));
            }
            UserAction::Start => self.start(),
            UserAction::Stop => self.stop(),
            UserAction::RefreshSchemes => self.refresh_schemes(),
            UserAction::SaveScheme(target) => {
                let config = self.working_configuration();
                match self.schemes.request_save(target, &config, self.environment) {
                    Ok(pending) => self.spawn_task(pending.map(|outcome| TaskSignal::Schemes(SchemeSignal::Saved(outcome)))),
                    Err(e) => self.fail(e.into()),
                }
            }
            UserAction::LoadScheme(id) => match self.schemes.load(&id) {
                Ok((config, env)) => {
                    self.configuration = config;
                    self.set_environment(env);
                    self.emit(PanelEvent::Configuration {
                        config: self.configuration.clone(),
                        env,
                    });
                    self.notify(Notice::success("Scheme loaded"));
                }
                Err(e) => self.fail(e.into()),
            },
            UserAction::PreviewScheme(id) => self.preview_scheme(&id),
            UserAction::RenameScheme { id, name } => match self.schemes.request_rename(&id, &name) {
                Ok((ticket, pending)) => {
                    // Optimistic: show the new name right away
                    self.emit_schemes();
                    self.spawn_task(
                        pending.map(|outcome| TaskSignal::Schemes(SchemeSignal::Renamed { ticket, outcome })),
                    );
                }
                Err(e) => self.fail(e.into()),
            },
            UserAction::DeleteScheme { id, confirmed } => match self.schemes.request_delete(&id, |_| confirmed) {
                Ok((scheme, pending)) => {
                    self.spawn_task(
                        pending.map(|outcome| TaskSignal::Schemes(SchemeSignal::Deleted { scheme, outcome })),
                    );
                }
                Err(e) => self.fail(e.into()),
            },
            UserAction::Import(path) => match load_config_from_file(&path) {
                Ok(config) => {
                    let env = config.env_type;
                    self.configuration = config;
                    self.set_environment(env);
                    self.emit(PanelEvent::Configuration {
                        config: self.configuration.clone(),
                        env,
                    });
                    self.notify(Notice::success(format!("Imported {}", path.display())));
                }
                Err(e) => self.fail(e.into()),
            },
            UserAction::Export(path) => match save_config_to_file(&self.working_configuration(), &path) {
                Ok(()) => self.notify(Notice::success(format!("Exported to {}", path.display()))),
                Err(e) => self.fail(e.into()),
            },
            UserAction::Validate => {
                let findings = validate_configuration(&self.configuration);
                if findings.is_empty() {
                    self.notify(Notice::success("Configuration looks good"));
                }
                self.emit(PanelEvent::Advisories(findings));
            }
            UserAction::Execute(command) => self.execute(command),
            UserAction::FetchServerLogs => {
                let pending = self.host.fetch_logs();
                self.spawn_task(pending.map(TaskSignal::ServerLogs));
            }
            UserAction::ClearServerLogs => {
                let pending = self.host.clear_logs();
                self.spawn_task(pending.map(TaskSignal::LogsCleared));
            }
            UserAction::Reconnect => self.reconnect(),
            UserAction::Exit => self.begin_exit(),
            UserAction::Shutdown => return Flow::Exit,
        }
        Flow::Continue
    }

    fn handle_channel(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => self.notify(Notice::success("Connected to server")),
            // Last known run state is kept until the next status event
            ChannelEvent::Disconnected { reason } => {
                self.notify(Notice::warning(format!("Disconnected from server: {}", reason)))
            }
            ChannelEvent::Error(message) => self.notify(Notice::error(format!("Connection error: {}", message))),
            ChannelEvent::Reconnecting { attempt, delay } => self.notify(Notice::info(format!(
                "Reconnecting (attempt {}) in {:.1}s",
                attempt,
                delay.as_secs_f64()
            ))),
            ChannelEvent::GaveUp { attempts } => self.notify(Notice::error(format!(
                "Could not reconnect after {} attempts, use 'reconnect' to try again",
                attempts
            ))),
            ChannelEvent::Event(RealtimeEvent::Log { message, level }) => {
                log::log!(target: SERVER_TARGET, level_from_server(&level), "{}", message);
            }
            ChannelEvent::Event(RealtimeEvent::Status { running }) => {
                let before = self.state();
                let after = self.lifecycle.on_status(running);
                if before != after {
                    if running {
                        self.notify(Notice::success("vLLM server is running"));
                    } else if before == RunState::Starting {
                        self.notify(Notice::warning("vLLM server exited during startup"));
                    } else {
                        self.notify(Notice::info("vLLM server stopped"));
                    }
                }
            }
            ChannelEvent::Event(RealtimeEvent::MonitorFrame { output }) => {
                if self.telemetry.on_frame(output) {
                    self.emit(PanelEvent::Telemetry(self.telemetry.view().clone()));
                }
            }
        }
    }

    fn handle_lifecycle(&mut self, signal: LifecycleSignal) {
        let stop_finished = matches!(signal, LifecycleSignal::StopCompleted { .. });
        if let LifecycleSignal::Prepared { launch, .. } = &signal {
            self.show_preview(launch.preview.clone());
        }
        if let Some(notice) = self.lifecycle.apply(signal) {
            self.notify(notice);
        }
        if stop_finished && self.exit == Some(ExitStage::AwaitingStop) {
            self.request_host_shutdown();
        }
    }

    fn handle_task(&mut self, signal: TaskSignal) -> Flow {
        match signal {
            TaskSignal::Preview(preview) => self.show_preview(preview),
            TaskSignal::SchemePreview { name, preview } => {
                self.synthesizer.absorb(&preview);
                self.emit(PanelEvent::SchemePreview {
                    name,
                    command: preview.command,
                });
            }
            TaskSignal::Schemes(signal) => match self.schemes.complete(signal) {
                Ok(change) => {
                    match change {
                        SchemeChange::Refreshed(_) => {}
                        SchemeChange::Saved(scheme) => {
                            self.notify(Notice::success(format!("Scheme '{}' saved", scheme.name)))
                        }
                        SchemeChange::Renamed { name, .. } => {
                            self.notify(Notice::success(format!("Scheme renamed to '{}'", name)))
                        }
                        SchemeChange::Deleted(scheme) => {
                            self.notify(Notice::success(format!("Scheme '{}' deleted", scheme.name)))
                        }
                    }
                    self.emit_schemes();
                }
                Err(e) => {
                    // A refused rename was rolled back
                    self.emit_schemes();
                    self.fail(e.into());
                }
            },
            TaskSignal::Executed { command, outcome } => match outcome {
                Ok(receipt) if receipt.success => {
                    log::info!("[Controller] {}", receipt.output);
                    self.notify(Notice::success(format!("Sent to terminal: {}", command)));
                }
                Ok(receipt) => {
                    let reason = if receipt.error.trim().is_empty() {
                        "command refused".to_string()
                    } else {
                        receipt.error
                    };
                    log::warn!("[Controller] Command '{}' failed: {}", command, reason);
                    self.notify(Notice::error(format!("Command failed: {}", reason)));
                }
                Err(e) => {
                    log::warn!("[Controller] Command '{}' failed: {}", command, e);
                    self.notify(Notice::error(format!("Command failed: {}", e)));
                }
            },
            TaskSignal::ServerLogs(outcome) => match outcome {
                Ok(logs) => self.emit(PanelEvent::ServerLogs(logs)),
                Err(e) => self.fail(e.into()),
            },
            TaskSignal::LogsCleared(outcome) => match outcome {
                Ok(()) => self.notify(Notice::success("Server log cleared")),
                Err(e) => self.fail(e.into()),
            },
            TaskSignal::HostShutdown(outcome) => {
                match outcome {
                    Ok(ack) if ack.success => log::info!("[Controller] Host is shutting down"),
                    Ok(ack) => log::warn!(
                        "[Controller] Host refused shutdown: {}",
                        ack.message.unwrap_or_default()
                    ),
                    // The host may exit before it answers
                    Err(e) => log::debug!("[Controller] No shutdown reply: {}", e),
                }
                if self.exit.is_some() {
                    return Flow::Exit;
                }
            }
        }
        Flow::Continue
    }

    fn start(&mut self) {
        let current = self.state();
        if !current.accepts_start() {
            self.fail(PreconditionError::AlreadyActive(current.as_str()).into());
            return;
        }

        let config = self.working_configuration();
        let env = self.environment;
        let wsl_path = match config.wsl_path.trim() {
            "" => DEFAULT_WSL_PATH.to_string(),
            path => path.to_string(),
        };
        let preparing = self.synthesizer.preview_task(&config, env, self.host.as_ref());
        let prepare = async move {
            let preview = preparing.await;
            let request = StartRequest {
                command: preview.command.clone(),
                env_type: env,
                wsl_path,
            };
            PreparedLaunch { preview, request }
        }
        .boxed();
        if let Err(e) = self.lifecycle.start(prepare) {
            self.fail(e.into());
        }
    }

    fn stop(&mut self) {
        match self.lifecycle.stop() {
            Ok(StopMode::Requested) => {}
            Ok(StopMode::CancelledLaunch) => self.notify(Notice::info("Launch cancelled")),
            Err(e) => self.fail(e.into()),
        }
    }

    fn execute(&mut self, command: String) {
        let command = command.trim().to_string();
        if command.is_empty() {
            self.fail(AppError::InvalidInput("no command given".to_string()));
            return;
        }
        log::info!("[Controller] $ {}", command);
        let pending = self.host.execute(ExecuteRequest {
            command: command.clone(),
            env: self.environment,
        });
        self.spawn_task(pending.map(move |outcome| TaskSignal::Executed { command, outcome }));
    }

    /// Stop the server through the regular stop path, then ask the host to shut down.
    fn begin_exit(&mut self) {
        if self.exit.is_some() {
            self.notify(Notice::info("Already exiting"));
            return;
        }
        log::info!("[Controller] Exiting application");
        self.notify(Notice::warning("Exiting: stopping the server and shutting down the host"));

        let awaiting_stop = match self.state() {
            RunState::Running | RunState::Starting => match self.lifecycle.stop() {
                Ok(StopMode::Requested) => true,
                Ok(StopMode::CancelledLaunch) => false,
                Err(e) => {
                    self.fail(e.into());
                    false
                }
            },
            _ => false,
        };
        self.telemetry.shutdown();
        if awaiting_stop {
            self.exit = Some(ExitStage::AwaitingStop);
        } else {
            self.request_host_shutdown();
        }
    }

    fn request_host_shutdown(&mut self) {
        self.exit = Some(ExitStage::AwaitingHost);
        let pending = self.host.shutdown();
        self.spawn_task(pending.map(TaskSignal::HostShutdown));
    }

    fn reconnect(&mut self) {
        match self.channel.as_mut() {
            Some(link) => {
                link.handle.abort();
                link.handle = link.channel.clone().spawn(link.tx.clone());
                log::info!("[Controller] Event channel restarted");
                self.notify(Notice::info("Reconnecting to server"));
            }
            None => self.notify(Notice::warning("No event channel to reconnect")),
        }
    }

    fn preview_scheme(&mut self, id: &SchemeId) {
        let scheme = match self.schemes.get(id) {
            Some(scheme) => scheme.clone(),
            None => {
                self.fail(SchemeError::NotFound(id.to_string()).into());
                return;
            }
        };
        let pending = self
            .synthesizer
            .preview_task(&scheme.config, scheme.environment(), self.host.as_ref());
        let name = scheme.name;
        self.spawn_task(pending.map(move |preview| TaskSignal::SchemePreview { name, preview }));
    }

    fn refresh_schemes(&mut self) {
        let pending = self.schemes.request_refresh();
        self.spawn_task(pending.map(|outcome| TaskSignal::Schemes(SchemeSignal::Listed(outcome))));
    }

    fn show_preview(&mut self, preview: CommandPreview) {
        self.synthesizer.absorb(&preview);
        if let Some(warning) = &preview.warning {
            self.notify(Notice::warning(warning.clone()));
        }
        self.emit(PanelEvent::Command(preview));
    }

    /// Run `work` on its own task and post its result to the task inbox.
    fn spawn_task<F>(&self, work: F)
    where
        F: Future<Output = TaskSignal> + Send + 'static,
    {
        let tx = self.task_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(work.await).await;
        });
    }

    fn set_environment(&mut self, env: EnvironmentTag) {
        self.environment = env;
        self.configuration.env_type = env;
        self.telemetry.set_environment(env);
    }

    fn params_mut(&mut self, list: ParamList) -> &mut Vec<ParamOverride> {
        match list {
            ParamList::Custom => &mut self.configuration.custom_params,
            ParamList::Quick => &mut self.configuration.quick_params,
        }
    }

    /// The configuration as it should be saved or sent: tagged with the active environment.
    fn working_configuration(&self) -> Configuration {
        let mut config = self.configuration.clone();
        config.env_type = self.environment;
        config
    }

    fn emit_schemes(&self) {
        self.emit(PanelEvent::Schemes(self.schemes.schemes().to_vec()));
    }

    fn notify(&self, notice: Notice) {
        self.emit(PanelEvent::Notice(notice));
    }

    fn fail(&self, error: AppError) {
        log::warn!("[Controller] {}", error);
        self.notify(Notice::warning(error.user_message()));
    }

    fn emit(&self, event: PanelEvent) {
        if self.panel_tx.try_send(event).is_err() {
            log::debug!("[Controller] Panel channel full or closed, dropping event");
        }
    }

    /// Teardown: best-effort stop if Running, stop telemetry and the event
    /// channel, hand back settings to persist.
    pub fn shutdown(mut self) -> AppSettings {
        if self.lifecycle.teardown() {
            log::info!("[Controller] Sent best-effort stop on exit");
        }
        self.telemetry.shutdown();
        if let Some(link) = self.channel.take() {
            link.handle.abort();
        }
        self.settings.environment = self.environment;
        self.settings.last_configuration = self.working_configuration();
        self.settings
    }
}
