//! Telemetry coordinator.
//!
//! Exactly one GPU telemetry source is active, derived from the run state:
//! fixed-interval polling while Running, the interactive monitor otherwise.
//! The poll timer is a singleton; starting it again first aborts the old task.

use crate::error::TransportError;
use crate::host::ProcessHost;
use crate::models::{
    EnvironmentTag, GpuDevice, MonitorAck, MonitorAction, RunState, TelemetryMode, TelemetrySnapshot,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const SIGNAL_CAPACITY: usize = 16;

/// Results posted back by telemetry tasks.
#[derive(Debug)]
pub enum TelemetrySignal {
    Polled(Result<TelemetrySnapshot, TransportError>),
    MonitorCompleted {
        action: MonitorAction,
        outcome: Result<MonitorAck, TransportError>,
    },
}

/// One GPU row ready for display.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuReading {
    pub name: String,
    pub memory_used_mb: f64,
    pub memory_total_mb: f64,
    pub memory_percent: u32,
    pub utilization: f64,
    pub temperature: f64,
    pub power: f64,
    pub fan_speed: f64,
}

impl From<&GpuDevice> for GpuReading {
    fn from(device: &GpuDevice) -> Self {
        let used = device.memory_used.unwrap_or(0.0);
        let total = device.memory_total.unwrap_or(0.0);
        let denominator = if total > 0.0 { total } else { 1.0 };
        GpuReading {
            name: device.name.clone(),
            memory_used_mb: used,
            memory_total_mb: total,
            memory_percent: (used / denominator * 100.0).round().max(0.0) as u32,
            utilization: device.utilization.unwrap_or(0.0),
            temperature: device.temperature.unwrap_or(0.0),
            power: device.power.unwrap_or(0.0),
            fan_speed: device.fan_speed.unwrap_or(0.0),
        }
    }
}

/// What the telemetry panel currently shows.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryView {
    /// Nothing received yet
    Waiting,
    /// Last poll failed
    Unavailable,
    /// Host answered but had nothing to report
    Empty(String),
    Devices(Vec<GpuReading>),
    /// Verbatim interactive monitor output
    Frame(String),
}

impl TelemetryView {
    pub fn from_snapshot(snapshot: &TelemetrySnapshot) -> Self {
        if !snapshot.is_ok() || snapshot.gpus.is_empty() {
            let message = snapshot
                .message
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "No GPU information available".to_string());
            return TelemetryView::Empty(message);
        }
        TelemetryView::Devices(snapshot.gpus.iter().map(GpuReading::from).collect())
    }
}

pub struct TelemetryCoordinator {
    host: Arc<dyn ProcessHost>,
    mode: TelemetryMode,
    env: EnvironmentTag,
    poll_interval: Duration,
    poll_task: Option<JoinHandle<()>>,
    signal_tx: mpsc::Sender<TelemetrySignal>,
    view: TelemetryView,
    timers_started: u64,
    timers_cancelled: u64,
}

impl TelemetryCoordinator {
    pub fn new(
        host: Arc<dyn ProcessHost>,
        poll_interval: Duration,
        env: EnvironmentTag,
    ) -> (Self, mpsc::Receiver<TelemetrySignal>) {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CAPACITY);
        let coordinator = TelemetryCoordinator {
            host,
            mode: TelemetryMode::Off,
            env,
            poll_interval,
            poll_task: None,
            signal_tx,
            view: TelemetryView::Waiting,
            timers_started: 0,
            timers_cancelled: 0,
        };
        (coordinator, signal_rx)
    }

    pub fn mode(&self) -> TelemetryMode {
        self.mode
    }

    pub fn view(&self) -> &TelemetryView {
        &self.view
    }

    pub fn set_environment(&mut self, env: EnvironmentTag) {
        self.env = env;
    }

    pub fn is_polling(&self) -> bool {
        self.poll_task.is_some()
    }

    /// (timers started, timers cancelled) since creation.
    pub fn timer_counts(&self) -> (u64, u64) {
        (self.timers_started, self.timers_cancelled)
    }

    /// Bring the active source in line with `state`. Returns the new mode if it changed.
    pub fn sync(&mut self, state: RunState) -> Option<TelemetryMode> {
        let target = TelemetryMode::for_run_state(state);
        if target == self.mode {
            return None;
        }
        match target {
            TelemetryMode::Polling => {
                self.request_monitor(MonitorAction::Stop);
                self.start_polling();
            }
            _ => {
                self.stop_polling();
                self.request_monitor(MonitorAction::Start);
            }
        }
        log::info!("[Telemetry] Mode {:?} -> {:?} (server {})", self.mode, target, state);
        self.mode = target;
        self.view = TelemetryView::Waiting;
        Some(target)
    }

    /// Start the poll timer, replacing any existing one.
    pub fn start_polling(&mut self) {
        if let Some(existing) = self.poll_task.take() {
            existing.abort();
            self.timers_cancelled += 1;
            log::debug!("[Telemetry] Replaced existing poll timer");
        }

        let host = self.host.clone();
        let tx = self.signal_tx.clone();
        let period = self.poll_interval;
        self.poll_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let outcome = host.fetch_telemetry().await;
                if tx.send(TelemetrySignal::Polled(outcome)).await.is_err() {
                    break;
                }
            }
        }));
        self.timers_started += 1;
        log::debug!("[Telemetry] Polling every {:?}", period);
    }

    pub fn stop_polling(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
            self.timers_cancelled += 1;
            log::debug!("[Telemetry] Poll timer stopped");
        }
    }

    fn request_monitor(&self, action: MonitorAction) {
        let pending = self.host.set_interactive_monitor(action, self.env);
        let tx = self.signal_tx.clone();
        tokio::spawn(async move {
            let outcome = pending.await;
            let _ = tx.send(TelemetrySignal::MonitorCompleted { action, outcome }).await;
        });
    }

    /// Apply a task result. Returns true when the view changed.
    pub fn apply(&mut self, signal: TelemetrySignal) -> bool {
        match signal {
            TelemetrySignal::Polled(outcome) => {
                if self.mode != TelemetryMode::Polling {
                    log::debug!("[Telemetry] Dropping poll result outside polling mode");
                    return false;
                }
                let view = match outcome {
                    Ok(snapshot) => TelemetryView::from_snapshot(&snapshot),
                    Err(e) => {
                        log::debug!("[Telemetry] Poll failed: {}", e);
                        TelemetryView::Unavailable
                    }
                };
                let changed = view != self.view;
                self.view = view;
                changed
            }
            TelemetrySignal::MonitorCompleted { action, outcome } => {
                match (action, outcome) {
                    (MonitorAction::Start, Ok(ack)) if ack.accepted() => {
                        log::info!("[Telemetry] Interactive monitor started");
                    }
                    (MonitorAction::Start, Ok(_)) => {
                        log::warn!("[Telemetry] Interactive monitor did not start");
                    }
                    (MonitorAction::Start, Err(e)) => {
                        log::warn!("[Telemetry] Interactive monitor unavailable: {}", e);
                    }
                    // Stopping a monitor that is not running is fine
                    (MonitorAction::Stop, result) => {
                        log::debug!("[Telemetry] Interactive monitor stop: {:?}", result.map(|a| a.accepted()));
                    }
                }
                false
            }
        }
    }

    /// Interactive monitor output. Rendered only in interactive mode.
    pub fn on_frame(&mut self, output: String) -> bool {
        if self.mode != TelemetryMode::Interactive {
            log::debug!("[Telemetry] Discarding monitor frame while {:?}", self.mode);
            return false;
        }
        self.view = TelemetryView::Frame(output);
        true
    }

    /// Stop every source. Used at shutdown.
    pub fn shutdown(&mut self) {
        self.stop_polling();
        if self.mode == TelemetryMode::Interactive {
            self.request_monitor(MonitorAction::Stop);
        }
        self.mode = TelemetryMode::Off;
    }
}

impl Drop for TelemetryCoordinator {
    fn drop(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }
}
