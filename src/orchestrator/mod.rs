//! Process lifecycle controller.
//!
//! Owns the run state of the managed server. `start` and `stop` apply their
//! provisional state synchronously and hand the network work to a spawned
//! task; the task posts a `LifecycleSignal` back when it is done. A start
//! runs in two steps: the launch is prepared first (install-path resolution
//! and command synthesis), then sent only if the start is still the current
//! intent. Only status events from the event channel may confirm Running or Idle.
//!
//! Stale responses are never cancelled. Each signal carries the epoch of the
//! intent that issued it and is only applied if that intent is still current.

pub mod state;

pub use state::RunStateTracker;

use crate::command::CommandPreview;
use crate::error::{PreconditionError, TransportError};
use crate::host::{ProcessHost, StartRequest};
use crate::models::{Notice, RequestAck, RunState};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const SIGNAL_CAPACITY: usize = 64;

/// A launch ready to go out: the command shown to the operator and the request carrying it.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedLaunch {
    pub preview: CommandPreview,
    pub request: StartRequest,
}

/// Completion of work started by the lifecycle controller.
#[derive(Debug)]
pub enum LifecycleSignal {
    /// Launch preparation finished
    Prepared { epoch: u64, launch: PreparedLaunch },
    StartCompleted {
        epoch: u64,
        outcome: Result<RequestAck, TransportError>,
    },
    StopCompleted {
        epoch: u64,
        previous: RunState,
        outcome: Result<RequestAck, TransportError>,
    },
    /// The stop display delay elapsed
    StopSettled { token: u64 },
}

/// How an accepted stop was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// A stop request went to the host
    Requested,
    /// The launch was still being prepared; nothing had reached the host
    CancelledLaunch,
}

/// Scheduled Stopping -> Idle correction; aborting the task cancels it.
struct PendingSettle {
    token: u64,
    handle: JoinHandle<()>,
}

/// Launch preparation in flight for the start intent `epoch`.
struct Preparing {
    epoch: u64,
    handle: JoinHandle<()>,
}

pub struct LifecycleController {
    host: Arc<dyn ProcessHost>,
    tracker: RunStateTracker,
    signal_tx: mpsc::Sender<LifecycleSignal>,
    stop_display_delay: Duration,
    pending_settle: Option<PendingSettle>,
    preparing: Option<Preparing>,
    /// Stop was accepted by the host; showing "stopped" until the settle fires
    stop_acknowledged: bool,
}

impl LifecycleController {
    pub fn new(
        host: Arc<dyn ProcessHost>,
        stop_display_delay: Duration,
    ) -> (Self, mpsc::Receiver<LifecycleSignal>) {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CAPACITY);
        let controller = LifecycleController {
            host,
            tracker: RunStateTracker::new(),
            signal_tx,
            stop_display_delay,
            pending_settle: None,
            preparing: None,
            stop_acknowledged: false,
        };
        (controller, signal_rx)
    }

    pub fn state(&self) -> RunState {
        self.tracker.current()
    }

    /// Label for the status line; distinguishes an acknowledged stop.
    pub fn status_label(&self) -> &'static str {
        if self.stop_acknowledged && self.state() == RunState::Stopping {
            "stopped"
        } else {
            self.state().as_str()
        }
    }

    pub fn has_pending_settle(&self) -> bool {
        self.pending_settle.is_some()
    }

    pub fn is_preparing(&self) -> bool {
        self.preparing.is_some()
    }

    /// Request a launch. Moves to Starting at once; `prepare` runs on its own
    /// task and the request is sent when it finishes.
    pub fn start(&mut self, prepare: BoxFuture<'static, PreparedLaunch>) -> Result<(), PreconditionError> {
        let current = self.state();
        if !current.accepts_start() {
            log::warn!("[Lifecycle] Start ignored, server is {}", current);
            return Err(PreconditionError::AlreadyActive(current.as_str()));
        }

        self.cancel_settle();
        self.abandon_preparation();
        self.stop_acknowledged = false;
        let epoch = self.tracker.intend(RunState::Starting);
        log::info!("[Lifecycle] Preparing launch");

        let tx = self.signal_tx.clone();
        let handle = tokio::spawn(async move {
            let launch = prepare.await;
            let _ = tx.send(LifecycleSignal::Prepared { epoch, launch }).await;
        });
        self.preparing = Some(Preparing { epoch, handle });
        Ok(())
    }

    /// Request a stop. Allowed while Running, and while Starting so a stop
    /// issued right after a start is not dropped.
    pub fn stop(&mut self) -> Result<StopMode, PreconditionError> {
        let previous = self.state();
        if !matches!(previous, RunState::Running | RunState::Starting) {
            log::warn!("[Lifecycle] Stop ignored, server is {}", previous);
            return Err(PreconditionError::NotRunning(previous.as_str()));
        }

        self.cancel_settle();
        self.stop_acknowledged = false;
        let epoch = self.tracker.intend(RunState::Stopping);

        if previous == RunState::Starting && self.abandon_preparation() {
            log::info!("[Lifecycle] Launch cancelled before it was sent");
            self.stop_acknowledged = true;
            self.schedule_settle(epoch);
            return Ok(StopMode::CancelledLaunch);
        }

        log::info!("[Lifecycle] Stopping vLLM server");
        let pending = self.host.stop_process();
        let tx = self.signal_tx.clone();
        tokio::spawn(async move {
            let outcome = pending.await;
            let _ = tx
                .send(LifecycleSignal::StopCompleted {
                    epoch,
                    previous,
                    outcome,
                })
                .await;
        });
        Ok(StopMode::Requested)
    }

    /// Authoritative status from the event channel. Always wins.
    pub fn on_status(&mut self, running: bool) -> RunState {
        self.cancel_settle();
        self.abandon_preparation();
        self.stop_acknowledged = false;
        let observed = if running { RunState::Running } else { RunState::Idle };
        let before = self.state();
        self.tracker.observe(observed);
        if before != observed {
            log::info!("[Lifecycle] Server reported {} (was {})", observed, before);
        }
        observed
    }

    /// Apply a completion signal. Returns a notification to surface, if any.
    pub fn apply(&mut self, signal: LifecycleSignal) -> Option<Notice> {
        match signal {
            LifecycleSignal::Prepared { epoch, launch } => {
                self.on_prepared(epoch, launch);
                None
            }
            LifecycleSignal::StartCompleted { epoch, outcome } => self.on_start_completed(epoch, outcome),
            LifecycleSignal::StopCompleted {
                epoch,
                previous,
                outcome,
            } => self.on_stop_completed(epoch, previous, outcome),
            LifecycleSignal::StopSettled { token } => {
                self.on_stop_settled(token);
                None
            }
        }
    }

    fn on_prepared(&mut self, epoch: u64, launch: PreparedLaunch) {
        if matches!(&self.preparing, Some(p) if p.epoch == epoch) {
            self.preparing = None;
        }
        if !self.tracker.is_current_intent(epoch, RunState::Starting) {
            log::info!("[Lifecycle] Launch dropped, server is {}", self.state());
            return;
        }

        let request = launch.request;
        log::info!("[Lifecycle] Starting vLLM server ({})", request.env_type.label());
        log::info!("[Lifecycle] Command: {}", request.command);

        let pending = self.host.start_process(request);
        let tx = self.signal_tx.clone();
        tokio::spawn(async move {
            let outcome = pending.await;
            let _ = tx.send(LifecycleSignal::StartCompleted { epoch, outcome }).await;
        });
    }

    fn on_start_completed(&mut self, epoch: u64, outcome: Result<RequestAck, TransportError>) -> Option<Notice> {
        let failure = match outcome {
            Ok(ack) if ack.success => {
                // Accepted only; Running comes from the event channel
                log::info!("[Lifecycle] Start accepted, waiting for the server to come up");
                return None;
            }
            Ok(ack) => ack.message.unwrap_or_else(|| "start request rejected".to_string()),
            Err(e) => e.to_string(),
        };

        if self.tracker.is_current_intent(epoch, RunState::Starting) {
            log::error!("[Lifecycle] Start failed: {}", failure);
            self.tracker.intend(RunState::Error);
        } else {
            log::warn!("[Lifecycle] Late start failure ignored (state is {}): {}", self.state(), failure);
        }
        Some(Notice::error(format!("Start failed: {}", failure)))
    }

    fn on_stop_completed(
        &mut self,
        epoch: u64,
        previous: RunState,
        outcome: Result<RequestAck, TransportError>,
    ) -> Option<Notice> {
        let still_current = self.tracker.is_current_intent(epoch, RunState::Stopping);
        let failure = match outcome {
            Ok(ack) if ack.success => {
                if still_current {
                    log::info!("[Lifecycle] Stop accepted");
                    self.stop_acknowledged = true;
                    self.schedule_settle(epoch);
                    return Some(Notice::info("Server stopped"));
                }
                log::debug!("[Lifecycle] Stop accepted after state moved on to {}", self.state());
                return None;
            }
            Ok(ack) => ack.message.unwrap_or_else(|| "stop request rejected".to_string()),
            Err(e) => e.to_string(),
        };

        if still_current {
            log::error!("[Lifecycle] Stop failed, restoring {}: {}", previous, failure);
            self.tracker.intend(previous);
        } else {
            log::warn!("[Lifecycle] Late stop failure ignored: {}", failure);
        }
        Some(Notice::error(format!("Stop failed: {}", failure)))
    }

    fn on_stop_settled(&mut self, token: u64) {
        match self.pending_settle.take() {
            Some(pending) if pending.token == token => {}
            other => {
                self.pending_settle = other;
                return;
            }
        }
        self.stop_acknowledged = false;
        if self.tracker.is_current_intent(token, RunState::Stopping) {
            self.tracker.intend(RunState::Idle);
            log::debug!("[Lifecycle] Stop display settled to idle");
        }
    }

    fn schedule_settle(&mut self, token: u64) {
        self.cancel_settle();
        let tx = self.signal_tx.clone();
        let delay = self.stop_display_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(LifecycleSignal::StopSettled { token }).await;
        });
        self.pending_settle = Some(PendingSettle { token, handle });
    }

    fn cancel_settle(&mut self) {
        if let Some(pending) = self.pending_settle.take() {
            pending.handle.abort();
            log::debug!("[Lifecycle] Pending stop settle cancelled");
        }
    }

    /// Drop launch preparation in flight. True if there was one.
    fn abandon_preparation(&mut self) -> bool {
        match self.preparing.take() {
            Some(preparing) => {
                preparing.handle.abort();
                log::debug!("[Lifecycle] Launch preparation {} abandoned", preparing.epoch);
                true
            }
            None => false,
        }
    }

    /// Teardown hook: best-effort stop if Running. Fire-and-forget, no retry.
    pub fn teardown(&mut self) -> bool {
        self.cancel_settle();
        self.abandon_preparation();
        if self.state() != RunState::Running {
            return false;
        }
        log::info!("[Lifecycle] Shutting down, sending best-effort stop");
        let pending = self.host.stop_process();
        tokio::spawn(async move {
            if let Err(e) = pending.await {
                log::debug!("[Lifecycle] Teardown stop failed: {}", e);
            }
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::FakeHost;
    use crate::models::EnvironmentTag;
    use futures::future::{self, FutureExt};

    fn launch() -> PreparedLaunch {
        let command = "/bin/bash -c \"vllm serve\"".to_string();
        PreparedLaunch {
            preview: CommandPreview {
                command: command.clone(),
                summary: String::new(),
                install_path: String::new(),
                warning: None,
                detected: None,
            },
            request: StartRequest {
                command,
                env_type: EnvironmentTag::Linux,
                wsl_path: "wsl".to_string(),
            },
        }
    }

    fn ready_launch() -> BoxFuture<'static, PreparedLaunch> {
        future::ready(launch()).boxed()
    }

    /// Preparation that takes `delay` of tokio time.
    fn slow_launch(delay: Duration) -> BoxFuture<'static, PreparedLaunch> {
        async move {
            tokio::time::sleep(delay).await;
            launch()
        }
        .boxed()
    }

    fn controller(host: &Arc<FakeHost>) -> (LifecycleController, mpsc::Receiver<LifecycleSignal>) {
        LifecycleController::new(host.clone(), Duration::from_millis(1500))
    }

    /// Receive and apply the next signal.
    async fn step(lifecycle: &mut LifecycleController, rx: &mut mpsc::Receiver<LifecycleSignal>) -> Option<Notice> {
        let signal = rx.recv().await.unwrap();
        lifecycle.apply(signal)
    }

    #[tokio::test]
    async fn test_start_is_starting_before_response() {
        let host = Arc::new(FakeHost::new());
        let (mut lifecycle, mut rx) = controller(&host);

        lifecycle.start(ready_launch()).unwrap();
        assert_eq!(lifecycle.state(), RunState::Starting);
        assert_eq!(host.count("start_process"), 0);

        // Prepared, then sent
        assert!(step(&mut lifecycle, &mut rx).await.is_none());
        assert_eq!(host.count("start_process"), 1);

        // Accepted is not running
        assert!(step(&mut lifecycle, &mut rx).await.is_none());
        assert_eq!(lifecycle.state(), RunState::Starting);

        lifecycle.on_status(true);
        assert_eq!(lifecycle.state(), RunState::Running);
    }

    #[tokio::test]
    async fn test_start_while_running_is_rejected() {
        let host = Arc::new(FakeHost::new());
        let (mut lifecycle, _rx) = controller(&host);
        lifecycle.on_status(true);

        let result = lifecycle.start(ready_launch());
        assert_eq!(result, Err(PreconditionError::AlreadyActive("running")));
        assert_eq!(lifecycle.state(), RunState::Running);
        assert!(!lifecycle.is_preparing());
    }

    #[tokio::test]
    async fn test_start_failure_moves_to_error_and_allows_retry() {
        let host = Arc::new(FakeHost::new());
        host.set_start(Err(TransportError::request("/api/run", "connection refused")));
        let (mut lifecycle, mut rx) = controller(&host);

        lifecycle.start(ready_launch()).unwrap();
        step(&mut lifecycle, &mut rx).await;
        let notice = step(&mut lifecycle, &mut rx).await.unwrap();
        assert_eq!(notice.level, crate::models::NoticeLevel::Error);
        assert_eq!(lifecycle.state(), RunState::Error);

        host.set_start(Ok(RequestAck {
            success: true,
            message: None,
        }));
        lifecycle.start(ready_launch()).unwrap();
        assert_eq!(lifecycle.state(), RunState::Starting);
    }

    #[tokio::test]
    async fn test_rejected_start_uses_server_message() {
        let host = Arc::new(FakeHost::new());
        host.set_start(Ok(RequestAck {
            success: false,
            message: Some("model not found".to_string()),
        }));
        let (mut lifecycle, mut rx) = controller(&host);

        lifecycle.start(ready_launch()).unwrap();
        step(&mut lifecycle, &mut rx).await;
        let notice = step(&mut lifecycle, &mut rx).await.unwrap();
        assert_eq!(notice.message, "Start failed: model not found");
        assert_eq!(lifecycle.state(), RunState::Error);
    }

    #[tokio::test]
    async fn test_stop_outside_running_is_noop() {
        let host = Arc::new(FakeHost::new());
        let (mut lifecycle, _rx) = controller(&host);

        assert_eq!(lifecycle.stop(), Err(PreconditionError::NotRunning("idle")));
        assert_eq!(lifecycle.state(), RunState::Idle);
        assert_eq!(host.count("stop_process"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_preparation_cancels_launch() {
        let host = Arc::new(FakeHost::new());
        let (mut lifecycle, mut rx) = controller(&host);

        lifecycle.start(slow_launch(Duration::from_secs(3))).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(lifecycle.state(), RunState::Starting);

        assert_eq!(lifecycle.stop(), Ok(StopMode::CancelledLaunch));
        assert_eq!(lifecycle.state(), RunState::Stopping);
        assert_eq!(lifecycle.status_label(), "stopped");
        assert!(!lifecycle.is_preparing());

        // Only the settle arrives; the launch never goes out
        let settled = rx.recv().await.unwrap();
        assert!(matches!(settled, LifecycleSignal::StopSettled { .. }));
        lifecycle.apply(settled);
        assert_eq!(lifecycle.state(), RunState::Idle);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(host.count("start_process"), 0);
        assert_eq!(host.count("stop_process"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_host_is_slow_to_accept_start() {
        let host = Arc::new(FakeHost::new());
        host.set_start_delay(Duration::from_secs(1));
        let (mut lifecycle, mut rx) = controller(&host);

        lifecycle.start(ready_launch()).unwrap();
        assert_eq!(lifecycle.state(), RunState::Starting);
        step(&mut lifecycle, &mut rx).await;
        assert_eq!(host.count("start_process"), 1);

        // The start reply is still outstanding
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(lifecycle.stop(), Ok(StopMode::Requested));
        assert_eq!(lifecycle.state(), RunState::Stopping);

        let notice = step(&mut lifecycle, &mut rx).await;
        assert_eq!(notice, Some(Notice::info("Server stopped")));
        assert_eq!(lifecycle.status_label(), "stopped");

        // Late start ack must not resurrect Starting
        let late = rx.recv().await.unwrap();
        assert!(matches!(late, LifecycleSignal::StartCompleted { .. }));
        lifecycle.apply(late);
        assert_eq!(lifecycle.state(), RunState::Stopping);
    }

    #[tokio::test]
    async fn test_prepared_launch_after_status_is_dropped() {
        let host = Arc::new(FakeHost::new());
        let (mut lifecycle, _rx) = controller(&host);

        lifecycle.start(ready_launch()).unwrap();
        lifecycle.on_status(false);
        assert_eq!(lifecycle.state(), RunState::Idle);

        lifecycle.apply(LifecycleSignal::Prepared {
            epoch: 1,
            launch: launch(),
        });
        assert_eq!(lifecycle.state(), RunState::Idle);
        assert_eq!(host.count("start_process"), 0);
    }

    #[tokio::test]
    async fn test_late_start_failure_after_stop_is_ignored() {
        let host = Arc::new(FakeHost::new());
        let (mut lifecycle, mut rx) = controller(&host);

        lifecycle.start(ready_launch()).unwrap();
        step(&mut lifecycle, &mut rx).await;
        let start_epoch = 1;
        lifecycle.stop().unwrap();
        let notice = lifecycle.apply(LifecycleSignal::StartCompleted {
            epoch: start_epoch,
            outcome: Err(TransportError::request("/api/run", "timeout")),
        });
        assert!(notice.is_some());
        assert_eq!(lifecycle.state(), RunState::Stopping);
    }

    #[tokio::test]
    async fn test_status_false_while_starting_goes_idle() {
        let host = Arc::new(FakeHost::new());
        let (mut lifecycle, _rx) = controller(&host);

        lifecycle.start(ready_launch()).unwrap();
        lifecycle.on_status(false);
        assert_eq!(lifecycle.state(), RunState::Idle);
        assert!(!lifecycle.is_preparing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_success_settles_to_idle_after_delay() {
        let host = Arc::new(FakeHost::new());
        let (mut lifecycle, mut rx) = controller(&host);
        lifecycle.on_status(true);

        assert_eq!(lifecycle.stop(), Ok(StopMode::Requested));
        let notice = step(&mut lifecycle, &mut rx).await;
        assert_eq!(notice, Some(Notice::info("Server stopped")));
        assert_eq!(lifecycle.state(), RunState::Stopping);
        assert_eq!(lifecycle.status_label(), "stopped");
        assert!(lifecycle.has_pending_settle());

        let settled = rx.recv().await.unwrap();
        assert!(matches!(settled, LifecycleSignal::StopSettled { .. }));
        lifecycle.apply(settled);
        assert_eq!(lifecycle.state(), RunState::Idle);
        assert!(!lifecycle.has_pending_settle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_event_cancels_pending_settle() {
        let host = Arc::new(FakeHost::new());
        let (mut lifecycle, mut rx) = controller(&host);
        lifecycle.on_status(true);

        lifecycle.stop().unwrap();
        step(&mut lifecycle, &mut rx).await;
        assert!(lifecycle.has_pending_settle());

        lifecycle.on_status(false);
        assert!(!lifecycle.has_pending_settle());
        assert_eq!(lifecycle.state(), RunState::Idle);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_failure_restores_previous_state() {
        let host = Arc::new(FakeHost::new());
        host.set_stop(Ok(RequestAck {
            success: false,
            message: Some("no process".to_string()),
        }));
        let (mut lifecycle, mut rx) = controller(&host);
        lifecycle.on_status(true);

        lifecycle.stop().unwrap();
        let notice = step(&mut lifecycle, &mut rx).await.unwrap();
        assert_eq!(notice.message, "Stop failed: no process");
        assert_eq!(lifecycle.state(), RunState::Running);
    }

    #[tokio::test]
    async fn test_teardown_only_stops_when_running() {
        let host = Arc::new(FakeHost::new());
        let (mut lifecycle, _rx) = controller(&host);

        assert!(!lifecycle.teardown());
        lifecycle.on_status(true);
        assert!(lifecycle.teardown());

        tokio::task::yield_now().await;
        assert_eq!(host.count("stop_process"), 1);
    }
}
