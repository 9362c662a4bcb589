//! Shared in-memory process host for integration tests.

#![allow(dead_code)]

use futures::future::{self, BoxFuture, FutureExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use vllm_panel::host::{ExecuteRequest, SchemeDraft, SchemeReply};
use vllm_panel::models::{
    CommandReceipt, InstallDetection, MonitorAck, MonitorAction, RequestAck, ResolvedPath, TelemetrySnapshot,
};
use vllm_panel::ui::{AppController, ControlMessage, ControllerInbox, Flow, PanelEvent, PANEL_EVENT_CAPACITY};
use vllm_panel::{
    AppSettings, EnvironmentTag, ProcessHost, Scheme, SchemeBackend, SchemeId, StartRequest, TransportError,
};

type Reply<T> = Result<T, TransportError>;

fn ready<T: Send + 'static>(value: Reply<T>) -> BoxFuture<'static, Reply<T>> {
    future::ready(value).boxed()
}

/// Accepts every request and keeps schemes in memory. Counts calls by name.
#[derive(Default)]
pub struct MemoryHost {
    calls: Mutex<Vec<String>>,
    schemes: Mutex<Vec<Scheme>>,
    reject_start: Mutex<Option<String>>,
    resolve_delay: Mutex<Option<Duration>>,
}

impl MemoryHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject_start(&self, message: &str) {
        *self.reject_start.lock().unwrap() = Some(message.to_string());
    }

    /// Hold install-path answers back for `delay`.
    pub fn set_resolve_delay(&self, delay: Duration) {
        *self.resolve_delay.lock().unwrap() = Some(delay);
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.as_str() == name).count()
    }

    pub fn stored(&self) -> Vec<Scheme> {
        self.schemes.lock().unwrap().clone()
    }

    fn record(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }
}

fn ack() -> Reply<RequestAck> {
    Ok(RequestAck {
        success: true,
        message: None,
    })
}

impl ProcessHost for MemoryHost {
    fn resolve_install_path(&self, hint: String, _env: EnvironmentTag) -> BoxFuture<'static, Reply<ResolvedPath>> {
        self.record("resolve");
        let path = if hint.is_empty() { "/opt/conda".to_string() } else { hint };
        let reply = ResolvedPath {
            valid: true,
            path,
            message: String::new(),
        };
        match *self.resolve_delay.lock().unwrap() {
            Some(delay) => async move {
                tokio::time::sleep(delay).await;
                Ok::<_, TransportError>(reply)
            }
            .boxed(),
            None => ready(Ok(reply)),
        }
    }

    fn detect_environment(&self) -> BoxFuture<'static, Reply<EnvironmentTag>> {
        self.record("detect_environment");
        ready(Ok(EnvironmentTag::Linux))
    }

    fn detect_install_path(&self) -> BoxFuture<'static, Reply<InstallDetection>> {
        self.record("detect_install_path");
        ready(Ok(InstallDetection {
            conda_path: "/opt/conda".to_string(),
            environments: vec!["vllm".to_string()],
        }))
    }

    fn start_process(&self, _request: StartRequest) -> BoxFuture<'static, Reply<RequestAck>> {
        self.record("start");
        match self.reject_start.lock().unwrap().clone() {
            Some(message) => ready(Ok(RequestAck {
                success: false,
                message: Some(message),
            })),
            None => ready(ack()),
        }
    }

    fn stop_process(&self) -> BoxFuture<'static, Reply<RequestAck>> {
        self.record("stop");
        ready(ack())
    }

    fn fetch_telemetry(&self) -> BoxFuture<'static, Reply<TelemetrySnapshot>> {
        self.record("telemetry");
        ready(Ok(TelemetrySnapshot {
            status: "ok".to_string(),
            gpus: Vec::new(),
            message: None,
        }))
    }

    fn set_interactive_monitor(&self, action: MonitorAction, _env: EnvironmentTag) -> BoxFuture<'static, Reply<MonitorAck>> {
        self.record(&format!("monitor_{}", action.as_str()));
        ready(Ok(MonitorAck {
            status: Some("started".to_string()),
            success: Some(true),
        }))
    }

    fn execute(&self, request: ExecuteRequest) -> BoxFuture<'static, Reply<CommandReceipt>> {
        self.record("execute");
        ready(Ok(CommandReceipt {
            success: true,
            output: format!("Command sent to terminal: {}", request.command),
            error: String::new(),
        }))
    }

    fn fetch_logs(&self) -> BoxFuture<'static, Reply<String>> {
        self.record("logs");
        ready(Ok("INFO: Application startup complete.\n".to_string()))
    }

    fn clear_logs(&self) -> BoxFuture<'static, Reply<()>> {
        self.record("clear_logs");
        ready(Ok(()))
    }

    fn shutdown(&self) -> BoxFuture<'static, Reply<RequestAck>> {
        self.record("shutdown");
        ready(Ok(RequestAck {
            success: true,
            message: Some("Server shutting down...".to_string()),
        }))
    }
}

impl SchemeBackend for MemoryHost {
    fn list_schemes(&self) -> BoxFuture<'static, Reply<Vec<Scheme>>> {
        ready(Ok(self.stored()))
    }

    fn create_scheme(&self, draft: SchemeDraft) -> BoxFuture<'static, Reply<SchemeReply>> {
        let mut schemes = self.schemes.lock().unwrap();
        let scheme = Scheme {
            id: SchemeId((schemes.len() + 1).to_string()),
            name: draft.name,
            config: draft.config,
            env_type: draft.env_type,
            created_at: None,
        };
        schemes.push(scheme.clone());
        ready(Ok(SchemeReply {
            success: true,
            scheme: Some(scheme),
            message: None,
        }))
    }

    fn update_scheme(&self, scheme: Scheme) -> BoxFuture<'static, Reply<SchemeReply>> {
        let mut schemes = self.schemes.lock().unwrap();
        if let Some(existing) = schemes.iter_mut().find(|s| s.id == scheme.id) {
            *existing = scheme.clone();
        }
        ready(Ok(SchemeReply {
            success: true,
            scheme: Some(scheme),
            message: None,
        }))
    }

    fn delete_scheme(&self, id: SchemeId) -> BoxFuture<'static, Reply<RequestAck>> {
        self.schemes.lock().unwrap().retain(|s| s.id != id);
        ready(ack())
    }
}

pub struct Harness {
    pub controller: AppController,
    pub inbox: ControllerInbox,
    pub events: mpsc::Receiver<PanelEvent>,
    pub host: Arc<MemoryHost>,
}

pub fn harness() -> Harness {
    let host = MemoryHost::new();
    let (panel_tx, events) = mpsc::channel(PANEL_EVENT_CAPACITY);
    let (controller, inbox) = AppController::new(AppSettings::default(), host.clone(), host.clone(), panel_tx);
    Harness {
        controller,
        inbox,
        events,
        host,
    }
}

impl Harness {
    /// Dispatch the next lifecycle signal the controller's own tasks produced.
    pub async fn next_lifecycle(&mut self) -> Flow {
        let signal = self.inbox.lifecycle.recv().await.unwrap();
        self.controller.dispatch(ControlMessage::Lifecycle(signal))
    }

    /// Dispatch the next finished round-trip.
    pub async fn next_task(&mut self) -> Flow {
        let signal = self.inbox.tasks.recv().await.unwrap();
        self.controller.dispatch(ControlMessage::Task(signal))
    }
}

pub fn drain(rx: &mut mpsc::Receiver<PanelEvent>) -> Vec<PanelEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
