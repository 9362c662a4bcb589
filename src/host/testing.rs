//! In-memory host and scheme store used by unit tests.

use super::{ExecuteRequest, ProcessHost, SchemeBackend, SchemeDraft, SchemeReply, StartRequest};
use crate::error::TransportError;
use crate::models::{
    CommandReceipt, EnvironmentTag, InstallDetection, MonitorAck, MonitorAction, RequestAck,
    ResolvedPath, Scheme, SchemeId, TelemetrySnapshot,
};
use futures::future::{self, BoxFuture, FutureExt};
use std::sync::Mutex;
use std::time::Duration;

type Reply<T> = Result<T, TransportError>;

fn ready<T: Send + 'static>(value: Reply<T>) -> BoxFuture<'static, Reply<T>> {
    future::ready(value).boxed()
}

/// Answer after `delay` of tokio time, or right away.
fn after<T: Send + 'static>(delay: Option<Duration>, value: Reply<T>) -> BoxFuture<'static, Reply<T>> {
    match delay {
        Some(delay) => async move {
            tokio::time::sleep(delay).await;
            value
        }
        .boxed(),
        None => ready(value),
    }
}

fn accepted() -> Reply<RequestAck> {
    Ok(RequestAck {
        success: true,
        message: None,
    })
}

/// Scriptable `ProcessHost` that records every call by name.
pub struct FakeHost {
    resolve: Mutex<Reply<ResolvedPath>>,
    start: Mutex<Reply<RequestAck>>,
    stop: Mutex<Reply<RequestAck>>,
    telemetry: Mutex<Reply<TelemetrySnapshot>>,
    monitor: Mutex<Reply<MonitorAck>>,
    execute: Mutex<Reply<CommandReceipt>>,
    resolve_delay: Mutex<Option<Duration>>,
    start_delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<String>>,
}

impl FakeHost {
    pub fn new() -> Self {
        FakeHost {
            resolve: Mutex::new(Err(TransportError::request("/api/validate-conda-path", "offline"))),
            start: Mutex::new(accepted()),
            stop: Mutex::new(accepted()),
            telemetry: Mutex::new(Ok(TelemetrySnapshot {
                status: "ok".to_string(),
                gpus: Vec::new(),
                message: None,
            })),
            monitor: Mutex::new(Ok(MonitorAck {
                status: Some("started".to_string()),
                success: Some(true),
            })),
            execute: Mutex::new(Ok(CommandReceipt {
                success: true,
                output: "Command sent to terminal".to_string(),
                error: String::new(),
            })),
            resolve_delay: Mutex::new(None),
            start_delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Hold install-path replies back for `delay`.
    pub fn set_resolve_delay(&self, delay: Duration) {
        *self.resolve_delay.lock().unwrap() = Some(delay);
    }

    /// Hold start replies back for `delay`.
    pub fn set_start_delay(&self, delay: Duration) {
        *self.start_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_execute(&self, reply: Reply<CommandReceipt>) {
        *self.execute.lock().unwrap() = reply;
    }

    pub fn set_resolve(&self, reply: Reply<ResolvedPath>) {
        *self.resolve.lock().unwrap() = reply;
    }

    pub fn set_start(&self, reply: Reply<RequestAck>) {
        *self.start.lock().unwrap() = reply;
    }

    pub fn set_stop(&self, reply: Reply<RequestAck>) {
        *self.stop.lock().unwrap() = reply;
    }

    pub fn set_telemetry(&self, reply: Reply<TelemetrySnapshot>) {
        *self.telemetry.lock().unwrap() = reply;
    }

    pub fn set_monitor(&self, reply: Reply<MonitorAck>) {
        *self.monitor.lock().unwrap() = reply;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.as_str() == name).count()
    }

    fn record(&self, name: impl Into<String>) {
        self.calls.lock().unwrap().push(name.into());
    }
}

impl ProcessHost for FakeHost {
    fn resolve_install_path(&self, _hint: String, _env: EnvironmentTag) -> BoxFuture<'static, Reply<ResolvedPath>> {
        self.record("resolve_install_path");
        after(*self.resolve_delay.lock().unwrap(), self.resolve.lock().unwrap().clone())
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
        self.record("start_process");
        after(*self.start_delay.lock().unwrap(), self.start.lock().unwrap().clone())
    }

    fn stop_process(&self) -> BoxFuture<'static, Reply<RequestAck>> {
        self.record("stop_process");
        ready(self.stop.lock().unwrap().clone())
    }

    fn fetch_telemetry(&self) -> BoxFuture<'static, Reply<TelemetrySnapshot>> {
        self.record("fetch_telemetry");
        ready(self.telemetry.lock().unwrap().clone())
    }

    fn set_interactive_monitor(&self, action: MonitorAction, _env: EnvironmentTag) -> BoxFuture<'static, Reply<MonitorAck>> {
        self.record(format!("monitor_{}", action.as_str()));
        ready(self.monitor.lock().unwrap().clone())
    }

    fn execute(&self, request: ExecuteRequest) -> BoxFuture<'static, Reply<CommandReceipt>> {
        self.record(format!("execute:{}", request.command));
        ready(self.execute.lock().unwrap().clone())
    }

    fn fetch_logs(&self) -> BoxFuture<'static, Reply<String>> {
        self.record("fetch_logs");
        ready(Ok("INFO: server log line\n".to_string()))
    }

    fn clear_logs(&self) -> BoxFuture<'static, Reply<()>> {
        self.record("clear_logs");
        ready(Ok(()))
    }

    fn shutdown(&self) -> BoxFuture<'static, Reply<RequestAck>> {
        self.record("shutdown");
        ready(accepted())
    }
}

/// In-memory scheme collection with numeric id assignment.
pub struct FakeSchemeStore {
    schemes: Mutex<Vec<Scheme>>,
    next_id: Mutex<u64>,
    offline: Mutex<bool>,
}

impl FakeSchemeStore {
    pub fn new(schemes: Vec<Scheme>) -> Self {
        let next_id = schemes.len() as u64 + 1;
        FakeSchemeStore {
            schemes: Mutex::new(schemes),
            next_id: Mutex::new(next_id),
            offline: Mutex::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }

    pub fn stored(&self) -> Vec<Scheme> {
        self.schemes.lock().unwrap().clone()
    }

    fn check_online(&self, endpoint: &str) -> Result<(), TransportError> {
        if *self.offline.lock().unwrap() {
            Err(TransportError::request(endpoint, "connection refused"))
        } else {
            Ok(())
        }
    }
}

impl SchemeBackend for FakeSchemeStore {
    fn list_schemes(&self) -> BoxFuture<'static, Reply<Vec<Scheme>>> {
        let reply = self.check_online("/api/schemes").map(|_| self.stored());
        ready(reply)
    }

    fn create_scheme(&self, draft: SchemeDraft) -> BoxFuture<'static, Reply<SchemeReply>> {
        if let Err(e) = self.check_online("/api/schemes") {
            return ready(Err(e));
        }
        let mut schemes = self.schemes.lock().unwrap();
        // Same name overwrites, as the real store does
        let scheme = match schemes.iter_mut().find(|s| s.name == draft.name) {
            Some(existing) => {
                existing.config = draft.config;
                existing.env_type = draft.env_type;
                existing.clone()
            }
            None => {
                let mut next_id = self.next_id.lock().unwrap();
                let scheme = Scheme {
                    id: SchemeId(next_id.to_string()),
                    name: draft.name,
                    config: draft.config,
                    env_type: draft.env_type,
                    created_at: Some("2026-01-01T00:00:00".to_string()),
                };
                *next_id += 1;
                schemes.push(scheme.clone());
                scheme
            }
        };
        ready(Ok(SchemeReply {
            success: true,
            scheme: Some(scheme),
            message: None,
        }))
    }

    fn update_scheme(&self, scheme: Scheme) -> BoxFuture<'static, Reply<SchemeReply>> {
        if let Err(e) = self.check_online("/api/schemes/<id>") {
            return ready(Err(e));
        }
        let mut schemes = self.schemes.lock().unwrap();
        let reply = match schemes.iter_mut().find(|s| s.id == scheme.id) {
            Some(existing) => {
                *existing = scheme.clone();
                SchemeReply {
                    success: true,
                    scheme: Some(scheme),
                    message: None,
                }
            }
            None => SchemeReply {
                success: false,
                scheme: None,
                message: Some("scheme not found".to_string()),
            },
        };
        ready(Ok(reply))
    }

    fn delete_scheme(&self, id: SchemeId) -> BoxFuture<'static, Reply<RequestAck>> {
        if let Err(e) = self.check_online("/api/schemes/<id>") {
            return ready(Err(e));
        }
        let mut schemes = self.schemes.lock().unwrap();
        let before = schemes.len();
        schemes.retain(|s| s.id != id);
        let success = schemes.len() < before;
        ready(Ok(RequestAck {
            success,
            message: if success { None } else { Some("scheme not found".to_string()) },
        }))
    }
}
