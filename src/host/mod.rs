//! Process host collaborator interfaces.
//!
//! The panel never spawns the server itself. Everything that touches the
//! machine running the model goes through these traits: process start/stop,
//! install-path resolution, GPU telemetry, terminal commands, the server log,
//! host shutdown and scheme persistence. The lifecycle and telemetry logic can
//! then be driven by in-memory fakes in tests.

pub mod http;
#[cfg(test)]
pub mod testing;

use crate::error::TransportError;
use crate::models::{
    CommandReceipt, Configuration, EnvironmentTag, InstallDetection, MonitorAck, MonitorAction,
    RequestAck, ResolvedPath, Scheme, SchemeId, TelemetrySnapshot,
};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub use http::HttpProcessHost;

/// Body of a start request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub command: String,
    pub env_type: EnvironmentTag,
    /// Launcher executable used for the WSL environment
    pub wsl_path: String,
}

/// Body of a terminal command hand-off.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecuteRequest {
    pub command: String,
    pub env: EnvironmentTag,
}

/// A scheme that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemeDraft {
    pub name: String,
    pub config: Configuration,
    pub env_type: EnvironmentTag,
}

/// Reply to a scheme create/update call.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SchemeReply {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub scheme: Option<Scheme>,
    #[serde(default, alias = "error")]
    pub message: Option<String>,
}

/// Operations against the machine hosting the inference server.
pub trait ProcessHost: Send + Sync {
    /// Ask the host for the canonical package-environment install path.
    fn resolve_install_path(
        &self,
        hint: String,
        env: EnvironmentTag,
    ) -> BoxFuture<'static, Result<ResolvedPath, TransportError>>;

    fn detect_environment(&self) -> BoxFuture<'static, Result<EnvironmentTag, TransportError>>;

    fn detect_install_path(&self) -> BoxFuture<'static, Result<InstallDetection, TransportError>>;

    /// Request a launch. A successful ack means "accepted", not "running".
    fn start_process(&self, request: StartRequest) -> BoxFuture<'static, Result<RequestAck, TransportError>>;

    fn stop_process(&self) -> BoxFuture<'static, Result<RequestAck, TransportError>>;

    fn fetch_telemetry(&self) -> BoxFuture<'static, Result<TelemetrySnapshot, TransportError>>;

    /// Start or stop the interactive GPU monitor session.
    fn set_interactive_monitor(
        &self,
        action: MonitorAction,
        env: EnvironmentTag,
    ) -> BoxFuture<'static, Result<MonitorAck, TransportError>>;

    /// Open the command in a separate terminal on the host.
    fn execute(&self, request: ExecuteRequest) -> BoxFuture<'static, Result<CommandReceipt, TransportError>>;

    /// Tail of the host's server log.
    fn fetch_logs(&self) -> BoxFuture<'static, Result<String, TransportError>>;

    fn clear_logs(&self) -> BoxFuture<'static, Result<(), TransportError>>;

    /// Stop the managed server and shut the host process down. The host may
    /// exit before it answers.
    fn shutdown(&self) -> BoxFuture<'static, Result<RequestAck, TransportError>>;
}

/// Id-addressed scheme collection. The store owns id assignment and name uniqueness.
pub trait SchemeBackend: Send + Sync {
    fn list_schemes(&self) -> BoxFuture<'static, Result<Vec<Scheme>, TransportError>>;
    fn create_scheme(&self, draft: SchemeDraft) -> BoxFuture<'static, Result<SchemeReply, TransportError>>;
    fn update_scheme(&self, scheme: Scheme) -> BoxFuture<'static, Result<SchemeReply, TransportError>>;
    fn delete_scheme(&self, id: SchemeId) -> BoxFuture<'static, Result<RequestAck, TransportError>>;
}
