//! HTTP implementation of the host collaborators.
//!
//! Talks JSON to the `/api/*` routes of the process host. A non-2xx status
//! carrying an `{error}` or `{message}` body is reported as
//! `TransportError::Rejected` with that text, any other non-2xx status as
//! `TransportError::Status`. Body decode failures become `TransportError::Decode`.

use super::{ExecuteRequest, ProcessHost, SchemeBackend, SchemeDraft, SchemeReply, StartRequest};
use crate::error::TransportError;
use crate::models::{
    CommandReceipt, EnvironmentTag, InstallDetection, MonitorAck, MonitorAction, RequestAck,
    ResolvedPath, Scheme, SchemeId, TelemetrySnapshot,
};
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

#[derive(Deserialize)]
struct EnvironmentReply {
    #[serde(default)]
    environment: String,
}

/// Error body some routes send along with a 4xx/5xx status.
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorBody {
    fn reason(self) -> Option<String> {
        self.error
            .into_iter()
            .chain(self.message)
            .map(|text| text.trim().to_string())
            .find(|text| !text.is_empty())
    }
}

#[derive(Deserialize)]
struct LogsReply {
    #[serde(default)]
    logs: String,
}

#[derive(Deserialize)]
struct SchemeList {
    #[serde(default)]
    schemes: Vec<Scheme>,
}

/// reqwest-backed `ProcessHost` and `SchemeBackend`.
#[derive(Clone)]
pub struct HttpProcessHost {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProcessHost {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("vllm-panel/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::request(base_url, e))?;
        Ok(HttpProcessHost {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// Send a prepared request and decode the JSON body.
    async fn send_json<T: DeserializeOwned>(
        request: reqwest::RequestBuilder,
        endpoint: String,
    ) -> Result<T, TransportError> {
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::request(&endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            log::debug!("[Host] {} answered HTTP {}", endpoint, status.as_u16());
            let body = response.text().await.unwrap_or_default();
            if let Some(reason) = serde_json::from_str::<ErrorBody>(&body).ok().and_then(ErrorBody::reason) {
                return Err(TransportError::Rejected(reason));
            }
            return Err(TransportError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| TransportError::decode(&endpoint, e))
    }

    fn get<T: DeserializeOwned + Send + 'static>(&self, endpoint: &str) -> BoxFuture<'static, Result<T, TransportError>> {
        let request = self.client.get(self.url(endpoint));
        Self::send_json(request, endpoint.to_string()).boxed()
    }

    fn post<T: DeserializeOwned + Send + 'static>(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> BoxFuture<'static, Result<T, TransportError>> {
        let request = self.client.post(self.url(endpoint)).json(&body);
        Self::send_json(request, endpoint.to_string()).boxed()
    }
}

impl ProcessHost for HttpProcessHost {
    fn resolve_install_path(
        &self,
        hint: String,
        env: EnvironmentTag,
    ) -> BoxFuture<'static, Result<ResolvedPath, TransportError>> {
        self.post(
            "/api/validate-conda-path",
            json!({ "condaPath": hint, "envType": env.as_str() }),
        )
    }

    fn detect_environment(&self) -> BoxFuture<'static, Result<EnvironmentTag, TransportError>> {
        self.get::<EnvironmentReply>("/api/detect-environment")
            .map(|reply| reply.map(|r| EnvironmentTag::from_wire(&r.environment)))
            .boxed()
    }

    fn detect_install_path(&self) -> BoxFuture<'static, Result<InstallDetection, TransportError>> {
        self.get("/api/detect-conda")
    }

    fn start_process(&self, request: StartRequest) -> BoxFuture<'static, Result<RequestAck, TransportError>> {
        let body = match serde_json::to_value(&request) {
            Ok(body) => body,
            Err(e) => {
                let err = TransportError::request("/api/run", e);
                return futures::future::ready(Err(err)).boxed();
            }
        };
        self.post("/api/run", body)
    }

    fn stop_process(&self) -> BoxFuture<'static, Result<RequestAck, TransportError>> {
        self.post("/api/stop", json!({}))
    }

    fn fetch_telemetry(&self) -> BoxFuture<'static, Result<TelemetrySnapshot, TransportError>> {
        self.get("/api/gpu-status")
    }

    fn set_interactive_monitor(
        &self,
        action: MonitorAction,
        env: EnvironmentTag,
    ) -> BoxFuture<'static, Result<MonitorAck, TransportError>> {
        let body = match action {
            MonitorAction::Start => json!({ "action": action.as_str(), "envType": env.as_str() }),
            MonitorAction::Stop => json!({ "action": action.as_str() }),
        };
        self.post("/api/nvitop", body)
    }

    fn execute(&self, request: ExecuteRequest) -> BoxFuture<'static, Result<CommandReceipt, TransportError>> {
        self.post(
            "/api/execute",
            json!({ "command": request.command, "env": request.env.as_str() }),
        )
    }

    fn fetch_logs(&self) -> BoxFuture<'static, Result<String, TransportError>> {
        self.get::<LogsReply>("/api/logs")
            .map(|reply| reply.map(|r| r.logs))
            .boxed()
    }

    fn clear_logs(&self) -> BoxFuture<'static, Result<(), TransportError>> {
        self.post::<serde_json::Value>("/api/clear-logs", json!({}))
            .map(|reply| reply.map(|_| ()))
            .boxed()
    }

    fn shutdown(&self) -> BoxFuture<'static, Result<RequestAck, TransportError>> {
        self.post("/api/shutdown", json!({}))
    }
}

impl SchemeBackend for HttpProcessHost {
    fn list_schemes(&self) -> BoxFuture<'static, Result<Vec<Scheme>, TransportError>> {
        self.get::<SchemeList>("/api/schemes")
            .map(|reply| reply.map(|list| list.schemes))
            .boxed()
    }

    fn create_scheme(&self, draft: SchemeDraft) -> BoxFuture<'static, Result<SchemeReply, TransportError>> {
        self.post("/api/schemes", json!({ "scheme": draft }))
    }

    fn update_scheme(&self, scheme: Scheme) -> BoxFuture<'static, Result<SchemeReply, TransportError>> {
        let endpoint = format!("/api/schemes/{}", scheme.id);
        let request = self.client.put(self.url(&endpoint)).json(&json!({ "scheme": scheme }));
        Self::send_json(request, endpoint).boxed()
    }

    fn delete_scheme(&self, id: SchemeId) -> BoxFuture<'static, Result<RequestAck, TransportError>> {
        let endpoint = format!("/api/schemes/{}", id);
        let request = self.client.delete(self.url(&endpoint));
        Self::send_json(request, endpoint).boxed()
    }
}
