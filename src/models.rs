//! Core data types for vLLM Panel.
//!
//! The `Configuration` record is the de-facto JSON contract shared with the
//! process host and the scheme store, so field names stay camelCase on the wire.
//! Every field coerces to a documented default when absent or malformed; command
//! synthesis never has to deal with an undefined value.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_WSL_PATH: &str = "wsl";
pub const DEFAULT_CONDA_ENV: &str = "vllm";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_DTYPE: &str = "auto";
pub const DEFAULT_PORT: u32 = 8000;
pub const DEFAULT_TENSOR_PARALLEL: u32 = 1;
pub const DEFAULT_PIPELINE_PARALLEL: u32 = 1;
pub const DEFAULT_GPU_MEMORY_UTILIZATION: f64 = 0.9;
pub const DEFAULT_MAX_NUM_SEQUENCES: u32 = 256;
pub const DEFAULT_MAX_NUM_BATCHED_TOKENS: u32 = 8192;

/// Execution environment the server is launched in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EnvironmentTag {
    /// Windows host, server runs inside WSL
    #[default]
    Wsl,
    /// Native Linux host
    Linux,
}

impl EnvironmentTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentTag::Wsl => "wsl",
            EnvironmentTag::Linux => "linux",
        }
    }

    /// Display label used in previews and scheme rows
    pub fn label(&self) -> &'static str {
        match self {
            EnvironmentTag::Wsl => "WSL",
            EnvironmentTag::Linux => "Linux",
        }
    }

    /// Lenient parse: anything that is not "linux" is treated as WSL.
    pub fn from_wire(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("linux") {
            EnvironmentTag::Linux
        } else {
            EnvironmentTag::Wsl
        }
    }
}

impl fmt::Display for EnvironmentTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvironmentTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "wsl" => Ok(EnvironmentTag::Wsl),
            "linux" => Ok(EnvironmentTag::Linux),
            other => Err(format!("unknown environment '{}', expected wsl or linux", other)),
        }
    }
}

impl Serialize for EnvironmentTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EnvironmentTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::String(s)) => EnvironmentTag::from_wire(&s),
            _ => EnvironmentTag::default(),
        })
    }
}

/// A user-declared name/value/flag override appended to the synthesized command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamOverride {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub is_flag: bool,
}

impl ParamOverride {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        ParamOverride {
            name: name.into(),
            value: value.into(),
            is_flag: false,
        }
    }

    pub fn flag(name: impl Into<String>) -> Self {
        ParamOverride {
            name: name.into(),
            value: String::new(),
            is_flag: true,
        }
    }

    /// Render as `name value`, or bare `name` for flags and valueless rows.
    /// Rows without a name render nothing.
    pub fn render(&self) -> Option<String> {
        let name = self.name.trim();
        if name.is_empty() {
            return None;
        }
        let value = self.value.trim();
        if self.is_flag || value.is_empty() {
            Some(name.to_string())
        } else {
            Some(format!("{} {}", name, value))
        }
    }
}

/// Desired server launch parameters. Immutable per generation: edits produce a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "ConfigurationWire")]
pub struct Configuration {
    pub wsl_path: String,
    pub conda_env: String,
    pub conda_path: String,
    pub env_type: EnvironmentTag,
    pub cuda_devices: String,
    pub tensor_parallel: u32,
    pub pipeline_parallel_size: u32,
    pub model_path: String,
    pub quantization: String,
    pub dtype: String,
    pub max_model_len: String,
    pub host: String,
    pub port: u32,
    pub gpu_memory_utilization: f64,
    pub max_num_sequences: u32,
    pub max_num_batched_tokens: u32,
    pub served_model_name: String,
    pub chat_template: String,
    pub tool_call_parser: String,
    pub reasoning_parser: String,
    pub trust_remote_code: bool,
    pub enable_expert_parallel: bool,
    pub enable_auto_tool_choice: bool,
    pub async_scheduling: bool,
    pub custom_params: Vec<ParamOverride>,
    pub quick_params: Vec<ParamOverride>,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            wsl_path: DEFAULT_WSL_PATH.to_string(),
            conda_env: DEFAULT_CONDA_ENV.to_string(),
            conda_path: String::new(),
            env_type: EnvironmentTag::Wsl,
            cuda_devices: String::new(),
            tensor_parallel: DEFAULT_TENSOR_PARALLEL,
            pipeline_parallel_size: DEFAULT_PIPELINE_PARALLEL,
            model_path: String::new(),
            quantization: String::new(),
            dtype: DEFAULT_DTYPE.to_string(),
            max_model_len: String::new(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            gpu_memory_utilization: DEFAULT_GPU_MEMORY_UTILIZATION,
            max_num_sequences: DEFAULT_MAX_NUM_SEQUENCES,
            max_num_batched_tokens: DEFAULT_MAX_NUM_BATCHED_TOKENS,
            served_model_name: String::new(),
            chat_template: String::new(),
            tool_call_parser: String::new(),
            reasoning_parser: String::new(),
            trust_remote_code: false,
            enable_expert_parallel: false,
            enable_auto_tool_choice: false,
            async_scheduling: false,
            custom_params: Vec::new(),
            quick_params: Vec::new(),
        }
    }
}

impl Configuration {
    /// Re-apply coercion rules after in-place edits (e.g. from the console).
    pub fn normalized(self) -> Self {
        match serde_json::to_value(&self) {
            Ok(value) => serde_json::from_value::<ConfigurationWire>(value)
                .map(Configuration::from)
                .unwrap_or(self),
            Err(_) => self,
        }
    }

    /// Set a single field from operator text, using the wire field name.
    pub fn with_field(self, field: &str, value: &str) -> std::result::Result<Self, String> {
        let mut object = match serde_json::to_value(&self) {
            Ok(Value::Object(map)) => map,
            _ => return Err("configuration is not serializable".to_string()),
        };
        let current = object
            .get(field)
            .ok_or_else(|| format!("unknown configuration field '{}'", field))?;
        let replacement = match current {
            Value::Bool(_) => Value::Bool(parse_bool(value)),
            Value::Array(_) => return Err(format!("'{}' is a list, use the param action", field)),
            _ => Value::String(value.to_string()),
        };
        object.insert(field.to_string(), replacement);
        serde_json::from_value::<Configuration>(Value::Object(object)).map_err(|e| e.to_string())
    }
}

/// Loose wire form of `Configuration`; every field may be missing or mistyped.
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ConfigurationWire {
    wsl_path: Option<Value>,
    conda_env: Option<Value>,
    conda_path: Option<Value>,
    env_type: Option<Value>,
    cuda_devices: Option<Value>,
    tensor_parallel: Option<Value>,
    pipeline_parallel_size: Option<Value>,
    model_path: Option<Value>,
    quantization: Option<Value>,
    dtype: Option<Value>,
    max_model_len: Option<Value>,
    host: Option<Value>,
    port: Option<Value>,
    gpu_memory_utilization: Option<Value>,
    max_num_sequences: Option<Value>,
    max_num_batched_tokens: Option<Value>,
    served_model_name: Option<Value>,
    chat_template: Option<Value>,
    tool_call_parser: Option<Value>,
    reasoning_parser: Option<Value>,
    trust_remote_code: Option<Value>,
    enable_expert_parallel: Option<Value>,
    enable_auto_tool_choice: Option<Value>,
    async_scheduling: Option<Value>,
    custom_params: Option<Value>,
    quick_params: Option<Value>,
}

impl From<ConfigurationWire> for Configuration {
    fn from(w: ConfigurationWire) -> Self {
        Configuration {
            wsl_path: coerce_string_or(w.wsl_path, DEFAULT_WSL_PATH),
            conda_env: coerce_string_or(w.conda_env, DEFAULT_CONDA_ENV),
            conda_path: coerce_string(w.conda_path),
            env_type: EnvironmentTag::from_wire(&coerce_string(w.env_type)),
            cuda_devices: coerce_string(w.cuda_devices),
            tensor_parallel: coerce_u32(w.tensor_parallel, DEFAULT_TENSOR_PARALLEL),
            pipeline_parallel_size: coerce_u32(w.pipeline_parallel_size, DEFAULT_PIPELINE_PARALLEL),
            model_path: coerce_string(w.model_path),
            quantization: coerce_string(w.quantization),
            dtype: coerce_string_or(w.dtype, DEFAULT_DTYPE),
            max_model_len: coerce_string(w.max_model_len),
            host: coerce_string_or(w.host, DEFAULT_HOST),
            port: coerce_u32(w.port, DEFAULT_PORT),
            gpu_memory_utilization: coerce_f64(w.gpu_memory_utilization, DEFAULT_GPU_MEMORY_UTILIZATION),
            max_num_sequences: coerce_u32(w.max_num_sequences, DEFAULT_MAX_NUM_SEQUENCES),
            max_num_batched_tokens: coerce_u32(w.max_num_batched_tokens, DEFAULT_MAX_NUM_BATCHED_TOKENS),
            served_model_name: coerce_string(w.served_model_name),
            chat_template: coerce_string(w.chat_template),
            tool_call_parser: coerce_string(w.tool_call_parser),
            reasoning_parser: coerce_string(w.reasoning_parser),
            trust_remote_code: coerce_bool(w.trust_remote_code),
            enable_expert_parallel: coerce_bool(w.enable_expert_parallel),
            enable_auto_tool_choice: coerce_bool(w.enable_auto_tool_choice),
            async_scheduling: coerce_bool(w.async_scheduling),
            custom_params: coerce_params(w.custom_params),
            quick_params: coerce_params(w.quick_params),
        }
    }
}

fn coerce_string(value: Option<Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn coerce_string_or(value: Option<Value>, default: &str) -> String {
    let s = coerce_string(value);
    if s.is_empty() {
        default.to_string()
    } else {
        s
    }
}

/// Numbers or numeric strings; zero, negative, and garbage fall back to `default`.
fn coerce_u32(value: Option<Value>, default: u32) -> u32 {
    let parsed = match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.trunc() as u64)),
        Some(Value::String(s)) => leading_integer(&s),
        _ => None,
    };
    match parsed {
        Some(n) if n > 0 && n <= u32::MAX as u64 => n as u32,
        _ => default,
    }
}

/// parseInt-style: leading digits only ("8001abc" -> 8001).
fn leading_integer(s: &str) -> Option<u64> {
    let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn coerce_f64(value: Option<Value>, default: f64) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(f) if f.is_finite() && f != 0.0 => f,
        _ => default,
    }
}

fn coerce_bool(value: Option<Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => b,
        Some(Value::String(s)) => parse_bool(&s),
        Some(Value::Number(n)) => n.as_f64().map_or(false, |f| f != 0.0),
        _ => false,
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

/// Rows with an empty name collapse away.
fn coerce_params(value: Option<Value>) -> Vec<ParamOverride> {
    let rows = match value {
        Some(Value::Array(rows)) => rows,
        _ => return Vec::new(),
    };
    rows.into_iter()
        .filter_map(|row| {
            let mut obj = match row {
                Value::Object(obj) => obj,
                _ => return None,
            };
            let name = coerce_string(obj.remove("name"));
            if name.is_empty() {
                return None;
            }
            Some(ParamOverride {
                name,
                value: coerce_string(obj.remove("value")),
                is_flag: coerce_bool(obj.remove("isFlag")),
            })
        })
        .collect()
}

/// Opaque scheme identity assigned by the store. Accepts numeric or string ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemeId(pub String);

impl SchemeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SchemeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SchemeId {
    fn from(s: &str) -> Self {
        SchemeId(s.to_string())
    }
}

impl Serialize for SchemeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Numeric ids go back out as numbers so the store sees what it issued
        match self.0.parse::<u64>() {
            Ok(n) => serializer.serialize_u64(n),
            Err(_) => serializer.serialize_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for SchemeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct SchemeIdVisitor;

        impl<'de> Visitor<'de> for SchemeIdVisitor {
            type Value = SchemeId;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string or integer scheme id")
            }

            fn visit_u64<E>(self, value: u64) -> Result<SchemeId, E>
            where
                E: de::Error,
            {
                Ok(SchemeId(value.to_string()))
            }

            fn visit_i64<E>(self, value: i64) -> Result<SchemeId, E>
            where
                E: de::Error,
            {
                Ok(SchemeId(value.to_string()))
            }

            fn visit_str<E>(self, value: &str) -> Result<SchemeId, E>
            where
                E: de::Error,
            {
                Ok(SchemeId(value.to_string()))
            }
        }

        deserializer.deserialize_any(SchemeIdVisitor)
    }
}

/// A named, persisted snapshot of a launch Configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scheme {
    pub id: SchemeId,
    pub name: String,
    #[serde(default, deserialize_with = "de_stored_configuration")]
    pub config: Configuration,
    #[serde(default)]
    pub env_type: EnvironmentTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Scheme {
    /// Environment to use when previewing: the scheme's own tag.
    pub fn environment(&self) -> EnvironmentTag {
        self.env_type
    }

    /// One-line description: model file name, env name, environment label.
    pub fn summary(&self) -> String {
        let model = last_path_component(&self.config.model_path);
        let model = if model.is_empty() { "no model configured" } else { model };
        format!("{} · {} · {}", model, self.config.conda_env, self.env_type.label())
    }
}

/// Last component of a POSIX or Windows style path.
pub fn last_path_component(path: &str) -> &str {
    path.trim()
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or("")
}

/// Lifecycle state of the managed server process. Exactly one is active process-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Starting,
    Running,
    Stopping,
    Error,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Starting => "starting",
            RunState::Running => "running",
            RunState::Stopping => "stopping",
            RunState::Error => "error",
        }
    }

    /// States from which a start request may be issued.
    pub fn accepts_start(&self) -> bool {
        matches!(self, RunState::Idle | RunState::Error)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a transient operator notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A transient, user-visible notification (toast).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Notice {
            level,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, message)
    }
}

/// Active GPU telemetry source; derived from `RunState`, never set by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TelemetryMode {
    Polling,
    Interactive,
    Off,
}

impl TelemetryMode {
    pub fn for_run_state(state: RunState) -> Self {
        if state == RunState::Running {
            TelemetryMode::Polling
        } else {
            TelemetryMode::Interactive
        }
    }
}

/// Response of the install-path resolver.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResolvedPath {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub message: String,
}

/// Result of host-side install-path detection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstallDetection {
    #[serde(default)]
    pub conda_path: String,
    #[serde(default)]
    pub environments: Vec<String>,
}

/// Acknowledgement of a start/stop request. `success` means "accepted", not "running".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestAck {
    #[serde(default)]
    pub success: bool,
    #[serde(default, alias = "error", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Reply to a terminal command hand-off. `output` is the host's receipt, not the command's stdout.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandReceipt {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: String,
}

/// Interactive monitor control verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    Start,
    Stop,
}

impl MonitorAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorAction::Start => "start",
            MonitorAction::Stop => "stop",
        }
    }
}

/// Monitor control response: `{status: "started"}` for start, `{success}` for stop.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MonitorAck {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
}

impl MonitorAck {
    pub fn accepted(&self) -> bool {
        self.success.unwrap_or(false) || self.status.as_deref() == Some("started")
    }
}

/// One GPU as reported by the telemetry snapshot endpoint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GpuDevice {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "memoryUsed", deserialize_with = "de_lenient_f64")]
    pub memory_used: Option<f64>,
    #[serde(default, alias = "memoryTotal", deserialize_with = "de_lenient_f64")]
    pub memory_total: Option<f64>,
    #[serde(default, alias = "utilizationPercent", deserialize_with = "de_lenient_f64")]
    pub utilization: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub temperature: Option<f64>,
    #[serde(default, alias = "powerWatts", deserialize_with = "de_lenient_f64")]
    pub power: Option<f64>,
    #[serde(default, alias = "fanPercent", deserialize_with = "de_lenient_f64")]
    pub fan_speed: Option<f64>,
}

/// Telemetry snapshot as returned by the host.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    #[serde(default)]
    pub status: String,
    #[serde(default, alias = "devices")]
    pub gpus: Vec<GpuDevice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TelemetrySnapshot {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// A stored configuration; `null` or a non-object value reads as the defaults.
fn de_stored_configuration<'de, D>(deserializer: D) -> Result<Configuration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        Some(value @ Value::Object(_)) => serde_json::from_value(value).map_err(serde::de::Error::custom),
        _ => Ok(Configuration::default()),
    }
}

/// Numbers, numeric strings ("12.5", " 80 "), or nothing.
fn de_lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}
