//! vLLM Panel
//!
//! Control panel for a vLLM inference server: edit launch parameters, turn
//! them into a shell command, start and stop the server through a process
//! host, stream its logs, and watch GPU telemetry.
//!
//! The system is organized into functional modules:
//! - **error**: Unified error type hierarchy
//! - **models**: Configuration model and wire types
//! - **config**: Application settings, import/export, advisory validation
//! - **command**: Command synthesis and install-path resolution
//! - **host**: Process host and scheme store interfaces (HTTP implementation)
//! - **orchestrator**: Server lifecycle state machine
//! - **telemetry**: GPU telemetry source selection and polling
//! - **channel**: Realtime event channel (WebSocket)
//! - **schemes**: Scheme store client and local cache
//! - **ui**: AppController and operator console

// Core foundational modules
pub mod error;
pub mod models;

pub mod config;
pub mod command;
pub mod host;

// Server lifecycle state machine
pub mod orchestrator;

pub mod telemetry;
pub mod channel;
pub mod schemes;

// AppController and console front end
pub mod ui;

// Robust, decoupled logging system
pub mod log_collector;

// Re-export the log crate for macro usage
pub use log;

// Re-export log collector for use throughout the system
pub use log_collector::{LogCollector, LogLine};

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

pub use error::{AppError, ChannelError, ConfigError, PreconditionError, Result, SchemeError, TransportError};

pub use models::{
    CommandReceipt, Configuration, EnvironmentTag, Notice, NoticeLevel, ParamOverride, RunState, Scheme, SchemeId,
    TelemetryMode,
};

pub use config::{AppSettings, LoadedSettings, ReconnectPolicy, SettingsManager};

pub use command::{CommandPreview, CommandSynthesizer};

pub use host::{ExecuteRequest, HttpProcessHost, ProcessHost, SchemeBackend, StartRequest};

pub use orchestrator::{LifecycleController, LifecycleSignal, PreparedLaunch, StopMode};

pub use telemetry::{TelemetryCoordinator, TelemetryView};

pub use channel::{ChannelEvent, EventChannel, RealtimeEvent};

pub use schemes::{SaveTarget, SchemeChange, SchemeSignal, SchemeStoreClient};

pub use ui::{AppController, PanelEvent, TaskSignal, UserAction};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
