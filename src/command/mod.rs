//! Command synthesis: Configuration -> one shell invocation.
//!
//! `synthesize` is pure. The only network round-trip is the install-path
//! resolution done beforehand by `CommandSynthesizer::resolve_install_path`,
//! and that step never fails: it degrades through a chain of fallbacks down to
//! an empty path, in which case the plain `conda activate` form is used.

use crate::error::TransportError;
use crate::host::ProcessHost;
use crate::models::{Configuration, EnvironmentTag, ParamOverride, ResolvedPath};
use futures::future::{BoxFuture, FutureExt};

/// Bootstrap statements run before activation inside WSL.
const WSL_PROFILE_BOOTSTRAP: [&str; 2] = [
    "source /etc/profile 2>/dev/null || true",
    "source ~/.bashrc 2>/dev/null || true",
];

const LINUX_SHELL: &str = "/bin/bash";

/// Outcome of install-path resolution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedInstall {
    /// Effective install path; empty when nothing could be determined
    pub path: String,
    /// Non-fatal note for the operator (e.g. the hint was replaced)
    pub warning: Option<String>,
    /// Path the host vouched for, to be remembered as the last detected one
    pub detected: Option<String>,
}

/// A synthesized command together with the inputs that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandPreview {
    pub command: String,
    pub summary: String,
    pub install_path: String,
    pub warning: Option<String>,
    pub detected: Option<String>,
}

/// Holds the last install path the host reported as valid.
///
/// The `*_task` methods snapshot that path and return a detached future, so
/// the round-trip can run on its own task; `absorb` folds the result back in.
#[derive(Debug, Clone, Default)]
pub struct CommandSynthesizer {
    last_detected: String,
}

impl CommandSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detected(path: impl Into<String>) -> Self {
        CommandSynthesizer {
            last_detected: path.into(),
        }
    }

    pub fn last_detected(&self) -> &str {
        &self.last_detected
    }

    /// Remember a path reported by host-side detection.
    pub fn record_detected(&mut self, path: &str) {
        let path = path.trim();
        if !path.is_empty() {
            self.last_detected = path.to_string();
        }
    }

    /// Remember whatever the host vouched for while building `preview`.
    pub fn absorb(&mut self, preview: &CommandPreview) {
        if let Some(path) = &preview.detected {
            self.record_detected(path);
        }
    }

    /// Detached install-path resolution for `hint`.
    pub fn resolve_task(
        &self,
        hint: &str,
        env: EnvironmentTag,
        host: &dyn ProcessHost,
    ) -> BoxFuture<'static, ResolvedInstall> {
        let hint = hint.trim().to_string();
        let last_detected = self.last_detected.clone();
        let pending = host.resolve_install_path(hint.clone(), env);
        async move { settle_resolution(&hint, &last_detected, pending.await) }.boxed()
    }

    /// Detached resolve + synthesize + summarize.
    pub fn preview_task(
        &self,
        config: &Configuration,
        env: EnvironmentTag,
        host: &dyn ProcessHost,
    ) -> BoxFuture<'static, CommandPreview> {
        let config = config.clone();
        let resolving = self.resolve_task(&config.conda_path, env, host);
        async move {
            let resolved = resolving.await;
            build_preview(&config, env, resolved)
        }
        .boxed()
    }

    /// Resolve the effective install path for `hint`.
    ///
    /// Fallback order when the resolver is unreachable or vouches for an
    /// empty path: last detected path, then the hint itself, then empty.
    pub async fn resolve_install_path(
        &mut self,
        hint: &str,
        env: EnvironmentTag,
        host: &dyn ProcessHost,
    ) -> ResolvedInstall {
        let resolved = self.resolve_task(hint, env, host).await;
        if let Some(path) = &resolved.detected {
            self.record_detected(path);
        }
        resolved
    }

    /// Resolve, synthesize and summarize in one step.
    pub async fn preview(
        &mut self,
        config: &Configuration,
        env: EnvironmentTag,
        host: &dyn ProcessHost,
    ) -> CommandPreview {
        let preview = self.preview_task(config, env, host).await;
        self.absorb(&preview);
        preview
    }
}

fn settle_resolution(
    hint: &str,
    last_detected: &str,
    reply: Result<ResolvedPath, TransportError>,
) -> ResolvedInstall {
    let fallback = || {
        if !last_detected.is_empty() {
            last_detected.to_string()
        } else {
            hint.to_string()
        }
    };

    match reply {
        Ok(resolved) if resolved.valid => {
            let path = resolved.path.trim().to_string();
            if path.is_empty() {
                log::warn!("[Command] Resolver accepted '{}' but returned no path, using fallback", hint);
                return ResolvedInstall {
                    path: fallback(),
                    warning: None,
                    detected: None,
                };
            }
            ResolvedInstall {
                detected: Some(path.clone()),
                path,
                warning: None,
            }
        }
        Ok(resolved) => {
            let path = resolved.path.trim().to_string();
            log::warn!("[Command] Install path '{}' rejected: {}", hint, resolved.message);
            let warning = if resolved.message.trim().is_empty() {
                format!("Install path '{}' is not valid, using '{}'", hint, path)
            } else {
                resolved.message.trim().to_string()
            };
            if path.is_empty() {
                ResolvedInstall {
                    path: fallback(),
                    warning: Some(warning),
                    detected: None,
                }
            } else {
                ResolvedInstall {
                    detected: Some(path.clone()),
                    path,
                    warning: Some(warning),
                }
            }
        }
        Err(e) => {
            log::warn!("[Command] Install path resolution failed: {}", e);
            ResolvedInstall {
                path: fallback(),
                warning: None,
                detected: None,
            }
        }
    }
}

fn build_preview(config: &Configuration, env: EnvironmentTag, resolved: ResolvedInstall) -> CommandPreview {
    let command = synthesize(config, env, &resolved.path);
    let summary = summarize(config, env);
    if config.model_path.trim().is_empty() {
        log::warn!("[Command] Model path is empty, generating command anyway");
    }
    log::info!("[Command] Command preview updated ({})", env.label());
    CommandPreview {
        command,
        summary,
        install_path: resolved.path,
        warning: resolved.warning,
        detected: resolved.detected,
    }
}

/// Build the full shell invocation. Never fails and never returns an empty string.
pub fn synthesize(config: &Configuration, env: EnvironmentTag, install_path: &str) -> String {
    let mut chain: Vec<String> = Vec::new();

    if env == EnvironmentTag::Wsl {
        chain.extend(WSL_PROFILE_BOOTSTRAP.iter().map(|s| s.to_string()));
    }

    let install_path = install_path.trim().trim_end_matches('/');
    if install_path.is_empty() {
        chain.push(format!("conda activate {}", config.conda_env));
    } else {
        chain.push(format!(
            "source {}/etc/profile.d/conda.sh 2>/dev/null || true",
            install_path
        ));
        chain.push(format!("source {}/bin/activate {}", install_path, config.conda_env));
    }

    let devices = config.cuda_devices.trim();
    if !devices.is_empty() {
        chain.push(format!("export CUDA_VISIBLE_DEVICES={}", devices));
    }

    chain.extend(config.quick_params.iter().filter_map(ParamOverride::render));
    chain.push(serve_invocation(config));

    let joined = escape_double_quoted(&chain.join(" && "));
    match env {
        EnvironmentTag::Wsl => {
            let launcher = config.wsl_path.trim();
            let launcher = if launcher.is_empty() { crate::models::DEFAULT_WSL_PATH } else { launcher };
            format!("{} bash -c \"{}\"", launcher, joined)
        }
        EnvironmentTag::Linux => format!("{} -c \"{}\"", LINUX_SHELL, joined),
    }
}

/// `vllm serve` with the model positional and flags in their stable order.
fn serve_invocation(config: &Configuration) -> String {
    let mut args: Vec<String> = vec![
        format!("--host {}", config.host),
        format!("--port {}", config.port),
        format!("--tensor-parallel-size {}", config.tensor_parallel),
    ];
    if config.pipeline_parallel_size != 1 {
        args.push(format!("--pipeline-parallel-size {}", config.pipeline_parallel_size));
    }
    args.push(format!("--gpu-memory-utilization={}", config.gpu_memory_utilization));
    args.push(format!("--max-num-seqs {}", config.max_num_sequences));

    push_valued(&mut args, "--quantization", &config.quantization);
    if config.dtype != crate::models::DEFAULT_DTYPE {
        push_valued(&mut args, "--dtype", &config.dtype);
    }
    push_valued(&mut args, "--max-model-len", &config.max_model_len);
    push_valued(&mut args, "--served-model-name", &config.served_model_name);
    if !config.chat_template.trim().is_empty() {
        args.push(format!("--chat-template \"{}\"", config.chat_template.trim()));
    }

    let switches = [
        (config.trust_remote_code, "--trust-remote-code"),
        (config.enable_expert_parallel, "--enable-expert-parallel"),
        (config.enable_auto_tool_choice, "--enable-auto-tool-choice"),
        (config.async_scheduling, "--async-scheduling"),
    ];
    args.extend(switches.iter().filter(|(on, _)| *on).map(|(_, flag)| flag.to_string()));

    push_valued(&mut args, "--tool-call-parser", &config.tool_call_parser);
    push_valued(&mut args, "--reasoning-parser", &config.reasoning_parser);

    args.extend(config.custom_params.iter().filter_map(ParamOverride::render));

    format!("vllm serve \"{}\" {}", config.model_path.trim(), args.join(" "))
}

fn push_valued(args: &mut Vec<String>, flag: &str, value: &str) {
    let value = value.trim();
    if !value.is_empty() {
        args.push(format!("{} {}", flag, value));
    }
}

/// Escape a chain so it survives as one double-quoted shell argument.
fn escape_double_quoted(chain: &str) -> String {
    let mut out = String::with_capacity(chain.len() + 8);
    for c in chain.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Short human summary shown above the command.
pub fn summarize(config: &Configuration, env: EnvironmentTag) -> String {
    let model = config.model_path.trim();
    let devices = config.cuda_devices.trim();
    format!(
        "[vLLM configuration preview]\nModel: {}\nEnvironment: {}\nPort: {}\nCUDA: {}\nParallel: {} GPU\nMemory: {}%",
        if model.is_empty() { "(not set)" } else { model },
        env.label(),
        config.port,
        if devices.is_empty() { "(not set)" } else { devices },
        config.tensor_parallel,
        (config.gpu_memory_utilization * 100.0).round(),
    )
}
