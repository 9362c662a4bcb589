//! Line-oriented operator console.
//!
//! Reads commands from stdin and turns them into `UserAction`s; renders
//! `PanelEvent`s and log lines to stdout. The controller never sees raw text.

use super::controller::{ParamList, PanelEvent, UserAction};
use crate::command::CommandPreview;
use crate::log_collector::{LogLine, LogSource};
use crate::models::{EnvironmentTag, NoticeLevel, ParamOverride, SchemeId};
use crate::schemes::SaveTarget;
use crate::telemetry::TelemetryView;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const HELP: &str = "\
commands:
  env wsl|linux                   switch execution environment
  set <field> <value>             set a configuration field (camelCase name)
  param custom|quick <name> [value] [--flag]
  clear custom|quick              drop all overrides in a list
  preview                         show the generated command
  start | stop                    control the server
  schemes                         reload the scheme list
  save [name] | overwrite <id>    store the working configuration (name defaults to the model)
  load <id> | show <id>           load or preview a scheme
  rename <id> <name>
  delete <id>                     delete a scheme (asks for confirmation)
  import <file.json> | export <file.json>
  validate                        check the working configuration
  exec <command>                  run a command in a terminal on the host
  logs | clear-logs               show or clear the server log
  reconnect                       restart the event channel after it gave up
  exit                            stop the server, shut the host down and quit
  quit                            leave the panel, host keeps running";

/// Parse one console line. `Ok(None)` means nothing to dispatch (blank or help).
pub fn parse_command(line: &str) -> Result<Option<UserAction>, String> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    let words: Vec<&str> = rest.split_whitespace().collect();

    let action = match verb {
        "" | "help" | "?" => return Ok(None),
        "env" => UserAction::SetEnvironment(rest.parse::<EnvironmentTag>()?),
        "set" => {
            let (field, value) = rest
                .split_once(char::is_whitespace)
                .map(|(f, v)| (f, v.trim()))
                .unwrap_or((rest, ""));
            if field.is_empty() {
                return Err("usage: set <field> <value>".to_string());
            }
            UserAction::SetField {
                field: field.to_string(),
                value: value.to_string(),
            }
        }
        "param" => {
            let list = parse_list(words.first().copied())?;
            let args = &words[1..];
            let is_flag = args.contains(&"--flag");
            let args: Vec<&str> = args.iter().copied().filter(|a| *a != "--flag").collect();
            let name = args.first().ok_or("usage: param custom|quick <name> [value] [--flag]")?;
            let value = args[1..].join(" ");
            let param = if is_flag {
                ParamOverride::flag(*name)
            } else {
                ParamOverride::new(*name, value)
            };
            UserAction::AddParam { list, param }
        }
        "clear" => UserAction::ClearParams(parse_list(words.first().copied())?),
        "preview" => UserAction::Preview,
        "start" => UserAction::Start,
        "stop" => UserAction::Stop,
        "schemes" | "ls" => UserAction::RefreshSchemes,
        "save" => {
            if rest.is_empty() {
                UserAction::SaveScheme(SaveTarget::Suggested)
            } else {
                UserAction::SaveScheme(SaveTarget::New { name: rest.to_string() })
            }
        }
        "overwrite" => UserAction::SaveScheme(SaveTarget::Overwrite { id: scheme_id(&words)? }),
        "load" => UserAction::LoadScheme(scheme_id(&words)?),
        "show" => UserAction::PreviewScheme(scheme_id(&words)?),
        "rename" => {
            let id = scheme_id(&words)?;
            let name = words[1..].join(" ");
            if name.is_empty() {
                return Err("usage: rename <id> <name>".to_string());
            }
            UserAction::RenameScheme { id, name }
        }
        "delete" | "rm" => UserAction::DeleteScheme {
            id: scheme_id(&words)?,
            confirmed: words.get(1).map_or(false, |w| is_yes(w)),
        },
        "import" => UserAction::Import(file_arg(rest, "import")?),
        "export" => UserAction::Export(file_arg(rest, "export")?),
        "validate" => UserAction::Validate,
        "exec" | "run" => {
            if rest.is_empty() {
                return Err("usage: exec <command>".to_string());
            }
            UserAction::Execute(rest.to_string())
        }
        "logs" => UserAction::FetchServerLogs,
        "clear-logs" => UserAction::ClearServerLogs,
        "reconnect" => UserAction::Reconnect,
        "exit" => UserAction::Exit,
        "quit" | "q" => UserAction::Shutdown,
        other => return Err(format!("unknown command '{}', type help", other)),
    };
    Ok(Some(action))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn parse_list(word: Option<&str>) -> Result<ParamList, String> {
    match word {
        Some("custom") => Ok(ParamList::Custom),
        Some("quick") => Ok(ParamList::Quick),
        _ => Err("expected 'custom' or 'quick'".to_string()),
    }
}

fn scheme_id(words: &[&str]) -> Result<SchemeId, String> {
    words
        .first()
        .map(|id| SchemeId::from(*id))
        .ok_or_else(|| "missing scheme id".to_string())
}

fn file_arg(rest: &str, verb: &str) -> Result<PathBuf, String> {
    if rest.is_empty() {
        Err(format!("usage: {} <file.json>", verb))
    } else {
        Ok(PathBuf::from(rest))
    }
}

/// Forward stdin lines as actions. Sends `Shutdown` on EOF.
pub fn spawn_stdin_reader(actions: mpsc::Sender<UserAction>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_command(&line) {
                    Ok(Some(UserAction::DeleteScheme { id, confirmed: false })) => {
                        println!("Delete scheme {}? [y/N]", id);
                        let answer = lines.next_line().await.ok().flatten().unwrap_or_default();
                        let confirmed = is_yes(&answer);
                        if actions.send(UserAction::DeleteScheme { id, confirmed }).await.is_err() {
                            return;
                        }
                    }
                    Ok(Some(action)) => {
                        let quit = matches!(action, UserAction::Shutdown | UserAction::Exit);
                        if actions.send(action).await.is_err() || quit {
                            return;
                        }
                    }
                    Ok(None) => println!("{}", HELP),
                    Err(msg) => println!("! {}", msg),
                },
                Ok(None) => break,
                Err(e) => {
                    log::warn!("[Console] stdin read failed: {}", e);
                    break;
                }
            }
        }
        let _ = actions.send(UserAction::Shutdown).await;
    })
}

/// Print panel events and log lines until both channels close.
pub fn spawn_renderer(
    mut events: mpsc::Receiver<PanelEvent>,
    mut logs: mpsc::Receiver<LogLine>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(event) = events.recv() => println!("{}", render_event(&event)),
                Some(line) = logs.recv() => println!("{}", render_log(&line)),
                else => break,
            }
        }
    })
}

pub fn render_event(event: &PanelEvent) -> String {
    match event {
        PanelEvent::Notice(notice) => {
            let marker = match notice.level {
                NoticeLevel::Info => "i",
                NoticeLevel::Success => "+",
                NoticeLevel::Warning => "!",
                NoticeLevel::Error => "x",
            };
            format!("[{}] {}", marker, notice.message)
        }
        PanelEvent::RunState { label, .. } => format!("== server {}", label),
        PanelEvent::TelemetryMode(mode) => format!("== telemetry {:?}", mode).to_lowercase(),
        PanelEvent::Telemetry(view) => render_telemetry(view),
        PanelEvent::Command(preview) => render_preview(preview),
        PanelEvent::SchemePreview { name, command } => format!("-- {}\n{}", name, command),
        PanelEvent::Schemes(schemes) => {
            if schemes.is_empty() {
                return "No saved schemes".to_string();
            }
            schemes
                .iter()
                .map(|s| format!("  {:>4}  {}  ({})", s.id, s.name, s.summary()))
                .collect::<Vec<_>>()
                .join("\n")
        }
        PanelEvent::Configuration { config, env } => format!(
            "Configuration: {} on {} port {}",
            if config.model_path.is_empty() { "<no model>" } else { config.model_path.as_str() },
            env.label(),
            config.port
        ),
        PanelEvent::Advisories(findings) => findings
            .iter()
            .map(|f| format!("  {}", f))
            .collect::<Vec<_>>()
            .join("\n"),
        PanelEvent::ServerLogs(logs) => {
            if logs.trim().is_empty() {
                "Server log is empty".to_string()
            } else {
                format!("-- server log\n{}", logs.trim_end())
            }
        }
    }
}

fn render_preview(preview: &CommandPreview) -> String {
    let mut out = format!("{}\n\n{}", preview.summary, preview.command);
    if let Some(warning) = &preview.warning {
        out.push_str(&format!("\n! {}", warning));
    }
    out
}

fn render_telemetry(view: &TelemetryView) -> String {
    match view {
        TelemetryView::Waiting => "GPU: waiting for data".to_string(),
        TelemetryView::Unavailable => "GPU: telemetry unavailable".to_string(),
        TelemetryView::Empty(message) => format!("GPU: {}", message),
        TelemetryView::Frame(output) => output.clone(),
        TelemetryView::Devices(readings) => readings
            .iter()
            .enumerate()
            .map(|(i, r)| {
                format!(
                    "GPU{} {}  mem {:.0}/{:.0} MiB ({}%)  util {:.0}%  {:.0}C  {:.0}W  fan {:.0}%",
                    i,
                    r.name,
                    r.memory_used_mb,
                    r.memory_total_mb,
                    r.memory_percent,
                    r.utilization,
                    r.temperature,
                    r.power,
                    r.fan_speed
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

pub fn render_log(line: &LogLine) -> String {
    let source = match line.source {
        LogSource::Panel => "panel",
        LogSource::Server => "vllm",
    };
    format!("{} {:<5} {:<5} {}", line.timestamp, line.level, source, line.message)
}
