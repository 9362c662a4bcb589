use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

use anyhow::Context;
use vllm_panel::channel::{ChannelEvent, EventChannel, EVENT_CAPACITY};
use vllm_panel::ui::console;
use vllm_panel::ui::{AppController, PanelEvent, UserAction, PANEL_EVENT_CAPACITY};
use vllm_panel::{HttpProcessHost, LogCollector, LogLine, SettingsManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // =========================================================================
    // SETTINGS
    // =========================================================================
    // Read quietly: the logger does not exist yet and needs `log_dir`
    let loaded = SettingsManager::read().context("Failed to load settings")?;
    let settings = loaded.settings.clone().with_env_overrides();

    // =========================================================================
    // LOGGING INITIALIZATION
    // =========================================================================
    let (log_ui_tx, log_ui_rx) = mpsc::channel::<LogLine>(1024);
    let max_level = log::LevelFilter::Info;
    let log_collector = LogCollector::new(Path::new(&settings.log_dir), log_ui_tx, max_level)
        .map_err(anyhow::Error::msg)
        .context("LogCollector initialization failed")?;

    // Pipe every log::* macro into the collector
    if let Err(e) = log::set_boxed_logger(Box::new(log_collector.clone())).map(|()| log::set_max_level(max_level)) {
        eprintln!("[Main] WARNING: Failed to set LogCollector as global logger: {}", e);
    }
    log::info!("[Main] vLLM Panel {} starting", vllm_panel::VERSION);
    loaded.report();
    log::info!("[Main] Process host: {}, events: {}", settings.server_url, settings.events_url);
    log::info!("[Main] Session log: {}", log_collector.full_log_path().display());

    // =========================================================================
    // COLLABORATORS AND CHANNELS
    // =========================================================================
    let host = Arc::new(HttpProcessHost::new(&settings.server_url, settings.request_timeout())?);

    let (panel_tx, panel_rx) = mpsc::channel::<PanelEvent>(PANEL_EVENT_CAPACITY);
    let (actions_tx, actions_rx) = mpsc::channel::<UserAction>(64);
    let (channel_tx, channel_rx) = mpsc::channel::<ChannelEvent>(EVENT_CAPACITY);

    let renderer = console::spawn_renderer(panel_rx, log_ui_rx);
    let events = EventChannel::new(settings.events_url.clone(), settings.reconnect.clone());

    let (mut controller, inbox) = AppController::new(settings, host.clone(), host, panel_tx);
    controller.attach_channel(events, channel_tx);
    controller.initialize().await;

    println!("{}", console::HELP);
    console::spawn_stdin_reader(actions_tx.clone());

    let ctrl_c_tx = actions_tx;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("[Main] Interrupt received, shutting down");
            let _ = ctrl_c_tx.send(UserAction::Shutdown).await;
        }
    });

    // =========================================================================
    // RUN UNTIL QUIT
    // =========================================================================
    let settings = controller.run(inbox, actions_rx, channel_rx).await;

    if let Err(e) = SettingsManager::save(&settings) {
        log::warn!("[Main] Failed to persist settings: {}", e);
    }
    log::info!("[Main] Shutdown complete");

    // Let fire-and-forget requests issued during teardown go out
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    if let Err(e) = log_collector.wait_for_empty().await {
        eprintln!("[Main] WARNING: Log flush failed: {}", e);
    }
    renderer.abort();
    Ok(())
}
