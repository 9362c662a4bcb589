//! Realtime event channel.
//!
//! One WebSocket connection to the process host delivers log lines, status
//! changes and interactive monitor frames as JSON text frames:
//! `{"event": "<name>", "data": {...}}`. The connection task reconnects with
//! bounded exponential backoff and reports everything, including its own
//! connection state, as `ChannelEvent`s on an mpsc channel.

use crate::config::ReconnectPolicy;
use crate::error::ChannelError;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

pub const EVENT_CAPACITY: usize = 256;

/// Inbound message from the process host.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Log { message: String, level: String },
    Status { running: bool },
    MonitorFrame { output: String },
}

/// Everything the connection task reports.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected { reason: String },
    Error(String),
    Reconnecting { attempt: u32, delay: Duration },
    GaveUp { attempts: u32 },
    Event(RealtimeEvent),
}

#[derive(Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct LogData {
    #[serde(default)]
    message: String,
    #[serde(default = "default_level")]
    level: String,
}

fn default_level() -> String {
    "info".to_string()
}

#[derive(Deserialize)]
struct StatusData {
    running: bool,
}

#[derive(Deserialize)]
struct FrameData {
    #[serde(default)]
    output: String,
}

/// Decode one text frame. Unknown event names yield `Ok(None)`.
pub fn parse_frame(text: &str) -> Result<Option<RealtimeEvent>, ChannelError> {
    let frame: Frame = serde_json::from_str(text).map_err(|e| ChannelError::MalformedFrame(e.to_string()))?;
    let malformed = |e: serde_json::Error| ChannelError::MalformedFrame(format!("{}: {}", frame.event, e));

    let event = match frame.event.as_str() {
        "log" => {
            let data: LogData = serde_json::from_value(frame.data.clone()).map_err(malformed)?;
            RealtimeEvent::Log {
                message: data.message,
                level: data.level,
            }
        }
        "status" => {
            let data: StatusData = serde_json::from_value(frame.data.clone()).map_err(malformed)?;
            RealtimeEvent::Status { running: data.running }
        }
        "nvitop" | "monitorFrame" => {
            let data: FrameData = serde_json::from_value(frame.data.clone()).map_err(malformed)?;
            RealtimeEvent::MonitorFrame { output: data.output }
        }
        other => {
            log::debug!("[Channel] Ignoring unknown event '{}'", other);
            return Ok(None);
        }
    };
    Ok(Some(event))
}

/// Connection settings for the event channel.
#[derive(Debug, Clone)]
pub struct EventChannel {
    url: String,
    policy: ReconnectPolicy,
}

impl EventChannel {
    pub fn new(url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        EventChannel {
            url: url.into(),
            policy,
        }
    }

    /// Spawn the single connection task.
    pub fn spawn(self, tx: mpsc::Sender<ChannelEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(tx))
    }

    /// Connect, read until the socket drops, back off, repeat.
    /// Returns after the retry budget is spent or the receiver goes away.
    pub async fn run(self, tx: mpsc::Sender<ChannelEvent>) {
        let mut attempt: u32 = 0;
        loop {
            match connect_async(self.url.as_str()).await {
                Ok((stream, _response)) => {
                    attempt = 0;
                    log::info!("[Channel] Connected to {}", self.url);
                    if tx.send(ChannelEvent::Connected).await.is_err() {
                        return;
                    }

                    let (_write, mut read) = stream.split();
                    let reason = loop {
                        match read.next().await {
                            Some(Ok(Message::Text(text))) => match parse_frame(&text) {
                                Ok(Some(event)) => {
                                    if tx.send(ChannelEvent::Event(event)).await.is_err() {
                                        return;
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => log::warn!("[Channel] {}", e),
                            },
                            Some(Ok(Message::Close(frame))) => {
                                break frame
                                    .map(|f| f.reason.to_string())
                                    .filter(|r| !r.is_empty())
                                    .unwrap_or_else(|| "closed by server".to_string());
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => break e.to_string(),
                            None => break "connection closed".to_string(),
                        }
                    };

                    log::warn!("[Channel] Disconnected: {}", reason);
                    if tx.send(ChannelEvent::Disconnected { reason }).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    let err = ChannelError::Connect {
                        url: self.url.clone(),
                        reason: e.to_string(),
                    };
                    log::warn!("[Channel] {}", err);
                    if tx.send(ChannelEvent::Error(err.to_string())).await.is_err() {
                        return;
                    }
                }
            }

            attempt += 1;
            if attempt > self.policy.max_attempts {
                log::error!("[Channel] Giving up after {} reconnect attempts", self.policy.max_attempts);
                let _ = tx
                    .send(ChannelEvent::GaveUp {
                        attempts: self.policy.max_attempts,
                    })
                    .await;
                return;
            }

            let delay = self.policy.delay_for(attempt);
            log::info!("[Channel] Reconnect attempt {} in {:?}", attempt, delay);
            if tx.send(ChannelEvent::Reconnecting { attempt, delay }).await.is_err() {
                return;
            }
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_frame() {
        let event = parse_frame(r#"{"event": "log", "data": {"message": "INFO: Uvicorn running", "level": "success"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            RealtimeEvent::Log {
                message: "INFO: Uvicorn running".to_string(),
                level: "success".to_string()
            }
        );
    }

    #[test]
    fn test_log_level_defaults_to_info() {
        let event = parse_frame(r#"{"event": "log", "data": {"message": "x"}}"#).unwrap().unwrap();
        assert!(matches!(event, RealtimeEvent::Log { level, .. } if level == "info"));
    }

    #[test]
    fn test_parse_status_and_monitor_frames() {
        assert_eq!(
            parse_frame(r#"{"event": "status", "data": {"running": false}}"#).unwrap(),
            Some(RealtimeEvent::Status { running: false })
        );
        assert_eq!(
            parse_frame(r#"{"event": "nvitop", "data": {"output": "GPU0 45%"}}"#).unwrap(),
            Some(RealtimeEvent::MonitorFrame {
                output: "GPU0 45%".to_string()
            })
        );
        assert_eq!(
            parse_frame(r#"{"event": "monitorFrame", "data": {"output": ""}}"#).unwrap(),
            Some(RealtimeEvent::MonitorFrame { output: String::new() })
        );
    }

    #[test]
    fn test_unknown_event_is_ignored() {
        assert_eq!(parse_frame(r#"{"event": "heartbeat", "data": {}}"#).unwrap(), None);
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(parse_frame("not json"), Err(ChannelError::MalformedFrame(_))));
        assert!(matches!(
            parse_frame(r#"{"event": "status", "data": {"running": "yes"}}"#),
            Err(ChannelError::MalformedFrame(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_server_backs_off_then_gives_up() {
        let policy = ReconnectPolicy {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 5000,
        };
        let (tx, mut rx) = mpsc::channel(EVENT_CAPACITY);
        let handle = EventChannel::new("ws://127.0.0.1:9/ws", policy).spawn(tx);

        let mut delays = Vec::new();
        let mut errors = 0;
        while let Some(event) = rx.recv().await {
            match event {
                ChannelEvent::Error(_) => errors += 1,
                ChannelEvent::Reconnecting { delay, .. } => delays.push(delay),
                ChannelEvent::GaveUp { attempts } => {
                    assert_eq!(attempts, 3);
                    break;
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        handle.await.unwrap();
        assert_eq!(errors, 4);
        assert_eq!(
            delays,
            vec![Duration::from_millis(1000), Duration::from_millis(2000), Duration::from_millis(4000)]
        );
    }
}
