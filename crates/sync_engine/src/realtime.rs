//! Push-channel connection lifecycle.
//!
//! Consecutive failed sessions are bounded; once the bound is hit the
//! controller stays down until [`RealtimeController::restart`]. A session
//! only counts as healthy, and clears the count, when it stays up for
//! `stable_session` after connecting.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use anyhow::{anyhow, bail, Context, Result};
use futures::{SinkExt, StreamExt};
use shared::{
    domain::GatewayConfig,
    protocol::{parse_realtime_frame, GatewayEnvelope, SubscribeRequest},
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub failed_attempts: u32,
    /// Set once the attempt bound is reached; cleared by a restart.
    pub gave_up: bool,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

#[derive(Debug, Clone)]
pub struct RealtimeSettings {
    pub url: Url,
    pub instance: String,
    pub max_attempts: u32,
    pub subscribe_delay: Duration,
    pub reconnect_delay: Duration,
    pub stable_session: Duration,
}

pub const STABLE_SESSION: Duration = Duration::from_secs(10);

/// Push-channel URL for a gateway: the dedicated socket URL when set,
/// otherwise the HTTP base URL with a websocket scheme. The instance and API
/// key travel as query parameters.
pub fn socket_url(config: &GatewayConfig) -> Result<Url> {
    let raw = config
        .socket_url
        .as_deref()
        .filter(|url| !url.trim().is_empty())
        .unwrap_or(config.base_url());
    let mut url = Url::parse(raw.trim()).with_context(|| format!("invalid socket url '{raw}'"))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => bail!("unsupported socket url scheme '{other}'"),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("cannot switch '{raw}' to {scheme}"))?;
    url.query_pairs_mut()
        .append_pair("instance", &config.instance_name)
        .append_pair("apikey", &config.api_key);
    Ok(url)
}

enum SessionEnd {
    Dropped { lasted: Duration },
    ReceiverClosed,
}

pub struct RealtimeController {
    settings: RealtimeSettings,
    frames: mpsc::Sender<GatewayEnvelope>,
    status: watch::Sender<ConnectionStatus>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeController {
    pub fn new(settings: RealtimeSettings, frames: mpsc::Sender<GatewayEnvelope>) -> Arc<Self> {
        let (status, _) = watch::channel(ConnectionStatus::default());
        Arc::new(Self {
            settings,
            frames,
            status,
            task: Mutex::new(None),
        })
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Starts the connection loop unless one is already running.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        *task = Some(self.spawn_loop());
    }

    /// Explicit trigger: drops any current connection, resets the failure
    /// count and connects again.
    pub fn restart(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = task.take() {
            previous.abort();
        }
        self.status.send_replace(ConnectionStatus::default());
        info!(instance = %self.settings.instance, "realtime: restarting channel");
        *task = Some(self.spawn_loop());
    }

    /// Tears the channel down immediately. No reconnect follows.
    pub fn disconnect(&self) {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.status.send_modify(|status| {
            status.state = ConnectionState::Disconnected;
        });
        debug!(instance = %self.settings.instance, "realtime: disconnected");
    }

    fn spawn_loop(&self) -> JoinHandle<()> {
        let settings = self.settings.clone();
        let frames = self.frames.clone();
        let status = self.status.clone();
        tokio::spawn(async move { run(settings, frames, status).await })
    }
}

impl Drop for RealtimeController {
    fn drop(&mut self) {
        if let Some(task) = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

async fn run(
    settings: RealtimeSettings,
    frames: mpsc::Sender<GatewayEnvelope>,
    status: watch::Sender<ConnectionStatus>,
) {
    let mut failures = 0_u32;
    loop {
        status.send_modify(|s| {
            s.state = ConnectionState::Connecting;
            s.failed_attempts = failures;
            s.gave_up = false;
        });

        match session(&settings, &frames, &status).await {
            Ok(SessionEnd::ReceiverClosed) => {
                status.send_modify(|s| s.state = ConnectionState::Disconnected);
                debug!("realtime: frame receiver closed, stopping");
                return;
            }
            Ok(SessionEnd::Dropped { lasted }) if lasted >= settings.stable_session => {
                failures = 0;
                info!(instance = %settings.instance, "realtime: channel dropped, reconnecting");
            }
            Ok(SessionEnd::Dropped { lasted }) => {
                failures += 1;
                warn!(
                    instance = %settings.instance,
                    attempt = failures,
                    max_attempts = settings.max_attempts,
                    lasted_ms = lasted.as_millis() as u64,
                    "realtime: channel dropped right after connecting"
                );
            }
            Err(err) => {
                failures += 1;
                warn!(
                    instance = %settings.instance,
                    attempt = failures,
                    max_attempts = settings.max_attempts,
                    error = %err,
                    "realtime: connect attempt failed"
                );
            }
        }

        let gave_up = failures >= settings.max_attempts;
        status.send_modify(|s| {
            s.state = ConnectionState::Disconnected;
            s.failed_attempts = failures;
            s.gave_up = gave_up;
        });
        if gave_up {
            warn!(
                instance = %settings.instance,
                attempts = failures,
                "realtime: giving up until restarted"
            );
            return;
        }
        tokio::time::sleep(settings.reconnect_delay).await;
    }
}

async fn session(
    settings: &RealtimeSettings,
    frames: &mpsc::Sender<GatewayEnvelope>,
    status: &watch::Sender<ConnectionStatus>,
) -> Result<SessionEnd> {
    let (ws_stream, _) = connect_async(settings.url.as_str())
        .await
        .with_context(|| format!("failed to connect push channel for {}", settings.instance))?;
    let opened = Instant::now();
    let (mut writer, mut reader) = ws_stream.split();
    status.send_modify(|s| s.state = ConnectionState::Connected);
    info!(instance = %settings.instance, "realtime: connected");

    tokio::time::sleep(settings.subscribe_delay).await;
    let subscribe = serde_json::to_string(&SubscribeRequest::new(settings.instance.clone()))?;
    writer
        .send(Message::Text(subscribe))
        .await
        .context("failed to send subscribe frame")?;
    info!(instance = %settings.instance, "realtime: subscribed");

    while let Some(msg) = reader.next().await {
        match msg {
            Ok(Message::Text(text)) => match parse_realtime_frame(&text) {
                Ok(envelope) => {
                    if frames.send(envelope).await.is_err() {
                        return Ok(SessionEnd::ReceiverClosed);
                    }
                }
                Err(err) => warn!(error = %err, "realtime: dropping malformed frame"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "realtime: receive failed");
                break;
            }
        }
    }
    Ok(SessionEnd::Dropped {
        lasted: opened.elapsed(),
    })
}

#[cfg(test)]
#[path = "tests/realtime_tests.rs"]
mod tests;
