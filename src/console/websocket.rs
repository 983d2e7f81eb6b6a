//! Websocket console at `GET /console`.
//!
//! Client frames are JSON objects tagged by `event`:
//!
//! ```text
//! {"event":"connect","data":{"address":"jump:22","username":"ops","password":"..."}}
//! {"event":"chat","data":"ls -la"}
//! {"event":"execute","data":"LOGIN root\nSHELL uptime"}
//! {"event":"execute","data":{"name":"deploy"}}
//! {"event":"execute_direct","data":{"address":"10.0.0.5","username":"deploy","password":"...","script":"SHELL uptime"}}
//! {"event":"close"}
//! ```
//!
//! `execute_direct` skips the jump host: it connects to the server itself and
//! runs the script's SHELL and SLEEP lines there.
//!
//! Every line going back to the client is `{"event":"chat","data":"..."}`.
//! One socket owns one session. Connecting runs on its own task so MFA
//! answers typed as `chat` frames reach the authentication prompts.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use poem::web::Data;
use poem::web::websocket::{Message, WebSocket, WebSocketStream};
use poem::{IntoResponse, handler};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::client::{ConnectConfig, JumpTarget, connect_executor, connect_jump_host};
use super::config::{
    resolve_compression, resolve_connect_timeout, resolve_outbound_capacity, resolve_shell_lang,
    script_timing,
};
use super::lb::LoadBalancer;
use super::pump;
use super::runs::{cancel_session_runs, spawn_direct, spawn_script};
use super::session::Session;
use super::shell::{PtyConfig, RemoteShell};
use super::store::{KeyValueStore, SCRIPTS_BUCKET};
use super::transport::{ChannelSink, EventSink, ServerEvent};

/// Route path of the websocket console.
pub const CONSOLE_PATH: &str = "/console";

/// How long buffered lines may take to flush after the session ends.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state for websocket consoles.
#[derive(Clone)]
pub struct ConsoleState {
    pub store: Arc<dyn KeyValueStore>,
    pub lb: Arc<dyn LoadBalancer>,
}

/// Frame sent by the websocket client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    Connect(ConnectRequest),
    Chat(String),
    Execute(ExecuteRequest),
    ExecuteDirect(DirectRequest),
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectRequest {
    pub address: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub compress: Option<bool>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// A script to run straight on a server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DirectRequest {
    pub address: String,
    pub username: String,
    pub password: String,
    pub script: ExecuteRequest,
    #[serde(default)]
    pub compress: Option<bool>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Script to run: inline text or the name of a saved script.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ExecuteRequest {
    Inline(String),
    Named { name: String },
}

#[handler]
pub fn console_ws(ws: WebSocket, state: Data<&ConsoleState>) -> impl IntoResponse {
    let state = state.0.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocketStream, state: ConsoleState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize console event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let sink: Arc<dyn EventSink> = Arc::new(ChannelSink::new(tx));
    let (session, outbound_rx) = Session::new(resolve_outbound_capacity(None));
    let pump = pump::spawn_outbound(session.id().to_string(), outbound_rx, sink);
    info!("Websocket console {} opened", session.id());

    let shutdown = session.shutdown_token();
    let mut connector: Option<JoinHandle<()>> = None;

    loop {
        let msg = tokio::select! {
            msg = receiver.next() => msg,
            _ = shutdown.cancelled() => break,
        };

        let text = match msg {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => continue,
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!("Websocket console {} error: {}", session.id(), e);
                break;
            }
        };

        let frame = match serde_json::from_str::<ClientFrame>(&text) {
            Ok(frame) => frame,
            Err(e) => {
                session.publish(format!("invalid frame: {}", e)).await;
                continue;
            }
        };

        if !handle_frame(frame, &session, &state, &mut connector).await {
            break;
        }
    }

    info!("Websocket console {} closing", session.id());
    cancel_session_runs(session.id());
    session.teardown().await;

    if let Some(task) = connector
        && let Err(e) = task.await
    {
        warn!("Connect task for {} failed: {}", session.id(), e);
    }
    // The pump drains what was queued before the close sentinel, then drops
    // the last sender so the writer task ends.
    let _ = pump.await;
    if tokio::time::timeout(FLUSH_TIMEOUT, send_task).await.is_err() {
        debug!("Websocket writer for {} did not flush in time", session.id());
    }
}

/// Apply one client frame. Returns `false` when the socket should close.
pub(crate) async fn handle_frame(
    frame: ClientFrame,
    session: &Arc<Session>,
    state: &ConsoleState,
    connector: &mut Option<JoinHandle<()>>,
) -> bool {
    match frame {
        ClientFrame::Connect(request) => {
            if connector.is_some() {
                session.publish("already connected").await;
            } else {
                *connector = Some(spawn_connect(session.clone(), request));
            }
        }
        ClientFrame::Chat(line) => {
            if let Err(e) = session.submit_input(&line) {
                session.publish(e.to_string()).await;
            }
        }
        ClientFrame::Execute(request) => {
            if !session.has_remote() {
                session.publish("not connected, send a connect event first").await;
                return true;
            }
            match resolve_execute(state.store.as_ref(), request) {
                Ok(script) => {
                    let run = spawn_script(session.clone(), state.lb.clone(), script_timing(), script);
                    info!("Websocket console {} started run {}", session.id(), run.run_id);
                }
                Err(message) => session.publish(message).await,
            }
        }
        ClientFrame::ExecuteDirect(request) => {
            match resolve_execute(state.store.as_ref(), request.script) {
                Ok(script) => {
                    let timeout = resolve_connect_timeout(request.timeout_secs);
                    let config = ConnectConfig {
                        timeout: Duration::from_secs(timeout),
                        compress: resolve_compression(request.compress),
                        pty: PtyConfig::new(resolve_shell_lang(None)),
                    };
                    let target = JumpTarget {
                        address: request.address,
                        username: request.username,
                        password: request.password,
                    };
                    let run =
                        spawn_direct(session.clone(), connect_executor(target, config), script);
                    info!(
                        "Websocket console {} started direct run {}",
                        session.id(),
                        run.run_id
                    );
                }
                Err(message) => session.publish(message).await,
            }
        }
        ClientFrame::Close => return false,
    }
    true
}

pub(crate) fn resolve_execute(
    store: &dyn KeyValueStore,
    request: ExecuteRequest,
) -> Result<String, String> {
    match request {
        ExecuteRequest::Inline(script) => Ok(script),
        ExecuteRequest::Named { name } => store
            .get(SCRIPTS_BUCKET, &name)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("no saved script named '{}'", name)),
    }
}

fn spawn_connect(session: Arc<Session>, request: ConnectRequest) -> JoinHandle<()> {
    tokio::spawn(async move {
        let config = ConnectConfig {
            timeout: Duration::from_secs(resolve_connect_timeout(request.timeout_secs)),
            compress: resolve_compression(request.compress),
            pty: PtyConfig::new(resolve_shell_lang(request.lang)),
        };
        let target = JumpTarget {
            address: request.address,
            username: request.username,
            password: request.password,
        };

        match connect_jump_host(&target, &session, &config).await {
            Ok(host) => {
                let host = Arc::new(host);
                let description = host.describe();
                match session.attach(host) {
                    Ok(_) => session.publish(format!("connected to {}", description)).await,
                    Err(e) => warn!("Session {} not attached: {}", session.id(), e),
                }
            }
            Err(e) => {
                error!("Websocket console {} connect failed: {}", session.id(), e);
                session.publish(e.to_string()).await;
                session.teardown().await;
            }
        }
    })
}
