//! MCP console tools.
//!
//! - `console_connect`: open a console on a jump host
//! - `console_send`: send one command to the remote shell
//! - `console_read`: drain buffered console output
//! - `console_execute`: run a script in the background (returns run_id)
//! - `console_execute_direct`: run SHELL/SLEEP lines straight on a server
//! - `console_cancel`: cancel a running script
//! - `console_status` / `console_list`: inspect consoles and their runs
//! - `console_disconnect`: cancel runs and tear the console down
//! - `script_save` / `script_get` / `script_list` / `script_delete`: named
//!   scripts and saved arguments in the durable store

use std::sync::Arc;
use std::time::Duration;

use poem_mcpserver::{Tools, content::Text, tool::StructuredContent};
use tracing::{error, info, warn};

use super::client::{ConnectConfig, JumpTarget, connect_executor, connect_jump_host};
use super::config::{
    resolve_compression, resolve_connect_timeout, resolve_outbound_capacity, resolve_shell_lang,
    script_timing,
};
use super::lb::LoadBalancer;
use super::pump;
use super::runs::{cancel_session_runs, get_run, session_runs, spawn_direct, spawn_script};
use super::script::{Directive, parse_script};
use super::session::Session;
use super::shell::{PtyConfig, RemoteShell};
use super::storage::{CONSOLES, StoredConsole};
use super::store::{ARGS_BUCKET, KeyValueStore, SCRIPTS_BUCKET};
use super::transport::BufferedSink;
use super::types::{
    ConsoleCancelResponse, ConsoleConnectResponse, ConsoleExecuteResponse, ConsoleInfo,
    ConsoleListResponse, ConsoleReadResponse, ConsoleStatusResponse, ScriptEntry,
    ScriptListResponse, ScriptRunStatus,
};

/// Lines returned by `console_read` when `max_lines` is not given.
const DEFAULT_READ_LINES: usize = 200;

/// How long `console_cancel` waits for a run to acknowledge.
const CANCEL_WAIT: Duration = Duration::from_secs(2);

/// MCP console tool implementation.
pub struct McpConsoleCommands {
    store: Arc<dyn KeyValueStore>,
    lb: Arc<dyn LoadBalancer>,
}

impl McpConsoleCommands {
    pub fn new(store: Arc<dyn KeyValueStore>, lb: Arc<dyn LoadBalancer>) -> Self {
        Self { store, lb }
    }
}

/// Map the optional `bucket` parameter to a store bucket.
///
/// Any non-blank name is a bucket. The two well-known names match
/// case-insensitively.
pub(crate) fn resolve_bucket(bucket: Option<&str>) -> &str {
    match bucket.map(str::trim) {
        None | Some("") => SCRIPTS_BUCKET,
        Some(b) if b.eq_ignore_ascii_case(SCRIPTS_BUCKET) => SCRIPTS_BUCKET,
        Some(b) if b.eq_ignore_ascii_case(ARGS_BUCKET) => ARGS_BUCKET,
        Some(other) => other,
    }
}

pub(crate) fn lookup_console(session_id: &str) -> Result<Arc<StoredConsole>, String> {
    CONSOLES
        .get(session_id)
        .ok_or_else(|| format!("No console with ID: {}", session_id))
}

/// Pick the script text: inline `script`, or `script_name` from the store.
pub(crate) fn load_script(
    store: &dyn KeyValueStore,
    script: Option<String>,
    script_name: Option<String>,
) -> Result<String, String> {
    match (script, script_name) {
        (Some(_), Some(_)) => Err("Provide either script or script_name, not both".to_string()),
        (Some(text), None) => Ok(text),
        (None, Some(name)) => store
            .get(SCRIPTS_BUCKET, &name)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("No saved script named '{}'", name)),
        (None, None) => Err("Either script or script_name is required".to_string()),
    }
}

/// Number of directives that will actually run.
pub(crate) fn count_directives(text: &str) -> usize {
    parse_script(text)
        .iter()
        .filter(|d| !matches!(d, Directive::Comment))
        .count()
}

/// Number of directives a direct run executes (`SHELL` and `SLEEP`).
pub(crate) fn count_direct_directives(text: &str) -> usize {
    parse_script(text)
        .iter()
        .filter(|d| matches!(d, Directive::Shell { .. } | Directive::Sleep { .. }))
        .count()
}

/// Drain up to `max_lines` buffered lines from a console.
pub(crate) async fn read_console(console: &StoredConsole, max_lines: usize) -> ConsoleReadResponse {
    let lines = console.output.drain(max_lines).await;
    ConsoleReadResponse {
        session_id: console.session.id().to_string(),
        lines,
        remaining: console.output.len().await,
        closed: console.session.is_closed(),
    }
}

/// Forget a console: cancel its runs, unregister it and tear it down.
///
/// Returns the number of runs cancelled, or `None` if no such console.
pub(crate) async fn close_console(session_id: &str) -> Option<usize> {
    let cancelled = cancel_session_runs(session_id);
    let console = CONSOLES.remove(session_id)?;
    console.session.teardown().await;
    Some(cancelled)
}

#[Tools]
impl McpConsoleCommands {
    /// Open a console on a jump host and keep it registered.
    ///
    /// The login banner, menu and authentication prompts are buffered; read
    /// them with `console_read`. Echoed keyboard-interactive prompts (MFA
    /// codes) are answered from `answers` in order.
    #[allow(clippy::too_many_arguments)]
    async fn console_connect(
        &self,
        /// Jump host address in format "host:port" or "host" (port 22)
        address: String,
        /// Jump host username
        username: String,
        /// Account password, also used for hidden keyboard-interactive prompts
        password: String,
        /// Optional human-readable name for the console (e.g., "prod-jump")
        name: Option<String>,
        /// Connection and authentication timeout in seconds (default: 30, env: JUMP_CONNECT_TIMEOUT)
        timeout_secs: Option<u64>,
        /// Enable zlib compression (default: true, env: JUMP_COMPRESSION)
        compress: Option<bool>,
        /// LANG exported to the remote shell (default: zh_CN.UTF-8, env: JUMP_SHELL_LANG)
        lang: Option<String>,
        /// Answers for echoed keyboard-interactive prompts, in order
        answers: Option<Vec<String>>,
    ) -> Result<StructuredContent<ConsoleConnectResponse>, String> {
        let timeout = Duration::from_secs(resolve_connect_timeout(timeout_secs));
        let config = ConnectConfig {
            timeout,
            compress: resolve_compression(compress),
            pty: PtyConfig::new(resolve_shell_lang(lang)),
        };
        let target = JumpTarget {
            address: address.clone(),
            username,
            password,
        };

        let (session, outbound_rx) = Session::new(resolve_outbound_capacity(None));
        let output = Arc::new(BufferedSink::new());
        pump::spawn_outbound(session.id().to_string(), outbound_rx, output.clone());

        for answer in answers.unwrap_or_default() {
            session.submit_input(&answer).map_err(|e| e.to_string())?;
        }

        // Bound authentication too: an echoed prompt with no queued answer
        // would otherwise wait forever.
        let host = match tokio::time::timeout(timeout, connect_jump_host(&target, &session, &config))
            .await
        {
            Ok(Ok(host)) => host,
            Ok(Err(e)) => {
                error!("Console connection to {} failed: {}", address, e);
                session.teardown().await;
                return Err(e.to_string());
            }
            Err(_) => {
                error!("Console connection to {} timed out", address);
                session.teardown().await;
                return Err(format!(
                    "Connection to {} did not authenticate within {:?}. If the jump host asks for MFA, pass the codes in `answers`.",
                    address, timeout
                ));
            }
        };

        let leftover = session.reader().discard_queued().await;
        if leftover > 0 {
            warn!("Discarded {} unused answer(s) for {}", leftover, address);
        }

        let host = Arc::new(host);
        let description = host.describe();
        if let Err(e) = session.attach(host) {
            session.teardown().await;
            return Err(e.to_string());
        }

        let session_id = session.id().to_string();
        CONSOLES.insert(StoredConsole {
            session,
            output,
            name: name.clone(),
            target: description.clone(),
        });

        info!("Console {} opened on {}", session_id, description);
        let name_part = name
            .as_ref()
            .map(|n| format!(" (name: '{}')", n))
            .unwrap_or_default();
        Ok(StructuredContent(ConsoleConnectResponse {
            message: format!(
                "Connected to {}{}. Use session_id '{}' with console_send or console_execute.",
                description, name_part, session_id
            ),
            session_id,
        }))
    }

    /// Send one command line to the remote shell.
    ///
    /// Output arrives asynchronously; poll it with `console_read`.
    async fn console_send(
        &self,
        /// Session ID returned from console_connect
        session_id: String,
        /// Command line; a newline is appended
        command: String,
    ) -> Result<Text<String>, String> {
        let console = lookup_console(&session_id)?;
        console
            .session
            .send_command(&command)
            .map_err(|e| e.to_string())?;
        Ok(Text(format!("Sent to {}: {}", session_id, command)))
    }

    /// Drain buffered console output, oldest first.
    async fn console_read(
        &self,
        /// Session ID returned from console_connect
        session_id: String,
        /// Maximum number of lines to return (default: 200)
        max_lines: Option<usize>,
    ) -> Result<StructuredContent<ConsoleReadResponse>, String> {
        let console = lookup_console(&session_id)?;
        let max = max_lines.filter(|n| *n > 0).unwrap_or(DEFAULT_READ_LINES);
        Ok(StructuredContent(read_console(&console, max).await))
    }

    /// Run a console script in the background.
    ///
    /// Directives: LOGIN, LOGOUT, SHELL, LB, LB-INFO, CHECK, SLEEP, UPLOAD.
    /// Lines starting with `//` are comments. Returns immediately with a
    /// run_id; notices and shell output show up in `console_read`.
    async fn console_execute(
        &self,
        /// Session ID returned from console_connect
        session_id: String,
        /// Inline script text
        script: Option<String>,
        /// Name of a script saved with script_save
        script_name: Option<String>,
    ) -> Result<StructuredContent<ConsoleExecuteResponse>, String> {
        let console = lookup_console(&session_id)?;
        if console.session.is_closed() {
            return Err(format!("Console {} is closed", session_id));
        }
        let text = load_script(self.store.as_ref(), script, script_name)?;
        let directives = count_directives(&text);

        let run = spawn_script(
            console.session.clone(),
            self.lb.clone(),
            script_timing(),
            text,
        );
        info!(
            "Started script run {} ({} directive(s)) on console {}",
            run.run_id, directives, session_id
        );

        Ok(StructuredContent(ConsoleExecuteResponse {
            message: format!(
                "Script started with run_id '{}'. Check progress with console_status.",
                run.run_id
            ),
            run_id: run.run_id.clone(),
            session_id,
            directives,
        }))
    }

    /// Run a script directly on a server, without the jump host console.
    ///
    /// Connects with the password, runs each SHELL line on its own exec
    /// channel and honours SLEEP. Other directives are skipped. Output is
    /// buffered on a new console; read it with `console_read` and close it
    /// with `console_disconnect`.
    #[allow(clippy::too_many_arguments)]
    async fn console_execute_direct(
        &self,
        /// Server address in format "host:port" or "host" (port 22)
        address: String,
        /// Server username
        username: String,
        /// Server password
        password: String,
        /// Inline script text
        script: Option<String>,
        /// Name of a script saved with script_save
        script_name: Option<String>,
        /// Optional human-readable name for the output console
        name: Option<String>,
        /// Connection timeout in seconds (default: 30, env: JUMP_CONNECT_TIMEOUT)
        timeout_secs: Option<u64>,
        /// Enable zlib compression (default: true, env: JUMP_COMPRESSION)
        compress: Option<bool>,
    ) -> Result<StructuredContent<ConsoleExecuteResponse>, String> {
        let text = load_script(self.store.as_ref(), script, script_name)?;
        let directives = count_direct_directives(&text);
        let config = ConnectConfig {
            timeout: Duration::from_secs(resolve_connect_timeout(timeout_secs)),
            compress: resolve_compression(compress),
            pty: PtyConfig::new(resolve_shell_lang(None)),
        };
        let target = JumpTarget {
            address: address.clone(),
            username: username.clone(),
            password,
        };

        let (session, outbound_rx) = Session::new(resolve_outbound_capacity(None));
        let output = Arc::new(BufferedSink::new());
        pump::spawn_outbound(session.id().to_string(), outbound_rx, output.clone());
        let session_id = session.id().to_string();
        let console = CONSOLES.insert(StoredConsole {
            session,
            output,
            name,
            target: format!("{}@{} (direct)", username, address),
        });

        let run = spawn_direct(
            console.session.clone(),
            connect_executor(target, config),
            text,
        );
        info!(
            "Started direct run {} ({} directive(s)) on {}, output in console {}",
            run.run_id, directives, address, session_id
        );

        Ok(StructuredContent(ConsoleExecuteResponse {
            message: format!(
                "Direct run started with run_id '{}'. Read output from console '{}'.",
                run.run_id, session_id
            ),
            run_id: run.run_id.clone(),
            session_id,
            directives,
        }))
    }

    /// Cancel a running script.
    ///
    /// A health check in progress stops at its next wake-up.
    async fn console_cancel(
        &self,
        /// Run ID returned from console_execute
        run_id: String,
    ) -> Result<StructuredContent<ConsoleCancelResponse>, String> {
        let run = get_run(&run_id).ok_or_else(|| format!("No script run with ID: {}", run_id))?;
        if !run.is_running() {
            return Err(format!(
                "Script run is not running (status: {})",
                run.info().status
            ));
        }

        run.cancel_token.cancel();

        let mut rx = run.state_rx.clone();
        let _ = tokio::time::timeout(
            CANCEL_WAIT,
            rx.wait_for(|state| state.status != ScriptRunStatus::Running),
        )
        .await;

        let status = run.info().status;
        info!("Cancelled script run {} ({})", run_id, status);
        Ok(StructuredContent(ConsoleCancelResponse {
            cancelled: status == ScriptRunStatus::Cancelled,
            message: format!("Script run {} is {}", run_id, status),
            run_id,
        }))
    }

    /// Show a console's state and its script runs.
    async fn console_status(
        &self,
        /// Session ID returned from console_connect
        session_id: String,
    ) -> Result<StructuredContent<ConsoleStatusResponse>, String> {
        let console = lookup_console(&session_id)?;
        Ok(StructuredContent(ConsoleStatusResponse {
            console: console.info().await,
            runs: session_runs(&session_id),
        }))
    }

    /// List open consoles.
    ///
    /// Consoles whose remote shell has exited are removed from the registry.
    async fn console_list(&self) -> StructuredContent<ConsoleListResponse> {
        let mut consoles: Vec<ConsoleInfo> = Vec::new();
        for console in CONSOLES.all() {
            if console.session.is_closed() {
                let id = console.session.id().to_string();
                warn!("Removing closed console {} from registry", id);
                close_console(&id).await;
                continue;
            }
            consoles.push(console.info().await);
        }
        consoles.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let count = consoles.len();
        StructuredContent(ConsoleListResponse { consoles, count })
    }

    /// Close a console.
    ///
    /// Cancels every script run on it, closes its queues and disconnects
    /// from the jump host.
    async fn console_disconnect(
        &self,
        /// Session ID returned from console_connect
        session_id: String,
    ) -> Result<Text<String>, String> {
        info!("Disconnecting console: {}", session_id);
        match close_console(&session_id).await {
            Some(cancelled) => Ok(Text(format!(
                "Console {} disconnected ({} script run(s) cancelled)",
                session_id, cancelled
            ))),
            None => Err(format!("No console with ID: {}", session_id)),
        }
    }

    /// Save a named script, or any value under another bucket (e.g. "args").
    async fn script_save(
        &self,
        /// Entry name
        name: String,
        /// Script text or argument value
        script: String,
        /// Bucket name: "scripts" (default), "args" or any other name
        bucket: Option<String>,
    ) -> Result<Text<String>, String> {
        let bucket = resolve_bucket(bucket.as_deref());
        if name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        self.store
            .put(bucket, &name, &script)
            .map_err(|e| e.to_string())?;
        info!("Saved '{}' in bucket {}", name, bucket);
        Ok(Text(format!("Saved '{}' in {}", name, bucket)))
    }

    /// Fetch one saved entry.
    async fn script_get(
        &self,
        /// Entry name
        name: String,
        /// Bucket name: "scripts" (default), "args" or any other name
        bucket: Option<String>,
    ) -> Result<StructuredContent<ScriptEntry>, String> {
        let bucket = resolve_bucket(bucket.as_deref());
        let script = self
            .store
            .get(bucket, &name)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("No entry named '{}' in {}", name, bucket))?;
        Ok(StructuredContent(ScriptEntry { name, script }))
    }

    /// List saved entries, ordered by name.
    async fn script_list(
        &self,
        /// Bucket name: "scripts" (default), "args" or any other name
        bucket: Option<String>,
    ) -> Result<StructuredContent<ScriptListResponse>, String> {
        let bucket = resolve_bucket(bucket.as_deref());
        let scripts: Vec<ScriptEntry> = self
            .store
            .list(bucket)
            .map_err(|e| e.to_string())?
            .into_iter()
            .map(|(name, script)| ScriptEntry { name, script })
            .collect();
        let count = scripts.len();
        Ok(StructuredContent(ScriptListResponse { scripts, count }))
    }

    /// Delete a saved entry.
    async fn script_delete(
        &self,
        /// Entry name
        name: String,
        /// Bucket name: "scripts" (default), "args" or any other name
        bucket: Option<String>,
    ) -> Result<Text<String>, String> {
        let bucket = resolve_bucket(bucket.as_deref());
        if self
            .store
            .delete(bucket, &name)
            .map_err(|e| e.to_string())?
        {
            Ok(Text(format!("Deleted '{}' from {}", name, bucket)))
        } else {
            Err(format!("No entry named '{}' in {}", name, bucket))
        }
    }
}
