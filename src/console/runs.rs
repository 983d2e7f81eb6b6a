//! Background script runs.
//!
//! Surfaces that must not block (MCP tool calls, the websocket reader) hand
//! scripts to [`spawn_script`], or to [`spawn_direct`] for runs that go
//! straight to a server. Each run gets an id, a cancellation token and a
//! status channel, and is indexed by session so a disconnect can cancel
//! everything running against that console.
//!
//! Finished runs stay queryable for [`RUN_RETENTION`], then drop out of the
//! registry. Tearing the session down drops them at once.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::error::ConsoleError;
use super::lb::LoadBalancer;
use super::script::{ScriptEngine, ScriptOutcome, ScriptTiming, run_direct};
use super::session::Session;
use super::shell::CommandExecutor;
use super::types::{ScriptRunInfo, ScriptRunStatus};

/// How long a finished run stays in the registry.
pub const RUN_RETENTION: Duration = Duration::from_secs(600);

/// Latest state published by a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    pub status: ScriptRunStatus,
    pub message: Option<String>,
}

impl From<&ScriptOutcome> for RunState {
    fn from(outcome: &ScriptOutcome) -> Self {
        match outcome {
            ScriptOutcome::Completed => RunState {
                status: ScriptRunStatus::Completed,
                message: None,
            },
            ScriptOutcome::Aborted(message) => RunState {
                status: ScriptRunStatus::Aborted,
                message: Some(message.clone()),
            },
            ScriptOutcome::Cancelled => RunState {
                status: ScriptRunStatus::Cancelled,
                message: None,
            },
        }
    }
}

/// A script run, running or finished.
pub struct RunningScript {
    pub run_id: String,
    pub session_id: String,
    pub started_at: String,
    pub cancel_token: CancellationToken,
    pub state_rx: watch::Receiver<RunState>,
}

impl RunningScript {
    pub fn info(&self) -> ScriptRunInfo {
        let state = self.state_rx.borrow().clone();
        ScriptRunInfo {
            run_id: self.run_id.clone(),
            session_id: self.session_id.clone(),
            started_at: self.started_at.clone(),
            status: state.status,
            message: state.message,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state_rx.borrow().status == ScriptRunStatus::Running
    }
}

/// All script runs, keyed by run id.
pub static SCRIPT_RUNS: Lazy<DashMap<String, Arc<RunningScript>>> = Lazy::new(DashMap::new);

/// Secondary index: session_id -> run ids.
pub static RUNS_BY_SESSION: Lazy<DashMap<String, HashSet<String>>> = Lazy::new(DashMap::new);

pub fn register_run(run: Arc<RunningScript>) {
    let session_id = run.session_id.clone();
    let run_id = run.run_id.clone();
    SCRIPT_RUNS.insert(run_id.clone(), run);
    RUNS_BY_SESSION.entry(session_id).or_default().insert(run_id);
}

pub fn unregister_run(run_id: &str) -> Option<Arc<RunningScript>> {
    let removed = SCRIPT_RUNS.remove(run_id).map(|(_, run)| run);

    if let Some(ref run) = removed
        && let Some(mut set) = RUNS_BY_SESSION.get_mut(&run.session_id)
    {
        set.remove(run_id);
        if set.is_empty() {
            drop(set);
            RUNS_BY_SESSION.remove(&run.session_id);
        }
    }

    removed
}

pub fn get_run(run_id: &str) -> Option<Arc<RunningScript>> {
    SCRIPT_RUNS.get(run_id).map(|entry| entry.clone())
}

pub fn session_run_ids(session_id: &str) -> Vec<String> {
    RUNS_BY_SESSION
        .get(session_id)
        .map(|set| set.iter().cloned().collect())
        .unwrap_or_default()
}

/// Run infos for a session, oldest first.
pub fn session_runs(session_id: &str) -> Vec<ScriptRunInfo> {
    let mut runs: Vec<ScriptRunInfo> = session_run_ids(session_id)
        .iter()
        .filter_map(|id| get_run(id).map(|run| run.info()))
        .collect();
    runs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
    runs
}

/// Cancel and forget every run of a session. Returns how many were removed.
pub fn cancel_session_runs(session_id: &str) -> usize {
    let ids = session_run_ids(session_id);
    for id in &ids {
        if let Some(run) = unregister_run(id) {
            run.cancel_token.cancel();
        }
    }
    ids.len()
}

/// Start a script against a session in the background.
///
/// The run is cancelled when the session is torn down.
pub fn spawn_script(
    session: Arc<Session>,
    lb: Arc<dyn LoadBalancer>,
    timing: ScriptTiming,
    script: String,
) -> Arc<RunningScript> {
    let engine_session = session.clone();
    launch(session, RUN_RETENTION, move |cancel| async move {
        let engine = ScriptEngine::new(engine_session, lb, timing, cancel);
        engine.run(&script).await
    })
}

/// Start a script that connects to a server and runs there directly.
///
/// `connect` yields the server connection; its output lines and the run's
/// notices go to the session's outbound queue. The connection is closed when
/// the script ends.
pub fn spawn_direct<C>(session: Arc<Session>, connect: C, script: String) -> Arc<RunningScript>
where
    C: Future<Output = Result<Arc<dyn CommandExecutor>, ConsoleError>> + Send + 'static,
{
    let run_session = session.clone();
    launch(session, RUN_RETENTION, move |cancel| async move {
        let connected = tokio::select! {
            connected = connect => connected,
            _ = cancel.cancelled() => return ScriptOutcome::Cancelled,
        };
        let server = match connected {
            Ok(server) => server,
            Err(e) => {
                let message = format!("direct connection failed: {}", e);
                run_session.publish(message.clone()).await;
                return ScriptOutcome::Aborted(message);
            }
        };

        run_session
            .publish(format!("connected to {}", server.describe()))
            .await;
        let outcome = run_direct(server.as_ref(), run_session.outbox(), &script, &cancel).await;
        if let Err(e) = server.close().await {
            debug!("Closing {} failed: {}", server.describe(), e);
        }
        outcome
    })
}

/// Register a run, drive `body` on its own task and publish the outcome.
fn launch<F, Fut>(session: Arc<Session>, retention: Duration, body: F) -> Arc<RunningScript>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = ScriptOutcome> + Send + 'static,
{
    let run_id = Uuid::new_v4().to_string();
    let shutdown = session.shutdown_token();
    let cancel_token = shutdown.child_token();
    let (state_tx, state_rx) = watch::channel(RunState {
        status: ScriptRunStatus::Running,
        message: None,
    });

    let run = Arc::new(RunningScript {
        run_id: run_id.clone(),
        session_id: session.id().to_string(),
        started_at: chrono::Utc::now().to_rfc3339(),
        cancel_token: cancel_token.clone(),
        state_rx,
    });
    register_run(run.clone());

    let script = body(cancel_token);
    tokio::spawn(async move {
        let outcome = script.await;
        info!(
            "Script run {} on session {} finished: {:?}",
            run_id,
            session.id(),
            outcome
        );
        let _ = state_tx.send(RunState::from(&outcome));
        drop(session);

        tokio::select! {
            _ = tokio::time::sleep(retention) => {}
            _ = shutdown.cancelled() => {}
        }
        if unregister_run(&run_id).is_some() {
            debug!("Script run {} dropped from registry", run_id);
        }
    });

    run
}
