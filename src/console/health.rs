//! Health-check monitor.
//!
//! A health check is a two-party state machine:
//!
//! ```text
//! Idle --CHECK--> Probing --(classifier sees 2 successes)--> Confirmed
//!                    |
//!                    +--(timeout, shell gone, cancel)--> Idle
//! ```
//!
//! The monitor loop only emits probes: a `curl -I` against the target and a
//! conditional echo of the target marker, then waits for the check interval.
//! It never decides success itself. The classifier, driven by output
//! arriving on the shell task, is the sole writer of the confirmed state.
//! The loop re-reads that state every iteration and is also woken early when
//! the classifier signals confirmation.
//!
//! With no timeout configured an unreachable target is polled forever.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::classifier::HealthState;
use super::session::Session;

/// Default interval between probe rounds.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Prefix of the notice published when a check starts.
pub const CHECK_START_NOTICE: &str = "health check started";

/// The target of a health check and the shell commands derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthTarget {
    pub url: String,
    /// Text echoed by the shell when the last probe returned 200.
    pub marker: String,
    pub probe_command: String,
    pub echo_command: String,
}

impl HealthTarget {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let marker = format!("{} is 200ok", url);
        let probe_command = format!("curl -I -m 10 -s {}", url);
        let echo_command = format!(
            "echo `if [[ $curl_check == 200 ]]; then echo \"{}\"; fi`",
            marker
        );
        Self {
            url,
            marker,
            probe_command,
            echo_command,
        }
    }
}

/// Timing of the probe loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckTiming {
    pub interval: Duration,
    /// Give up after this long. `None` polls until confirmed.
    pub timeout: Option<Duration>,
}

impl Default for CheckTiming {
    fn default() -> Self {
        Self {
            interval: DEFAULT_CHECK_INTERVAL,
            timeout: None,
        }
    }
}

/// How a health check ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Confirmed,
    /// The configured timeout elapsed first.
    TimedOut,
    /// The probe could not be written; the shell is gone.
    ShellClosed,
    Cancelled,
}

/// Run a health check against `url` through the session's shell.
///
/// Holds the session's target lock for the whole check, so concurrent checks
/// on one session run one after another. A check that ends without
/// confirmation returns the session to `Idle` and clears the target.
pub async fn run_check(
    session: &Session,
    url: &str,
    timing: CheckTiming,
    cancel: &CancellationToken,
) -> CheckOutcome {
    let mut target_slot = session.health_target().lock().await;
    let target = HealthTarget::new(url);
    *target_slot = Some(target.clone());

    session.flags().begin_check();
    info!("Session {} health check started: {}", session.id(), url);
    session
        .publish(format!("{}: {}", CHECK_START_NOTICE, url))
        .await;

    let outcome = probe_until_confirmed(session, &target, timing, cancel).await;
    if outcome != CheckOutcome::Confirmed {
        session.flags().end_check();
        *target_slot = None;
    }
    outcome
}

async fn probe_until_confirmed(
    session: &Session,
    target: &HealthTarget,
    timing: CheckTiming,
    cancel: &CancellationToken,
) -> CheckOutcome {
    let deadline = timing.timeout.map(|t| Instant::now() + t);
    let mut rounds = 0u32;

    loop {
        // Registered before probing so a confirmation racing the probe
        // output is not missed.
        let confirmation = session.flags().confirmation();
        tokio::pin!(confirmation);
        confirmation.as_mut().enable();

        if session.health_state() == HealthState::Confirmed {
            break;
        }
        if cancel.is_cancelled() {
            return CheckOutcome::Cancelled;
        }
        if let Some(deadline) = deadline
            && Instant::now() >= deadline
        {
            warn!(
                "Session {} health check of {} timed out after {} round(s)",
                session.id(),
                target.url,
                rounds
            );
            return CheckOutcome::TimedOut;
        }

        rounds += 1;
        for command in [&target.probe_command, &target.echo_command] {
            if let Err(e) = session.send_command(command) {
                error!("Session {} health probe failed: {}", session.id(), e);
                return CheckOutcome::ShellClosed;
            }
        }

        let mut wait = timing.interval;
        if let Some(deadline) = deadline {
            wait = wait.min(deadline.saturating_duration_since(Instant::now()));
        }
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = &mut confirmation => {}
            _ = cancel.cancelled() => return CheckOutcome::Cancelled,
        }
    }

    info!(
        "Session {} health check of {} confirmed after {} round(s)",
        session.id(),
        target.url,
        rounds
    );
    CheckOutcome::Confirmed
}
