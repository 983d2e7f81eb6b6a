//! Script language and its sequential executor.
//!
//! A script is newline-separated directives. Runs of whitespace (tabs
//! included) collapse to a single space before tokenizing, and lines starting
//! with `//` are comments.
//!
//! | Directive | Effect |
//! |-----------|--------|
//! | `LOGIN <payload>` | send the payload to the shell |
//! | `LOGOUT` | send `exit` until the jump menu is back |
//! | `SHELL <text>` | send the text to the shell |
//! | `LB <args>` | apply a load-balancer change; failure aborts the script |
//! | `LB-INFO <args>` | publish load-balancer instance info |
//! | `CHECK <url>` | block until the health check confirms |
//! | `SLEEP <duration>` | pause, e.g. `300ms`, `2s`, `1m30s` |
//! | `UPLOAD <src> <dst>` | copy a local path to the jump host |
//!
//! Unknown keywords are ignored.
//!
//! [`run_direct`] runs a script straight against a server instead of through
//! the jump host console. Only `SHELL` and `SLEEP` apply there.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::adapter::Outbox;
use super::classifier::LoginState;
use super::health::{self, CheckOutcome, CheckTiming};
use super::lb::LoadBalancer;
use super::session::Session;
use super::shell::CommandExecutor;

/// Label prefixed to load-balancer info lines.
pub const LB_INFO_LABEL: &str = "LB instance info: ";

/// Default delay between LOGOUT attempts.
pub const DEFAULT_LOGOUT_INTERVAL: Duration = Duration::from_secs(3);

/// Malformed script tokens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("{keyword} requires {expected}")]
    MissingArgument {
        keyword: &'static str,
        expected: &'static str,
    },

    #[error("invalid duration {literal:?}: {reason}")]
    InvalidDuration { literal: String, reason: String },
}

/// One parsed script line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Login { payload: String },
    Logout,
    Shell { command: String },
    /// The whole directive line, handed to the balancer unchanged.
    LbApply { raw: String },
    LbInfo { raw: String },
    Check { url: String },
    Sleep { duration: Duration },
    Upload { source: String, destination: String },
    Comment,
}

/// How a script run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    Completed,
    /// A load-balancer change failed; the rest of the script was skipped.
    Aborted(String),
    Cancelled,
}

/// Collapse every run of whitespace to one space and trim the ends.
pub fn collapse_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse one script line.
///
/// Returns `Ok(None)` for blank lines and unknown keywords.
pub fn parse_line(line: &str) -> Result<Option<Directive>, ScriptError> {
    let line = collapse_whitespace(line);
    if line.is_empty() {
        return Ok(None);
    }
    if line.starts_with("//") {
        return Ok(Some(Directive::Comment));
    }

    let (keyword, rest) = line.split_once(' ').unwrap_or((line.as_str(), ""));
    let mut args = rest.split(' ').filter(|arg| !arg.is_empty());

    let directive = match keyword {
        "LOGIN" => Directive::Login {
            payload: required(rest, "LOGIN", "a payload")?.to_string(),
        },
        "LOGOUT" => Directive::Logout,
        "SHELL" => Directive::Shell {
            command: required(rest, "SHELL", "a command")?.to_string(),
        },
        "LB" => Directive::LbApply { raw: line.clone() },
        "LB-INFO" => Directive::LbInfo { raw: line.clone() },
        "CHECK" => Directive::Check {
            url: args
                .next()
                .ok_or(ScriptError::MissingArgument {
                    keyword: "CHECK",
                    expected: "a url",
                })?
                .to_string(),
        },
        "SLEEP" => {
            let literal = args.next().ok_or(ScriptError::MissingArgument {
                keyword: "SLEEP",
                expected: "a duration",
            })?;
            Directive::Sleep {
                duration: parse_duration(literal)?,
            }
        }
        "UPLOAD" => match (args.next(), args.next()) {
            (Some(source), Some(destination)) => Directive::Upload {
                source: source.to_string(),
                destination: destination.to_string(),
            },
            _ => {
                return Err(ScriptError::MissingArgument {
                    keyword: "UPLOAD",
                    expected: "a source and a destination",
                });
            }
        },
        other => {
            debug!("Ignoring unknown directive: {}", other);
            return Ok(None);
        }
    };

    Ok(Some(directive))
}

fn required<'a>(
    rest: &'a str,
    keyword: &'static str,
    expected: &'static str,
) -> Result<&'a str, ScriptError> {
    if rest.is_empty() {
        Err(ScriptError::MissingArgument { keyword, expected })
    } else {
        Ok(rest)
    }
}

/// Parse a whole script. Comments, blank lines, unknown keywords and
/// malformed lines are dropped; malformed lines are logged.
pub fn parse_script(text: &str) -> Vec<Directive> {
    text.lines()
        .enumerate()
        .filter_map(|(index, line)| match parse_line(line) {
            Ok(Some(Directive::Comment)) | Ok(None) => None,
            Ok(Some(directive)) => Some(directive),
            Err(e) => {
                error!("Skipping script line {}: {}", index + 1, e);
                None
            }
        })
        .collect()
}

/// Parse a duration literal such as `300ms`, `2s`, `1m30s` or `1.5h`.
///
/// Accepted units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. A bare `0` is
/// allowed; any other number needs a unit. Signs are rejected.
pub fn parse_duration(literal: &str) -> Result<Duration, ScriptError> {
    let invalid = |reason: &str| ScriptError::InvalidDuration {
        literal: literal.to_string(),
        reason: reason.to_string(),
    };

    if literal == "0" {
        return Ok(Duration::ZERO);
    }
    if literal.is_empty() {
        return Err(invalid("empty literal"));
    }

    let mut rest = literal;
    let mut total: u128 = 0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);

        let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid("expected a number"));
        }
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("malformed number"));
        }

        let unit_nanos: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60_000_000_000,
            "h" => 3_600_000_000_000,
            "" => return Err(invalid("missing unit")),
            _ => return Err(invalid("unknown unit")),
        };

        let whole_value: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid("number out of range"))?
        };
        let mut nanos = whole_value
            .checked_mul(unit_nanos)
            .ok_or_else(|| invalid("overflow"))?;
        if !frac.is_empty() {
            let digits = &frac[..frac.len().min(18)];
            let frac_value: u128 = digits.parse().map_err(|_| invalid("malformed number"))?;
            nanos += frac_value * unit_nanos / 10u128.pow(digits.len() as u32);
        }
        total = total.checked_add(nanos).ok_or_else(|| invalid("overflow"))?;
        rest = tail;
    }

    u64::try_from(total)
        .map(Duration::from_nanos)
        .map_err(|_| invalid("overflow"))
}

/// Timing used by a script run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptTiming {
    pub logout_interval: Duration,
    pub check: CheckTiming,
}

impl Default for ScriptTiming {
    fn default() -> Self {
        Self {
            logout_interval: DEFAULT_LOGOUT_INTERVAL,
            check: CheckTiming::default(),
        }
    }
}

/// Runs scripts against one session, one directive at a time.
pub struct ScriptEngine {
    session: Arc<Session>,
    lb: Arc<dyn LoadBalancer>,
    timing: ScriptTiming,
    cancel: CancellationToken,
}

impl ScriptEngine {
    pub fn new(
        session: Arc<Session>,
        lb: Arc<dyn LoadBalancer>,
        timing: ScriptTiming,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            lb,
            timing,
            cancel,
        }
    }

    /// Parse and execute a script.
    pub async fn run(&self, script: &str) -> ScriptOutcome {
        let directives = parse_script(script);
        info!(
            "Session {} running script with {} directive(s)",
            self.session.id(),
            directives.len()
        );
        self.execute(&directives).await
    }

    /// Execute parsed directives in order.
    pub async fn execute(&self, directives: &[Directive]) -> ScriptOutcome {
        for (index, directive) in directives.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!("Session {} script cancelled", self.session.id());
                return ScriptOutcome::Cancelled;
            }
            debug!("Session {} directive {}: {:?}", self.session.id(), index, directive);

            match directive {
                Directive::Login { payload } => self.send(payload),
                Directive::Logout => {
                    if !self.logout().await {
                        return ScriptOutcome::Cancelled;
                    }
                }
                Directive::Shell { command } => self.send(command),
                Directive::LbApply { raw } => {
                    let result = self.lb.apply(raw).await;
                    if !result.success {
                        warn!(
                            "Session {} load balancer change failed, aborting script: {}",
                            self.session.id(),
                            result.message
                        );
                        self.session.publish(result.message.clone()).await;
                        return ScriptOutcome::Aborted(result.message);
                    }
                    self.session
                        .publish(format!("{} applied successfully", raw))
                        .await;
                }
                Directive::LbInfo { raw } => {
                    let info = self.lb.info(raw).await;
                    self.session
                        .publish(format!("{}{}", LB_INFO_LABEL, info))
                        .await;
                }
                Directive::Check { url } => {
                    match health::run_check(&self.session, url, self.timing.check, &self.cancel)
                        .await
                    {
                        CheckOutcome::Confirmed => {}
                        CheckOutcome::Cancelled => return ScriptOutcome::Cancelled,
                        CheckOutcome::TimedOut => {
                            self.session
                                .publish(format!("health check timed out: {}", url))
                                .await;
                        }
                        CheckOutcome::ShellClosed => {
                            error!(
                                "Session {} health check of {} stopped, shell is gone",
                                self.session.id(),
                                url
                            );
                        }
                    }
                }
                Directive::Sleep { duration } => {
                    tokio::select! {
                        _ = tokio::time::sleep(*duration) => {}
                        _ = self.cancel.cancelled() => return ScriptOutcome::Cancelled,
                    }
                }
                Directive::Upload {
                    source,
                    destination,
                } => {
                    if let Err(e) = self.session.upload(Path::new(source), destination).await {
                        error!(
                            "Session {} upload {} -> {} failed: {}",
                            self.session.id(),
                            source,
                            destination,
                            e
                        );
                    }
                }
                Directive::Comment => {}
            }
        }
        ScriptOutcome::Completed
    }

    fn send(&self, command: &str) {
        if let Err(e) = self.session.send_command(command) {
            error!("Session {} send failed: {}", self.session.id(), e);
        }
    }

    /// Send `exit` until the jump menu is back. Returns `false` if cancelled.
    async fn logout(&self) -> bool {
        while self.session.login_state() == LoginState::Shell {
            if let Err(e) = self.session.send_command("exit") {
                error!("Session {} LOGOUT send failed: {}", self.session.id(), e);
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.timing.logout_interval) => {}
                _ = self.cancel.cancelled() => return false,
            }
        }
        true
    }
}

/// Run `SHELL` and `SLEEP` directives on a server, one exec per command.
///
/// Command output goes to `outbox`. A failing command is reported there and
/// the script moves on. Every other directive is skipped.
pub async fn run_direct(
    executor: &dyn CommandExecutor,
    outbox: &Outbox,
    script: &str,
    cancel: &CancellationToken,
) -> ScriptOutcome {
    let directives = parse_script(script);
    info!(
        "Running {} directive(s) directly on {}",
        directives.len(),
        executor.describe()
    );

    for directive in &directives {
        if cancel.is_cancelled() {
            return ScriptOutcome::Cancelled;
        }
        match directive {
            Directive::Shell { command } => {
                let result = tokio::select! {
                    result = executor.exec(command, outbox) => result,
                    _ = cancel.cancelled() => return ScriptOutcome::Cancelled,
                };
                match result {
                    Ok(Some(0)) | Ok(None) => {}
                    Ok(Some(code)) => {
                        outbox
                            .publish(format!("`{}` exited with status {}", command, code))
                            .await;
                    }
                    Err(e) => {
                        error!("Exec of `{}` on {} failed: {}", command, executor.describe(), e);
                        outbox.publish(format!("`{}` failed: {}", command, e)).await;
                    }
                }
            }
            Directive::Sleep { duration } => {
                tokio::select! {
                    _ = tokio::time::sleep(*duration) => {}
                    _ = cancel.cancelled() => return ScriptOutcome::Cancelled,
                }
            }
            Directive::Comment => {}
            other => debug!("Skipping {:?} on a direct run", other),
        }
    }
    ScriptOutcome::Completed
}
