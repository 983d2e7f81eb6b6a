//! Output classification for remote shell lines.
//!
//! The jump host exposes no structured channel back to us, so login and
//! health-check progress are inferred purely from the text the shell prints.
//! Each complete output line is run through three independent rules:
//!
//! 1. **Menu detection**: a line containing [`MENU_MARKER`] puts the session
//!    back at the jump menu.
//! 2. **Shell detection**: while at the menu, a line containing a shell
//!    prompt character (`$` or `#`) means a server shell was reached. The rule
//!    is only evaluated from the menu state, so it cannot re-fire while
//!    already in a shell.
//! 3. **Health probe**: while a health check is in progress, each line
//!    containing [`PROBE_SUCCESS_TEXT`] advances the check counter; reaching
//!    [`CHECK_THRESHOLD`] confirms the check.
//!
//! The rules are not mutually exclusive within a line.

use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tracing::info;

/// Substring printed by the jump host's selection menu prompt.
pub const MENU_MARKER: &str = "Opt>";

/// Characters that mark a typical shell prompt.
pub const SHELL_PROMPT_CHARS: [char; 2] = ['$', '#'];

/// Status text of a successful probe response.
pub const PROBE_SUCCESS_TEXT: &str = "HTTP/1.1 200";

/// Number of successful probes required to confirm a health check.
pub const CHECK_THRESHOLD: u32 = 2;

/// Notice published when a health check is confirmed.
pub const CHECK_SUCCESS_NOTICE: &str = "health check succeeded";

/// Where the remote shell currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    /// At the jump host menu, or not yet known to be in a shell.
    Menu,
    /// Logged into a server shell behind the jump host.
    Shell,
}

impl LoginState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LoginState::Shell,
            _ => LoginState::Menu,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            LoginState::Menu => 0,
            LoginState::Shell => 1,
        }
    }
}

impl std::fmt::Display for LoginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoginState::Menu => write!(f, "menu"),
            LoginState::Shell => write!(f, "shell"),
        }
    }
}

/// Progress of the health check on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// No check in progress.
    Idle,
    /// A check is in progress and probes are being counted.
    Checking,
    /// Enough successful probes were seen.
    Confirmed,
}

impl HealthState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => HealthState::Checking,
            2 => HealthState::Confirmed,
            _ => HealthState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            HealthState::Idle => 0,
            HealthState::Checking => 1,
            HealthState::Confirmed => 2,
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Idle => write!(f, "idle"),
            HealthState::Checking => write!(f, "checking"),
            HealthState::Confirmed => write!(f, "confirmed"),
        }
    }
}

/// Apply the login rules (1 and 2) to a single line.
pub fn next_login_state(current: LoginState, line: &str) -> LoginState {
    let mut state = current;
    if line.contains(MENU_MARKER) {
        state = LoginState::Menu;
    }
    if state == LoginState::Menu && line.contains(SHELL_PROMPT_CHARS) {
        state = LoginState::Shell;
    }
    state
}

/// Whether a line reports a successful probe response.
pub fn is_probe_success(line: &str) -> bool {
    line.contains(PROBE_SUCCESS_TEXT)
}

/// What observing a line changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Observation {
    /// The login state changed on this line.
    pub login_changed: bool,
    /// This line pushed the health check from checking to confirmed.
    pub health_confirmed: bool,
}

/// Shared session flags.
///
/// Written only by the classifier (plus the resets performed when a health
/// check starts or gives up) and read concurrently by script loops, so every field is a
/// single-word atomic.
#[derive(Debug)]
pub struct SessionFlags {
    login: AtomicU8,
    health: AtomicU8,
    check_count: AtomicU32,
    confirmed: Notify,
}

impl SessionFlags {
    pub fn new() -> Self {
        Self {
            login: AtomicU8::new(LoginState::Menu.as_u8()),
            health: AtomicU8::new(HealthState::Idle.as_u8()),
            check_count: AtomicU32::new(0),
            confirmed: Notify::new(),
        }
    }

    pub fn login_state(&self) -> LoginState {
        LoginState::from_u8(self.login.load(Ordering::SeqCst))
    }

    pub fn health_state(&self) -> HealthState {
        HealthState::from_u8(self.health.load(Ordering::SeqCst))
    }

    pub fn check_count(&self) -> u32 {
        self.check_count.load(Ordering::SeqCst)
    }

    /// Force the login state. Used when a caller knows better than the output.
    pub fn set_login_state(&self, state: LoginState) {
        self.login.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Start counting probes for a fresh health check.
    pub(crate) fn begin_check(&self) {
        self.check_count.store(0, Ordering::SeqCst);
        self.health
            .store(HealthState::Checking.as_u8(), Ordering::SeqCst);
    }

    /// Stop an unconfirmed check so later output is no longer counted.
    ///
    /// A check that already reached `Confirmed` keeps that state.
    pub(crate) fn end_check(&self) {
        if self
            .health
            .compare_exchange(
                HealthState::Checking.as_u8(),
                HealthState::Idle.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            self.check_count.store(0, Ordering::SeqCst);
        }
    }

    /// Future resolving on the next confirmation.
    ///
    /// Only waiters registered when the confirmation happens are woken, so
    /// call `enable` on the pinned future before sending probes and re-check
    /// [`SessionFlags::health_state`] afterwards.
    pub(crate) fn confirmation(&self) -> Notified<'_> {
        self.confirmed.notified()
    }

    /// Apply the login rules to an unterminated prompt such as `root$ `.
    ///
    /// Prompts are not followed by a newline, so the login state would
    /// otherwise lag until the next line arrives.
    pub fn observe_prompt(&self, fragment: &str) -> bool {
        let current = self.login_state();
        let next = next_login_state(current, fragment);
        if next != current {
            self.set_login_state(next);
            return true;
        }
        false
    }

    /// Run all classification rules against one complete line.
    pub fn observe(&self, line: &str) -> Observation {
        let mut observation = Observation::default();

        let current = self.login_state();
        let next = next_login_state(current, line);
        if next != current {
            self.set_login_state(next);
            observation.login_changed = true;
        }

        if self.health_state() == HealthState::Checking && is_probe_success(line) {
            let count = self.check_count.fetch_add(1, Ordering::SeqCst) + 1;
            info!("Health probe succeeded ({}/{})", count, CHECK_THRESHOLD);
            if count >= CHECK_THRESHOLD
                && self
                    .health
                    .compare_exchange(
                        HealthState::Checking.as_u8(),
                        HealthState::Confirmed.as_u8(),
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok()
            {
                observation.health_confirmed = true;
                self.confirmed.notify_waiters();
            }
        }

        observation
    }
}

impl Default for SessionFlags {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod login_rules {
        use super::*;

        #[test]
        fn test_menu_then_prompt_reaches_shell() {
            let mut state = LoginState::Menu;
            state = next_login_state(state, "[Host]> Opt>");
            assert_eq!(state, LoginState::Menu);
            state = next_login_state(state, "[root@web-01 ~]# ");
            assert_eq!(state, LoginState::Shell);
        }

        #[test]
        fn test_prompt_alone_from_menu_reaches_shell() {
            assert_eq!(
                next_login_state(LoginState::Menu, "deploy@app$ "),
                LoginState::Shell
            );
        }

        #[test]
        fn test_menu_marker_resets_from_shell() {
            assert_eq!(
                next_login_state(LoginState::Shell, "Opt> "),
                LoginState::Menu
            );
        }

        #[test]
        fn test_plain_output_keeps_state() {
            assert_eq!(
                next_login_state(LoginState::Shell, "total 48"),
                LoginState::Shell
            );
            assert_eq!(
                next_login_state(LoginState::Menu, "Welcome to the jump server"),
                LoginState::Menu
            );
        }

        #[test]
        fn test_marker_and_prompt_on_same_line() {
            // Rule 1 fires, then rule 2 sees the menu state and fires too.
            assert_eq!(
                next_login_state(LoginState::Shell, "Opt> $"),
                LoginState::Shell
            );
        }
    }

    mod session_flags {
        use super::*;

        #[test]
        fn test_initial_state() {
            let flags = SessionFlags::new();
            assert_eq!(flags.login_state(), LoginState::Menu);
            assert_eq!(flags.health_state(), HealthState::Idle);
            assert_eq!(flags.check_count(), 0);
        }

        #[test]
        fn test_observe_reports_login_edge_once() {
            let flags = SessionFlags::new();
            assert!(flags.observe("root$ ").login_changed);
            assert!(!flags.observe("root$ ls").login_changed);
            assert_eq!(flags.login_state(), LoginState::Shell);
            assert!(flags.observe("Opt>").login_changed);
            assert_eq!(flags.login_state(), LoginState::Menu);
        }

        #[test]
        fn test_probe_ignored_without_target() {
            let flags = SessionFlags::new();
            flags.observe("HTTP/1.1 200 OK");
            flags.observe("HTTP/1.1 200 OK");
            assert_eq!(flags.health_state(), HealthState::Idle);
            assert_eq!(flags.check_count(), 0);
        }

        #[test]
        fn test_one_probe_leaves_checking() {
            let flags = SessionFlags::new();
            flags.begin_check();
            let observation = flags.observe("HTTP/1.1 200 OK");
            assert!(!observation.health_confirmed);
            assert_eq!(flags.health_state(), HealthState::Checking);
            assert_eq!(flags.check_count(), 1);
        }

        #[test]
        fn test_two_probes_confirm() {
            let flags = SessionFlags::new();
            flags.begin_check();
            assert!(!flags.observe("HTTP/1.1 200 OK").health_confirmed);
            assert!(flags.observe("HTTP/1.1 200 OK").health_confirmed);
            assert_eq!(flags.health_state(), HealthState::Confirmed);
        }

        #[test]
        fn test_third_probe_does_not_change_state() {
            let flags = SessionFlags::new();
            flags.begin_check();
            flags.observe("HTTP/1.1 200 OK");
            flags.observe("HTTP/1.1 200 OK");
            let observation = flags.observe("HTTP/1.1 200 OK");
            assert!(!observation.health_confirmed);
            assert_eq!(flags.health_state(), HealthState::Confirmed);
            assert_eq!(flags.check_count(), CHECK_THRESHOLD);
        }

        #[test]
        fn test_non_200_status_not_counted() {
            let flags = SessionFlags::new();
            flags.begin_check();
            flags.observe("HTTP/1.1 503 Service Unavailable");
            flags.observe("HTTP/1.1 404 Not Found");
            assert_eq!(flags.check_count(), 0);
        }

        #[test]
        fn test_begin_check_resets_counter() {
            let flags = SessionFlags::new();
            flags.begin_check();
            flags.observe("HTTP/1.1 200 OK");
            flags.observe("HTTP/1.1 200 OK");
            flags.begin_check();
            assert_eq!(flags.check_count(), 0);
            assert_eq!(flags.health_state(), HealthState::Checking);
        }

        #[tokio::test]
        async fn test_confirmation_wakes_waiter() {
            let flags = SessionFlags::new();
            flags.begin_check();
            let waiter = flags.confirmation();
            tokio::pin!(waiter);
            waiter.as_mut().enable();
            flags.observe("HTTP/1.1 200 OK");
            flags.observe("HTTP/1.1 200 OK");
            tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
                .await
                .expect("waiter woken");
        }

        #[tokio::test]
        async fn test_earlier_confirmation_leaves_no_wakeup() {
            let flags = SessionFlags::new();
            flags.begin_check();
            flags.observe("HTTP/1.1 200 OK");
            flags.observe("HTTP/1.1 200 OK");
            assert_eq!(flags.health_state(), HealthState::Confirmed);

            flags.begin_check();
            let waiter = flags.confirmation();
            tokio::pin!(waiter);
            waiter.as_mut().enable();
            let woken =
                tokio::time::timeout(std::time::Duration::from_millis(50), waiter).await;
            assert!(woken.is_err());
        }

        #[test]
        fn test_end_check_stops_counting() {
            let flags = SessionFlags::new();
            flags.begin_check();
            flags.observe("HTTP/1.1 200 OK");
            flags.end_check();
            assert_eq!(flags.health_state(), HealthState::Idle);
            assert_eq!(flags.check_count(), 0);

            let first = flags.observe("HTTP/1.1 200 OK");
            let second = flags.observe("HTTP/1.1 200 OK");
            assert!(!first.health_confirmed && !second.health_confirmed);
            assert_eq!(flags.health_state(), HealthState::Idle);
        }

        #[test]
        fn test_end_check_keeps_confirmation() {
            let flags = SessionFlags::new();
            flags.begin_check();
            flags.observe("HTTP/1.1 200 OK");
            flags.observe("HTTP/1.1 200 OK");
            flags.end_check();
            assert_eq!(flags.health_state(), HealthState::Confirmed);
            assert_eq!(flags.check_count(), CHECK_THRESHOLD);
        }

        #[test]
        fn test_prompt_fragment_changes_login_only() {
            let flags = SessionFlags::new();
            flags.begin_check();
            assert!(flags.observe_prompt("root$ "));
            assert_eq!(flags.login_state(), LoginState::Shell);
            assert!(!flags.observe_prompt("HTTP/1.1 200 OK $"));
            assert_eq!(flags.check_count(), 0);
        }
    }
}
