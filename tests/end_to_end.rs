//! Console sessions driven by scripts against a scripted jump host.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jump_console::console::adapter::{InboundReader, OutputWriter, ReadOutcome};
use jump_console::console::classifier::{CHECK_SUCCESS_NOTICE, HealthState, LoginState};
use jump_console::console::error::ConsoleError;
use jump_console::console::health::{CHECK_START_NOTICE, CheckTiming};
use jump_console::console::lb::UnconfiguredLoadBalancer;
use jump_console::console::pump;
use jump_console::console::runs::{self, RunState};
use jump_console::console::script::{ScriptEngine, ScriptOutcome, ScriptTiming};
use jump_console::console::session::Session;
use jump_console::console::shell::RemoteShell;
use jump_console::console::transport::BufferedSink;
use jump_console::console::types::ScriptRunStatus;
use tokio_util::sync::CancellationToken;

/// Jump host that answers like the real menu and shell.
///
/// - starts at the menu (`Opt>`)
/// - `root` enters a shell, `exit` returns to the menu
/// - `curl` probes succeed unless the URL contains `down`
#[derive(Default)]
struct FakeJumpHost {
    received: Mutex<Vec<String>>,
    closes: Mutex<usize>,
}

impl FakeJumpHost {
    fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    fn reply(line: &str) -> Option<String> {
        match line {
            "root" => Some("Last login: today\r\nroot$ ".to_string()),
            "exit" => Some("logout\r\nmenu Opt> ".to_string()),
            "ls -la" => Some("total 0\r\nroot$ ".to_string()),
            probe if probe.starts_with("curl ") && !probe.contains("down") => {
                Some("HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nroot$ ".to_string())
            }
            probe if probe.starts_with("curl ") => {
                Some("HTTP/1.1 503 Service Unavailable\r\nroot$ ".to_string())
            }
            _ => None,
        }
    }
}

#[async_trait]
impl RemoteShell for FakeJumpHost {
    async fn run(
        &self,
        mut input: InboundReader,
        mut output: OutputWriter,
    ) -> Result<(), ConsoleError> {
        output.write(b"Welcome to the jump host\r\nmenu Opt> ").await;

        let mut line = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            match input.read(&mut buf).await {
                ReadOutcome::Data(n) => {
                    line.extend_from_slice(&buf[..n]);
                    if line.last() != Some(&b'\n') {
                        continue;
                    }
                    let text = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
                    line.clear();
                    self.received.lock().unwrap().push(text.clone());
                    if let Some(reply) = Self::reply(&text) {
                        output.write(reply.as_bytes()).await;
                    }
                }
                ReadOutcome::Idle => {}
                ReadOutcome::Eof => break,
            }
        }
        output.finish().await;
        Ok(())
    }

    async fn upload(&self, _local: &Path, _remote: &str) -> Result<(), ConsoleError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), ConsoleError> {
        *self.closes.lock().unwrap() += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "ops@fake-jump:22".to_string()
    }
}

fn fast_timing() -> ScriptTiming {
    ScriptTiming {
        logout_interval: Duration::from_millis(20),
        check: CheckTiming {
            interval: Duration::from_millis(20),
            timeout: Some(Duration::from_secs(2)),
        },
    }
}

struct Console {
    session: Arc<Session>,
    host: Arc<FakeJumpHost>,
    output: Arc<BufferedSink>,
    pump: tokio::task::JoinHandle<usize>,
    shell: tokio::task::JoinHandle<()>,
}

fn open_console() -> Console {
    let (session, rx) = Session::new(100);
    let output = Arc::new(BufferedSink::new());
    let pump = pump::spawn_outbound(session.id().to_string(), rx, output.clone());
    let host = Arc::new(FakeJumpHost::default());
    let shell = session.attach(host.clone()).unwrap();
    Console {
        session,
        host,
        output,
        pump,
        shell,
    }
}

impl Console {
    /// Tear down and return every line the client received.
    async fn close(self) -> Vec<String> {
        self.session.teardown().await;
        tokio::time::timeout(Duration::from_secs(2), self.shell)
            .await
            .expect("shell task ends")
            .unwrap();
        self.pump.await.unwrap();
        self.output.drain(usize::MAX).await
    }
}

async fn wait_for_login(session: &Session, state: LoginState) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while session.login_state() != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("login state reached");
}

#[tokio::test]
async fn test_login_shell_and_check() {
    let console = open_console();
    let engine = ScriptEngine::new(
        console.session.clone(),
        Arc::new(UnconfiguredLoadBalancer),
        fast_timing(),
        CancellationToken::new(),
    );

    let outcome = engine
        .run("LOGIN root\nSHELL ls -la\n// probe it\nCHECK http://10.0.0.5/health")
        .await;
    assert_eq!(outcome, ScriptOutcome::Completed);

    wait_for_login(&console.session, LoginState::Shell).await;
    assert_eq!(console.session.health_state(), HealthState::Confirmed);
    assert!(console.session.check_count() >= 2);

    let received = console.host.received();
    assert_eq!(&received[..2], &["root".to_string(), "ls -la".to_string()]);
    assert!(received[2].starts_with("curl -I -m 10 -s http://10.0.0.5/health"));

    let lines = console.close().await;
    assert!(lines.contains(&"Welcome to the jump host".to_string()));
    let started = lines
        .iter()
        .position(|l| l.starts_with(CHECK_START_NOTICE))
        .expect("start notice");
    let succeeded = lines
        .iter()
        .position(|l| l == CHECK_SUCCESS_NOTICE)
        .expect("success notice");
    assert!(started < succeeded);
    assert_eq!(lines.iter().filter(|l| l.ends_with("total 0")).count(), 1);
}

#[tokio::test]
async fn test_logout_returns_to_menu() {
    let console = open_console();
    let engine = ScriptEngine::new(
        console.session.clone(),
        Arc::new(UnconfiguredLoadBalancer),
        fast_timing(),
        CancellationToken::new(),
    );

    engine.run("LOGIN root").await;
    wait_for_login(&console.session, LoginState::Shell).await;

    assert_eq!(engine.run("LOGOUT").await, ScriptOutcome::Completed);
    assert_eq!(console.session.login_state(), LoginState::Menu);
    assert!(console.host.received().contains(&"exit".to_string()));

    console.close().await;
}

#[tokio::test]
async fn test_failed_lb_apply_stops_script() {
    let console = open_console();
    let engine = ScriptEngine::new(
        console.session.clone(),
        Arc::new(UnconfiguredLoadBalancer),
        fast_timing(),
        CancellationToken::new(),
    );

    let outcome = engine.run("LB web-1 off\nSHELL ls -la").await;
    assert!(matches!(outcome, ScriptOutcome::Aborted(_)));

    let lines = console.close().await;
    assert!(lines.iter().any(|l| l.contains("web-1 off")));
    assert!(!lines.iter().any(|l| l.ends_with("total 0")));
}

#[tokio::test]
async fn test_unhealthy_check_times_out_and_script_continues() {
    let console = open_console();
    let mut timing = fast_timing();
    timing.check.timeout = Some(Duration::from_millis(100));
    let engine = ScriptEngine::new(
        console.session.clone(),
        Arc::new(UnconfiguredLoadBalancer),
        timing,
        CancellationToken::new(),
    );

    let outcome = engine
        .run("LOGIN root\nCHECK http://down.example/health\nSHELL ls -la")
        .await;
    assert_eq!(outcome, ScriptOutcome::Completed);
    assert_eq!(console.session.health_state(), HealthState::Idle);
    assert_eq!(console.session.check_count(), 0);

    tokio::time::timeout(Duration::from_secs(2), async {
        while !console.host.received().contains(&"ls -la".to_string()) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("command after the check is sent");

    let lines = console.close().await;
    assert!(
        lines
            .iter()
            .any(|l| l == "health check timed out: http://down.example/health")
    );
}

#[tokio::test]
async fn test_teardown_cancels_background_run() {
    let console = open_console();
    let mut timing = fast_timing();
    timing.check.timeout = None;

    let run = runs::spawn_script(
        console.session.clone(),
        Arc::new(UnconfiguredLoadBalancer),
        timing,
        "LOGIN root\nCHECK http://down.example/health".to_string(),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(run.is_running());

    let host = console.host.clone();
    console.close().await;

    let mut rx = run.state_rx.clone();
    let state: RunState = tokio::time::timeout(
        Duration::from_secs(2),
        rx.wait_for(|s| s.status != ScriptRunStatus::Running),
    )
    .await
    .expect("run stops")
    .unwrap()
    .clone();
    assert_eq!(state.status, ScriptRunStatus::Cancelled);
    assert_eq!(*host.closes.lock().unwrap(), 1);

    runs::cancel_session_runs(&run.session_id);
}
