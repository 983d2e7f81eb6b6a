//! Jump host connection, interactive shell and upload over russh.
//!
//! The same connection type also serves scripts run straight against a
//! server ([`connect_server`]): password only, one exec channel per command.
//!
//! ## Connection Lifecycle
//!
//! 1. **Address Parsing**: `host:port`, or `host` with the default port 22.
//! 2. **Client Configuration**: keepalives, optional zlib compression and no
//!    inactivity timeout, since consoles stay open until closed.
//! 3. **Connection Establishment**: TCP connect bounded by the connect timeout.
//! 4. **Authentication**: password, then keyboard-interactive. Prompts from
//!    the jump host are relayed to the console client through the session.
//!
//! Connection failures are reported to the caller and never retried.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::{ChannelMsg, Disconnect, client, keys};
use tracing::{debug, info, warn};

use super::adapter::{InboundReader, LineBuffer, Outbox, OutputWriter, ReadOutcome};
use super::auth::{AuthChain, AuthStrategy, SessionPrompter};
use super::error::ConsoleError;
use super::session::Session;
use super::shell::{CommandExecutor, PtyConfig, RemoteShell};

/// Read buffer size for shell input.
const INPUT_BUFFER_SIZE: usize = 4096;

/// russh handler that accepts every host key.
///
/// Jump hosts are reached by address chosen by the operator; there is no
/// known_hosts file to check against.
pub struct JumpHostHandler;

impl client::Handler for JumpHostHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Where and how to reach a jump host.
#[derive(Debug, Clone)]
pub struct JumpTarget {
    /// `host:port` or `host`
    pub address: String,
    pub username: String,
    pub password: String,
}

/// Connection settings, usually resolved from the environment.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub timeout: Duration,
    pub compress: bool,
    pub pty: PtyConfig,
}

/// Build the russh client configuration.
pub(crate) fn build_client_config(compress: bool) -> Arc<client::Config> {
    let compression = if compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        preferred,
        ..Default::default()
    })
}

/// Split an address into host and port, defaulting to port 22.
///
/// Splits on the last `:` so bracketed IPv6 addresses keep their colons.
pub(crate) fn parse_address(address: &str) -> Result<(String, u16), ConsoleError> {
    match address.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|e| ConsoleError::Connect(format!("Invalid port number: {}", e)))?;
            Ok((host.to_string(), port))
        }
        None => Ok((address.to_string(), 22)),
    }
}

/// Open the TCP connection and SSH transport, bounded by the connect timeout.
async fn open_transport(
    target: &JumpTarget,
    config: &ConnectConfig,
) -> Result<(client::Handle<JumpHostHandler>, String), ConsoleError> {
    let (host, port) = parse_address(&target.address)?;
    info!(
        "Connecting to {}@{}:{} (timeout {:?}, compress={})",
        target.username, host, port, config.timeout, config.compress
    );

    let connect_future = client::connect(
        build_client_config(config.compress),
        (host.as_str(), port),
        JumpHostHandler,
    );
    let handle = tokio::time::timeout(config.timeout, connect_future)
        .await
        .map_err(|_| {
            ConsoleError::Connect(format!("Connection timed out after {:?}", config.timeout))
        })?
        .map_err(|e| ConsoleError::Connect(e.to_string()))?;

    Ok((handle, format!("{}@{}:{}", target.username, host, port)))
}

async fn authenticate(
    handle: &mut client::Handle<JumpHostHandler>,
    chain: AuthChain,
    username: &str,
) -> Result<(), ConsoleError> {
    let authenticated = chain
        .authenticate(handle, username)
        .await
        .map_err(ConsoleError::Auth)?;
    if !authenticated {
        return Err(ConsoleError::Auth(
            "no authentication methods succeeded".to_string(),
        ));
    }
    Ok(())
}

/// Connect and authenticate to a jump host on behalf of a session.
///
/// Keyboard-interactive prompts are published on the session's outbound
/// queue and answered from its inbound queue, so the session must already be
/// wired to a client.
pub async fn connect_jump_host(
    target: &JumpTarget,
    session: &Session,
    config: &ConnectConfig,
) -> Result<JumpHost, ConsoleError> {
    let (mut handle, description) = open_transport(target, config).await?;

    let prompter = Arc::new(SessionPrompter::new(
        session.outbox().clone(),
        session.reader(),
        target.password.clone(),
    ));
    let chain = AuthChain::new()
        .with_password(target.password.clone())
        .with_keyboard_interactive(prompter);
    authenticate(&mut handle, chain, &target.username).await?;

    info!("Authenticated to jump host {}", description);
    Ok(JumpHost {
        handle,
        pty: config.pty.clone(),
        description,
    })
}

/// Connect to a server directly with its password, for exec-only runs.
pub async fn connect_server(
    target: &JumpTarget,
    config: &ConnectConfig,
) -> Result<JumpHost, ConsoleError> {
    let (mut handle, description) = open_transport(target, config).await?;
    let chain = AuthChain::new().with_password(target.password.clone());
    authenticate(&mut handle, chain, &target.username).await?;

    info!("Authenticated to server {}", description);
    Ok(JumpHost {
        handle,
        pty: config.pty.clone(),
        description,
    })
}

/// [`connect_server`] with owned arguments, as a shared executor.
pub async fn connect_executor(
    target: JumpTarget,
    config: ConnectConfig,
) -> Result<Arc<dyn CommandExecutor>, ConsoleError> {
    let server = connect_server(&target, &config).await?;
    Ok(Arc::new(server))
}

/// An authenticated SSH connection to a jump host or a server.
pub struct JumpHost {
    handle: client::Handle<JumpHostHandler>,
    pty: PtyConfig,
    description: String,
}

impl JumpHost {
    async fn disconnect(&self) -> Result<(), ConsoleError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "console closed", "en")
            .await
            .map_err(ConsoleError::from)
    }

    /// Run one command on a fresh exec channel, feeding it `stdin`.
    async fn exec_with_input(&self, command: &str, stdin: &[u8]) -> Result<(), ConsoleError> {
        let mut channel = self.handle.channel_open_session().await?;
        channel.exec(true, command).await?;
        if !stdin.is_empty() {
            channel.data(stdin).await?;
        }
        channel.eof().await?;

        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                ChannelMsg::ExtendedData { data, ext: 1 } => {
                    warn!(
                        "{}: {}",
                        command,
                        String::from_utf8_lossy(&data).trim_end()
                    );
                }
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        match exit_status {
            Some(0) | None => Ok(()),
            Some(code) => Err(ConsoleError::Upload(format!(
                "`{}` exited with status {}",
                command, code
            ))),
        }
    }
}

fn quote(path: &str) -> Result<String, ConsoleError> {
    shlex::try_quote(path)
        .map(|quoted| quoted.into_owned())
        .map_err(|e| ConsoleError::Upload(format!("cannot quote {:?}: {}", path, e)))
}

/// Join a remote directory and a child name with exactly one `/`.
fn remote_join(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

#[async_trait]
impl RemoteShell for JumpHost {
    async fn run(
        &self,
        mut input: InboundReader,
        mut output: OutputWriter,
    ) -> Result<(), ConsoleError> {
        let mut channel = self.handle.channel_open_session().await?;
        channel.set_env(false, "LANG", self.pty.lang.as_str()).await?;
        channel
            .request_pty(
                false,
                &self.pty.term,
                self.pty.columns,
                self.pty.rows,
                0,
                0,
                &self.pty.terminal_modes(),
            )
            .await?;
        channel.request_shell(true).await?;
        info!("Interactive shell started on {}", self.description);

        let mut buf = vec![0u8; INPUT_BUFFER_SIZE];
        loop {
            tokio::select! {
                read = input.read(&mut buf) => {
                    match read {
                        ReadOutcome::Data(n) => channel.data(&buf[..n]).await?,
                        ReadOutcome::Idle => {}
                        ReadOutcome::Eof => {
                            debug!("Input closed for {}, sending EOF", self.description);
                            channel.eof().await?;
                            break;
                        }
                    }
                }
                msg = channel.wait() => {
                    match msg {
                        Some(ChannelMsg::Data { data }) => {
                            output.write(&data).await;
                        }
                        Some(ChannelMsg::ExtendedData { data, .. }) => {
                            output.write(&data).await;
                        }
                        Some(ChannelMsg::ExitStatus { exit_status }) => {
                            info!("Shell on {} exited with status {}", self.description, exit_status);
                        }
                        Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                        Some(_) => {}
                    }
                }
            }
        }

        output.finish().await;
        Ok(())
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), ConsoleError> {
        info!(
            "Uploading {} to {}:{}",
            local.display(),
            self.description,
            remote
        );
        let mut pending: Vec<(PathBuf, String)> = vec![(local.to_path_buf(), remote.to_string())];

        while let Some((local_path, remote_path)) = pending.pop() {
            let metadata = tokio::fs::metadata(&local_path).await?;
            if metadata.is_dir() {
                self.exec_with_input(&format!("mkdir -p {}", quote(&remote_path)?), &[])
                    .await?;
                let mut entries = tokio::fs::read_dir(&local_path).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    pending.push((entry.path(), remote_join(&remote_path, &name)));
                }
            } else {
                let contents = tokio::fs::read(&local_path).await?;
                self.exec_with_input(&format!("cat > {}", quote(&remote_path)?), &contents)
                    .await?;
                debug!(
                    "Uploaded {} ({} bytes) to {}",
                    local_path.display(),
                    contents.len(),
                    remote_path
                );
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), ConsoleError> {
        self.disconnect().await
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

#[async_trait]
impl CommandExecutor for JumpHost {
    async fn exec(&self, command: &str, outbox: &Outbox) -> Result<Option<u32>, ConsoleError> {
        let mut channel = self.handle.channel_open_session().await?;
        channel.exec(true, command).await?;
        channel.eof().await?;
        debug!("Exec on {}: {}", self.description, command);

        let mut stdout = LineBuffer::new();
        let mut stderr = LineBuffer::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => {
                    for line in stdout.push(&data) {
                        outbox.publish(line).await;
                    }
                }
                ChannelMsg::ExtendedData { data, .. } => {
                    for line in stderr.push(&data) {
                        outbox.publish(line).await;
                    }
                }
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        for rest in [stdout.take_rest(), stderr.take_rest()].into_iter().flatten() {
            outbox.publish(rest).await;
        }
        Ok(exit_status)
    }

    async fn close(&self) -> Result<(), ConsoleError> {
        self.disconnect().await
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod address_parsing {
        use super::*;

        #[test]
        fn test_host_and_port() {
            let (host, port) = parse_address("jump.example.com:2222").unwrap();
            assert_eq!(host, "jump.example.com");
            assert_eq!(port, 2222);
        }

        #[test]
        fn test_default_port() {
            let (host, port) = parse_address("10.0.0.1").unwrap();
            assert_eq!(host, "10.0.0.1");
            assert_eq!(port, 22);
        }

        #[test]
        fn test_ipv6_with_port() {
            let (host, port) = parse_address("[::1]:22").unwrap();
            assert_eq!(host, "[::1]");
            assert_eq!(port, 22);
        }

        #[test]
        fn test_invalid_port() {
            assert!(matches!(
                parse_address("jump:ssh"),
                Err(ConsoleError::Connect(_))
            ));
            assert!(parse_address("jump:99999").is_err());
        }
    }

    mod client_config {
        use super::*;

        #[test]
        fn test_no_inactivity_timeout() {
            let config = build_client_config(true);
            assert!(config.inactivity_timeout.is_none());
            assert_eq!(config.keepalive_interval, Some(Duration::from_secs(30)));
            assert_eq!(config.keepalive_max, 3);
        }

        #[test]
        fn test_compression_preference() {
            let with = build_client_config(true);
            let without = build_client_config(false);
            assert_eq!(with.preferred.compression.len(), 2);
            assert_eq!(without.preferred.compression.len(), 1);
        }
    }

    mod upload_paths {
        use super::*;

        #[test]
        fn test_quote_plain_path() {
            assert_eq!(quote("/tmp/app.tar").unwrap(), "/tmp/app.tar");
        }

        #[test]
        fn test_quote_path_with_spaces() {
            assert_eq!(quote("/tmp/my app").unwrap(), "'/tmp/my app'");
        }

        #[test]
        fn test_quote_rejects_nul() {
            assert!(matches!(quote("/tmp/a\0b"), Err(ConsoleError::Upload(_))));
        }

        #[test]
        fn test_remote_join() {
            assert_eq!(remote_join("/srv/app/", "bin"), "/srv/app/bin");
            assert_eq!(remote_join("/srv/app", "bin"), "/srv/app/bin");
        }
    }
}
