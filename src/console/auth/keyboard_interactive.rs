//! Keyboard-interactive authentication.
//!
//! Every prompt the jump host sends is shown to the console client. Echoed
//! prompts (MFA codes, menu questions) are answered with the next line the
//! client submits; hidden prompts are answered with the account password.

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, KeyboardInteractiveAuthResponse};
use tracing::{debug, info};

use crate::console::adapter::{InboundReader, Outbox};
use crate::console::client::JumpHostHandler;

use super::traits::AuthStrategy;

/// Upper bound on challenge rounds before giving up.
pub const MAX_ROUNDS: usize = 8;

/// Answers keyboard-interactive prompts.
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn answer(&self, prompt: &str, echo: bool) -> Result<String, String>;
}

/// Prompter backed by a console session's queues.
pub struct SessionPrompter {
    outbox: Outbox,
    reader: InboundReader,
    password: String,
}

impl SessionPrompter {
    pub fn new(outbox: Outbox, reader: InboundReader, password: impl Into<String>) -> Self {
        Self {
            outbox,
            reader,
            password: password.into(),
        }
    }
}

#[async_trait]
impl Prompter for SessionPrompter {
    async fn answer(&self, prompt: &str, echo: bool) -> Result<String, String> {
        info!("Jump host prompt: {}", prompt);
        self.outbox.publish(prompt).await;
        if !echo {
            return Ok(self.password.clone());
        }
        self.reader
            .next_line()
            .await
            .ok_or_else(|| "console closed before the prompt was answered".to_string())
    }
}

/// Answer prompts in order.
pub(crate) async fn answer_all(
    prompter: &dyn Prompter,
    prompts: &[(String, bool)],
) -> Result<Vec<String>, String> {
    let mut answers = Vec::with_capacity(prompts.len());
    for (prompt, echo) in prompts {
        answers.push(prompter.answer(prompt, *echo).await?);
    }
    Ok(answers)
}

pub struct KeyboardInteractiveAuth {
    prompter: Arc<dyn Prompter>,
}

impl KeyboardInteractiveAuth {
    pub fn new(prompter: Arc<dyn Prompter>) -> Self {
        Self { prompter }
    }
}

#[async_trait]
impl AuthStrategy for KeyboardInteractiveAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<JumpHostHandler>,
        username: &str,
    ) -> Result<bool, String> {
        let mut response = handle
            .authenticate_keyboard_interactive_start(username, None::<String>)
            .await
            .map_err(|e| format!("Keyboard-interactive authentication failed: {}", e))?;

        for round in 0..MAX_ROUNDS {
            match response {
                KeyboardInteractiveAuthResponse::Success => return Ok(true),
                KeyboardInteractiveAuthResponse::Failure { .. } => return Ok(false),
                KeyboardInteractiveAuthResponse::InfoRequest {
                    name,
                    instructions,
                    prompts,
                } => {
                    debug!(
                        "Keyboard-interactive round {}: {:?} {:?} ({} prompt(s))",
                        round,
                        name,
                        instructions,
                        prompts.len()
                    );
                    let questions: Vec<(String, bool)> =
                        prompts.into_iter().map(|p| (p.prompt, p.echo)).collect();
                    let answers = answer_all(self.prompter.as_ref(), &questions).await?;
                    response = handle
                        .authenticate_keyboard_interactive_respond(answers)
                        .await
                        .map_err(|e| format!("Keyboard-interactive response failed: {}", e))?;
                }
            }
        }

        Err(format!(
            "Keyboard-interactive authentication gave up after {} rounds",
            MAX_ROUNDS
        ))
    }

    fn name(&self) -> &'static str {
        "keyboard-interactive"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::adapter::{OutboundMessage, inbound_queue, outbound_queue};

    #[tokio::test]
    async fn test_echoed_prompt_answered_from_client() {
        let (outbox, mut rx) = outbound_queue(8);
        let (sender, reader) = inbound_queue();
        let prompter = SessionPrompter::new(outbox, reader, "hunter2");

        sender.send("123456").unwrap();
        let answer = prompter.answer("MFA code: ", true).await.unwrap();

        assert_eq!(answer, "123456");
        assert_eq!(
            rx.recv().await,
            Some(OutboundMessage::Line("MFA code: ".to_string()))
        );
    }

    #[tokio::test]
    async fn test_hidden_prompt_answered_with_password() {
        let (outbox, _rx) = outbound_queue(8);
        let (_sender, reader) = inbound_queue();
        let prompter = SessionPrompter::new(outbox, reader, "hunter2");
        assert_eq!(prompter.answer("Password: ", false).await.unwrap(), "hunter2");
    }

    #[tokio::test]
    async fn test_closed_console_fails_prompt() {
        let (outbox, _rx) = outbound_queue(8);
        let (sender, reader) = inbound_queue();
        let prompter = SessionPrompter::new(outbox, reader, "hunter2");
        sender.close();
        assert!(prompter.answer("MFA code: ", true).await.is_err());
    }

    #[tokio::test]
    async fn test_answer_all_keeps_order() {
        let (outbox, mut rx) = outbound_queue(8);
        let (sender, reader) = inbound_queue();
        let prompter = SessionPrompter::new(outbox, reader, "hunter2");
        sender.send("654321").unwrap();

        let prompts = vec![
            ("Password: ".to_string(), false),
            ("OTP: ".to_string(), true),
        ];
        let answers = answer_all(&prompter, &prompts).await.unwrap();
        assert_eq!(answers, vec!["hunter2", "654321"]);

        assert_eq!(
            rx.recv().await,
            Some(OutboundMessage::Line("Password: ".to_string()))
        );
        assert_eq!(
            rx.recv().await,
            Some(OutboundMessage::Line("OTP: ".to_string()))
        );
    }

    #[test]
    fn test_strategy_name() {
        let (outbox, _rx) = outbound_queue(1);
        let (_sender, reader) = inbound_queue();
        let auth =
            KeyboardInteractiveAuth::new(Arc::new(SessionPrompter::new(outbox, reader, "pw")));
        assert_eq!(auth.name(), "keyboard-interactive");
    }
}
