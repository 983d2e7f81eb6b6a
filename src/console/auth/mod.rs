//! Jump host authentication strategies.
//!
//! # Available Strategies
//!
//! - [`PasswordAuth`]: plain password authentication
//! - [`KeyboardInteractiveAuth`]: challenge/response, typically a password
//!   prompt followed by an MFA code typed by the console user
//!
//! [`AuthChain`] tries them in order and stops at the first success.

mod chain;
mod keyboard_interactive;
mod password;
mod traits;

pub use chain::AuthChain;
pub use keyboard_interactive::{KeyboardInteractiveAuth, Prompter, SessionPrompter};
pub use password::PasswordAuth;
pub use traits::AuthStrategy;
