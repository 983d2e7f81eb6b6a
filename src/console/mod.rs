//! Scripted remote console bridge.
//!
//! This module is organized into the following submodules:
//!
//! - `adapter`: inbound/outbound queues between a client and the remote shell
//! - `classifier`: login and health state inferred from shell output
//! - `session`: one console, its queues and its flags
//! - `pump`: outbound pump and shell task
//! - `script`: script parsing and the directive engine
//! - `health`: CHECK polling
//! - `client`, `auth`, `shell`: the russh jump host connection
//! - `transport`, `websocket`, `commands`: client surfaces
//! - `store`, `storage`, `runs`: durable scripts, open consoles, script runs
//! - `config`: configuration resolution with environment variable support

pub mod adapter;
pub(crate) mod auth;
pub mod classifier;
pub mod client;
pub mod commands;
pub(crate) mod config;
pub mod error;
pub mod health;
pub mod lb;
pub mod pump;
pub mod runs;
pub mod script;
pub mod session;
pub mod shell;
pub mod storage;
pub mod store;
pub mod transport;
pub mod types;
pub mod websocket;

pub use commands::McpConsoleCommands;
pub use config::{resolve_port, resolve_store_path};
pub use websocket::{CONSOLE_PATH, ConsoleState, console_ws};
