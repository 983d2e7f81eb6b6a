#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::sync::Arc;

use dotenv::dotenv;
use jump_console::console::lb::UnconfiguredLoadBalancer;
use jump_console::console::store::JsonFileStore;
use jump_console::console::{McpConsoleCommands, resolve_store_path};
use poem_mcpserver::McpServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // stdout carries the MCP protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().expect("valid directive")),
        )
        .init();

    let store = Arc::new(JsonFileStore::open(resolve_store_path(None))?);
    let commands = McpConsoleCommands::new(store, Arc::new(UnconfiguredLoadBalancer));
    poem_mcpserver::stdio::stdio(McpServer::new().tools(commands)).await?;
    Ok(())
}
