#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::sync::Arc;

use dotenv::dotenv;
use jump_console::console::lb::{LoadBalancer, UnconfiguredLoadBalancer};
use jump_console::console::store::{JsonFileStore, KeyValueStore};
use jump_console::console::{
    CONSOLE_PATH, ConsoleState, McpConsoleCommands, console_ws, resolve_port, resolve_store_path,
};
use poem::{EndpointExt, Route, Server, get, listener::TcpListener, middleware::Tracing};
use poem_mcpserver::{McpServer, streamable_http};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Initialize logging with proper tracing default
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().expect("valid directive")),
        )
        .init();

    let store_path = resolve_store_path(None);
    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(store_path.clone())?);
    info!("Script store opened at {}", store_path.display());
    let lb: Arc<dyn LoadBalancer> = Arc::new(UnconfiguredLoadBalancer);

    let addr = format!("0.0.0.0:{}", resolve_port(None));
    info!("Starting console server on {}", addr);

    let mcp_store = store.clone();
    let mcp_lb = lb.clone();
    let app = Route::new()
        .at(
            "/",
            streamable_http::endpoint(move |_| {
                McpServer::new().tools(McpConsoleCommands::new(mcp_store.clone(), mcp_lb.clone()))
            }),
        )
        .at(CONSOLE_PATH, get(console_ws).data(ConsoleState { store, lb }))
        .with(Tracing);

    info!("MCP tools on /, websocket console on {}", CONSOLE_PATH);

    Server::new(TcpListener::bind(addr))
        .name("Jump Console")
        .run(app)
        .await?;

    Ok(())
}
