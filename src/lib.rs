//! Jump host console bridge: websocket and MCP surfaces over russh shells,
//! driven interactively or by scripts.

pub mod console;
