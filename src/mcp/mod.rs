//! Model Context Protocol (MCP) interface
//!
//! Exposes token administration as MCP tools so an AI client can:
//! - List, add, update, validate and remove GitLab tokens
//! - Read and clear token notifications
//! - Inspect and write the project context that selects a token
//!
//! The server speaks newline-delimited JSON-RPC over stdio.

mod server;
mod types;

pub use server::McpServer;
pub use types::*;
