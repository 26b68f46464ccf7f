//! MCP (Model Context Protocol) client for remote servers
//!
//! Supports SSE and Streamable HTTP transports with auto-detection, and
//! exposes two stateless entry operations: [`ops::fetch_tools`] and
//! [`ops::execute_tool`]. All connection parameters are supplied per call.

pub mod client;
pub mod ops;
pub mod transport;
pub mod types;

pub use client::McpClient;
pub use ops::{execute_tool, fetch_tools, parse_arguments, parse_headers};
pub use transport::{ConnectOptions, Transport, TransportKind};
pub use types::{ContentItem, McpTool};
