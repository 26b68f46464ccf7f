//! Transport layer for MCP communication
//!
//! Provides transport abstractions for MCP communication with support for:
//! - SSE (Server-Sent Events) transport
//! - Streamable HTTP transport
//! - Auto-detection between the two

use async_trait::async_trait;
use bridge_core::{BridgeError, Result};
use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;
use tracing::info;

use crate::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

pub mod sse;
pub mod streamable_http;

pub use sse::SseTransport;
pub use streamable_http::StreamableHttpTransport;

/// Transport trait for MCP communication
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Perform the MCP initialization handshake
    async fn initialize(&mut self) -> Result<()>;

    /// Send a JSON-RPC request and wait for the correlated response
    async fn request(&mut self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send a JSON-RPC notification (no response expected)
    async fn notify(&mut self, notification: JsonRpcNotification) -> Result<()>;

    /// Close the transport connection
    async fn close(&mut self) -> Result<()>;
}

/// Transport selection for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    Sse,
    StreamableHttp,
    #[default]
    AutoDetect,
}

impl std::str::FromStr for TransportKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sse" => Ok(TransportKind::Sse),
            "streamable-http" | "streamable_http" => Ok(TransportKind::StreamableHttp),
            "auto" | "auto-detect" | "auto_detect" => Ok(TransportKind::AutoDetect),
            other => Err(BridgeError::InvalidParams(format!(
                "Unsupported transport type: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportKind::Sse => "sse",
            TransportKind::StreamableHttp => "streamable-http",
            TransportKind::AutoDetect => "auto",
        };
        f.write_str(s)
    }
}

/// Per-call connection parameters
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// MCP server URL
    pub url: String,

    /// Extra HTTP headers sent on every request
    pub headers: HashMap<String, String>,

    /// Request timeout
    pub timeout: Duration,

    /// Read timeout for long-lived SSE streams
    pub sse_read_timeout: Duration,

    /// Maximum SSE reconnect attempts
    pub max_retries: u32,

    /// Delay between SSE reconnect attempts
    pub retry_interval: Duration,
}

impl ConnectOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            timeout: Duration::from_secs(60),
            sse_read_timeout: Duration::from_secs(300),
            max_retries: 3,
            retry_interval: Duration::from_secs(2),
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_sse_read_timeout(mut self, sse_read_timeout: Duration) -> Self {
        self.sse_read_timeout = sse_read_timeout;
        self
    }
}

/// Create a transport for the given kind, auto-detecting when requested
///
/// Auto-detection probes the server with a Streamable HTTP `initialize`
/// request and falls back to SSE when the probe fails.
pub async fn create_transport(
    kind: TransportKind,
    options: &ConnectOptions,
) -> Result<Box<dyn Transport>> {
    match kind {
        TransportKind::Sse => {
            let transport = SseTransport::connect(options).await?;
            Ok(Box::new(transport))
        }
        TransportKind::StreamableHttp => {
            let transport = StreamableHttpTransport::new(options)?;
            Ok(Box::new(transport))
        }
        TransportKind::AutoDetect => {
            info!("Auto-detecting transport type for: {}", options.url);
            match StreamableHttpTransport::new(options) {
                Ok(mut transport) => match transport.pre_initialize().await {
                    Ok(()) => return Ok(Box::new(transport)),
                    Err(e) => info!("Streamable HTTP detection failed: {e}"),
                },
                Err(e) => info!("Streamable HTTP detection failed: {e}"),
            }

            info!("Falling back to SSE transport");
            let transport = SseTransport::connect(options).await?;
            Ok(Box::new(transport))
        }
    }
}

/// Build an HTTP header map from string pairs, resolving env placeholders
pub(crate) fn build_header_map(
    headers: &HashMap<String, String>,
) -> Result<reqwest::header::HeaderMap> {
    let mut map = reqwest::header::HeaderMap::new();
    for (key, value) in headers {
        let resolved = resolve_env_value(value);

        let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| BridgeError::InvalidParams(format!("Invalid header name '{key}': {e}")))?;
        let value = reqwest::header::HeaderValue::from_str(&resolved).map_err(|e| {
            BridgeError::InvalidParams(format!("Invalid header value for '{key}': {e}"))
        })?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Resolve `${VAR}` and `${VAR:-default}` placeholders in header values
pub(crate) fn resolve_env_value(value: &str) -> String {
    if value.starts_with("${") && value.ends_with('}') {
        let inner = &value[2..value.len() - 1];

        if let Some((var_name, default)) = inner.split_once(":-") {
            std::env::var(var_name).unwrap_or_else(|_| default.to_string())
        } else {
            std::env::var(inner).unwrap_or_else(|_| value.to_string())
        }
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_parsing() {
        assert_eq!("sse".parse::<TransportKind>().unwrap(), TransportKind::Sse);
        assert_eq!(
            "streamable-http".parse::<TransportKind>().unwrap(),
            TransportKind::StreamableHttp
        );
        assert_eq!(
            "streamable_http".parse::<TransportKind>().unwrap(),
            TransportKind::StreamableHttp
        );
        assert_eq!(
            "auto".parse::<TransportKind>().unwrap(),
            TransportKind::AutoDetect
        );
        assert!("websocket".parse::<TransportKind>().is_err());
    }

    #[test]
    fn test_connect_options_defaults() {
        let options = ConnectOptions::new("http://localhost:8080/sse");
        assert_eq!(options.timeout, Duration::from_secs(60));
        assert_eq!(options.sse_read_timeout, Duration::from_secs(300));
        assert_eq!(options.max_retries, 3);
        assert_eq!(options.retry_interval, Duration::from_secs(2));
        assert!(options.headers.is_empty());
    }

    #[test]
    fn test_resolve_env_value() {
        std::env::set_var("BRIDGE_TEST_TOKEN", "secret");
        assert_eq!(resolve_env_value("${BRIDGE_TEST_TOKEN}"), "secret");
        assert_eq!(resolve_env_value("${BRIDGE_TEST_MISSING:-fallback}"), "fallback");
        assert_eq!(
            resolve_env_value("${BRIDGE_TEST_MISSING}"),
            "${BRIDGE_TEST_MISSING}"
        );
        assert_eq!(resolve_env_value("Bearer abc"), "Bearer abc");
    }

    #[test]
    fn test_build_header_map() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer token123".to_string());

        let map = build_header_map(&headers).unwrap();
        assert_eq!(map.get("authorization").unwrap(), "Bearer token123");
    }

    #[test]
    fn test_build_header_map_rejects_invalid_name() {
        let mut headers = HashMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        assert!(build_header_map(&headers).is_err());
    }
}
