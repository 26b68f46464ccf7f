//! Streamable HTTP transport for MCP servers
//!
//! Every message is a single POST to the server URL. The server may answer
//! with plain JSON or with a short SSE body, and may assign a session id
//! through the `Mcp-Session-Id` header which is replayed on later requests.

use async_trait::async_trait;
use bridge_core::{BridgeError, Result};
use tracing::{debug, warn};
use url::Url;

use super::{build_header_map, ConnectOptions, Transport};
use crate::types::{
    initialize_request, initialized_notification, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse,
};

const SESSION_ID_HEADER: &str = "Mcp-Session-Id";

/// Streamable HTTP transport for MCP servers
pub struct StreamableHttpTransport {
    /// HTTP client carrying the caller-supplied headers
    client: reqwest::Client,

    /// MCP endpoint URL
    url: Url,

    /// Session id assigned by the server, if any
    session_id: Option<String>,

    /// Whether the `initialize` request has already been sent
    pre_initialized: bool,
}

impl std::fmt::Debug for StreamableHttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableHttpTransport")
            .field("url", &self.url)
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl StreamableHttpTransport {
    /// Create a new Streamable HTTP transport
    pub fn new(options: &ConnectOptions) -> Result<Self> {
        let url = Url::parse(&options.url)
            .map_err(|e| BridgeError::InvalidParams(format!("Invalid server URL: {e}")))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(BridgeError::InvalidParams(
                "Server URL must start with http:// or https://".into(),
            ));
        }

        let client = reqwest::Client::builder()
            .default_headers(build_header_map(&options.headers)?)
            .timeout(options.timeout)
            .build()
            .map_err(|e| BridgeError::Connect(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url,
            session_id: None,
            pre_initialized: false,
        })
    }

    /// Send the `initialize` request once
    ///
    /// Also used as the auto-detection probe; a server that does not speak
    /// Streamable HTTP fails here and the caller falls back to SSE.
    pub async fn pre_initialize(&mut self) -> Result<()> {
        if self.pre_initialized {
            return Ok(());
        }

        let response = self.request(initialize_request(0)).await?;
        if let Some(error) = response.error {
            return Err(BridgeError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        self.pre_initialized = true;
        Ok(())
    }

    /// POST a message and parse whatever the server answers with
    async fn post_message(&mut self, json: String) -> Result<Option<JsonRpcResponse>> {
        debug!("Sending message to MCP endpoint {}: {json}", self.url);

        let mut request = self
            .client
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(
                reqwest::header::ACCEPT,
                "application/json, text/event-stream",
            );

        if let Some(session_id) = &self.session_id {
            request = request.header(SESSION_ID_HEADER, session_id);
        }

        let response = request
            .body(json)
            .send()
            .await
            .map_err(|e| BridgeError::Transport(format!("Failed to send HTTP request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::Transport(format!(
                "HTTP request failed with status {status}: {body}"
            )));
        }

        if let Some(session_id) = session_id_from_headers(response.headers()) {
            debug!("Received session ID: {session_id}");
            self.session_id = Some(session_id);
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let body = response
            .text()
            .await
            .map_err(|e| BridgeError::Transport(format!("Failed to read response body: {e}")))?;

        if body.is_empty() {
            return Ok(None);
        }

        if content_type.contains("application/json") {
            let parsed = serde_json::from_str(&body)?;
            Ok(Some(parsed))
        } else if content_type.contains("text/event-stream") {
            parse_sse_body(&body)
        } else {
            warn!("Unexpected content type: {content_type}");
            Ok(None)
        }
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn initialize(&mut self) -> Result<()> {
        self.pre_initialize().await?;
        self.notify(initialized_notification()).await
    }

    async fn request(&mut self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let json = serde_json::to_string(&request)?;
        self.post_message(json)
            .await?
            .ok_or_else(|| BridgeError::Transport("Empty response from MCP endpoint".into()))
    }

    async fn notify(&mut self, notification: JsonRpcNotification) -> Result<()> {
        let json = serde_json::to_string(&notification)?;
        self.post_message(json).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        debug!("Streamable HTTP transport closed");
        Ok(())
    }
}

/// Extract the session id assigned through the `Mcp-Session-Id` header
fn session_id_from_headers(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Parse an SSE-formatted response body, returning the last `message` event
fn parse_sse_body(body: &str) -> Result<Option<JsonRpcResponse>> {
    let mut event_name = String::new();
    let mut data_lines: Vec<&str> = Vec::new();
    let mut last_message: Option<JsonRpcResponse> = None;

    for line in body.lines() {
        if line.is_empty() {
            if let Some(message) = flush_event(&mut event_name, &mut data_lines)? {
                last_message = Some(message);
            }
        } else if let Some(rest) = line.strip_prefix("event:") {
            event_name = rest.trim_start().to_string();
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        } else if line.starts_with(':') {
            // comment line, skip
        }
    }

    if let Some(message) = flush_event(&mut event_name, &mut data_lines)? {
        last_message = Some(message);
    }

    Ok(last_message)
}

/// Complete one SSE event, parsing its data when it carries a message
fn flush_event(
    event_name: &mut String,
    data_lines: &mut Vec<&str>,
) -> Result<Option<JsonRpcResponse>> {
    if data_lines.is_empty() {
        event_name.clear();
        return Ok(None);
    }

    let name = if event_name.is_empty() {
        "message".to_string()
    } else {
        std::mem::take(event_name)
    };
    let data = data_lines.join("\n");
    data_lines.clear();
    event_name.clear();

    if name != "message" {
        return Err(BridgeError::Transport(format!(
            "Unknown Server-Sent Event: {name}"
        )));
    }

    Ok(Some(serde_json::from_str(&data)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_body_single_message() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n";
        let response = parse_sse_body(body).unwrap().unwrap();
        assert_eq!(response.id, 1);
        assert!(response.result.is_some());
    }

    #[test]
    fn test_parse_sse_body_keeps_last_message() {
        let body = "event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\
                    \n\
                    event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{}}\n\
                    \n";
        let response = parse_sse_body(body).unwrap().unwrap();
        assert_eq!(response.id, 2);
    }

    #[test]
    fn test_parse_sse_body_default_event_name() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"id\":3,\"result\":{}}\n\n";
        let response = parse_sse_body(body).unwrap().unwrap();
        assert_eq!(response.id, 3);
    }

    #[test]
    fn test_parse_sse_body_multiline_data() {
        let body = "data: {\"jsonrpc\":\"2.0\",\ndata: \"id\":4,\"result\":{}}\n\n";
        let response = parse_sse_body(body).unwrap().unwrap();
        assert_eq!(response.id, 4);
    }

    #[test]
    fn test_parse_sse_body_rejects_unknown_event() {
        let body = "event: heartbeat\ndata: {}\n\n";
        assert!(parse_sse_body(body).is_err());
    }

    #[test]
    fn test_parse_sse_body_ignores_comments() {
        let body = ": keep-alive\n\ndata: {\"jsonrpc\":\"2.0\",\"id\":5,\"result\":{}}\n\n";
        let response = parse_sse_body(body).unwrap().unwrap();
        assert_eq!(response.id, 5);
    }

    #[test]
    fn test_parse_sse_body_empty() {
        assert!(parse_sse_body("").unwrap().is_none());
    }

    #[test]
    fn test_rejects_non_http_url() {
        let options = ConnectOptions::new("ftp://example.com/mcp");
        assert!(StreamableHttpTransport::new(&options).is_err());
    }

    #[test]
    fn test_session_id_from_headers() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(SESSION_ID_HEADER, "session-abc".parse().unwrap());
        assert_eq!(
            session_id_from_headers(&headers),
            Some("session-abc".to_string())
        );
    }

    #[test]
    fn test_session_id_header_is_case_insensitive() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("mcp-session-id", "session-xyz".parse().unwrap());
        assert_eq!(
            session_id_from_headers(&headers),
            Some("session-xyz".to_string())
        );
    }

    #[test]
    fn test_session_id_absent() {
        let headers = reqwest::header::HeaderMap::new();
        assert_eq!(session_id_from_headers(&headers), None);
    }

    #[tokio::test]
    async fn test_pre_initialize_runs_once() {
        // An unroutable URL: a second handshake attempt would fail, so
        // succeeding here proves the early return
        let options = ConnectOptions::new("http://127.0.0.1:9/mcp");
        let mut transport = StreamableHttpTransport::new(&options).unwrap();
        transport.pre_initialized = true;

        transport.pre_initialize().await.unwrap();
        assert!(transport.pre_initialized);
    }
}
