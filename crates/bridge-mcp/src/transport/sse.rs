//! SSE (Server-Sent Events) transport for HTTP-based MCP servers
//!
//! The server is contacted with a long-lived GET stream. It announces a
//! message endpoint through an `endpoint` event; requests are POSTed to that
//! endpoint and responses come back on the stream as `message` events.

use async_trait::async_trait;
use bridge_core::{BridgeError, Result};
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{build_header_map, ConnectOptions, Transport};
use crate::types::{
    initialize_request, initialized_notification, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse,
};

/// SSE transport for HTTP-based MCP servers
pub struct SseTransport {
    /// HTTP client for posting messages
    client: reqwest::Client,

    /// Message endpoint discovered from the `endpoint` event
    endpoint: Arc<RwLock<Option<Url>>>,

    /// Channel carrying responses parsed off the stream
    response_rx: mpsc::Receiver<JsonRpcResponse>,

    /// Responses received for ids we are not currently waiting on
    pending: Vec<JsonRpcResponse>,

    /// Shutdown signal for the listener task
    stop: Arc<AtomicBool>,

    /// Listener task handle
    listener: Option<JoinHandle<()>>,

    /// Request timeout
    timeout: std::time::Duration,
}

impl std::fmt::Debug for SseTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseTransport")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SseTransport {
    /// Open the SSE stream and wait for endpoint discovery
    pub async fn connect(options: &ConnectOptions) -> Result<Self> {
        let base = Url::parse(&options.url)
            .map_err(|e| BridgeError::InvalidParams(format!("Invalid server URL: {e}")))?;
        if base.scheme() != "http" && base.scheme() != "https" {
            return Err(BridgeError::InvalidParams(
                "Server URL must start with http:// or https://".into(),
            ));
        }

        info!("Connecting to SSE endpoint: {base}");

        let client = reqwest::Client::builder()
            .default_headers(build_header_map(&options.headers)?)
            .connect_timeout(options.timeout)
            .read_timeout(options.sse_read_timeout)
            .build()
            .map_err(|e| BridgeError::Connect(format!("Failed to build HTTP client: {e}")))?;

        let (response_tx, response_rx) = mpsc::channel::<JsonRpcResponse>(100);
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<std::result::Result<(), String>>();

        let endpoint = Arc::new(RwLock::new(None::<Url>));
        let stop = Arc::new(AtomicBool::new(false));

        let listener = tokio::spawn(listen(
            client.clone(),
            base.clone(),
            endpoint.clone(),
            response_tx,
            endpoint_tx,
            stop.clone(),
            options.max_retries,
            options.retry_interval,
        ));

        match tokio::time::timeout(options.timeout, endpoint_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(message))) => {
                listener.abort();
                return Err(BridgeError::Connect(message));
            }
            Ok(Err(_)) => {
                return Err(BridgeError::Connect(
                    "SSE stream closed before endpoint discovery".into(),
                ));
            }
            Err(_) => {
                listener.abort();
                return Err(BridgeError::Connect(format!(
                    "MCP server connection timeout: {base}"
                )));
            }
        }

        Ok(Self {
            client,
            endpoint,
            response_rx,
            pending: Vec::new(),
            stop,
            listener: Some(listener),
            timeout: options.timeout,
        })
    }

    /// POST a serialized message to the discovered endpoint
    async fn post_message(&self, json: String) -> Result<()> {
        let endpoint = self
            .endpoint
            .read()
            .await
            .clone()
            .ok_or_else(|| BridgeError::Transport("SSE endpoint not discovered".into()))?;

        debug!("Sending client message to {endpoint}: {json}");

        let response = self
            .client
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
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

        Ok(())
    }

    /// Wait for the response matching `id`, buffering any others
    async fn wait_for_response(&mut self, id: u64) -> Result<JsonRpcResponse> {
        let deadline = Instant::now() + self.timeout;

        loop {
            if let Some(pos) = self.pending.iter().position(|r| r.id == id) {
                return Ok(self.pending.remove(pos));
            }

            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or_else(|| {
                    BridgeError::Timeout(format!(
                        "Timed out waiting for response to request {id}"
                    ))
                })?;

            match tokio::time::timeout(remaining, self.response_rx.recv()).await {
                Ok(Some(response)) => {
                    if response.id == id {
                        return Ok(response);
                    }
                    warn!(
                        "Received response for different request: {} (expected: {id})",
                        response.id
                    );
                    self.pending.push(response);
                }
                Ok(None) => {
                    return Err(BridgeError::Transport("SSE stream closed".into()));
                }
                Err(_) => {
                    return Err(BridgeError::Timeout(format!(
                        "Timed out waiting for response to request {id}"
                    )));
                }
            }
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn initialize(&mut self) -> Result<()> {
        let response = self.request(initialize_request(0)).await?;
        if let Some(error) = response.error {
            return Err(BridgeError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        self.notify(initialized_notification()).await
    }

    async fn request(&mut self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = request.id;
        let json = serde_json::to_string(&request)?;
        self.post_message(json).await?;
        self.wait_for_response(id).await
    }

    async fn notify(&mut self, notification: JsonRpcNotification) -> Result<()> {
        let json = serde_json::to_string(&notification)?;
        self.post_message(json).await
    }

    async fn close(&mut self) -> Result<()> {
        debug!("Closing SSE transport");
        self.stop.store(true, Ordering::SeqCst);
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        Ok(())
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

/// Listener loop feeding stream events into the response channel
#[allow(clippy::too_many_arguments)]
async fn listen(
    client: reqwest::Client,
    base: Url,
    endpoint: Arc<RwLock<Option<Url>>>,
    response_tx: mpsc::Sender<JsonRpcResponse>,
    endpoint_tx: oneshot::Sender<std::result::Result<(), String>>,
    stop: Arc<AtomicBool>,
    max_retries: u32,
    retry_interval: std::time::Duration,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut retry_count = 0u32;

    'outer: while !stop.load(Ordering::SeqCst) {
        let mut stream = match EventSource::new(client.get(base.clone())) {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to open SSE stream: {e}");
                break;
            }
        };

        while let Some(event) = stream.next().await {
            if stop.load(Ordering::SeqCst) {
                debug!("Stopping SSE listener due to stop signal");
                break 'outer;
            }

            match event {
                Ok(Event::Open) => {
                    debug!("SSE connection established");
                    retry_count = 0;
                }
                Ok(Event::Message(msg)) => match msg.event.as_str() {
                    "endpoint" => match resolve_endpoint(&base, msg.data.trim()) {
                        Ok(resolved) => {
                            info!("Received endpoint URL: {resolved}");
                            *endpoint.write().await = Some(resolved);
                            if let Some(tx) = endpoint_tx.take() {
                                let _ = tx.send(Ok(()));
                            }
                        }
                        Err(message) => {
                            error!("{message}");
                            if let Some(tx) = endpoint_tx.take() {
                                let _ = tx.send(Err(message));
                            }
                            break 'outer;
                        }
                    },
                    "message" | "" => match serde_json::from_str::<JsonRpcResponse>(&msg.data) {
                        Ok(response) => {
                            debug!("Received server message: {}", msg.data);
                            if response_tx.send(response).await.is_err() {
                                break 'outer;
                            }
                        }
                        Err(e) => {
                            debug!("Ignoring non-response SSE payload: {e}");
                        }
                    },
                    other => {
                        warn!("Unknown SSE event: {other}");
                    }
                },
                Err(e) => {
                    stream.close();
                    if stop.load(Ordering::SeqCst) {
                        debug!("Ignoring SSE stream error due to stop signal: {e}");
                        break 'outer;
                    }
                    if retry_count < max_retries {
                        retry_count += 1;
                        warn!(
                            "SSE stream error: {e}, retrying ({retry_count}/{max_retries}) in {retry_interval:?}"
                        );
                        tokio::time::sleep(retry_interval).await;
                        continue 'outer;
                    }
                    error!("Max retries ({max_retries}) exceeded for SSE connection");
                    break 'outer;
                }
            }
        }

        // Stream ended without error
        break;
    }

    debug!("SSE listener ended");
}

/// Resolve the advertised endpoint against the connection URL, enforcing
/// that it stays on the same origin
fn resolve_endpoint(base: &Url, data: &str) -> std::result::Result<Url, String> {
    let resolved = base
        .join(data)
        .map_err(|e| format!("Invalid endpoint URL '{data}': {e}"))?;

    if !same_origin(base, &resolved) {
        return Err(format!(
            "Endpoint origin does not match connection origin: {resolved}"
        ));
    }

    Ok(resolved)
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_endpoint() {
        let base = Url::parse("http://localhost:8080/sse").unwrap();
        let resolved = resolve_endpoint(&base, "/messages?session=abc").unwrap();
        assert_eq!(resolved.as_str(), "http://localhost:8080/messages?session=abc");
    }

    #[test]
    fn test_resolve_absolute_endpoint_same_origin() {
        let base = Url::parse("https://example.com/sse").unwrap();
        let resolved = resolve_endpoint(&base, "https://example.com/messages").unwrap();
        assert_eq!(resolved.path(), "/messages");
    }

    #[test]
    fn test_reject_cross_origin_endpoint() {
        let base = Url::parse("https://example.com/sse").unwrap();
        let err = resolve_endpoint(&base, "https://evil.example.net/messages").unwrap_err();
        assert!(err.contains("origin does not match"));
    }

    #[test]
    fn test_reject_cross_scheme_endpoint() {
        let base = Url::parse("https://example.com/sse").unwrap();
        assert!(resolve_endpoint(&base, "http://example.com/messages").is_err());
    }

    #[test]
    fn test_default_ports_compare_equal() {
        let a = Url::parse("https://example.com/sse").unwrap();
        let b = Url::parse("https://example.com:443/messages").unwrap();
        assert!(same_origin(&a, &b));
    }

    fn transport_with_channel(
        timeout: std::time::Duration,
    ) -> (mpsc::Sender<JsonRpcResponse>, SseTransport) {
        let (tx, rx) = mpsc::channel(10);
        let transport = SseTransport {
            client: reqwest::Client::new(),
            endpoint: Arc::new(RwLock::new(None)),
            response_rx: rx,
            pending: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
            listener: None,
            timeout,
        };
        (tx, transport)
    }

    fn response(id: u64) -> JsonRpcResponse {
        JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(serde_json::json!({})),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_wait_for_response_buffers_other_ids() {
        let (tx, mut transport) = transport_with_channel(std::time::Duration::from_secs(5));

        tx.send(response(2)).await.unwrap();
        tx.send(response(1)).await.unwrap();

        let first = transport.wait_for_response(1).await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(transport.pending.len(), 1);

        // The id-2 response was kept and resolves without touching the channel
        let second = transport.wait_for_response(2).await.unwrap();
        assert_eq!(second.id, 2);
        assert!(transport.pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_response_times_out() {
        let (_tx, mut transport) = transport_with_channel(std::time::Duration::from_millis(50));

        let err = transport.wait_for_response(1).await.unwrap_err();
        assert!(matches!(err, BridgeError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_wait_for_response_closed_stream() {
        let (tx, mut transport) = transport_with_channel(std::time::Duration::from_secs(5));
        drop(tx);

        let err = transport.wait_for_response(1).await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));
    }
}
