//! MCP client implementation

use bridge_core::{BridgeError, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::transport::{create_transport, ConnectOptions, Transport, TransportKind};
use crate::types::{
    ContentItem, JsonRpcRequest, JsonRpcResponse, ListToolsResult, McpTool, ToolCallParams,
    ToolCallResult,
};

/// MCP client for communicating with a remote MCP server
pub struct McpClient {
    /// Transport for communication
    transport: Box<dyn Transport>,

    /// Request ID counter
    request_id: AtomicU64,
}

impl McpClient {
    /// Connect to an MCP server with the given transport selection
    pub async fn connect(kind: TransportKind, options: &ConnectOptions) -> Result<Self> {
        let transport = create_transport(kind, options).await?;

        Ok(Self {
            transport,
            request_id: AtomicU64::new(1),
        })
    }

    /// Get the next request ID
    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Perform the MCP initialization handshake
    pub async fn initialize(&mut self) -> Result<()> {
        self.transport.initialize().await
    }

    /// List available tools from the MCP server
    pub async fn list_tools(&mut self) -> Result<Vec<McpTool>> {
        debug!("Listing tools from MCP server");

        let request = JsonRpcRequest::new(self.next_request_id(), "tools/list", None);
        let response = self.transport.request(request).await?;
        let result = expect_result(response)?;

        let result: ListToolsResult = serde_json::from_value(result)?;

        info!("Discovered {} tools from MCP server", result.tools.len());

        Ok(result.tools)
    }

    /// Call a tool on the MCP server
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<Vec<ContentItem>> {
        debug!("Calling MCP tool '{name}'");

        let params = ToolCallParams {
            name: name.to_string(),
            arguments,
        };

        let request = JsonRpcRequest::new(
            self.next_request_id(),
            "tools/call",
            Some(serde_json::to_value(params)?),
        );

        let response = self.transport.request(request).await?;
        let result = expect_result(response)?;

        let result: ToolCallResult = serde_json::from_value(result)?;

        if result.is_error.unwrap_or(false) {
            let detail = result
                .content
                .iter()
                .filter_map(|item| match item {
                    ContentItem::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            return Err(BridgeError::Transport(format!(
                "Tool '{name}' returned an error: {detail}"
            )));
        }

        Ok(result.content)
    }

    /// Close the client connection
    pub async fn close(&mut self) -> Result<()> {
        debug!("Closing MCP client");
        self.transport.close().await
    }
}

/// Unwrap a JSON-RPC response into its result, mapping error objects
fn expect_result(response: JsonRpcResponse) -> Result<Value> {
    if let Some(error) = response.error {
        return Err(BridgeError::Rpc {
            code: error.code,
            message: error.message,
        });
    }

    response
        .result
        .ok_or_else(|| BridgeError::Transport("Response missing result".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JsonRpcError;

    fn response(result: Option<Value>, error: Option<JsonRpcError>) -> JsonRpcResponse {
        JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: 1,
            result,
            error,
        }
    }

    #[test]
    fn test_expect_result_passes_through() {
        let value = expect_result(response(Some(serde_json::json!({"tools": []})), None)).unwrap();
        assert_eq!(value["tools"], serde_json::json!([]));
    }

    #[test]
    fn test_expect_result_maps_rpc_error() {
        let err = expect_result(response(
            None,
            Some(JsonRpcError {
                code: -32601,
                message: "Method not found".to_string(),
                data: None,
            }),
        ))
        .unwrap_err();

        match err {
            BridgeError::Rpc { code, .. } => assert_eq!(code, -32601),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_expect_result_requires_result() {
        assert!(expect_result(response(None, None)).is_err());
    }
}
