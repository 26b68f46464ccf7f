//! Stateless entry operations
//!
//! Each call opens a fresh connection, performs one MCP operation, and
//! closes the connection. Nothing survives between invocations.

use bridge_core::{BridgeError, Result};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

use crate::client::McpClient;
use crate::transport::{ConnectOptions, TransportKind};
use crate::types::{ContentItem, McpTool};

/// Fetch the tool list advertised by an MCP server
pub async fn fetch_tools(kind: TransportKind, options: &ConnectOptions) -> Result<Vec<McpTool>> {
    let mut client = McpClient::connect(kind, options).await?;

    let result = async {
        client.initialize().await?;
        client.list_tools().await
    }
    .await;

    if let Err(e) = client.close().await {
        warn!("Error closing MCP client: {e}");
    }

    result
}

/// Execute a named tool on an MCP server
pub async fn execute_tool(
    kind: TransportKind,
    options: &ConnectOptions,
    tool_name: &str,
    arguments: Value,
) -> Result<Vec<ContentItem>> {
    let mut client = McpClient::connect(kind, options).await?;

    let result = async {
        client.initialize().await?;
        client.call_tool(tool_name, arguments).await
    }
    .await;

    if let Err(e) = client.close().await {
        warn!("Error closing MCP client: {e}");
    }

    result
}

/// Decode the JSON-encoded `headers` parameter
///
/// Absent or blank input means no extra headers. Scalar values are
/// stringified; nested objects and arrays are rejected.
pub fn parse_headers(headers: Option<&str>) -> Result<HashMap<String, String>> {
    let Some(raw) = headers.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(HashMap::new());
    };

    let value: Value = serde_json::from_str(raw)
        .map_err(|e| BridgeError::InvalidParams(format!("Malformed headers JSON: {e}")))?;

    let Value::Object(map) = value else {
        return Err(BridgeError::InvalidParams(
            "Headers must be a JSON object".into(),
        ));
    };

    let mut headers = HashMap::new();
    for (key, value) in map {
        let value = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => {
                return Err(BridgeError::InvalidParams(format!(
                    "Header '{key}' has non-scalar value: {other}"
                )));
            }
        };
        headers.insert(key, value);
    }

    Ok(headers)
}

/// Decode the JSON-encoded `arguments` parameter
///
/// Absent or blank input means an empty argument object.
pub fn parse_arguments(arguments: Option<&str>) -> Result<Value> {
    let Some(raw) = arguments.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(Value::Object(serde_json::Map::new()));
    };

    let value: Value = serde_json::from_str(raw)
        .map_err(|e| BridgeError::InvalidParams(format!("Malformed arguments JSON: {e}")))?;

    if !value.is_object() {
        return Err(BridgeError::InvalidParams(
            "Tool arguments must be a JSON object".into(),
        ));
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_headers_absent() {
        assert!(parse_headers(None).unwrap().is_empty());
        assert!(parse_headers(Some("")).unwrap().is_empty());
        assert!(parse_headers(Some("   ")).unwrap().is_empty());
    }

    #[test]
    fn test_parse_headers_object() {
        let headers =
            parse_headers(Some(r#"{"Authorization": "Bearer abc", "X-Retries": 3}"#)).unwrap();
        assert_eq!(headers["Authorization"], "Bearer abc");
        assert_eq!(headers["X-Retries"], "3");
    }

    #[test]
    fn test_parse_headers_malformed() {
        let err = parse_headers(Some("{not json")).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidParams(_)));
    }

    #[test]
    fn test_parse_headers_rejects_non_object() {
        assert!(parse_headers(Some(r#"["a", "b"]"#)).is_err());
    }

    #[test]
    fn test_parse_headers_rejects_nested_value() {
        assert!(parse_headers(Some(r#"{"meta": {"a": 1}}"#)).is_err());
    }

    #[test]
    fn test_parse_arguments_absent() {
        let args = parse_arguments(None).unwrap();
        assert_eq!(args, serde_json::json!({}));
    }

    #[test]
    fn test_parse_arguments_object() {
        let args = parse_arguments(Some(r#"{"path": "/tmp/file.txt"}"#)).unwrap();
        assert_eq!(args["path"], "/tmp/file.txt");
    }

    #[test]
    fn test_parse_arguments_malformed() {
        let err = parse_arguments(Some("{{")).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidParams(_)));
    }

    #[test]
    fn test_parse_arguments_rejects_non_object() {
        assert!(parse_arguments(Some("42")).is_err());
    }
}
