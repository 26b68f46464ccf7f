use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed to connect to MCP server: {0}")]
    Connect(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("MCP server returned error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Invalid parameter: {0}")]
    InvalidParams(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
