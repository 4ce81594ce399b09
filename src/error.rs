// MIT License - Copyright (c) 2026 Peter Wright
// Error types

use std::fmt;

use serde::Deserialize;

use crate::constants::rpc_code;

/// Error object carried by a JSON-RPC error response from the hub.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl RpcErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Human-readable category for the standard JSON-RPC codes.
    pub fn description(&self) -> &'static str {
        match self.code {
            rpc_code::PARSE_ERROR => "Parse error",
            rpc_code::INVALID_REQUEST => "Invalid request",
            -32601 => "Method not found",
            -32602 => "Invalid params",
            -32603 => "Internal error",
            -32099..=-32000 => "Server error",
            _ => "Hub error",
        }
    }
}

impl fmt::Display for RpcErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.description(), self.code, self.message)
    }
}

/// All errors that can occur in the dooz-lan-bridge library.
#[derive(Debug, thiserror::Error)]
pub enum DoozError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Request timeout: {method}")]
    RequestTimeout { method: String },

    #[error("Hub error: {0}")]
    Rpc(RpcErrorObject),

    #[error("Authentication rejected: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("Hub disconnected")]
    Disconnected,

    #[error("Malformed payload: {details}")]
    Decode { details: String },

    #[error("Invalid address: {value}")]
    InvalidAddress { value: String },

    #[error("Invalid level: {level} (max: {max})")]
    InvalidLevel { level: u32, max: u8 },

    #[error("Invalid temperature: {value}")]
    InvalidTemperature { value: f32 },

    #[error("Unknown heater mode id: {id}")]
    UnknownHeaterMode { id: u8 },

    #[error("Unknown device: {address}")]
    UnknownDevice { address: String },

    #[error("Unknown group: {address}")]
    UnknownGroup { address: String },

    #[error("Unknown scene: {id}")]
    UnknownScene { id: u32 },

    #[error("Device {address} is a {kind}, which does not support {operation}")]
    KindMismatch {
        address: String,
        kind: &'static str,
        operation: &'static str,
    },

    #[error("Channel closed")]
    ChannelClosed,
}

impl DoozError {
    /// Whether this error is transient and the connection should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DoozError::Io(_)
                | DoozError::ConnectionTimeout
                | DoozError::RequestTimeout { .. }
                | DoozError::Disconnected
                | DoozError::ChannelClosed
        )
    }
}

impl From<serde_json::Error> for DoozError {
    fn from(e: serde_json::Error) -> Self {
        DoozError::Decode {
            details: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DoozError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_object_decode() {
        let err: RpcErrorObject = serde_json::from_str(
            r#"{"code":-32602,"message":"bad address","data":{"address":"ZZZZ"}}"#,
        )
        .unwrap();
        assert_eq!(err.code, -32602);
        assert_eq!(err.description(), "Invalid params");
        assert_eq!(err.data, Some(serde_json::json!({"address": "ZZZZ"})));
    }

    #[test]
    fn test_rpc_error_object_missing_message() {
        let err: RpcErrorObject = serde_json::from_str(r#"{"code":7}"#).unwrap();
        assert_eq!(err.message, "");
        assert_eq!(err.description(), "Hub error");
    }

    #[test]
    fn test_retryable() {
        assert!(DoozError::Disconnected.is_retryable());
        assert!(DoozError::RequestTimeout { method: "get".into() }.is_retryable());
        assert!(!DoozError::AuthenticationFailed { reason: "nope".into() }.is_retryable());
        assert!(!DoozError::Rpc(RpcErrorObject::new(1, "x")).is_retryable());
    }
}
