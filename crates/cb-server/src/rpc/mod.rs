//! JSON-RPC 2.0 over length-prefixed frames.

pub mod channel;
pub mod framing;
pub mod message;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use channel::{channel, CloseReason, DriverExit, RpcConfig, RpcDriver, RpcPeer};
pub use message::{ErrorObject, Notification, RequestId, Request, Response, RpcMessage};

pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("rpc channel closed")]
    ChannelClosed,
}

impl RpcError {
    pub fn code(&self) -> i64 {
        match self {
            Self::MethodNotFound(_) => METHOD_NOT_FOUND,
            Self::InvalidParams(_) => INVALID_PARAMS,
            Self::Internal(_) | Self::ChannelClosed => INTERNAL_ERROR,
            Self::Remote { code, .. } => *code,
        }
    }

    pub fn to_object(&self) -> ErrorObject {
        let message = match self {
            Self::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        };
        ErrorObject {
            code: self.code(),
            message,
            data: None,
        }
    }
}

impl From<ErrorObject> for RpcError {
    fn from(error: ErrorObject) -> Self {
        Self::Remote {
            code: error.code,
            message: error.message,
        }
    }
}

/// Serves the requests and notifications arriving on one channel.
///
/// For notifications the returned value is discarded.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}
