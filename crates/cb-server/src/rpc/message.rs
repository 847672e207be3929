//! JSON-RPC 2.0 message shapes.
//!
//! Incoming frames are decoded into [`RpcMessage`] by shape: a `method` with
//! an `id` is a request, a `method` without one is a notification, and an
//! `id` without a `method` is a response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

fn version() -> String {
    JSONRPC_VERSION.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "version")]
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default = "version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default = "version")]
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: version(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RequestId, error: ErrorObject) -> Self {
        Self {
            jsonrpc: version(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// A missing or `null` result on a success is the value `null`.
    pub fn into_result(self) -> Result<Value, ErrorObject> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcMessage {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

impl RpcMessage {
    pub fn request(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self::Request(Request {
            jsonrpc: version(),
            id,
            method: method.into(),
            params,
        })
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self::Notification(Notification {
            jsonrpc: version(),
            method: method.into(),
            params,
        })
    }

    pub fn decode(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_messages_by_shape() {
        let request = RpcMessage::decode(br#"{"jsonrpc":"2.0","id":1,"method":"get","params":["text"]}"#).unwrap();
        assert!(matches!(request, RpcMessage::Request(ref r) if r.id == RequestId::Number(1)));

        let notification =
            RpcMessage::decode(br#"{"jsonrpc":"2.0","method":"paste","params":[{"format":"text","data":"x"}]}"#).unwrap();
        assert!(matches!(notification, RpcMessage::Notification(ref n) if n.method == "paste"));

        let response = RpcMessage::decode(br#"{"jsonrpc":"2.0","id":"a","result":"hello"}"#).unwrap();
        match response {
            RpcMessage::Response(r) => {
                assert_eq!(r.id, RequestId::String("a".into()));
                assert_eq!(r.into_result().unwrap(), json!("hello"));
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn null_result_is_a_success() {
        let response = RpcMessage::decode(br#"{"jsonrpc":"2.0","id":3,"result":null}"#).unwrap();
        let RpcMessage::Response(response) = response else {
            panic!("expected response");
        };
        assert_eq!(response.into_result().unwrap(), Value::Null);
    }

    #[test]
    fn success_serializes_null_result_explicitly() {
        let encoded = serde_json::to_value(Response::success(RequestId::Number(9), Value::Null)).unwrap();
        assert_eq!(encoded, json!({"jsonrpc": "2.0", "id": 9, "result": null}));
    }

    #[test]
    fn error_response_round_trips() {
        let response = Response::failure(
            RequestId::Number(2),
            ErrorObject {
                code: -32601,
                message: "method not found: nope".into(),
                data: None,
            },
        );
        let bytes = RpcMessage::Response(response.clone()).encode().unwrap();
        assert_eq!(RpcMessage::decode(&bytes).unwrap(), RpcMessage::Response(response));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(RpcMessage::decode(b"not json").is_err());
        assert!(RpcMessage::decode(br#"{"jsonrpc":"2.0"}"#).is_err());
    }
}
