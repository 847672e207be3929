//! Method handlers.
//!
//! [`SessionHandler`] serves the methods a peer may call on the server;
//! [`BroadcastChangeHandler`] forwards external clipboard changes to every
//! session.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use cb_core::ports::{ClipboardChangeHandler, ExportRequest, PayloadExportPort};
use cb_core::{ClipboardData, ClipboardSnapshot, FormatTag, MimeType, SessionId};
use cb_platform::{ClipboardGateway, GatewayError};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::rpc::{RpcError, RpcHandler};
use crate::session::{SessionRegistry, METHOD_GET};

pub const METHOD_COPY: &str = "copy";
pub const METHOD_GET_TO_FILE: &str = "get-to-file";

/// `[x]` is treated as `x` so positional and by-name params both work.
fn unwrap_single(params: Value) -> Value {
    match params {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        other => other,
    }
}

fn invalid(err: impl std::fmt::Display) -> RpcError {
    RpcError::InvalidParams(err.to_string())
}

fn copy_params(params: Value) -> Result<ClipboardSnapshot, RpcError> {
    match unwrap_single(params) {
        Value::String(text) => Ok(ClipboardSnapshot::from_text(text)),
        Value::Object(item) => {
            let item: ClipboardData = serde_json::from_value(Value::Object(item)).map_err(invalid)?;
            ClipboardSnapshot::from_wire(vec![item]).map_err(invalid)
        }
        items @ Value::Array(_) => {
            let items: Vec<ClipboardData> = serde_json::from_value(items).map_err(invalid)?;
            ClipboardSnapshot::from_wire(items).map_err(invalid)
        }
        other => Err(invalid(format!("expected clipboard items, got {}", other))),
    }
}

#[derive(Deserialize)]
struct FormatParam {
    #[serde(alias = "cf")]
    format: FormatTag,
}

fn get_params(params: Value) -> Result<FormatTag, RpcError> {
    match unwrap_single(params) {
        Value::Null => Ok(FormatTag::default()),
        Value::String(format) => Ok(FormatTag::from(format)),
        object @ Value::Object(_) => serde_json::from_value::<FormatParam>(object)
            .map(|p| p.format)
            .map_err(invalid),
        other => Err(invalid(format!("expected a format, got {}", other))),
    }
}

#[derive(Debug, Deserialize)]
struct GetToFileParams {
    #[serde(alias = "cf")]
    format: FormatTag,
    path: PathBuf,
    #[serde(default)]
    prefix: String,
    #[serde(default)]
    mime: Option<String>,
}

fn get_to_file_params(params: Value) -> Result<GetToFileParams, RpcError> {
    match unwrap_single(params) {
        object @ Value::Object(_) => serde_json::from_value(object).map_err(invalid),
        Value::Array(items) => {
            let mut strings = items.into_iter().map(|v| match v {
                Value::String(s) => Ok(s),
                other => Err(invalid(format!("expected string, got {}", other))),
            });
            let mut next = || strings.next().transpose();
            let format = next()?.ok_or_else(|| invalid("missing format"))?;
            let path = next()?.ok_or_else(|| invalid("missing path"))?;
            let prefix = next()?.unwrap_or_default();
            let mime = next()?;
            Ok(GetToFileParams {
                format: FormatTag::from(format),
                path: PathBuf::from(path),
                prefix,
                mime,
            })
        }
        other => Err(invalid(format!("expected export params, got {}", other))),
    }
}

fn internal(err: GatewayError) -> RpcError {
    RpcError::Internal(err.to_string())
}

/// Serves `copy`, `get` and `get-to-file` for one session.
pub struct SessionHandler {
    session: SessionId,
    gateway: ClipboardGateway,
    exporter: Arc<dyn PayloadExportPort>,
}

impl SessionHandler {
    pub fn new(
        session: SessionId,
        gateway: ClipboardGateway,
        exporter: Arc<dyn PayloadExportPort>,
    ) -> Self {
        Self {
            session,
            gateway,
            exporter,
        }
    }

    async fn copy(&self, params: Value) -> Result<Value, RpcError> {
        let snapshot = copy_params(params)?;
        debug!(
            session_id = %self.session,
            items = snapshot.len(),
            deferred = snapshot.has_deferred(),
            "copy"
        );
        match self.gateway.write(snapshot, Some(self.session)).await {
            Ok(()) => Ok(Value::Null),
            Err(GatewayError::Closed) => Err(internal(GatewayError::Closed)),
            Err(err) => {
                warn!(session_id = %self.session, error = %err, "clipboard write dropped");
                Ok(Value::Null)
            }
        }
    }

    async fn get(&self, params: Value) -> Result<Value, RpcError> {
        let format = get_params(params)?;
        let bytes = self.gateway.read(format.clone()).await.map_err(internal)?;
        debug!(session_id = %self.session, format = %format, bytes = bytes.len(), "get");
        Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    }

    async fn get_to_file(&self, params: Value) -> Result<Value, RpcError> {
        let params = get_to_file_params(params)?;
        let mime_override = params
            .mime
            .as_deref()
            .map(str::parse::<MimeType>)
            .transpose()
            .map_err(invalid)?;

        let payload = self
            .gateway
            .read(params.format.clone())
            .await
            .map_err(internal)?;
        if payload.is_empty() {
            debug!(session_id = %self.session, format = %params.format, "nothing to export");
            return Ok(Value::String(String::new()));
        }

        let name = self
            .exporter
            .export(ExportRequest {
                payload,
                target_dir: params.path,
                name_prefix: params.prefix,
                mime_override,
            })
            .await
            .map_err(|e| RpcError::Internal(format!("{:#}", e)))?;
        debug!(session_id = %self.session, format = %params.format, file = %name, "get-to-file");
        Ok(Value::String(name))
    }
}

#[async_trait]
impl RpcHandler for SessionHandler {
    async fn handle(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            METHOD_COPY => self.copy(params).await,
            METHOD_GET => self.get(params).await,
            METHOD_GET_TO_FILE => self.get_to_file(params).await,
            other => Err(RpcError::MethodNotFound(other.to_string())),
        }
    }
}

/// Fans external clipboard changes out to every connected session.
pub struct BroadcastChangeHandler {
    registry: SessionRegistry,
}

impl BroadcastChangeHandler {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ClipboardChangeHandler for BroadcastChangeHandler {
    async fn on_clipboard_changed(&self, snapshot: ClipboardSnapshot) -> Result<()> {
        self.registry.broadcast(&snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn copy_accepts_positional_and_bare_forms() {
        let nested = copy_params(json!([[{"format": "text", "data": "a"}, {"cf": "html", "data": "<b>a</b>"}]])).unwrap();
        assert_eq!(nested.len(), 2);

        let flat = copy_params(json!([{"format": "text", "data": "a"}, {"format": "bitmap", "data": null}])).unwrap();
        assert!(flat.has_deferred());

        let single = copy_params(json!({"format": "text", "data": "a"})).unwrap();
        assert_eq!(single.len(), 1);

        let bare = copy_params(json!("plain")).unwrap();
        assert_eq!(
            bare.get(&FormatTag::text()).and_then(|i| i.payload.clone()),
            Some(b"plain".to_vec())
        );
    }

    #[test]
    fn copy_rejects_duplicates_and_garbage() {
        let dup = copy_params(json!([{"format": "text", "data": "a"}, {"format": "text", "data": "b"}]));
        assert!(matches!(dup, Err(RpcError::InvalidParams(_))));
        assert!(matches!(copy_params(json!(42)), Err(RpcError::InvalidParams(_))));
        assert!(matches!(copy_params(json!([{"data": "x"}])), Err(RpcError::InvalidParams(_))));
    }

    #[test]
    fn get_accepts_every_param_shape() {
        assert_eq!(get_params(json!(["html"])).unwrap(), FormatTag::html());
        assert_eq!(get_params(json!("bitmap")).unwrap(), FormatTag::bitmap());
        assert_eq!(get_params(json!({"format": "text"})).unwrap(), FormatTag::text());
        assert_eq!(get_params(json!({"cf": "text"})).unwrap(), FormatTag::text());
        assert_eq!(get_params(Value::Null).unwrap(), FormatTag::text());
        assert!(get_params(json!([1, 2])).is_err());
    }

    #[test]
    fn get_to_file_accepts_object_and_positional_params() {
        let by_name = get_to_file_params(json!({
            "format": "bitmap", "path": "/tmp/out", "prefix": "shot-", "mime": "image/png"
        }))
        .unwrap();
        assert_eq!(by_name.format, FormatTag::bitmap());
        assert_eq!(by_name.path, PathBuf::from("/tmp/out"));
        assert_eq!(by_name.prefix, "shot-");
        assert_eq!(by_name.mime.as_deref(), Some("image/png"));

        let positional = get_to_file_params(json!(["bitmap", "/tmp/out"])).unwrap();
        assert_eq!(positional.prefix, "");
        assert_eq!(positional.mime, None);

        assert!(get_to_file_params(json!(["bitmap"])).is_err());
        assert!(get_to_file_params(json!({"format": "bitmap"})).is_err());
    }
}
