//! Bidirectional RPC channel over one byte stream.
//!
//! [`channel`] splits a stream into an [`RpcPeer`] (cloneable handle for
//! outgoing calls and notifications) and an [`RpcDriver`] that owns the
//! stream and must be run for anything to happen. The driver runs a read
//! task and a write task; when either ends the other is told to stop, every
//! outstanding outgoing call fails with [`RpcError::ChannelClosed`], and the
//! stream is handed back so the caller decides when the socket is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, Result};
use cb_core::config::RpcSettings;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::framing::{read_frame, write_frame, MAX_FRAME_BYTES};
use super::message::{RequestId, Response, RpcMessage};
use super::{RpcError, RpcHandler};

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub max_frame_bytes: usize,
    pub outbound_queue_depth: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: MAX_FRAME_BYTES,
            outbound_queue_depth: 64,
        }
    }
}

impl From<&RpcSettings> for RpcConfig {
    fn from(settings: &RpcSettings) -> Self {
        Self {
            max_frame_bytes: settings.max_frame_bytes,
            outbound_queue_depth: settings.outbound_queue_depth.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ExplicitClose,
    StreamClosedByPeer,
    ChannelClosed,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::ExplicitClose => write!(f, "explicit_close"),
            CloseReason::StreamClosedByPeer => write!(f, "stream_closed_by_peer"),
            CloseReason::ChannelClosed => write!(f, "channel_closed"),
        }
    }
}

type PendingCalls = Mutex<HashMap<RequestId, oneshot::Sender<Result<Value, RpcError>>>>;

struct PeerInner {
    outbound: mpsc::Sender<RpcMessage>,
    pending: PendingCalls,
    next_id: AtomicU64,
}

impl PeerInner {
    fn resolve(&self, response: Response) {
        let waiter = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&response.id);
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(response.into_result().map_err(RpcError::from));
            }
            None => debug!(id = %response.id, "response for unknown request"),
        }
    }

    fn forget(&self, id: &RequestId) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    fn fail_pending(&self) -> usize {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let count = pending.len();
        for (_, waiter) in pending.drain() {
            let _ = waiter.send(Err(RpcError::ChannelClosed));
        }
        count
    }
}

/// Handle for talking to the remote end of a channel.
#[derive(Clone)]
pub struct RpcPeer {
    inner: Arc<PeerInner>,
}

impl RpcPeer {
    /// Send a request and wait for its response.
    ///
    /// Dropping the returned future gives up on the response; a late answer
    /// is then discarded as unknown.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), tx);
        let _call = OutstandingCall {
            inner: &self.inner,
            id: id.clone(),
        };

        trace!(%id, method, "sending request");
        if self
            .inner
            .outbound
            .send(RpcMessage::request(id, method, params))
            .await
            .is_err()
        {
            return Err(RpcError::ChannelClosed);
        }

        rx.await.unwrap_or(Err(RpcError::ChannelClosed))
    }

    pub fn outstanding_calls(&self) -> usize {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Queue a notification. Does not wait for the peer.
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), RpcError> {
        self.inner
            .outbound
            .send(RpcMessage::notification(method, params))
            .await
            .map_err(|_| RpcError::ChannelClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.outbound.is_closed()
    }
}

/// Removes a call's response slot when the call finishes or is dropped.
struct OutstandingCall<'a> {
    inner: &'a PeerInner,
    id: RequestId,
}

impl Drop for OutstandingCall<'_> {
    fn drop(&mut self) {
        self.inner.forget(&self.id);
    }
}

/// What is left of a channel once its driver stops.
pub struct DriverExit<S> {
    pub reason: Result<CloseReason>,
    /// The stream, unless a task panicked while holding half of it.
    pub stream: Option<S>,
}

pub struct RpcDriver<S> {
    stream: S,
    peer: RpcPeer,
    outbound_rx: mpsc::Receiver<RpcMessage>,
    config: RpcConfig,
}

pub fn channel<S>(stream: S, config: RpcConfig) -> (RpcPeer, RpcDriver<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (outbound, outbound_rx) = mpsc::channel(config.outbound_queue_depth.max(1));
    let peer = RpcPeer {
        inner: Arc::new(PeerInner {
            outbound,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }),
    };
    let driver = RpcDriver {
        stream,
        peer: peer.clone(),
        outbound_rx,
        config,
    };
    (peer, driver)
}

impl<S> RpcDriver<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Serve the channel until the stream closes or fails.
    pub async fn run(self, handler: Arc<dyn RpcHandler>) -> DriverExit<S> {
        let RpcDriver {
            stream,
            peer,
            outbound_rx,
            config,
        } = self;
        let (reader, writer) = tokio::io::split(stream);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut read_task = AbortOnDrop(tokio::spawn(read_loop(
            reader,
            peer.clone(),
            handler,
            config.max_frame_bytes,
            shutdown_rx.clone(),
        )));
        let mut write_task = AbortOnDrop(tokio::spawn(write_loop(
            writer,
            outbound_rx,
            config.max_frame_bytes,
            shutdown_rx,
        )));

        enum CompletedTask {
            Read,
            Write,
        }

        let (first, completed) = tokio::select! {
            read = &mut read_task.0 => (read.map(|(half, result)| (Half::Read(half), result)), CompletedTask::Read),
            write = &mut write_task.0 => (write.map(|(half, result)| (Half::Write(half), result)), CompletedTask::Write),
        };

        let _ = shutdown_tx.send(true);
        let second = match completed {
            CompletedTask::Read => (&mut write_task.0)
                .await
                .map(|(half, result)| (Half::Write(half), result)),
            CompletedTask::Write => (&mut read_task.0)
                .await
                .map(|(half, result)| (Half::Read(half), result)),
        };

        let failed = peer.inner.fail_pending();
        if failed > 0 {
            debug!(failed, "failed outstanding calls on closed channel");
        }

        let (reason, first_half) = match first {
            Ok((half, result)) => (result, Some(half)),
            Err(err) => (Err(anyhow!("rpc task join failed: {err}")), None),
        };
        let second_half = second.ok().map(|(half, _)| half);

        let stream = match (first_half, second_half) {
            (Some(Half::Read(r)), Some(Half::Write(w)))
            | (Some(Half::Write(w)), Some(Half::Read(r))) => Some(r.unsplit(w)),
            _ => None,
        };

        DriverExit { reason, stream }
    }
}

/// Aborts the task when the driver future is dropped mid-run.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

enum Half<S> {
    Read(ReadHalf<S>),
    Write(WriteHalf<S>),
}

async fn read_loop<S>(
    mut reader: ReadHalf<S>,
    peer: RpcPeer,
    handler: Arc<dyn RpcHandler>,
    max_frame_bytes: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) -> (ReadHalf<S>, Result<CloseReason>)
where
    S: AsyncRead + Send,
{
    loop {
        let payload = tokio::select! {
            _ = shutdown_rx.changed() => return (reader, Ok(CloseReason::ExplicitClose)),
            payload = read_frame(&mut reader, max_frame_bytes) => payload,
        };

        let payload = match payload {
            Ok(Some(payload)) => payload,
            Ok(None) => return (reader, Ok(CloseReason::StreamClosedByPeer)),
            Err(err) => {
                warn!(error = %err, "rpc read failed");
                return (reader, Err(err.into()));
            }
        };

        let message = match RpcMessage::decode(&payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, len = payload.len(), "ignoring undecodable rpc frame");
                continue;
            }
        };

        match message {
            RpcMessage::Request(request) => {
                let handler = handler.clone();
                let outbound = peer.inner.outbound.clone();
                tokio::spawn(async move {
                    trace!(id = %request.id, method = %request.method, "handling request");
                    let response = match handler.handle(&request.method, request.params).await {
                        Ok(result) => Response::success(request.id, result),
                        Err(err) => {
                            debug!(method = %request.method, error = %err, "request failed");
                            Response::failure(request.id, err.to_object())
                        }
                    };
                    if outbound.send(RpcMessage::Response(response)).await.is_err() {
                        debug!("channel closed before response could be sent");
                    }
                });
            }
            RpcMessage::Notification(notification) => {
                let handler = handler.clone();
                tokio::spawn(async move {
                    if let Err(err) = handler
                        .handle(&notification.method, notification.params)
                        .await
                    {
                        debug!(method = %notification.method, error = %err, "notification failed");
                    }
                });
            }
            RpcMessage::Response(response) => peer.inner.resolve(response),
        }
    }
}

async fn write_message<W>(writer: &mut W, message: &RpcMessage, max_frame_bytes: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = message
        .encode()
        .map_err(|err| anyhow!("rpc encode failed: {err}"))?;
    write_frame(writer, &payload, max_frame_bytes).await?;
    Ok(())
}

async fn write_loop<S>(
    mut writer: WriteHalf<S>,
    mut outbound_rx: mpsc::Receiver<RpcMessage>,
    max_frame_bytes: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) -> (WriteHalf<S>, Result<CloseReason>)
where
    S: AsyncWrite + Send,
{
    loop {
        let message = tokio::select! {
            _ = shutdown_rx.changed() => break,
            message = outbound_rx.recv() => message,
        };
        let Some(message) = message else {
            return (writer, Ok(CloseReason::ChannelClosed));
        };
        if let Err(err) = write_message(&mut writer, &message, max_frame_bytes).await {
            warn!(error = %err, "rpc write failed");
            return (writer, Err(err));
        }
    }

    // Flush what was already queued; the peer may still be reading.
    while let Ok(message) = outbound_rx.try_recv() {
        if write_message(&mut writer, &message, max_frame_bytes).await.is_err() {
            break;
        }
    }
    (writer, Ok(CloseReason::ExplicitClose))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    struct Echo;

    #[async_trait]
    impl RpcHandler for Echo {
        async fn handle(&self, method: &str, params: Value) -> Result<Value, RpcError> {
            match method {
                "echo" => Ok(params),
                "stall" => std::future::pending().await,
                other => Err(RpcError::MethodNotFound(other.to_string())),
            }
        }
    }

    fn pair() -> (RpcPeer, RpcPeer, tokio::task::JoinHandle<DriverExit<tokio::io::DuplexStream>>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (peer_a, driver_a) = channel(a, RpcConfig::default());
        let (peer_b, driver_b) = channel(b, RpcConfig::default());
        tokio::spawn(driver_b.run(Arc::new(Echo)));
        let handle = tokio::spawn(driver_a.run(Arc::new(Echo)));
        (peer_a, peer_b, handle)
    }

    #[tokio::test]
    async fn call_receives_matching_response() {
        let (a, b, _driver) = pair();

        let (first, second) = tokio::join!(
            a.call("echo", json!(["one"])),
            a.call("echo", json!({"two": 2}))
        );
        assert_eq!(first.unwrap(), json!(["one"]));
        assert_eq!(second.unwrap(), json!({"two": 2}));

        let reverse = timeout(WAIT, b.call("echo", json!(null))).await.expect("timed out");
        assert_eq!(reverse.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn abandoned_calls_do_not_linger() {
        let (a, _b, _driver) = pair();

        for _ in 0..5 {
            let result = timeout(Duration::from_millis(20), a.call("stall", Value::Null)).await;
            assert!(result.is_err());
        }
        assert_eq!(a.outstanding_calls(), 0);

        let answered = timeout(WAIT, a.call("echo", json!([7]))).await.expect("timed out");
        assert_eq!(answered.unwrap(), json!([7]));
        assert_eq!(a.outstanding_calls(), 0);
    }

    #[tokio::test]
    async fn unknown_method_maps_to_error_code() {
        let (a, _b, _driver) = pair();
        let err = timeout(WAIT, a.call("nope", Value::Null))
            .await
            .expect("timed out")
            .unwrap_err();
        assert_eq!(err.code(), crate::rpc::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn undecodable_frame_is_ignored() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (_server_peer, server_driver) = channel(server, RpcConfig::default());
        tokio::spawn(server_driver.run(Arc::new(Echo)));

        let (mut reader, mut writer) = tokio::io::split(client);
        write_frame(&mut writer, b"{not json", MAX_FRAME_BYTES).await.unwrap();
        let request = RpcMessage::request(RequestId::Number(5), "echo", json!([1])).encode().unwrap();
        write_frame(&mut writer, &request, MAX_FRAME_BYTES).await.unwrap();

        let frame = timeout(WAIT, read_frame(&mut reader, MAX_FRAME_BYTES))
            .await
            .expect("timed out")
            .unwrap()
            .expect("frame");
        match RpcMessage::decode(&frame).unwrap() {
            RpcMessage::Response(response) => {
                assert_eq!(response.id, RequestId::Number(5));
                assert_eq!(response.into_result().unwrap(), json!([1]));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn outstanding_calls_fail_when_remote_goes_away() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (peer, driver) = channel(server, RpcConfig::default());
        let driver = tokio::spawn(driver.run(Arc::new(Echo)));

        // The remote reads nothing and then disconnects.
        let call = tokio::spawn({
            let peer = peer.clone();
            async move { peer.call("get", json!(["text"])).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(client);

        let result = timeout(WAIT, call).await.expect("timed out").unwrap();
        assert_eq!(result, Err(RpcError::ChannelClosed));

        let exit = timeout(WAIT, driver).await.expect("timed out").unwrap();
        assert_eq!(exit.reason.unwrap(), CloseReason::StreamClosedByPeer);
        assert!(exit.stream.is_some());
        assert!(peer.call("get", Value::Null).await.is_err());
        assert!(peer.is_closed());
    }

    #[tokio::test]
    async fn oversize_frame_ends_the_channel() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (_peer, driver) = channel(
            server,
            RpcConfig {
                max_frame_bytes: 16,
                outbound_queue_depth: 4,
            },
        );
        let driver = tokio::spawn(driver.run(Arc::new(Echo)));

        let (_reader, mut writer) = tokio::io::split(client);
        write_frame(&mut writer, &[b'x'; 64], MAX_FRAME_BYTES).await.unwrap();

        let exit = timeout(WAIT, driver).await.expect("timed out").unwrap();
        assert!(exit.reason.is_err());
    }
}
