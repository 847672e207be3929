//! Connection listener.
//!
//! Accepts TCP connections and turns each into a session: register with
//! the registry, serve the RPC channel until it closes, then unregister,
//! cancel the session's pending renders and only then release the socket.
//! The accept loop returns once the registry raises its stop signal.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use cb_core::ports::PayloadExportPort;
use cb_platform::ClipboardGateway;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::handler::SessionHandler;
use crate::render::DeferredRenderCoordinator;
use crate::rpc::{channel, RpcConfig};
use crate::session::SessionRegistry;

/// Everything a connection needs to become a session.
#[derive(Clone)]
pub struct ConnectionContext {
    pub registry: SessionRegistry,
    pub coordinator: DeferredRenderCoordinator,
    pub gateway: ClipboardGateway,
    pub exporter: Arc<dyn PayloadExportPort>,
    pub rpc: RpcConfig,
}

pub struct ConnectionListener {
    listener: TcpListener,
    ctx: ConnectionContext,
}

impl ConnectionListener {
    pub async fn bind(addr: &str, ctx: ConnectionContext) -> Result<Self> {
        Ok(Self::new(bind_tcp(addr).await?, ctx))
    }

    pub fn new(listener: TcpListener, ctx: ConnectionContext) -> Self {
        Self { listener, ctx }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("listener has no local address")
    }

    /// Accept connections until the registry asks us to stop.
    pub async fn run(self) -> Result<()> {
        let mut stop = self.ctx.registry.subscribe_stop();
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "listening for peers");
        }

        loop {
            tokio::select! {
                _ = stopped(&mut stop) => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let ctx = self.ctx.clone();
                        tokio::spawn(serve_connection(ctx, stream, addr));
                    }
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                    }
                },
            }
        }

        info!("listener stopped");
        Ok(())
    }
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn serve_connection(ctx: ConnectionContext, stream: TcpStream, addr: SocketAddr) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(error = %err, "failed to set TCP_NODELAY");
    }

    let (peer, driver) = channel(stream, ctx.rpc.clone());
    let session = ctx.registry.register(Arc::new(peer));
    let span = info_span!("session", session_id = %session, peer = %addr);

    async move {
        info!("session connected");
        let handler = Arc::new(SessionHandler::new(
            session,
            ctx.gateway.clone(),
            ctx.exporter.clone(),
        ));
        let exit = driver.run(handler).await;
        match &exit.reason {
            Ok(reason) => info!(%reason, "session ended"),
            Err(err) => warn!(error = %err, "session ended with error"),
        }

        ctx.registry.unregister(session);
        let cancelled = ctx.coordinator.cancel_owner(session);
        if cancelled > 0 {
            debug!(cancelled, "released pending renders");
        }
        drop(exit.stream);
        debug!("socket released");
    }
    .instrument(span)
    .await
}

/// Bind a listener from `host:port` text, for callers that need the
/// address before the rest of the server exists.
pub async fn bind_tcp(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))
}
