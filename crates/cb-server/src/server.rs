//! Server assembly.
//!
//! Wires the pieces together in dependency order:
//!
//! ```text
//! OwnerMark ─► SessionRegistry ─► DeferredRenderCoordinator ─► ClipboardGateway
//!                    ▲                                              │
//!                    └──── BroadcastChangeHandler ◄── ExternalChangeWatcher
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use cb_core::{OwnerMark, ServerConfig};
use cb_infra::FileExporter;
use cb_platform::{
    ClipboardFactory, ClipboardGateway, ExternalChangeWatcher, GatewayOptions, RetryPolicy,
};
use tokio::task::JoinHandle;
use tracing::info;

use crate::handler::BroadcastChangeHandler;
use crate::listener::{bind_tcp, ConnectionContext, ConnectionListener};
use crate::render::DeferredRenderCoordinator;
use crate::rpc::RpcConfig;
use crate::session::SessionRegistry;

pub struct ClipboardServer {
    listener: ConnectionListener,
    registry: SessionRegistry,
    gateway: ClipboardGateway,
    watcher: JoinHandle<()>,
}

impl ClipboardServer {
    /// Bind the listening socket and start the clipboard machinery.
    ///
    /// The socket is bound first; failing to bind is the one fatal error.
    pub async fn bind(config: &ServerConfig, factory: ClipboardFactory) -> Result<Self> {
        let tcp = bind_tcp(&config.server.address()).await?;

        let owner = Arc::new(OwnerMark::new());
        let registry = SessionRegistry::new(owner.clone(), config.server.idle_shutdown);
        let coordinator =
            DeferredRenderCoordinator::new(Arc::new(registry.clone()), config.render.timeout());

        let gateway = ClipboardGateway::spawn(
            factory,
            GatewayOptions {
                retry: RetryPolicy::from_settings(&config.clipboard),
                renderer: Some(Arc::new(coordinator.clone())),
                owner,
            },
        )
        .await?;

        let watcher = ExternalChangeWatcher::new(
            gateway.clone(),
            Arc::new(BroadcastChangeHandler::new(registry.clone())),
            &config.clipboard,
        )
        .start()
        .await?;

        let listener = ConnectionListener::new(
            tcp,
            ConnectionContext {
                registry: registry.clone(),
                coordinator,
                gateway: gateway.clone(),
                exporter: Arc::new(FileExporter::new()),
                rpc: RpcConfig::from(&config.rpc),
            },
        );

        Ok(Self {
            listener,
            registry,
            gateway,
            watcher,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn gateway(&self) -> &ClipboardGateway {
        &self.gateway
    }

    /// Serve until the listener stops, then tear down the watcher and the
    /// clipboard thread.
    pub async fn run(self) -> Result<()> {
        let Self {
            listener,
            gateway,
            watcher,
            ..
        } = self;

        let result = listener.run().await;
        watcher.abort();
        gateway.shutdown().await;
        info!("clipboard server stopped");
        result
    }
}
