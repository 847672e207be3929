//! Deferred render coordinator.
//!
//! Every pull of a deferred item becomes a pending render keyed by its own
//! [`RenderId`], so concurrent pulls (of the same format or different ones)
//! never replace each other. A pending render ends in exactly one way:
//! the owner supplies bytes, the owner goes away, or the timeout fires. In
//! the last two cases the waiter gets `None`. Once a render is no longer
//! awaited, its reverse `get` is aborted and its entry removed.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cb_core::format;
use cb_core::ports::{DeferredRenderPort, RenderRouterPort};
use cb_core::{ClipboardItem, FormatTag, SessionId};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderId(u64);

impl fmt::Display for RenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct PendingRender {
    format: FormatTag,
    owner: SessionId,
    waiter: oneshot::Sender<Option<Vec<u8>>>,
}

#[derive(Clone)]
pub struct DeferredRenderCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    pending: Mutex<HashMap<RenderId, PendingRender>>,
    next_id: AtomicU64,
    timeout: Duration,
    router: Arc<dyn RenderRouterPort>,
}

impl DeferredRenderCoordinator {
    pub fn new(router: Arc<dyn RenderRouterPort>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                timeout,
                router,
            }),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<RenderId, PendingRender>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, format: FormatTag, owner: SessionId) -> (RenderId, oneshot::Receiver<Option<Vec<u8>>>) {
        let id = RenderId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (waiter, rx) = oneshot::channel();
        self.pending().insert(
            id,
            PendingRender {
                format,
                owner,
                waiter,
            },
        );
        (id, rx)
    }

    /// Resolve a pending render with the owner's answer.
    ///
    /// The payload is normalized for its format before the waiter sees it;
    /// an empty answer counts as no answer. Returns false if the render was
    /// no longer pending.
    pub fn supply(&self, id: RenderId, payload: Option<Vec<u8>>) -> bool {
        let Some(pending) = self.pending().remove(&id) else {
            debug!(render_id = %id, "supply for render that is no longer pending");
            return false;
        };

        let payload = payload
            .filter(|bytes| !bytes.is_empty())
            .and_then(|bytes| {
                format::normalize(ClipboardItem::eager(pending.format.clone(), bytes)).payload
            });
        debug!(
            render_id = %id,
            format = %pending.format,
            owner = %pending.owner,
            resolved = payload.is_some(),
            "render resolved"
        );
        let _ = pending.waiter.send(payload);
        true
    }

    fn abandon(&self, id: RenderId) {
        self.pending().remove(&id);
    }

    /// Release every render waiting on `owner` with an empty result.
    pub fn cancel_owner(&self, owner: SessionId) -> usize {
        let cancelled: Vec<PendingRender> = {
            let mut pending = self.pending();
            let ids: Vec<RenderId> = pending
                .iter()
                .filter(|(_, render)| render.owner == owner)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };

        for render in &cancelled {
            debug!(format = %render.format, owner = %owner, "render cancelled, owner disconnected");
        }
        let count = cancelled.len();
        for render in cancelled {
            let _ = render.waiter.send(None);
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }
}

/// Ends a render when its waiter stops waiting, however that happens.
struct InFlightRender {
    coordinator: DeferredRenderCoordinator,
    id: RenderId,
    route: JoinHandle<()>,
}

impl Drop for InFlightRender {
    fn drop(&mut self) {
        self.route.abort();
        self.coordinator.abandon(self.id);
    }
}

#[async_trait]
impl DeferredRenderPort for DeferredRenderCoordinator {
    async fn request_render(&self, format: FormatTag, owner: SessionId) -> Option<Vec<u8>> {
        let (id, rx) = self.begin(format.clone(), owner);
        debug!(render_id = %id, format = %format, owner = %owner, "render requested");

        let coordinator = self.clone();
        let router = self.inner.router.clone();
        let route = tokio::spawn(async move {
            let payload = match router.route_get(owner, &format).await {
                Ok(payload) => payload,
                Err(e) => {
                    debug!(render_id = %id, error = %e, "render request not answered");
                    None
                }
            };
            coordinator.supply(id, payload);
        });
        let _in_flight = InFlightRender {
            coordinator: self.clone(),
            id,
            route,
        };

        match tokio::time::timeout(self.inner.timeout, rx).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(_)) => None,
            Err(_) => {
                warn!(render_id = %id, owner = %owner, "render timed out");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Semaphore;

    /// Answers once a permit is released, echoing the format and owner.
    struct GatedRouter {
        release: Semaphore,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RenderRouterPort for GatedRouter {
        async fn route_get(&self, owner: SessionId, format: &FormatTag) -> Result<Option<Vec<u8>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.release.acquire().await?.forget();
            Ok(Some(format!("{}@{}", format, owner).into_bytes()))
        }
    }

    struct SilentRouter;

    #[async_trait]
    impl RenderRouterPort for SilentRouter {
        async fn route_get(&self, _owner: SessionId, _format: &FormatTag) -> Result<Option<Vec<u8>>> {
            std::future::pending().await
        }
    }

    /// Never answers; counts calls that are still alive.
    struct HangingRouter {
        live: Arc<AtomicUsize>,
    }

    struct LiveCall(Arc<AtomicUsize>);

    impl Drop for LiveCall {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RenderRouterPort for HangingRouter {
        async fn route_get(&self, _owner: SessionId, _format: &FormatTag) -> Result<Option<Vec<u8>>> {
            self.live.fetch_add(1, Ordering::SeqCst);
            let _call = LiveCall(self.live.clone());
            std::future::pending().await
        }
    }

    struct FailingRouter;

    #[async_trait]
    impl RenderRouterPort for FailingRouter {
        async fn route_get(&self, owner: SessionId, _format: &FormatTag) -> Result<Option<Vec<u8>>> {
            anyhow::bail!("session {} is not connected", owner)
        }
    }

    fn gated() -> Arc<GatedRouter> {
        Arc::new(GatedRouter {
            release: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn concurrent_renders_resolve_independently() {
        let router = gated();
        let coordinator = DeferredRenderCoordinator::new(router.clone(), Duration::from_secs(5));

        let first = tokio::spawn({
            let c = coordinator.clone();
            async move { c.request_render(FormatTag::bitmap(), SessionId::new(1)).await }
        });
        let second = tokio::spawn({
            let c = coordinator.clone();
            async move { c.request_render(FormatTag::bitmap(), SessionId::new(2)).await }
        });

        while router.calls.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
        assert_eq!(coordinator.pending_count(), 2);
        router.release.add_permits(2);

        assert_eq!(first.await.unwrap(), Some(b"bitmap@1".to_vec()));
        assert_eq!(second.await.unwrap(), Some(b"bitmap@2".to_vec()));
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[tokio::test]
    async fn html_answers_are_wrapped() {
        let router = gated();
        let coordinator = DeferredRenderCoordinator::new(router.clone(), Duration::from_secs(5));
        let task = tokio::spawn({
            let c = coordinator.clone();
            async move { c.request_render(FormatTag::html(), SessionId::new(3)).await }
        });

        while router.calls.load(Ordering::SeqCst) < 1 {
            tokio::task::yield_now().await;
        }
        router.release.add_permits(1);

        let bytes = task.await.unwrap().expect("rendered");
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("Version:1.0\r\n"));
        assert!(text.contains("<!--StartFragment -->html@3<!--EndFragment -->"));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_render_times_out_empty() {
        let coordinator = DeferredRenderCoordinator::new(Arc::new(SilentRouter), Duration::from_secs(10));

        let result = coordinator
            .request_render(FormatTag::text(), SessionId::new(1))
            .await;

        assert_eq!(result, None);
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_renders_stop_their_requests() {
        let live = Arc::new(AtomicUsize::new(0));
        let router = Arc::new(HangingRouter { live: live.clone() });
        let coordinator = DeferredRenderCoordinator::new(router, Duration::from_millis(50));

        for _ in 0..5 {
            let result = coordinator
                .request_render(FormatTag::bitmap(), SessionId::new(1))
                .await;
            assert_eq!(result, None);
        }

        assert_eq!(coordinator.pending_count(), 0);
        tokio::time::timeout(Duration::from_secs(1), async {
            while live.load(Ordering::SeqCst) > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("reverse gets kept running after the timeout");
    }

    #[tokio::test]
    async fn dropped_waiter_releases_its_render() {
        let live = Arc::new(AtomicUsize::new(0));
        let router = Arc::new(HangingRouter { live: live.clone() });
        let coordinator = DeferredRenderCoordinator::new(router, Duration::from_secs(30));

        let waiter = tokio::spawn({
            let c = coordinator.clone();
            async move { c.request_render(FormatTag::text(), SessionId::new(2)).await }
        });
        while live.load(Ordering::SeqCst) < 1 {
            tokio::task::yield_now().await;
        }
        assert_eq!(coordinator.pending_count(), 1);

        waiter.abort();
        let _ = waiter.await;
        while live.load(Ordering::SeqCst) > 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[tokio::test]
    async fn cancel_owner_releases_only_that_owner() {
        let coordinator = DeferredRenderCoordinator::new(Arc::new(SilentRouter), Duration::from_secs(30));

        let a = tokio::spawn({
            let c = coordinator.clone();
            async move { c.request_render(FormatTag::text(), SessionId::new(1)).await }
        });
        let b = tokio::spawn({
            let c = coordinator.clone();
            async move { c.request_render(FormatTag::text(), SessionId::new(2)).await }
        });
        while coordinator.pending_count() < 2 {
            tokio::task::yield_now().await;
        }

        assert_eq!(coordinator.cancel_owner(SessionId::new(1)), 1);
        assert_eq!(a.await.unwrap(), None);
        assert_eq!(coordinator.pending_count(), 1);
        assert!(!b.is_finished());
        b.abort();
    }

    #[tokio::test]
    async fn routing_failure_resolves_empty() {
        let coordinator = DeferredRenderCoordinator::new(Arc::new(FailingRouter), Duration::from_secs(5));
        let result = coordinator
            .request_render(FormatTag::bitmap(), SessionId::new(9))
            .await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn supply_after_resolution_is_rejected() {
        let coordinator = DeferredRenderCoordinator::new(Arc::new(SilentRouter), Duration::from_secs(5));
        let (id, rx) = coordinator.begin(FormatTag::text(), SessionId::new(1));

        assert!(coordinator.supply(id, Some(b"first".to_vec())));
        assert!(!coordinator.supply(id, Some(b"second".to_vec())));
        assert_eq!(rx.await.unwrap(), Some(b"first".to_vec()));
    }

    #[tokio::test]
    async fn empty_answer_counts_as_no_answer() {
        let coordinator = DeferredRenderCoordinator::new(Arc::new(SilentRouter), Duration::from_secs(5));
        let (id, rx) = coordinator.begin(FormatTag::text(), SessionId::new(1));
        coordinator.supply(id, Some(Vec::new()));
        assert_eq!(rx.await.unwrap(), None);
    }
}
