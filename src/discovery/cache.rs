//! Single-flight proxy list cache.
//!
//! The cache answers from memory while it holds addresses. When it is empty,
//! the first caller starts a refresh task and every concurrent caller waits on
//! that same task through a `watch` channel, so at most one discovery request
//! is in flight. A failed refresh leaves the cache empty; its error is handed
//! to every waiter and kept as [`ProxyCache::last_error`]. The next caller
//! starts a fresh refresh.
//!
//! Refresh tasks are admitted through the client's [`StopGroup`] and run under
//! its context: they outlive the caller that started them, and once the
//! client stops no new refresh starts.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::context::{Context, StopGroup};
use crate::error::{Error, Result};

/// Source of proxy addresses.
#[async_trait]
pub trait Discoverer: Send + Sync {
    async fn discover(&self, ctx: &Context) -> Result<Vec<String>>;
}

type RefreshOutcome = Option<std::result::Result<Vec<String>, Arc<Error>>>;

#[derive(Default)]
struct CacheState {
    proxies: Vec<String>,
    last_error: Option<Arc<Error>>,
    refresh: Option<watch::Receiver<RefreshOutcome>>,
}

struct CacheInner {
    name: &'static str,
    discoverer: Arc<dyn Discoverer>,
    stop: StopGroup,
    state: Mutex<CacheState>,
}

/// Cached proxy list with single-flight refresh.
#[derive(Clone)]
pub struct ProxyCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for ProxyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ProxyCache")
            .field("name", &self.inner.name)
            .field("proxies", &state.proxies)
            .field("refreshing", &state.refresh.is_some())
            .finish()
    }
}

impl ProxyCache {
    /// `name` identifies the cache in log events.
    pub fn new(name: &'static str, discoverer: Arc<dyn Discoverer>, stop: StopGroup) -> Self {
        ProxyCache {
            inner: Arc::new(CacheInner {
                name,
                discoverer,
                stop,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Cached addresses, refreshing first if the cache is empty.
    pub async fn list(&self, ctx: &Context) -> Result<Vec<String>> {
        let mut rx = {
            let mut state = self.inner.state.lock();
            if !state.proxies.is_empty() {
                return Ok(state.proxies.clone());
            }
            match &state.refresh {
                // A closed channel means the refresh task died without
                // reporting; start over.
                Some(rx) if rx.has_changed().is_ok() => rx.clone(),
                _ => {
                    let rx = self.start_refresh()?;
                    state.refresh = Some(rx.clone());
                    rx
                }
            }
        };

        let outcome = ctx
            .run(async {
                rx.wait_for(Option::is_some)
                    .await
                    .map(|outcome| outcome.clone())
                    .map_err(|_| Error::ClientStopped)
            })
            .await?;

        match outcome {
            Some(Ok(proxies)) => Ok(proxies),
            Some(Err(err)) => Err(Error::Shared(err)),
            None => Err(Error::ClientStopped),
        }
    }

    fn start_refresh(&self) -> Result<watch::Receiver<RefreshOutcome>> {
        let guard = self.inner.stop.try_add().ok_or(Error::ClientStopped)?;
        let (tx, rx) = watch::channel(None);
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let _guard = guard;
            debug!(cache = inner.name, "proxy_refresh_started");

            let result = match inner.discoverer.discover(inner.stop.context()).await {
                Ok(proxies) if proxies.is_empty() => Err(Error::EmptyProxyList),
                other => other,
            };

            let outcome = {
                let mut state = inner.state.lock();
                state.refresh = None;
                match result {
                    Ok(proxies) => {
                        debug!(cache = inner.name, count = proxies.len(), "proxy_refresh_completed");
                        state.proxies.clone_from(&proxies);
                        state.last_error = None;
                        Ok(proxies)
                    }
                    Err(err) => {
                        warn!(cache = inner.name, error = %err, "proxy_refresh_failed");
                        let err = err.into_shared();
                        state.last_error = Some(Arc::clone(&err));
                        Err(err)
                    }
                }
            };
            tx.send_replace(Some(outcome));
        });

        Ok(rx)
    }

    /// Drop the cached addresses; the next [`ProxyCache::list`] refreshes.
    pub fn invalidate(&self) {
        self.inner.state.lock().proxies.clear();
    }

    /// Error of the most recent refresh, if it failed.
    pub fn last_error(&self) -> Option<Arc<Error>> {
        self.inner.state.lock().last_error.clone()
    }

    /// Addresses currently cached, without refreshing.
    pub fn cached(&self) -> Vec<String> {
        self.inner.state.lock().proxies.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Counting {
        calls: AtomicUsize,
        result: std::result::Result<Vec<String>, String>,
    }

    #[async_trait]
    impl Discoverer for Counting {
        async fn discover(&self, _ctx: &Context) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.result.clone().map_err(Error::Protocol)
        }
    }

    fn counting(result: std::result::Result<Vec<String>, String>) -> Arc<Counting> {
        Arc::new(Counting {
            calls: AtomicUsize::new(0),
            result,
        })
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let discoverer = counting(Ok(vec!["h1".into(), "h2".into()]));
        let cache = ProxyCache::new("test", discoverer.clone(), StopGroup::new());

        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.list(&Context::background()).await })
            })
            .collect();
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap().unwrap(), vec!["h1", "h2"]);
        }
        assert_eq!(discoverer.calls.load(Ordering::SeqCst), 1);

        // Served from memory now.
        cache.list(&Context::background()).await.unwrap();
        assert_eq!(discoverer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_is_reported_then_retried() {
        let discoverer = counting(Err("discovery down".into()));
        let cache = ProxyCache::new("test", discoverer.clone(), StopGroup::new());

        let err = cache.list(&Context::background()).await.unwrap_err();
        assert!(err.to_string().contains("discovery down"));
        assert!(cache.last_error().is_some());
        assert!(cache.cached().is_empty());

        cache.list(&Context::background()).await.unwrap_err();
        assert_eq!(discoverer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_list_is_an_error() {
        let cache = ProxyCache::new("test", counting(Ok(Vec::new())), StopGroup::new());
        let err = cache.list(&Context::background()).await.unwrap_err();
        assert!(matches!(&err, Error::Shared(inner) if matches!(**inner, Error::EmptyProxyList)));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let discoverer = counting(Ok(vec!["h1".into()]));
        let cache = ProxyCache::new("test", discoverer.clone(), StopGroup::new());
        cache.list(&Context::background()).await.unwrap();
        cache.invalidate();
        cache.list(&Context::background()).await.unwrap();
        assert_eq!(discoverer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_waiter_cancellation() {
        let cache = ProxyCache::new("test", counting(Ok(vec!["h1".into()])), StopGroup::new());
        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();
        let err = cache.list(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_no_refresh_after_stop() {
        let stop = StopGroup::new();
        let discoverer = counting(Ok(vec!["h1".into()]));
        let cache = ProxyCache::new("test", discoverer.clone(), stop.clone());
        stop.stop().await;

        let err = cache.list(&Context::background()).await.unwrap_err();
        assert!(matches!(err, Error::ClientStopped));
        assert_eq!(discoverer.calls.load(Ordering::SeqCst), 0);
    }
}
