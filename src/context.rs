//! Call Context and Client Stop Group
//!
//! Every call carries a [`Context`]: a set of cancellation signals, an
//! optional deadline and optional per-request credentials. Any suspension
//! point in the call layer (network I/O, waiting for a proxy refresh, a
//! streamed body, a retry backoff) runs through [`Context::run`], so
//! cancellation surfaces promptly as [`Error::Cancelled`] or
//! [`Error::DeadlineExceeded`].
//!
//! ## Design
//!
//! - Cancellation is a `tokio_util` [`CancellationToken`] tree; derived
//!   contexts hold child tokens, and [`Context::merge`] links in the tokens
//!   of another context
//! - Deadlines are enforced with `tokio::time::timeout_at`
//! - [`StopGroup`] pairs the client's root token with a [`TaskTracker`]; it
//!   admits work until stopped, then cancels and waits for admitted work to
//!   drain

use futures_util::future::select_all;
use std::future::{pending, Future};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tokio_util::task::TaskTracker;

use crate::error::{Error, Result};

/// Per-request credentials, overriding the client's configured token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// OAuth token
    Token(String),
}

impl Credentials {
    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> String {
        match self {
            Credentials::Token(token) => format!("OAuth {token}"),
        }
    }

    pub fn token(&self) -> &str {
        match self {
            Credentials::Token(token) => token,
        }
    }
}

/// Cancellation and deadline scope of a call.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    linked: Vec<CancellationToken>,
    deadline: Option<Instant>,
    credentials: Option<Credentials>,
}

/// Cancels the [`Context`] it was created with (and every context derived
/// from it). Dropping the handle does not cancel.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for Context {
    fn default() -> Self {
        Context {
            token: CancellationToken::new(),
            linked: Vec::new(),
            deadline: None,
            credentials: None,
        }
    }
}

impl Context {
    /// Context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Context::default()
    }

    /// Derive a context with its own cancellation handle.
    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        let token = self.token.child_token();
        let mut ctx = self.clone();
        ctx.token = token.clone();
        (ctx, CancelHandle { token })
    }

    /// Derive a context that expires after `timeout` (or earlier, if the
    /// parent's deadline is sooner).
    pub fn with_timeout(&self, timeout: Duration) -> Context {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Context {
        let mut ctx = self.clone();
        ctx.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        ctx
    }

    pub fn with_credentials(&self, credentials: Credentials) -> Context {
        let mut ctx = self.clone();
        ctx.credentials = Some(credentials);
        ctx
    }

    /// Context done when either `self` or `other` is done. Credentials of
    /// `self` win.
    pub fn merge(&self, other: &Context) -> Context {
        let mut ctx = self.clone();
        ctx.linked.push(other.token.clone());
        ctx.linked.extend(other.linked.iter().cloned());
        if let Some(deadline) = other.deadline {
            ctx = ctx.with_deadline(deadline);
        }
        if ctx.credentials.is_none() {
            ctx.credentials.clone_from(&other.credentials);
        }
        ctx
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.linked.iter().any(CancellationToken::is_cancelled)
    }

    /// Non-blocking check: the error the context is done with, if any.
    pub fn err(&self) -> Option<Error> {
        if self.is_cancelled() {
            return Some(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once this context's token or any linked token is cancelled.
    async fn cancelled(&self) {
        if self.linked.is_empty() {
            return self.token.cancelled().await;
        }
        let linked = select_all(self.linked.iter().map(|token| Box::pin(token.cancelled())));
        tokio::select! {
            () = self.token.cancelled() => {}
            _ = linked => {}
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> Error {
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            () = self.cancelled() => Error::Cancelled,
            () = expired => Error::DeadlineExceeded,
        }
    }

    /// Run `fut` unless the context finishes first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        let cancellable = async {
            tokio::select! {
                biased;
                () = self.cancelled() => Err(Error::Cancelled),
                res = fut => res,
            }
        };
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, cancellable)
                .await
                .unwrap_or(Err(Error::DeadlineExceeded)),
            None => cancellable.await,
        }
    }

    /// Sleep for `duration`, returning early with an error on cancellation.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}

// ============================================================================
// Stop Group
// ============================================================================

/// Tracks background work owned by a client.
///
/// Work is admitted with [`StopGroup::try_add`] until [`StopGroup::stop`] is
/// called. Stopping cancels [`StopGroup::context`] and waits for admitted work
/// to release its guard; nothing is forcibly aborted.
#[derive(Debug, Clone)]
pub struct StopGroup {
    ctx: Context,
    cancel: CancelHandle,
    tracker: TaskTracker,
}

/// Admission ticket returned by [`StopGroup::try_add`].
#[derive(Debug)]
pub struct StopGuard {
    _token: TaskTrackerToken,
}

impl Default for StopGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl StopGroup {
    pub fn new() -> Self {
        let (ctx, cancel) = Context::background().with_cancel();
        StopGroup {
            ctx,
            cancel,
            tracker: TaskTracker::new(),
        }
    }

    /// Context cancelled when the group stops.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Admit one unit of work, or `None` once the group is stopped.
    pub fn try_add(&self) -> Option<StopGuard> {
        // Take the token first: a stop that closes the tracker afterwards
        // waits for it.
        let token = self.tracker.token();
        if self.tracker.is_closed() {
            return None;
        }
        Some(StopGuard { _token: token })
    }

    pub fn is_stopped(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Stop admitting work, cancel the group context and wait for admitted
    /// work to finish.
    pub async fn stop(&self) {
        self.tracker.close();
        self.cancel.cancel();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_wakes_done() {
        let (ctx, cancel) = Context::background().with_cancel();
        assert!(!ctx.is_done());
        let waiter = tokio::spawn(async move { ctx.done().await });
        cancel.cancel();
        let err = waiter.await.unwrap();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_child_observes_parent_cancel() {
        let (parent, cancel) = Context::background().with_cancel();
        let (child, _child_cancel) = parent.with_cancel();
        cancel.cancel();
        assert!(matches!(child.err(), Some(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_dropped_handle_does_not_cancel() {
        let (ctx, cancel) = Context::background().with_cancel();
        drop(cancel);
        let res = ctx
            .with_timeout(Duration::from_millis(20))
            .run(async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(7)
            })
            .await;
        assert_eq!(res.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_deadline_interrupts_run() {
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        let res: Result<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(Error::DeadlineExceeded)));
    }

    #[test]
    fn test_deadline_takes_minimum() {
        let ctx = Context::background().with_timeout(Duration::from_secs(1));
        let later = ctx.with_timeout(Duration::from_secs(60));
        assert_eq!(ctx.deadline(), later.deadline());
    }

    #[test]
    fn test_merge_keeps_own_credentials() {
        let a = Context::background().with_credentials(Credentials::Token("a".into()));
        let b = Context::background().with_credentials(Credentials::Token("b".into()));
        assert_eq!(a.merge(&b).credentials().unwrap().token(), "a");
        assert_eq!(Context::background().merge(&b).credentials().unwrap().token(), "b");
    }

    #[tokio::test]
    async fn test_merged_context_observes_other_cancel() {
        let (caller, _caller_cancel) = Context::background().with_cancel();
        let (scope, scope_cancel) = Context::background().with_cancel();
        let ctx = caller.merge(&scope);

        let waiter = tokio::spawn(async move {
            ctx.run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
        });
        scope_cancel.cancel();
        assert!(matches!(waiter.await.unwrap(), Err(Error::Cancelled)));
        assert!(!caller.is_done());
    }

    #[tokio::test]
    async fn test_stop_waits_for_admitted_work() {
        let group = StopGroup::new();
        let guard = group.try_add().unwrap();

        let stopper = {
            let group = group.clone();
            tokio::spawn(async move { group.stop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!stopper.is_finished());

        drop(guard);
        stopper.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_group_rejects_after_stop() {
        let group = StopGroup::new();
        let guard = group.try_add().unwrap();
        let ctx = group.context().clone();

        let stopper = {
            let group = group.clone();
            tokio::spawn(async move { group.stop().await })
        };

        // In-flight work observes cancellation and finishes on its own.
        assert!(matches!(ctx.done().await, Error::Cancelled));
        assert!(group.try_add().is_none());
        drop(guard);
        stopper.await.unwrap();
        assert!(group.is_stopped());
    }
}
