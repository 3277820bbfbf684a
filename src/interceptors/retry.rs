//! Retrying interceptors.
//!
//! Both retriers replay a call on transient failures with exponential backoff
//! until `max_attempts` attempts were made, then surface the last error. They
//! differ in what they apply to:
//!
//! - [`MutationRetrier`]: mutating verbs. A mutation id is generated once per
//!   logical call and every replay carries it plus `retry = true`, so the
//!   server applies the side effect at most once.
//! - [`ReadRetrier`]: verbs without side effects; no mutation id.
//!
//! Streaming reads and writes are never retried.

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use super::classify::is_retryable;
use crate::call::{Call, CallResult};
use crate::config::RetryConfig;
use crate::context::Context;
use crate::error::Result;
use crate::pipeline::{Interceptor, Next};

async fn run_with_retries(
    policy: &RetryConfig,
    ctx: &Context,
    call: &mut Call,
    next: Next<'_>,
    mark_retry: bool,
) -> Result<CallResult> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let err = match next.invoke(ctx, call).await {
            Ok(res) => return Ok(res),
            Err(err) => err,
        };
        if attempt >= max_attempts || !is_retryable(&err) {
            return Err(err);
        }

        let backoff = policy.backoff(attempt);
        warn!(
            method = %call.verb,
            call_id = %call.call_id,
            attempt,
            max_attempts,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "retrying_call"
        );
        drop(err);

        ctx.sleep(backoff).await?;
        attempt += 1;
        if mark_retry {
            call.retry = true;
        }
    }
}

/// Idempotent replay of mutating calls.
#[derive(Debug, Clone, Default)]
pub struct MutationRetrier {
    policy: RetryConfig,
}

impl MutationRetrier {
    pub fn new(policy: RetryConfig) -> Self {
        MutationRetrier { policy }
    }
}

#[async_trait]
impl Interceptor for MutationRetrier {
    fn name(&self) -> &'static str {
        "mutation_retrier"
    }

    async fn intercept(&self, ctx: &Context, call: &mut Call, next: Next<'_>) -> Result<CallResult> {
        if !call.verb.is_mutating() {
            return next.invoke(ctx, call).await;
        }
        call.mutation_id.get_or_insert_with(Uuid::new_v4);
        run_with_retries(&self.policy, ctx, call, next, true).await
    }
}

/// Bounded replay of side-effect free calls.
#[derive(Debug, Clone, Default)]
pub struct ReadRetrier {
    policy: RetryConfig,
}

impl ReadRetrier {
    pub fn new(policy: RetryConfig) -> Self {
        ReadRetrier { policy }
    }
}

#[async_trait]
impl Interceptor for ReadRetrier {
    fn name(&self) -> &'static str {
        "read_retrier"
    }

    async fn intercept(&self, ctx: &Context, call: &mut Call, next: Next<'_>) -> Result<CallResult> {
        if !call.verb.is_safe_to_retry() {
            return next.invoke(ctx, call).await;
        }
        run_with_retries(&self.policy, ctx, call, next, false).await
    }
}
