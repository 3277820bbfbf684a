//! Request/response logging.

use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, warn};

use crate::call::{Call, CallResult};
use crate::context::Context;
use crate::error::Result;
use crate::pipeline::{BodyReader, BodyWriter, Interceptor, Next};

/// Emits one event when a call starts and one when it ends.
#[derive(Debug, Default)]
pub struct LoggingInterceptor;

#[async_trait]
impl Interceptor for LoggingInterceptor {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn intercept(&self, ctx: &Context, call: &mut Call, next: Next<'_>) -> Result<CallResult> {
        let start = Instant::now();
        debug!(method = %call.verb, call_id = %call.call_id, "call_started");

        let res = next.invoke(ctx, call).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &res {
            Ok(result) => debug!(
                method = %call.verb,
                call_id = %call.call_id,
                elapsed_ms,
                size = result.payload.len(),
                "call_completed"
            ),
            Err(err) => warn!(
                method = %call.verb,
                call_id = %call.call_id,
                proxy = call.selected_proxy.as_deref().unwrap_or(""),
                elapsed_ms,
                error = %err,
                "call_failed"
            ),
        }
        res
    }

    async fn intercept_read(
        &self,
        ctx: &Context,
        call: &mut Call,
        next: Next<'_>,
    ) -> Result<Box<dyn BodyReader>> {
        debug!(method = %call.verb, call_id = %call.call_id, "read_started");
        let res = next.invoke_read(ctx, call).await;
        if let Err(err) = &res {
            warn!(method = %call.verb, call_id = %call.call_id, error = %err, "read_failed");
        }
        res
    }

    async fn intercept_write(
        &self,
        ctx: &Context,
        call: &mut Call,
        next: Next<'_>,
    ) -> Result<Box<dyn BodyWriter>> {
        debug!(method = %call.verb, call_id = %call.call_id, "write_started");
        let res = next.invoke_write(ctx, call).await;
        if let Err(err) = &res {
            warn!(method = %call.verb, call_id = %call.call_id, error = %err, "write_failed");
        }
        res
    }
}
