//! Proxy banning (RPC only).

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use super::classify::is_ban_worthy;
use crate::call::{Call, CallResult};
use crate::context::Context;
use crate::discovery::BanList;
use crate::error::{Error, Result};
use crate::pipeline::{BodyReader, BodyWriter, Interceptor, MapWriterErr, Next};
use crate::rpc::ConnectionPool;

/// Bans the proxy an attempt went to when the attempt failed in a way that
/// points at the proxy, and drops its pooled connection.
#[derive(Debug, Clone)]
pub struct ProxyBouncer {
    bans: Arc<BanList>,
    pool: Arc<ConnectionPool>,
}

impl ProxyBouncer {
    pub fn new(bans: Arc<BanList>, pool: Arc<ConnectionPool>) -> Self {
        ProxyBouncer { bans, pool }
    }

    fn banish(bans: &BanList, pool: &ConnectionPool, call: &Call, addr: &str, err: &Error) {
        if !is_ban_worthy(err) {
            return;
        }
        warn!(
            method = %call.verb,
            call_id = %call.call_id,
            proxy = addr,
            ban_ms = bans.window().as_millis() as u64,
            error = %err,
            "proxy_banned"
        );
        bans.ban(addr);
        pool.discard(addr);
    }

    fn check<T>(&self, call: &Call, res: Result<T>) -> Result<T> {
        if let (Err(err), Some(addr)) = (&res, &call.selected_proxy) {
            Self::banish(&self.bans, &self.pool, call, addr, err);
        }
        res
    }
}

#[async_trait]
impl Interceptor for ProxyBouncer {
    fn name(&self) -> &'static str {
        "proxy_bouncer"
    }

    async fn intercept(&self, ctx: &Context, call: &mut Call, next: Next<'_>) -> Result<CallResult> {
        call.selected_proxy = None;
        let res = next.invoke(ctx, call).await;
        self.check(call, res)
    }

    async fn intercept_read(
        &self,
        ctx: &Context,
        call: &mut Call,
        next: Next<'_>,
    ) -> Result<Box<dyn BodyReader>> {
        call.selected_proxy = None;
        let res = next.invoke_read(ctx, call).await;
        self.check(call, res)
    }

    async fn intercept_write(
        &self,
        ctx: &Context,
        call: &mut Call,
        next: Next<'_>,
    ) -> Result<Box<dyn BodyWriter>> {
        call.selected_proxy = None;
        let res = next.invoke_write(ctx, call).await;
        let writer = self.check(call, res)?;
        let Some(addr) = call.selected_proxy.clone() else {
            return Ok(writer);
        };

        let bans = Arc::clone(&self.bans);
        let pool = Arc::clone(&self.pool);
        let call = call.clone();
        Ok(Box::new(MapWriterErr {
            inner: writer,
            map: move |err: Error| {
                Self::banish(&bans, &pool, &call, &addr, &err);
                err
            },
        }))
    }
}
