use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::pool::{ConnectionPool, PooledBus};
use super::{RequestHeader, ResponseHeader, API_SERVICE};
use crate::call::{Call, CallResult};
use crate::context::Context;
use crate::discovery::ProxySelector;
use crate::error::{Error, Result};
use crate::pipeline::{BodyReader, BodyWriter, BufferedReader, Transport};
use crate::wire;

struct RpcInner {
    selector: ProxySelector,
    pool: Arc<ConnectionPool>,
    token: Option<String>,
}

impl RpcInner {
    /// Target of the next attempt, recorded on the call for the ban logic.
    async fn select(&self, ctx: &Context, call: &mut Call) -> Result<String> {
        let addr = match &call.proxy {
            Some(proxy) => proxy.clone(),
            None => self.selector.pick(ctx).await?,
        };
        call.selected_proxy = Some(addr.clone());
        Ok(addr)
    }

    fn request(&self, ctx: &Context, call: &Call, request_id: Uuid, body: Option<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
        let token = ctx
            .credentials()
            .map(|credentials| credentials.token().to_string())
            .or_else(|| self.token.clone());
        let header = RequestHeader {
            request_id,
            service: API_SERVICE.to_string(),
            method: call.verb.name().to_string(),
            params: call.wire_params(),
            mutation_id: call.mutation_id,
            retry: call.retry,
            token,
        };

        let mut parts = vec![
            serde_json::to_vec(&header)?,
            body.or_else(|| call.payload.clone()).unwrap_or_default(),
        ];
        if let Some(rowset) = &call.rowset {
            parts.push(wire::write_rowset(&rowset.names, &rowset.rows));
        }
        Ok(parts)
    }

    async fn fresh_round_trip(
        &self,
        ctx: &Context,
        addr: &str,
        parts: &[Vec<u8>],
    ) -> Result<(PooledBus, Vec<Vec<u8>>)> {
        let mut bus = ctx.run(async { Ok(self.pool.dial(addr).await?) }).await?;
        let response = round_trip(ctx, &mut bus, parts).await?;
        Ok((bus, response))
    }

    /// One request/response exchange with `addr`. Returns the response
    /// header and the parts following it.
    async fn exchange(
        &self,
        ctx: &Context,
        call: &Call,
        addr: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(ResponseHeader, Vec<Vec<u8>>)> {
        let request_id = Uuid::new_v4();
        let parts = self.request(ctx, call, request_id, body)?;

        debug!(method = %call.verb, call_id = %call.call_id, %request_id, proxy = addr, "rpc_request_sent");
        let (bus, response) = match self.pool.take_idle(addr) {
            Some(mut bus) => match round_trip(ctx, &mut bus, &parts).await {
                // Idle connection closed by the proxy: redial once, not a
                // proxy failure.
                Err(Error::Bus(err)) if err.is_peer_gone() => {
                    debug!(proxy = addr, error = %err, "bus_idle_connection_lost");
                    self.fresh_round_trip(ctx, addr, &parts).await?
                }
                res => (bus, res?),
            },
            None => self.fresh_round_trip(ctx, addr, &parts).await?,
        };

        let mut response = response.into_iter();
        let raw_header = response
            .next()
            .ok_or_else(|| Error::Protocol("response has no header part".to_string()))?;
        let header: ResponseHeader = serde_json::from_slice(&raw_header)
            .map_err(|err| Error::Protocol(format!("malformed response header: {err}")))?;
        if header.request_id != request_id {
            return Err(Error::Protocol(format!(
                "response to request {} received while waiting for {request_id}",
                header.request_id
            )));
        }

        self.pool.release(addr, bus);
        if let Some(err) = header.error {
            return Err(err.into());
        }
        Ok((header, response.collect()))
    }
}

/// Send `parts` and wait for the reply message.
async fn round_trip(ctx: &Context, bus: &mut PooledBus, parts: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
    ctx.run(async {
        bus.send(parts).await?;
        Ok(bus.receive().await?)
    })
    .await
}

/// Transport sending calls to RPC proxies over pooled bus connections.
#[derive(Clone)]
pub struct RpcTransport {
    inner: Arc<RpcInner>,
}

impl std::fmt::Debug for RpcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcTransport")
            .field("selector", &self.inner.selector)
            .field("pool", &self.inner.pool)
            .finish_non_exhaustive()
    }
}

impl RpcTransport {
    pub fn new(selector: ProxySelector, pool: Arc<ConnectionPool>, token: Option<String>) -> Self {
        RpcTransport {
            inner: Arc::new(RpcInner { selector, pool, token }),
        }
    }
}

#[async_trait]
impl Transport for RpcTransport {
    async fn invoke(&self, ctx: &Context, call: &mut Call) -> Result<CallResult> {
        let addr = self.inner.select(ctx, call).await?;
        let (_, mut parts) = self.inner.exchange(ctx, call, &addr, None).await?;

        let payload = if parts.is_empty() { Vec::new() } else { parts.remove(0) };
        Ok(CallResult {
            payload,
            attachments: parts,
        })
    }

    async fn invoke_read(&self, ctx: &Context, call: &mut Call) -> Result<Box<dyn BodyReader>> {
        let addr = self.inner.select(ctx, call).await?;
        let (header, parts) = self.inner.exchange(ctx, call, &addr, None).await?;

        if let Some(params) = &header.response_parameters {
            call.deliver_rsp_params(&serde_json::to_vec(params)?)?;
        }
        Ok(Box::new(BufferedReader::new(parts)))
    }

    async fn invoke_write(&self, ctx: &Context, call: &mut Call) -> Result<Box<dyn BodyWriter>> {
        let addr = self.inner.select(ctx, call).await?;
        Ok(Box::new(RpcWriter {
            inner: Arc::clone(&self.inner),
            ctx: ctx.clone(),
            call: call.clone(),
            addr,
            buf: Vec::new(),
            finished: false,
        }))
    }
}

/// Buffers the request body and sends it as one message on finish.
struct RpcWriter {
    inner: Arc<RpcInner>,
    ctx: Context,
    call: Call,
    addr: String,
    buf: Vec<u8>,
    finished: bool,
}

#[async_trait]
impl BodyWriter for RpcWriter {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.finished {
            return Err(Error::Protocol("write after finish".to_string()));
        }
        if let Some(err) = self.ctx.err() {
            return Err(err);
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Err(Error::Protocol("writer is already finished".to_string()));
        }
        self.finished = true;
        let body = std::mem::take(&mut self.buf);
        self.inner
            .exchange(&self.ctx, &self.call, &self.addr, Some(body))
            .await
            .map(|_| ())
    }
}
