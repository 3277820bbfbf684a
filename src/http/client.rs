use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::body::{BodyChunk, HttpReader, HttpWriter, WRITE_QUEUE_DEPTH};
use super::{
    check_response, FORMAT, X_YT_CORRELATION_ID, X_YT_HEADER_FORMAT, X_YT_INPUT_FORMAT,
    X_YT_OUTPUT_FORMAT, X_YT_PARAMETERS, X_YT_RESPONSE_PARAMETERS,
};
use crate::call::{Call, CallResult, HttpMethod};
use crate::config::{ClusterConfig, ClusterUrl};
use crate::context::{Context, StopGroup};
use crate::discovery::{pick_random, HostsDiscoverer, ProxyCache};
use crate::error::{Error, Result};
use crate::pipeline::{BodyReader, BodyWriter, Transport};
use crate::wire;

/// Transport sending calls to HTTP proxies.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    cluster: ClusterUrl,
    api_version: String,
    token: Option<String>,
    request_timeout: Option<Duration>,
    heavy: Option<ProxyCache>,
}

impl HttpTransport {
    pub fn new(config: &ClusterConfig, stop: StopGroup) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self::with_client(http, config, stop))
    }

    /// Transport over an existing `reqwest` client.
    pub fn with_client(http: reqwest::Client, config: &ClusterConfig, stop: StopGroup) -> Self {
        let cluster = config.cluster_url();
        let heavy = (!cluster.disable_discovery).then(|| {
            let discoverer = HostsDiscoverer::new(http.clone(), cluster.url.clone());
            ProxyCache::new("heavy", Arc::new(discoverer), stop)
        });

        HttpTransport {
            http,
            cluster,
            api_version: config.api_version.clone(),
            token: config.token.clone(),
            request_timeout: config.request_timeout(),
            heavy,
        }
    }

    /// Heavy proxy cache, absent when discovery is disabled.
    pub fn heavy_proxies(&self) -> Option<&ProxyCache> {
        self.heavy.as_ref()
    }

    /// Proxy URL for this attempt, recorded on the call.
    async fn target(&self, ctx: &Context, call: &mut Call) -> Result<String> {
        let url = match (&call.proxy, &self.heavy) {
            (Some(proxy), _) => ClusterUrl::normalize(proxy, true).url,
            (None, Some(heavy)) if call.verb.is_heavy() => {
                let hosts = heavy.list(ctx).await?;
                let host = pick_random(&hosts).ok_or(Error::EmptyProxyList)?;
                ClusterUrl::normalize(host, true).url
            }
            _ => self.cluster.url.clone(),
        };
        call.selected_proxy = Some(url.clone());
        Ok(url)
    }

    fn authorization(&self, ctx: &Context) -> Option<String> {
        match ctx.credentials() {
            Some(credentials) => Some(credentials.authorization()),
            None => self.token.as_ref().map(|token| format!("OAuth {token}")),
        }
    }

    fn request(
        &self,
        ctx: &Context,
        call: &Call,
        base: &str,
        body: Option<reqwest::Body>,
    ) -> Result<RequestBuilder> {
        let method = match call.verb.http_method() {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
        };
        let url = format!("{base}/api/{}/{}", self.api_version, call.verb.name());
        let params = serde_json::to_vec(&call.wire_params())?;

        let mut req = self
            .http
            .request(method.clone(), url)
            .header(X_YT_CORRELATION_ID, call.call_id.to_string())
            .header(X_YT_HEADER_FORMAT, FORMAT)
            .header(X_YT_OUTPUT_FORMAT, FORMAT);
        if let Some(auth) = self.authorization(ctx) {
            req = req.header(AUTHORIZATION, auth);
        }

        req = match body {
            Some(body) => req
                .header(X_YT_INPUT_FORMAT, FORMAT)
                .header(X_YT_PARAMETERS, params)
                .body(body),
            None if method == Method::POST => req.header(CONTENT_TYPE, "application/json").body(params),
            None => req.header(X_YT_PARAMETERS, params),
        };
        Ok(req)
    }
}

/// Request body of a unary call: the raw payload, or the rowset as JSON
/// lines.
fn call_body(call: &Call) -> Result<Option<Vec<u8>>> {
    if let Some(payload) = &call.payload {
        return Ok(Some(payload.clone()));
    }
    let Some(rowset) = &call.rowset else {
        return Ok(None);
    };
    let mut buf = Vec::new();
    for row in wire::rows_to_json(&rowset.names, &rowset.rows)? {
        serde_json::to_writer(&mut buf, &row)?;
        buf.push(b'\n');
    }
    Ok(Some(buf))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn invoke(&self, ctx: &Context, call: &mut Call) -> Result<CallResult> {
        let base = self.target(ctx, call).await?;
        let body = call_body(call)?.map(reqwest::Body::from);
        let mut req = self.request(ctx, call, &base, body)?;
        if let Some(timeout) = self.request_timeout {
            req = req.timeout(timeout);
        }

        ctx.run(async {
            let rsp = check_response(req.send().await?).await?;
            Ok(CallResult::from_payload(rsp.bytes().await?.to_vec()))
        })
        .await
    }

    async fn invoke_read(&self, ctx: &Context, call: &mut Call) -> Result<Box<dyn BodyReader>> {
        let base = self.target(ctx, call).await?;
        let body = call_body(call)?.map(reqwest::Body::from);
        let req = self.request(ctx, call, &base, body)?;

        let rsp = ctx.run(async { check_response(req.send().await?).await }).await?;
        if let Some(raw) = rsp.headers().get(X_YT_RESPONSE_PARAMETERS) {
            call.deliver_rsp_params(raw.as_bytes())?;
        }
        Ok(Box::new(HttpReader::new(rsp, ctx.clone())))
    }

    async fn invoke_write(&self, ctx: &Context, call: &mut Call) -> Result<Box<dyn BodyWriter>> {
        let base = self.target(ctx, call).await?;
        let (tx, mut rx) = mpsc::channel::<BodyChunk>(WRITE_QUEUE_DEPTH);
        let body = reqwest::Body::wrap_stream(futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)));
        let req = self.request(ctx, call, &base, Some(body))?;

        let request_ctx = ctx.clone();
        let request = tokio::spawn(async move {
            request_ctx
                .run(async { check_response(req.send().await?).await.map(|_| ()) })
                .await
        });
        Ok(Box::new(HttpWriter::new(tx, request, ctx.clone())))
    }
}
