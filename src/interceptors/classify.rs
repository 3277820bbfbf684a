//! Error classification.
//!
//! Decides which failures are worth another attempt and which ones should
//! get the proxy that produced them banned. [`ErrorWrapper`] turns raw
//! network failures into structured `TRANSPORT_ERROR` nodes carrying the call
//! identity; every other error passes through unchanged.

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

use crate::call::{Call, CallResult};
use crate::cluster_error::{codes, ClusterError, ErrorCode};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::pipeline::{BodyReader, BodyWriter, Interceptor, MapReaderErr, MapWriterErr, Next};

const RETRYABLE_CODES: &[ErrorCode] = &[
    codes::TRANSPORT_ERROR,
    codes::UNAVAILABLE,
    codes::REQUEST_QUEUE_SIZE_LIMIT_EXCEEDED,
    codes::PROXY_BANNED,
];

const BAN_CODES: &[ErrorCode] = &[codes::TRANSPORT_ERROR, codes::PROXY_BANNED];

fn banned_message() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)proxy .*banned").expect("valid regex"))
}

fn matches_any(err: &Error, wanted: &[ErrorCode]) -> bool {
    err.cluster_error().is_some_and(|cluster| {
        wanted.iter().any(|code| cluster.contains_code(*code)) || cluster.matches_message(banned_message())
    })
}

/// Transient failure: another attempt may succeed. Cancellation never is.
pub fn is_retryable(err: &Error) -> bool {
    if err.is_cancellation() {
        return false;
    }
    err.is_network_error() || matches_any(err, RETRYABLE_CODES)
}

/// Failure attributable to the proxy itself.
pub fn is_ban_worthy(err: &Error) -> bool {
    if err.is_cancellation() {
        return false;
    }
    err.is_network_error() || matches_any(err, BAN_CODES)
}

#[derive(Debug, Clone)]
struct CallIdentity {
    method: &'static str,
    call_id: String,
    proxy: Option<String>,
}

impl CallIdentity {
    fn of(call: &Call) -> Self {
        CallIdentity {
            method: call.verb.name(),
            call_id: call.call_id.to_string(),
            proxy: call.selected_proxy.clone(),
        }
    }

    fn wrap(&self, err: Error) -> Error {
        if !err.is_network_error() {
            return err;
        }
        let mut wrapped = ClusterError::new(codes::TRANSPORT_ERROR, "transport error")
            .with_attr("method", self.method)
            .with_attr("call_id", &self.call_id);
        if let Some(proxy) = &self.proxy {
            wrapped = wrapped.with_attr("proxy", proxy);
        }
        Error::Cluster(wrapped.with_inner(ClusterError::wrap_foreign(&err)))
    }
}

/// Structures network errors; leaves all other errors as they are.
#[derive(Debug, Default)]
pub struct ErrorWrapper;

#[async_trait]
impl Interceptor for ErrorWrapper {
    fn name(&self) -> &'static str {
        "error_wrapper"
    }

    async fn intercept(&self, ctx: &Context, call: &mut Call, next: Next<'_>) -> Result<CallResult> {
        match next.invoke(ctx, call).await {
            Ok(res) => Ok(res),
            Err(err) => Err(CallIdentity::of(call).wrap(err)),
        }
    }

    async fn intercept_read(
        &self,
        ctx: &Context,
        call: &mut Call,
        next: Next<'_>,
    ) -> Result<Box<dyn BodyReader>> {
        match next.invoke_read(ctx, call).await {
            Ok(inner) => {
                let identity = CallIdentity::of(call);
                Ok(Box::new(MapReaderErr {
                    inner,
                    map: move |err| identity.wrap(err),
                }))
            }
            Err(err) => Err(CallIdentity::of(call).wrap(err)),
        }
    }

    async fn intercept_write(
        &self,
        ctx: &Context,
        call: &mut Call,
        next: Next<'_>,
    ) -> Result<Box<dyn BodyWriter>> {
        match next.invoke_write(ctx, call).await {
            Ok(inner) => {
                let identity = CallIdentity::of(call);
                Ok(Box::new(MapWriterErr {
                    inner,
                    map: move |err| identity.wrap(err),
                }))
            }
            Err(err) => Err(CallIdentity::of(call).wrap(err)),
        }
    }
}
