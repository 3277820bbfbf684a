//! HTTP transport
//!
//! Calls go to `POST|GET|PUT <proxy>/api/<version>/<method>`. Parameters travel
//! as the JSON body of a POST without payload, otherwise in the
//! `X-YT-Parameters` header. Heavy verbs (table reads and writes, dynamic
//! table commands) go to a proxy picked at random from `/hosts`, unless the
//! client is configured without discovery.
//!
//! A response fails when:
//!
//! 1. it carries an `X-YT-Error` header (decoded as a [`ClusterError`]; a
//!    header that does not decode is [`Error::MalformedErrorHeader`]), or
//! 2. its status is not 2xx; the body is decoded as a [`ClusterError`], or
//!    the call fails with [`Error::UnexpectedStatus`].

mod body;
mod client;

pub use client::HttpTransport;

use crate::cluster_error::ClusterError;
use crate::error::{Error, Result};

pub const X_YT_PARAMETERS: &str = "X-YT-Parameters";
pub const X_YT_RESPONSE_PARAMETERS: &str = "X-YT-Response-Parameters";
pub const X_YT_ERROR: &str = "X-YT-Error";
pub const X_YT_CORRELATION_ID: &str = "X-YT-Correlation-ID";
pub const X_YT_HEADER_FORMAT: &str = "X-YT-Header-Format";
pub const X_YT_INPUT_FORMAT: &str = "X-YT-Input-Format";
pub const X_YT_OUTPUT_FORMAT: &str = "X-YT-Output-Format";

/// Format name sent in the format headers.
pub(crate) const FORMAT: &str = "json";

/// Turn an error-carrying response into an [`Error`].
pub(crate) async fn check_response(rsp: reqwest::Response) -> Result<reqwest::Response> {
    if let Some(raw) = rsp.headers().get(X_YT_ERROR) {
        let err: ClusterError =
            serde_json::from_slice(raw.as_bytes()).map_err(Error::MalformedErrorHeader)?;
        return Err(err.into());
    }

    let status = rsp.status();
    if status.is_success() {
        return Ok(rsp);
    }
    let body = rsp.bytes().await?;
    match serde_json::from_slice::<ClusterError>(&body) {
        Ok(err) => Err(err.into()),
        Err(_) => Err(Error::UnexpectedStatus(status.as_u16())),
    }
}
