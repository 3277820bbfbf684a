//! RPC transport
//!
//! Calls travel over [`Bus`](crate::bus::Bus) connections to RPC proxies. A
//! request is one bus message:
//!
//! ```text
//! [ header (JSON RequestHeader) | payload | rowset attachment? ]
//! ```
//!
//! and the proxy answers with
//!
//! ```text
//! [ header (JSON ResponseHeader) | payload | attachments... ]
//! ```
//!
//! The response header echoes the `request_id`; a mismatch is a protocol
//! error and the connection is not reused. A structured error in the
//! response header fails the call but leaves the connection healthy.

mod client;
mod pool;

pub use client::RpcTransport;
pub use pool::{AsyncStream, BoxedStream, ConnectionPool, Dialer, PooledBus, TcpDialer};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::call::Params;
use crate::cluster_error::ClusterError;

/// Service every API call is addressed to.
pub const API_SERVICE: &str = "ApiService";

/// First part of a request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub request_id: Uuid,
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutation_id: Option<Uuid>,
    #[serde(default)]
    pub retry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// First part of a response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseHeader {
    pub request_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ClusterError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_parameters: Option<serde_json::Value>,
}

impl ResponseHeader {
    pub fn ok(request_id: Uuid) -> Self {
        ResponseHeader {
            request_id,
            error: None,
            response_parameters: None,
        }
    }

    pub fn failed(request_id: Uuid, error: ClusterError) -> Self {
        ResponseHeader {
            request_id,
            error: Some(error),
            response_parameters: None,
        }
    }
}
