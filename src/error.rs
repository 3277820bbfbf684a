//! Crate-wide error type.

use std::io;
use std::sync::Arc;
use thiserror::Error;

use crate::bus::BusError;
use crate::cluster_error::{self, ClusterError, ErrorCode};
use crate::wire::EncodeError;

/// Errors produced by the call layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Structured error reported by the cluster (or synthesized for a
    /// network failure by the error classifier)
    #[error(transparent)]
    Cluster(ClusterError),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Bus framing or connection error
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// Value could not be encoded into wire rows
    #[error("encoding error: {0}")]
    Encode(#[from] EncodeError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The call context was cancelled
    #[error("call cancelled")]
    Cancelled,

    /// The call context deadline passed
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The client was stopped
    #[error("client is stopped")]
    ClientStopped,

    /// Every known proxy is banned or none is known
    #[error("no eligible proxy: {0}")]
    NoEligibleProxy(String),

    /// Discovery returned an empty list
    #[error("proxy list is empty")]
    EmptyProxyList,

    /// The `X-YT-Error` header could not be decoded
    #[error("malformed X-YT-Error header: {0}")]
    MalformedErrorHeader(#[source] serde_json::Error),

    /// Non-2xx response without a decodable error
    #[error("unexpected status code {0}")]
    UnexpectedStatus(u16),

    /// Peer violated the request/response protocol
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Error observed by several waiters (single-flight refresh)
    #[error(transparent)]
    Shared(Arc<Error>),
}

/// Result type for the call layer.
pub type Result<T> = std::result::Result<T, Error>;

impl From<ClusterError> for Error {
    fn from(err: ClusterError) -> Self {
        Error::Cluster(err)
    }
}

impl Error {
    /// Structured error carried by this value, if any.
    pub fn cluster_error(&self) -> Option<&ClusterError> {
        match self {
            Error::Cluster(err) => Some(err),
            Error::Shared(err) => err.cluster_error(),
            _ => None,
        }
    }

    pub fn find_error_code(&self, code: ErrorCode) -> Option<&ClusterError> {
        cluster_error::find_error_code(self, code)
    }

    pub fn contains_error_code(&self, code: ErrorCode) -> bool {
        self.find_error_code(code).is_some()
    }

    pub fn contains_message_re(&self, re: &regex::Regex) -> bool {
        cluster_error::contains_message_re(self, re)
    }

    /// Cancellation or deadline expiry of the call context.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Error::Cancelled | Error::DeadlineExceeded => true,
            Error::Shared(err) => err.is_cancellation(),
            _ => false,
        }
    }

    /// Connection-level failure: refused, reset, timed out or broken framing.
    pub fn is_network_error(&self) -> bool {
        match self {
            Error::Io(err) => is_network_io_error(err),
            Error::Http(err) => err.is_connect() || err.is_timeout() || has_network_io_source(err),
            Error::Bus(err) => err.is_connection_error(),
            Error::Shared(err) => err.is_network_error(),
            _ => false,
        }
    }

    /// Share this error between several receivers.
    pub fn into_shared(self) -> Arc<Error> {
        match self {
            Error::Shared(err) => err,
            other => Arc::new(other),
        }
    }
}

/// An I/O failure somewhere in `err`'s source chain, such as a reset while
/// a response body is streaming.
fn has_network_io_source(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = err.source();
    while let Some(cause) = current {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return is_network_io_error(io_err);
        }
        current = cause.source();
    }
    false
}

pub(crate) fn is_network_io_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::TimedOut
            | io::ErrorKind::AddrNotAvailable
    )
}
