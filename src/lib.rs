//! # ytclient
//!
//! Resilient call layer for a cluster client: typed operations reduced to
//! calls, a pipeline of interceptors that retries, classifies and bans, and
//! two transports (HTTP proxies and RPC proxies over the bus protocol).
//!
//! ## Pipeline Architecture
//!
//! ```text
//! CallEncoder (typed API)
//!     ↓  Call { verb, params, payload/rowset }
//! [Logging]                → call_started / call_completed / call_failed
//!     ↓
//! [Mutation retry]         → mutation_id + retry flag, bounded backoff
//!     ↓
//! [Read retry]             → bounded backoff for side-effect free verbs
//!     ↓
//! [Error classification]   → network errors become TRANSPORT_ERROR nodes
//!     ↓
//! [Proxy ban] (RPC only)   → ban window + pooled connection discard
//!     ↓
//! Transport
//!     ├── HTTP: /api/<v>/<verb>, heavy proxies from /hosts
//!     └── RPC:  bus frames over pooled TCP, proxies from discover_proxies
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ytclient::{Client, Config, Context};
//! use ytclient::api::{CreateNodeOptions, NodeType};
//!
//! # async fn example() -> ytclient::Result<()> {
//! let config = Config::load()?;
//! let yc = Client::rpc(config)?;
//!
//! let ctx = Context::background().with_timeout(std::time::Duration::from_secs(30));
//! let id = yc
//!     .create_node(&ctx, "//tmp/table", NodeType::Table, &CreateNodeOptions::default())
//!     .await?;
//! println!("created {id}");
//!
//! yc.stop().await;
//! # Ok(())
//! # }
//! ```

// Ambient
pub mod config; // figment configuration
pub mod context; // cancellation, deadlines, stop group
pub mod error; // crate error type
pub mod logging; // tracing subscriber setup

// Core
pub mod cluster_error; // structured cluster errors
pub mod wire; // row encoder and binary rowset format
pub mod bus; // length-framed multi-part transport

// Call layer
pub mod call;
pub mod pipeline;
pub mod interceptors;
pub mod discovery;
pub mod http;
pub mod rpc;

// Public surface
pub mod api;
pub mod client;

pub use call::{Call, CallResult, Params, Verb};
pub use client::{Client, TransportKind};
pub use cluster_error::{codes, ClusterError, ErrorAttr, ErrorCode};
pub use config::Config;
pub use context::{CancelHandle, Context, Credentials, StopGroup};
pub use error::{Error, Result};
pub use pipeline::{Interceptor, Pipeline, Transport};
