//! Client facade
//!
//! A [`Client`] owns the stop group, the proxy caches and the pipeline of one
//! transport, and exposes the typed operations of [`CallEncoder`] through
//! `Deref`.
//!
//! ```no_run
//! use ytclient::{Client, Config, Context};
//! use ytclient::api::GetNodeOptions;
//!
//! # async fn example() -> ytclient::Result<()> {
//! let yc = Client::http(Config::for_proxy("cluster.example.net"))?;
//! let account: String = yc
//!     .get_node(&Context::background(), "//home/@account", &GetNodeOptions::default())
//!     .await?;
//! yc.stop().await;
//! # Ok(())
//! # }
//! ```

use std::ops::Deref;
use std::sync::Arc;
use tracing::info;

use crate::api::CallEncoder;
use crate::config::Config;
use crate::context::StopGroup;
use crate::discovery::{BanList, ProxyCache, ProxySelector, RpcDiscoverer};
use crate::error::Result;
use crate::http::HttpTransport;
use crate::interceptors::{ErrorWrapper, LoggingInterceptor, MutationRetrier, ProxyBouncer, ReadRetrier};
use crate::pipeline::{Pipeline, Transport};
use crate::rpc::{ConnectionPool, Dialer, RpcTransport, TcpDialer};

/// Which transport a client speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Http,
    Rpc,
}

/// Cluster client.
#[derive(Debug)]
pub struct Client {
    encoder: CallEncoder,
    stop: StopGroup,
    kind: TransportKind,
    bans: Option<Arc<BanList>>,
    pool: Option<Arc<ConnectionPool>>,
}

/// Interceptors shared by both transports, outermost first.
fn pipeline(config: &Config, transport: Arc<dyn Transport>) -> Pipeline {
    Pipeline::new(transport)
        .with(Arc::new(LoggingInterceptor))
        .with(Arc::new(MutationRetrier::new(config.retry.clone())))
        .with(Arc::new(ReadRetrier::new(config.retry.clone())))
        .with(Arc::new(ErrorWrapper))
}

impl Client {
    /// Client talking to HTTP proxies.
    pub fn http(config: Config) -> Result<Self> {
        let stop = StopGroup::new();
        let transport = HttpTransport::new(&config.cluster, stop.clone())?;
        let pipeline = pipeline(&config, Arc::new(transport));

        info!(proxy = %config.cluster.proxy, transport = "http", "client_started");
        Ok(Client {
            encoder: CallEncoder::new(Arc::new(pipeline), stop.clone()),
            stop,
            kind: TransportKind::Http,
            bans: None,
            pool: None,
        })
    }

    /// Client talking to RPC proxies over TCP.
    pub fn rpc(config: Config) -> Result<Self> {
        let dialer = TcpDialer::new(config.rpc.connect_timeout());
        Self::rpc_with_dialer(config, Arc::new(dialer))
    }

    /// Client talking to RPC proxies over connections opened by `dialer`.
    pub fn rpc_with_dialer(config: Config, dialer: Arc<dyn Dialer>) -> Result<Self> {
        let stop = StopGroup::new();
        let bans = Arc::new(BanList::new(config.rpc.ban_window()));
        let pool = Arc::new(ConnectionPool::new(dialer, config.rpc.max_frame_size));

        let selector = if config.rpc.proxies.is_empty() {
            let http = reqwest::Client::builder()
                .user_agent(config.cluster.user_agent.as_str())
                .build()?;
            let discoverer = RpcDiscoverer::new(
                http,
                config.cluster.cluster_url().url,
                config.cluster.api_version.clone(),
                config.rpc.proxy_role.clone(),
            );
            let cache = ProxyCache::new("rpc", Arc::new(discoverer), stop.clone());
            ProxySelector::discovered(cache, Arc::clone(&bans))
        } else {
            ProxySelector::fixed(config.rpc.proxies.clone(), Arc::clone(&bans))
        };

        let transport = RpcTransport::new(selector, Arc::clone(&pool), config.cluster.token.clone());
        let pipeline = pipeline(&config, Arc::new(transport))
            .with(Arc::new(ProxyBouncer::new(Arc::clone(&bans), Arc::clone(&pool))));

        info!(proxy = %config.cluster.proxy, transport = "rpc", "client_started");
        Ok(Client {
            encoder: CallEncoder::new(Arc::new(pipeline), stop.clone()),
            stop,
            kind: TransportKind::Rpc,
            bans: Some(bans),
            pool: Some(pool),
        })
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.kind
    }

    /// Ban table of an RPC client.
    pub fn bans(&self) -> Option<&Arc<BanList>> {
        self.bans.as_ref()
    }

    /// Bus connection pool of an RPC client.
    pub fn pool(&self) -> Option<&Arc<ConnectionPool>> {
        self.pool.as_ref()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Reject new calls and refreshes, cancel running ones and wait for them
    /// to return.
    pub async fn stop(&self) {
        self.stop.stop().await;
        info!("client_stopped");
    }
}

impl Deref for Client {
    type Target = CallEncoder;

    fn deref(&self) -> &CallEncoder {
        &self.encoder
    }
}
