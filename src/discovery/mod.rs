//! Proxy Discovery & Selection
//!
//! - [`ProxyCache`]: single-flight cache of a discovered address list
//! - [`HostsDiscoverer`]: heavy proxies from `GET /hosts`
//! - [`RpcDiscoverer`]: RPC proxies from `GET /api/<v>/discover_proxies`
//! - [`BanList`] and [`ProxySelector`]: RPC proxy choice excluding banned
//!   addresses

mod ban;
mod cache;

pub use ban::BanList;
pub use cache::{Discoverer, ProxyCache};

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::http::check_response;

/// Pick one address uniformly at random.
pub(crate) fn pick_random(candidates: &[String]) -> Option<&String> {
    if candidates.is_empty() {
        return None;
    }
    candidates.get(rand::thread_rng().gen_range(0..candidates.len()))
}

/// Heavy proxy list served by the cluster proxy at `/hosts`.
#[derive(Debug, Clone)]
pub struct HostsDiscoverer {
    http: reqwest::Client,
    cluster_url: String,
}

impl HostsDiscoverer {
    pub fn new(http: reqwest::Client, cluster_url: impl Into<String>) -> Self {
        HostsDiscoverer {
            http,
            cluster_url: cluster_url.into(),
        }
    }
}

#[async_trait]
impl Discoverer for HostsDiscoverer {
    async fn discover(&self, ctx: &Context) -> Result<Vec<String>> {
        let url = format!("{}/hosts", self.cluster_url);
        ctx.run(async {
            let rsp = check_response(self.http.get(&url).send().await?).await?;
            Ok(rsp.json::<Vec<String>>().await?)
        })
        .await
    }
}

#[derive(Debug, Deserialize)]
struct DiscoverProxiesResponse {
    #[serde(default)]
    proxies: Vec<String>,
}

/// RPC proxy list served by the cluster proxy's `discover_proxies` command.
#[derive(Debug, Clone)]
pub struct RpcDiscoverer {
    http: reqwest::Client,
    cluster_url: String,
    api_version: String,
    role: Option<String>,
}

impl RpcDiscoverer {
    pub fn new(
        http: reqwest::Client,
        cluster_url: impl Into<String>,
        api_version: impl Into<String>,
        role: Option<String>,
    ) -> Self {
        RpcDiscoverer {
            http,
            cluster_url: cluster_url.into(),
            api_version: api_version.into(),
            role,
        }
    }
}

#[async_trait]
impl Discoverer for RpcDiscoverer {
    async fn discover(&self, ctx: &Context) -> Result<Vec<String>> {
        let url = format!("{}/api/{}/discover_proxies", self.cluster_url, self.api_version);
        let mut query = vec![("type", "rpc")];
        if let Some(role) = &self.role {
            query.push(("role", role.as_str()));
        }

        ctx.run(async {
            let rsp = check_response(self.http.get(&url).query(&query).send().await?).await?;
            Ok(rsp.json::<DiscoverProxiesResponse>().await?.proxies)
        })
        .await
    }
}

#[derive(Debug)]
enum Candidates {
    Fixed(Vec<String>),
    Discovered(ProxyCache),
}

/// Chooses an RPC proxy for each attempt.
#[derive(Debug)]
pub struct ProxySelector {
    candidates: Candidates,
    bans: Arc<BanList>,
}

impl ProxySelector {
    /// Select from a configured address list.
    pub fn fixed(proxies: Vec<String>, bans: Arc<BanList>) -> Self {
        ProxySelector {
            candidates: Candidates::Fixed(proxies),
            bans,
        }
    }

    /// Select from a discovered address list.
    pub fn discovered(cache: ProxyCache, bans: Arc<BanList>) -> Self {
        ProxySelector {
            candidates: Candidates::Discovered(cache),
            bans,
        }
    }

    pub fn bans(&self) -> &Arc<BanList> {
        &self.bans
    }

    /// A random address among the known, non-banned ones.
    ///
    /// Fails with [`Error::NoEligibleProxy`] when every known address is
    /// banned; a discovered list is invalidated so that the next pick asks
    /// discovery again.
    pub async fn pick(&self, ctx: &Context) -> Result<String> {
        let candidates = match &self.candidates {
            Candidates::Fixed(proxies) => proxies.clone(),
            Candidates::Discovered(cache) => cache.list(ctx).await?,
        };
        if candidates.is_empty() {
            return Err(Error::NoEligibleProxy("no proxies are known".to_string()));
        }

        let eligible = self.bans.filter(&candidates);
        match pick_random(&eligible) {
            Some(addr) => Ok(addr.clone()),
            None => {
                if let Candidates::Discovered(cache) = &self.candidates {
                    cache.invalidate();
                }
                Err(Error::NoEligibleProxy(format!(
                    "all {} known proxies are banned",
                    candidates.len()
                )))
            }
        }
    }
}
