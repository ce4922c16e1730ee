//! Where pack bytes come from.

use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::Proxy;
use tracing::debug;

use super::job::PackJob;
use crate::error::{SyncError, SyncResult};

/// A readable stream of a pack's compressed bytes.
pub type PackStream = Box<dyn Read + Send>;

/// Fetches the compressed bytes of a pack.
///
/// Implementations must be shareable between worker threads.
pub trait PackSource: Send + Sync {
    /// Start fetching `job`'s pack. The returned stream yields the gzip
    /// body exactly as served.
    fn open(&self, job: &PackJob) -> SyncResult<PackStream>;
}

impl<T: PackSource + ?Sized> PackSource for &T {
    fn open(&self, job: &PackJob) -> SyncResult<PackStream> {
        (**self).open(job)
    }
}

/// Downloads packs over HTTP(S).
///
/// Holds one client that never uses a proxy and, when a proxy is configured,
/// one that routes everything through it. Jobs whose manifest opted out of
/// the proxy use the direct client.
#[derive(Debug)]
pub struct HttpPackSource {
    direct: Client,
    proxied: Option<Client>,
}

impl HttpPackSource {
    /// Build the clients.
    ///
    /// `proxy` may embed credentials as `user:pass@host:port`; a missing
    /// scheme defaults to `http://`.
    pub fn new(proxy: Option<&str>, connect_timeout: Duration) -> SyncResult<Self> {
        let direct = Client::builder()
            .connect_timeout(connect_timeout)
            .no_proxy()
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {}", e)))?;

        let proxied = match proxy.map(str::trim).filter(|p| !p.is_empty()) {
            Some(url) => {
                let url = if url.contains("://") {
                    url.to_string()
                } else {
                    format!("http://{}", url)
                };
                let proxy = Proxy::all(&url)
                    .map_err(|e| SyncError::InvalidConfig(format!("proxy {}: {}", url, e)))?;
                let client = Client::builder()
                    .connect_timeout(connect_timeout)
                    .proxy(proxy)
                    .build()
                    .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {}", e)))?;
                Some(client)
            }
            None => None,
        };

        Ok(Self { direct, proxied })
    }

    pub fn has_proxy(&self) -> bool {
        self.proxied.is_some()
    }

    fn client_for(&self, job: &PackJob) -> &Client {
        match (&self.proxied, job.use_proxy) {
            (Some(proxied), true) => proxied,
            _ => &self.direct,
        }
    }
}

impl PackSource for HttpPackSource {
    fn open(&self, job: &PackJob) -> SyncResult<PackStream> {
        debug!(url = %job.url, proxy = job.use_proxy && self.has_proxy(), "Requesting pack");

        let response = self
            .client_for(job)
            .get(&job.url)
            .send()
            .map_err(|e| SyncError::DownloadFailed {
                url: job.url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::HttpStatus {
                url: job.url.clone(),
                status: status.as_u16(),
            });
        }

        Ok(Box::new(response))
    }
}
