//! HTTP transport for pack downloads.
//!
//! The orchestrator talks to the network through the [`HttpClient`] trait
//! so tests can script transfers without sockets. The production
//! implementation is a thin wrapper over reqwest's blocking client; packs
//! can be very large, so responses are consumed as streams rather than
//! buffered bodies.

use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;

use crate::config::ProxySettings;

use super::error::PackError;

/// Connect timeout for pack requests. The overall transfer is not bounded;
/// packs can take minutes on slow links and the orchestrator handles stalls.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-read timeout. A connection that stops delivering bytes for this long
/// errors out so the worker can retry instead of blocking forever.
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Transport abstraction for fetching packs.
pub trait HttpClient: Send + Sync {
    /// Open a streaming GET for `url`.
    ///
    /// `use_proxy` is advisory: it routes through the configured proxy when
    /// one exists and is ignored otherwise.
    fn get(&self, url: &str, use_proxy: bool) -> Result<Box<dyn Read + Send>, PackError>;
}

/// Production client backed by reqwest's blocking API.
///
/// Holds a direct client and, when proxy settings were given, a second
/// client routed through the proxy. Manifests that set `ignore_proxy` use
/// the direct one.
pub struct ReqwestClient {
    direct: Client,
    proxied: Option<Client>,
}

impl ReqwestClient {
    /// Build the client pair.
    ///
    /// # Errors
    ///
    /// Returns [`PackError::Network`] when the proxy URL is invalid or TLS
    /// initialization fails.
    pub fn new(proxy: Option<&ProxySettings>) -> Result<Self, PackError> {
        let direct = builder()
            .build()
            .map_err(|e| PackError::network(format!("failed to build HTTP client: {}", e)))?;

        let proxied = match proxy {
            Some(settings) => {
                let mut proxy = reqwest::Proxy::all(&settings.url).map_err(|e| {
                    PackError::network(format!("invalid proxy {}: {}", settings.url, e))
                })?;
                if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
                    proxy = proxy.basic_auth(user, pass);
                }
                let client = builder().proxy(proxy).build().map_err(|e| {
                    PackError::network(format!("failed to build proxied HTTP client: {}", e))
                })?;
                Some(client)
            }
            None => None,
        };

        Ok(Self { direct, proxied })
    }
}

fn builder() -> reqwest::blocking::ClientBuilder {
    // The blocking builder has no `read_timeout`; its `timeout` is applied
    // per body read (fresh deadline each read), which is the same behavior.
    Client::builder()
        .timeout(READ_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str, use_proxy: bool) -> Result<Box<dyn Read + Send>, PackError> {
        let client = if use_proxy {
            self.proxied.as_ref().unwrap_or(&self.direct)
        } else {
            &self.direct
        };

        let response = client
            .get(url)
            .send()
            .map_err(|e| PackError::network(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PackError::network(format!("GET {} returned {}", url, status)));
        }

        Ok(Box::new(response))
    }
}
