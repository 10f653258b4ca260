//! Egress settings for outbound HTTP clients: forward proxy and extra trust
//! roots for nodes behind a TLS-intercepting gateway.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::ProxyConfig;

#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("invalid proxy URL {url}: {source}")]
    Proxy { url: String, source: reqwest::Error },

    #[error("failed to read CA bundle {}: {source}", path.display())]
    CaFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid CA bundle {}: {source}", path.display())]
    Certificate {
        path: PathBuf,
        source: reqwest::Error,
    },

    #[error("CA bundle {} contains no certificates", _0.display())]
    NoCertificates(PathBuf),
}

/// Which proxy each URL scheme goes through.
///
/// With both URLs set, each scheme uses its own. With only one set, that
/// proxy carries both schemes.
pub(crate) fn proxy_routes(proxy: &ProxyConfig) -> Option<(&str, &str)> {
    match (proxy.http_url.as_deref(), proxy.https_url.as_deref()) {
        (Some(http), Some(https)) => Some((http, https)),
        (Some(url), None) | (None, Some(url)) => Some((url, url)),
        (None, None) => None,
    }
}

/// Proxy and trust settings applied to every client that leaves the node:
/// the hub client and the identity provider's key set fetcher.
#[derive(Clone, Default)]
pub struct OutboundHttp {
    proxies: Vec<reqwest::Proxy>,
    extra_roots: Vec<reqwest::Certificate>,
}

impl OutboundHttp {
    /// Direct connections with the built-in trust roots only.
    pub fn direct() -> Self {
        Self::default()
    }

    /// Resolves proxy routes and loads the PEM bundle at `extra_ca_certs`.
    pub fn from_config(
        proxy: &ProxyConfig,
        extra_ca_certs: Option<&Path>,
    ) -> Result<Self, OutboundError> {
        let mut proxies = Vec::new();
        if let Some((http, https)) = proxy_routes(proxy) {
            proxies.push(reqwest::Proxy::http(http).map_err(|source| OutboundError::Proxy {
                url: http.to_string(),
                source,
            })?);
            proxies.push(
                reqwest::Proxy::https(https).map_err(|source| OutboundError::Proxy {
                    url: https.to_string(),
                    source,
                })?,
            );
            tracing::info!(http_proxy = http, https_proxy = https, "routing hub traffic through proxy");
        }

        let extra_roots = match extra_ca_certs {
            Some(path) => load_ca_bundle(path)?,
            None => Vec::new(),
        };

        Ok(Self {
            proxies,
            extra_roots,
        })
    }

    /// A client builder with the proxies and extra trust roots applied.
    pub fn client_builder(&self) -> reqwest::ClientBuilder {
        let mut builder = reqwest::Client::builder();
        for proxy in &self.proxies {
            builder = builder.proxy(proxy.clone());
        }
        for root in &self.extra_roots {
            builder = builder.add_root_certificate(root.clone());
        }
        builder
    }
}

impl fmt::Debug for OutboundHttp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundHttp")
            .field("proxies", &self.proxies.len())
            .field("extra_roots", &self.extra_roots.len())
            .finish()
    }
}

fn load_ca_bundle(path: &Path) -> Result<Vec<reqwest::Certificate>, OutboundError> {
    let pem = std::fs::read(path).map_err(|source| OutboundError::CaFile {
        path: path.to_path_buf(),
        source,
    })?;
    let certs =
        reqwest::Certificate::from_pem_bundle(&pem).map_err(|source| OutboundError::Certificate {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(OutboundError::NoCertificates(path.to_path_buf()));
    }
    tracing::info!(path = %path.display(), count = certs.len(), "loaded extra CA certificates");
    Ok(certs)
}
