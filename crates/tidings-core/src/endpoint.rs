//! Streaming endpoint resolution.
//!
//! The endpoint is chosen from three sources, in order:
//!
//! 1. an explicit streaming URL,
//! 2. a URL derived from the API base URL (`http` → `ws`, `https` → `wss`,
//!    path replaced by the stream path),
//! 3. a same-origin URL, only when the page is served from a loopback host
//!    or a known developer tunnel.
//!
//! A candidate pointing at a loopback host is refused unless the page itself
//! is on a loopback host, so a misconfigured production build can never be
//! pointed at a developer's local socket. When no source yields a usable URL
//! the channel stays disabled.

use std::fmt;
use thiserror::Error;
use url::{Host, Url};

/// Path used when deriving a streaming URL from another origin.
pub const DEFAULT_STREAM_PATH: &str = "/ws";

/// Host suffixes of well-known developer tunnels.
pub const DEFAULT_TUNNEL_SUFFIXES: &[&str] = &[
    "ngrok.io",
    "ngrok-free.app",
    "ngrok.app",
    "trycloudflare.com",
    "loca.lt",
    "devtunnels.ms",
];

/// Inputs to endpoint resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Explicit streaming endpoint override.
    pub stream_url: Option<String>,
    /// API base URL used to derive the streaming endpoint.
    pub api_base_url: Option<String>,
    /// Origin the application is being served from.
    pub page_origin: Option<String>,
    /// Path of the streaming endpoint on a derived origin.
    pub stream_path: String,
    /// Host suffixes treated as developer tunnels.
    pub tunnel_hosts: Vec<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            stream_url: None,
            api_base_url: None,
            page_origin: None,
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            tunnel_hosts: DEFAULT_TUNNEL_SUFFIXES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl EndpointConfig {
    /// Set the explicit streaming URL.
    #[must_use]
    pub fn with_stream_url(mut self, url: impl Into<String>) -> Self {
        self.stream_url = Some(url.into());
        self
    }

    /// Set the API base URL.
    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    /// Set the page origin.
    #[must_use]
    pub fn with_page_origin(mut self, origin: impl Into<String>) -> Self {
        self.page_origin = Some(origin.into());
        self
    }

    /// Resolve the endpoint for these settings.
    #[must_use]
    pub fn resolve(&self) -> Resolution {
        resolve_endpoint(self)
    }
}

/// Where a candidate endpoint came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointSource {
    /// The explicit streaming URL.
    StreamUrl,
    /// Derived from the API base URL.
    ApiBase,
    /// Derived from the page origin.
    SameOrigin,
}

impl fmt::Display for EndpointSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StreamUrl => "stream_url",
            Self::ApiBase => "api_base_url",
            Self::SameOrigin => "same_origin",
        };
        f.write_str(name)
    }
}

/// Why a candidate endpoint was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointRejection {
    /// The candidate is not a valid URL.
    #[error("Invalid URL: {0}")]
    Parse(#[from] url::ParseError),

    /// The scheme cannot be mapped to a WebSocket scheme.
    #[error("Unsupported scheme: {0}")]
    Scheme(String),

    /// The URL has no host.
    #[error("URL has no host")]
    NoHost,

    /// A loopback target was requested from a non-loopback page.
    #[error("Loopback host {0} refused for a non-loopback page")]
    LoopbackLeak(String),

    /// Same-origin fallback requires a page origin.
    #[error("Page origin is unknown")]
    NoPageOrigin,

    /// Same-origin fallback is only allowed on local or tunnel hosts.
    #[error("Page host {0} is neither local nor a developer tunnel")]
    NotDevelopmentHost(String),
}

/// A refused candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    /// Source of the candidate.
    pub source: EndpointSource,
    /// Reason it was refused.
    pub reason: EndpointRejection,
}

/// An accepted endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    /// The URL to connect to.
    pub url: Url,
    /// Source it was taken from.
    pub source: EndpointSource,
}

/// Outcome of endpoint resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The accepted endpoint, if any.
    pub endpoint: Option<ResolvedEndpoint>,
    /// Candidates refused before one was accepted.
    pub rejected: Vec<Rejected>,
}

impl Resolution {
    /// The accepted URL, if any.
    #[must_use]
    pub fn url(&self) -> Option<&Url> {
        self.endpoint.as_ref().map(|e| &e.url)
    }
}

/// Resolve the streaming endpoint.
///
/// Pure: no I/O, no environment access.
#[must_use]
pub fn resolve_endpoint(config: &EndpointConfig) -> Resolution {
    let page = non_empty(config.page_origin.as_deref()).and_then(|o| Url::parse(o).ok());
    let page_is_loopback = page
        .as_ref()
        .and_then(Url::host)
        .is_some_and(|h| is_loopback(&h));

    let mut rejected = Vec::new();
    for source in [
        EndpointSource::StreamUrl,
        EndpointSource::ApiBase,
        EndpointSource::SameOrigin,
    ] {
        let candidate = match source {
            EndpointSource::StreamUrl => match non_empty(config.stream_url.as_deref()) {
                Some(raw) => streaming_candidate(raw),
                None => continue,
            },
            EndpointSource::ApiBase => match non_empty(config.api_base_url.as_deref()) {
                Some(raw) => api_base_candidate(raw, &config.stream_path),
                None => continue,
            },
            EndpointSource::SameOrigin => same_origin_candidate(page.as_ref(), config),
        };

        match candidate.and_then(|url| refuse_loopback_leak(url, page_is_loopback)) {
            Ok(url) => {
                return Resolution {
                    endpoint: Some(ResolvedEndpoint { url, source }),
                    rejected,
                }
            }
            Err(reason) => rejected.push(Rejected { source, reason }),
        }
    }

    Resolution {
        endpoint: None,
        rejected,
    }
}

/// Check whether a host is a loopback address or name.
#[must_use]
pub fn is_loopback(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        Host::Ipv4(ip) => ip.is_loopback() || ip.is_unspecified(),
        Host::Ipv6(ip) => {
            ip.is_loopback()
                || ip.is_unspecified()
                || ip.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
    }
}

/// Check whether a host belongs to one of the tunnel suffixes.
#[must_use]
pub fn is_tunnel_host(host: &str, suffixes: &[String]) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    suffixes.iter().any(|suffix| {
        let suffix = suffix.trim().trim_start_matches('.').to_ascii_lowercase();
        !suffix.is_empty() && (host == suffix || host.ends_with(&format!(".{suffix}")))
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn streaming_candidate(raw: &str) -> Result<Url, EndpointRejection> {
    let mut url = Url::parse(raw)?;
    to_websocket_scheme(&mut url)?;
    Ok(url)
}

fn api_base_candidate(raw: &str, stream_path: &str) -> Result<Url, EndpointRejection> {
    let mut url = Url::parse(raw)?;
    to_websocket_scheme(&mut url)?;
    url.set_path(stream_path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn same_origin_candidate(
    page: Option<&Url>,
    config: &EndpointConfig,
) -> Result<Url, EndpointRejection> {
    let page = page.ok_or(EndpointRejection::NoPageOrigin)?;
    let host = page.host().ok_or(EndpointRejection::NoHost)?;
    let host_str = host.to_string();
    if !is_loopback(&host) && !is_tunnel_host(&host_str, &config.tunnel_hosts) {
        return Err(EndpointRejection::NotDevelopmentHost(host_str));
    }

    let mut url = page.clone();
    to_websocket_scheme(&mut url)?;
    url.set_path(&config.stream_path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn to_websocket_scheme(url: &mut Url) -> Result<(), EndpointRejection> {
    let target = match url.scheme() {
        "ws" | "wss" => None,
        "http" => Some("ws"),
        "https" => Some("wss"),
        other => return Err(EndpointRejection::Scheme(other.to_string())),
    };
    if let Some(scheme) = target {
        url.set_scheme(scheme)
            .map_err(|()| EndpointRejection::Scheme(url.scheme().to_string()))?;
    }
    if url.host().is_none() {
        return Err(EndpointRejection::NoHost);
    }
    Ok(())
}

fn refuse_loopback_leak(url: Url, page_is_loopback: bool) -> Result<Url, EndpointRejection> {
    let host = url.host().ok_or(EndpointRejection::NoHost)?;
    if is_loopback(&host) && !page_is_loopback {
        return Err(EndpointRejection::LoopbackLeak(host.to_string()));
    }
    Ok(url)
}
