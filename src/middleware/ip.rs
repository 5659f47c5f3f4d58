//! Client IP extraction for rate limiting and auth-failure throttling.
//!
//! The gateway terminates client traffic directly, so the peer socket
//! address is the source of truth. Forwarded headers (`X-Forwarded-For`,
//! `X-Real-IP`) are honored **only** when the connection arrives from a
//! network listed in `TRUSTED_PROXIES` — otherwise any client could rotate
//! spoofed addresses to dodge per-IP limits or frame innocent addresses.
//!
//! # Deployment
//!
//! - Directly exposed: leave `TRUSTED_PROXIES` empty; the peer address is
//!   used and forwarded headers are ignored.
//! - Behind a load balancer: set `TRUSTED_PROXIES` to the balancer's CIDR
//!   ranges and make sure it overwrites (not appends to) client IP headers.
//!
//! # The "unknown" Fallback
//!
//! When no peer address is available (only possible when the server is not
//! driven through `into_make_service_with_connect_info`), all such requests
//! share the `"unknown"` key and are collectively rate-limited.

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::{debug, warn};

/// Fallback key when no client address can be determined.
pub const UNKNOWN_IP: &str = "unknown";

/// Parsed CIDR network range for trusted proxy validation.
#[derive(Debug, Clone)]
pub struct CidrRange {
    /// Network address
    network: IpAddr,
    /// Prefix length (e.g., 24 for /24)
    prefix_len: u8,
}

impl CidrRange {
    /// Parse a CIDR notation string (e.g., "10.0.0.0/8" or "::1/128").
    ///
    /// A bare address is treated as /32 (or /128). Returns `None` if the
    /// format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let trimmed = cidr.trim();
        match trimmed.split_once('/') {
            None => {
                let ip: IpAddr = trimmed.parse().ok()?;
                let prefix_len = match ip {
                    IpAddr::V4(_) => 32,
                    IpAddr::V6(_) => 128,
                };
                Some(Self {
                    network: ip,
                    prefix_len,
                })
            }
            Some((addr, prefix)) => {
                let ip: IpAddr = addr.parse().ok()?;
                let prefix_len: u8 = prefix.parse().ok()?;

                let max_prefix = match ip {
                    IpAddr::V4(_) => 32,
                    IpAddr::V6(_) => 128,
                };
                if prefix_len > max_prefix {
                    return None;
                }

                Some(Self {
                    network: ip,
                    prefix_len,
                })
            }
        }
    }

    /// Check if an IP address is contained within this CIDR range.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let net_bits = u32::from(*net);
                let addr_bits = u32::from(*addr);
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix_len)
                };
                (net_bits & mask) == (addr_bits & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let net_bits = u128::from(*net);
                let addr_bits = u128::from(*addr);
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix_len)
                };
                (net_bits & mask) == (addr_bits & mask)
            }
            // IPv4 and IPv6 don't match
            _ => false,
        }
    }
}

/// Trusted proxy networks; forwarded headers are only honored from these.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    ranges: Vec<CidrRange>,
}

impl TrustedProxies {
    /// Create from CIDR strings; invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy validation enabled");
        }

        Self { ranges }
    }

    /// Whether any trusted ranges are configured.
    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Whether this peer address belongs to a trusted proxy.
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(ip))
    }
}

/// Derive the rate-limit client key for a request.
///
/// The peer socket address wins unless it belongs to a trusted proxy, in
/// which case the first `X-Forwarded-For` entry (or `X-Real-IP`) names the
/// real client.
pub fn client_key<B>(req: &Request<B>, trusted: &TrustedProxies) -> String {
    let peer_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    match peer_ip {
        Some(peer) if trusted.is_enabled() && trusted.is_trusted(&peer) => {
            forwarded_client_ip(req).unwrap_or_else(|| peer.to_string())
        }
        Some(peer) => peer.to_string(),
        None => UNKNOWN_IP.to_string(),
    }
}

/// First address in `X-Forwarded-For`, falling back to `X-Real-IP`.
fn forwarded_client_ip<B>(req: &Request<B>) -> Option<String> {
    if let Some(value) = req.headers().get("x-forwarded-for")
        && let Ok(raw) = value.to_str()
        && let Some(first) = raw.split(',').next()
    {
        let candidate = first.trim();
        if !candidate.is_empty() {
            return Some(candidate.to_string());
        }
    }

    if let Some(value) = req.headers().get("x-real-ip")
        && let Ok(raw) = value.to_str()
    {
        let candidate = raw.trim();
        if !candidate.is_empty() {
            return Some(candidate.to_string());
        }
    }

    None
}
