use std::fmt;
use std::net::{IpAddr, SocketAddr};

use super::rule::AllowlistRule;

/// Client address as seen by guards. `Unknown` stands in for anything unparsable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientIp {
    Known(IpAddr),
    Unknown,
}

impl ClientIp {
    /// Parse a bare address, `ip:port` or `[v6]:port`. IPv4-mapped IPv6 folds to IPv4.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let parsed = raw
            .parse::<IpAddr>()
            .ok()
            .or_else(|| raw.parse::<SocketAddr>().ok().map(|sock| sock.ip()))
            .or_else(|| {
                raw.strip_prefix('[')
                    .and_then(|rest| rest.strip_suffix(']'))
                    .and_then(|inner| inner.parse::<IpAddr>().ok())
            });

        match parsed {
            Some(ip) => ClientIp::Known(ip.to_canonical()),
            None => ClientIp::Unknown,
        }
    }

    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            ClientIp::Known(ip) => Some(*ip),
            ClientIp::Unknown => None,
        }
    }
}

impl fmt::Display for ClientIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientIp::Known(ip) => write!(f, "{}", ip),
            ClientIp::Unknown => f.write_str("unknown"),
        }
    }
}

impl From<IpAddr> for ClientIp {
    fn from(ip: IpAddr) -> Self {
        ClientIp::Known(ip.to_canonical())
    }
}

/// Work out who is really calling.
///
/// `X-Forwarded-For` is only honoured when the direct peer is a trusted proxy;
/// the client is then the first (left-most) entry of the header.
pub fn resolve_client_ip(
    remote_addr: Option<&str>,
    forwarded_for: Option<&str>,
    trusted_proxies: &[AllowlistRule],
) -> ClientIp {
    let peer = remote_addr.map(ClientIp::parse).unwrap_or(ClientIp::Unknown);

    let from_trusted_proxy = peer
        .ip()
        .is_some_and(|ip| trusted_proxies.iter().any(|rule| rule.matches(ip)));

    if from_trusted_proxy {
        if let Some(first) = forwarded_for
            .and_then(|header| header.split(',').next())
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
        {
            return ClientIp::parse(first);
        }
    }

    peer
}

/// Client IP resolution with the trusted proxy list bound at construction.
#[derive(Debug, Clone, Default)]
pub struct ClientIpResolver {
    trusted_proxies: Vec<AllowlistRule>,
}

impl ClientIpResolver {
    pub fn new(trusted_proxies: Vec<AllowlistRule>) -> Self {
        Self { trusted_proxies }
    }

    pub fn resolve(&self, remote_addr: Option<&str>, forwarded_for: Option<&str>) -> ClientIp {
        resolve_client_ip(remote_addr, forwarded_for, &self.trusted_proxies)
    }
}
