use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnet::{IpNet, Ipv4Net};

use crate::error::ConfigurationError;

/// An allowlist or trusted-proxy entry: one address, or a CIDR block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowlistRule {
    Exact(IpAddr),
    Cidr(IpNet),
}

impl AllowlistRule {
    /// Whether `ip` falls under this rule. Addresses never match rules of the other family.
    pub fn matches(&self, ip: IpAddr) -> bool {
        match self {
            AllowlistRule::Exact(addr) => *addr == ip,
            AllowlistRule::Cidr(network) => network.contains(&ip),
        }
    }
}

fn invalid(rule: &str, reason: impl Into<String>) -> ConfigurationError {
    ConfigurationError::InvalidRule {
        rule: rule.to_string(),
        reason: reason.into(),
    }
}

/// Fold an IPv4-mapped IPv6 block (`::ffff:a.b.c.d/96+`) onto its IPv4 block,
/// since client addresses are folded the same way.
fn canonical_network(raw: &str, network: IpNet) -> Result<IpNet, ConfigurationError> {
    let IpNet::V6(v6) = network else {
        return Ok(network);
    };
    let Some(v4) = v6.addr().to_ipv4_mapped() else {
        return Ok(network);
    };
    if v6.prefix_len() < 96 {
        return Err(invalid(
            raw,
            "IPv4-mapped block must have a prefix of at least /96",
        ));
    }
    Ipv4Net::new(v4, v6.prefix_len() - 96)
        .map(IpNet::V4)
        .map_err(|e| invalid(raw, e.to_string()))
}

impl FromStr for AllowlistRule {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.contains('/') {
            let network = raw
                .parse::<IpNet>()
                .map_err(|e| invalid(raw, e.to_string()))?;
            return canonical_network(raw, network).map(AllowlistRule::Cidr);
        }

        raw.parse::<IpAddr>()
            .map(|ip| AllowlistRule::Exact(ip.to_canonical()))
            .map_err(|e| invalid(raw, e.to_string()))
    }
}

impl fmt::Display for AllowlistRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllowlistRule::Exact(ip) => write!(f, "{}", ip),
            AllowlistRule::Cidr(network) => write!(f, "{}", network),
        }
    }
}

/// Parse a comma-separated rule list.
///
/// Malformed entries are skipped with a warning instead of failing the whole list.
pub fn parse_rules(list: &str) -> Vec<AllowlistRule> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.parse::<AllowlistRule>() {
            Ok(rule) => Some(rule),
            Err(e) => {
                tracing::warn!(rule = %entry, error = %e, "Skipping malformed address rule");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn rule(s: &str) -> AllowlistRule {
        s.parse().unwrap()
    }

    #[test]
    fn test_ipv4_cidr() {
        let net = rule("192.168.1.0/24");
        assert!(net.matches(ip("192.168.1.5")));
        assert!(net.matches(ip("192.168.1.255")));
        assert!(!net.matches(ip("192.168.2.5")));
    }

    #[test]
    fn test_ipv6_cidr() {
        let net = rule("2001:db8::/32");
        assert!(net.matches(ip("2001:db8::1")));
        assert!(net.matches(ip("2001:db8:ffff::1")));
        assert!(!net.matches(ip("2001:db9::1")));
    }

    #[test]
    fn test_prefix_edges() {
        assert!(rule("0.0.0.0/0").matches(ip("8.8.8.8")));
        assert!(rule("::/0").matches(ip("2001:db8::1")));
        assert!(rule("10.1.2.3/32").matches(ip("10.1.2.3")));
        assert!(!rule("10.1.2.3/32").matches(ip("10.1.2.4")));
        assert!(rule("2001:db8::1/128").matches(ip("2001:db8::1")));
        assert!(!rule("2001:db8::1/128").matches(ip("2001:db8::2")));
    }

    #[test]
    fn test_host_bits_in_network_are_masked() {
        assert!(rule("192.168.1.77/24").matches(ip("192.168.1.5")));
    }

    #[test]
    fn test_families_do_not_cross() {
        assert!(!rule("0.0.0.0/0").matches(ip("::1")));
        assert!(!rule("::/0").matches(ip("127.0.0.1")));
    }

    #[test]
    fn test_exact_rules_compare_addresses() {
        assert!(rule("2001:0db8:0000::0001").matches(ip("2001:db8::1")));
        assert!(rule("::ffff:10.0.0.1").matches(ip("10.0.0.1")));
        assert!(!rule("10.0.0.1").matches(ip("10.0.0.2")));
    }

    #[test]
    fn test_mapped_networks_fold_to_ipv4() {
        let net = rule("::ffff:10.0.0.0/104");
        assert_eq!(net.to_string(), "10.0.0.0/8");
        assert!(net.matches(ip("10.20.30.40")));
        assert!(!net.matches(ip("11.0.0.1")));

        assert!("::ffff:0.0.0.0/80".parse::<AllowlistRule>().is_err());
        assert!(rule("2001:db8::/32").to_string().starts_with("2001:db8::"));
    }

    #[test]
    fn test_malformed_rules() {
        assert!("10.0.0.0/33".parse::<AllowlistRule>().is_err());
        assert!("2001:db8::/129".parse::<AllowlistRule>().is_err());
        assert!("10.0.0.0/abc".parse::<AllowlistRule>().is_err());
        assert!("not-an-ip".parse::<AllowlistRule>().is_err());
        assert!("300.1.1.1".parse::<AllowlistRule>().is_err());
    }

    #[test]
    fn test_parse_rules_skips_bad_entries() {
        let rules = parse_rules("10.0.0.0/8, bogus, ,192.168.1.1,2001:db8::/200");
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].to_string(), "10.0.0.0/8");
        assert_eq!(rules[1].to_string(), "192.168.1.1");
        assert!(parse_rules("").is_empty());
    }
}
