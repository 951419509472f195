//! Client IP resolution and CIDR allowlists.
//!
//! Everything here is a pure function of its inputs: proxies, rules and the
//! environment are bound at construction, never read from globals per call.

mod allowlist;
mod client_ip;
mod rule;

pub use allowlist::{IpAllowlist, is_allowed};
pub use client_ip::{ClientIp, ClientIpResolver, resolve_client_ip};
pub use rule::{AllowlistRule, parse_rules};
