use crate::domain::Environment;

use super::client_ip::ClientIp;
use super::rule::AllowlistRule;

/// Whether `ip` matches any rule. Unknown clients match nothing.
pub fn is_allowed(ip: &ClientIp, rules: &[AllowlistRule]) -> bool {
    match ip.ip() {
        Some(addr) => rules.iter().any(|rule| rule.matches(addr)),
        None => false,
    }
}

/// IP allowlist bound to its deployment environment.
#[derive(Debug, Clone)]
pub struct IpAllowlist {
    rules: Vec<AllowlistRule>,
    environment: Environment,
}

impl IpAllowlist {
    /// Build the allowlist. In `local`/`development` every client is let through,
    /// and that is announced here at warn level.
    pub fn new(rules: Vec<AllowlistRule>, environment: Environment) -> Self {
        if environment.bypasses_allowlist() {
            tracing::warn!(
                environment = %environment,
                rules = rules.len(),
                "IP allowlist bypassed: every client is allowed in this environment"
            );
        } else if rules.is_empty() {
            tracing::warn!(
                environment = %environment,
                "IP allowlist is empty: every client will be denied"
            );
        }

        Self { rules, environment }
    }

    pub fn permits(&self, ip: &ClientIp) -> bool {
        if self.environment.bypasses_allowlist() {
            return true;
        }
        is_allowed(ip, &self.rules)
    }

    pub fn bypassed(&self) -> bool {
        self.environment.bypasses_allowlist()
    }
}
