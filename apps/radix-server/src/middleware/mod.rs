//! Middleware modules.

pub mod allowlist;
pub mod client;
pub mod error;
pub mod throttle;

pub use allowlist::IpAllowlistGuard;
pub use throttle::Throttle;
