//! Domain types - buckets, counters, decisions and deployment environment.

mod bucket;
mod counter;
mod decision;
mod environment;

pub use bucket::{API, BucketPolicy, BucketRegistry, HARD, LIGHT};
pub use counter::{Counter, CounterHit, RateLimitKey, expiry};
pub use decision::Decision;
pub use environment::{Environment, UnknownEnvironment};
