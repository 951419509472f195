//! Observability module - request IDs and access logging.

mod request_log;

pub use request_log::{RequestId, RequestLog};
