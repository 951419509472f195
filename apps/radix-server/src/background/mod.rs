//! Background jobs.

mod sweeper;

pub use sweeper::Sweeper;
