//! Process-level helpers: tracing setup and retry backoff.

pub mod bootstrap;
pub mod retry;
