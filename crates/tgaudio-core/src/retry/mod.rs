//! Exponential backoff with jitter for the worker pool's retry loop.

mod policy;

pub use policy::{RetryDecision, RetryPolicy};
