//! Adaptive token-bucket rate limiting for chunk requests.

mod bucket;
mod governor;

pub use governor::RateGovernor;
