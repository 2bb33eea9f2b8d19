//! Configuration loading and management.
//!
//! All knobs are read-only inputs handed to component constructors; the
//! core holds no global mutable configuration state. Split into:
//! - [`types`]: Root config struct, owner identity, loading
//! - [`tokens`]: Token system configuration (enabled flag, TTL)
//! - [`admission`]: Admission queue configuration (capacity, rate limits, starvation bound)

mod admission;
mod tokens;
mod types;

pub use admission::AdmissionConfig;
pub use tokens::TokenConfig;
pub use types::{Config, ConfigError};
