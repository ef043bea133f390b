#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod backend;
pub mod config;
mod engine;
mod error;
mod middleware;
pub mod policy;
pub mod profile;

pub use engine::Limiter;
pub use error::{RateLimitExceeded, RegistryError, RATE_LIMIT_EXCEEDED};
pub use middleware::builder::RateLimiterBuilder;
pub use middleware::RateLimiter;
pub use policy::{InvalidPolicy, QuotaPolicy};
pub use profile::{LimiterRegistry, Profile, ProfileName};
