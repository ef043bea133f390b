pub mod memory;

#[cfg(feature = "redis")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
pub mod redis;

use crate::policy::QuotaPolicy;
use actix_web::{HttpResponse, ResponseError};
use memory::InMemoryBackend;
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

/// The outcome of a single consumption.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Verdict {
    /// The request fits within the quota.
    Admitted {
        /// Number of points that may still be consumed in the current window.
        remaining_points: u64,
        /// Milliseconds until the current window resets.
        ms_before_next: u64,
    },
    /// The quota is exhausted (or the key is blocked).
    Rejected {
        /// Milliseconds until another consumption may be admitted.
        ms_before_next: u64,
    },
}

impl Verdict {
    pub fn is_admitted(self) -> bool {
        matches!(self, Self::Admitted { .. })
    }

    pub fn is_rejected(self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Always zero for a rejection.
    pub fn remaining_points(self) -> u64 {
        match self {
            Self::Admitted {
                remaining_points, ..
            } => remaining_points,
            Self::Rejected { .. } => 0,
        }
    }

    pub fn ms_before_next(self) -> u64 {
        match self {
            Self::Admitted { ms_before_next, .. } | Self::Rejected { ms_before_next } => {
                ms_before_next
            }
        }
    }
}

/// Backend resident state for a single key.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionRecord {
    /// Points consumed in the current window (or block).
    pub consumed: u64,
    /// Milliseconds until the record expires.
    pub ms_before_expiry: u64,
}

#[derive(Debug, Error)]
pub enum Error {
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(
        #[source]
        #[from]
        ::redis::RedisError,
    ),
    #[error("Unexpected negative TTL response for the rate limit key")]
    NegativeTtl,
    #[error("Expiry of {0} ms is out of range")]
    ExpiryOutOfRange(u64),
}

impl ResponseError for Error {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::InternalServerError().finish()
    }
}

/// Describes a store that counts consumptions per key.
///
/// A Backend is required to implement [Clone], usually this means wrapping your data store within
/// an [Arc](std::sync::Arc), although many connection pools already do so internally; there is no
/// need to wrap it twice.
pub trait Backend: Clone {
    /// Record one consumption against `key` and decide whether it is admitted.
    ///
    /// Every call mutates the stored count exactly once, including calls that end up rejected.
    /// The increment, window expiry and block extension must be applied atomically so that
    /// concurrent callers never observe the same count.
    fn consume(
        &self,
        key: &str,
        policy: &QuotaPolicy,
    ) -> impl Future<Output = Result<Verdict, Error>>;
}

/// Direct access to the stored [ConsumptionRecord]s of a [Backend].
pub trait StateBackend: Backend {
    /// Read the live record for a key, `None` if it is absent or expired.
    fn snapshot(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<ConsumptionRecord>, Error>>;

    /// Overwrite the record for a key, it will expire after `ms_before_expiry`.
    fn restore(
        &self,
        key: &str,
        record: ConsumptionRecord,
    ) -> impl Future<Output = Result<(), Error>>;

    /// Removes the bucket for a given rate limit key.
    fn remove_key(&self, key: &str) -> impl Future<Output = Result<(), Error>>;
}

/// The backend chosen once at start up.
#[derive(Clone)]
pub enum AnyBackend {
    Memory(InMemoryBackend),
    #[cfg(feature = "redis")]
    Redis(self::redis::RedisBackend),
}

impl AnyBackend {
    /// Use the shared store if a connection was supplied and it answers a `PING`, otherwise fall
    /// back to a per process in-memory store.
    ///
    /// The fallback trades global consistency across instances for availability.
    #[cfg(feature = "redis")]
    pub async fn select(
        shared: Option<::redis::aio::ConnectionManager>,
        key_prefix: Option<&str>,
        fallback: memory::InMemoryBackendBuilder,
    ) -> Self {
        if let Some(mut connection) = shared {
            let ping: Result<String, _> = ::redis::cmd("PING").query_async(&mut connection).await;
            match ping {
                Ok(_) => {
                    log::info!("Using Redis rate limiter");
                    return Self::Redis(
                        self::redis::RedisBackend::builder(connection)
                            .key_prefix(key_prefix)
                            .build(),
                    );
                }
                Err(e) => log::warn!("Redis is not ready: {e}"),
            }
        }
        log::info!("Using in-memory rate limiter");
        Self::Memory(fallback.build())
    }

    pub fn is_shared(&self) -> bool {
        !matches!(self, Self::Memory(_))
    }
}

impl From<InMemoryBackend> for AnyBackend {
    fn from(backend: InMemoryBackend) -> Self {
        Self::Memory(backend)
    }
}

impl Backend for AnyBackend {
    async fn consume(&self, key: &str, policy: &QuotaPolicy) -> Result<Verdict, Error> {
        match self {
            Self::Memory(backend) => backend.consume(key, policy).await,
            #[cfg(feature = "redis")]
            Self::Redis(backend) => backend.consume(key, policy).await,
        }
    }
}

impl StateBackend for AnyBackend {
    async fn snapshot(&self, key: &str) -> Result<Option<ConsumptionRecord>, Error> {
        match self {
            Self::Memory(backend) => backend.snapshot(key).await,
            #[cfg(feature = "redis")]
            Self::Redis(backend) => backend.snapshot(key).await,
        }
    }

    async fn restore(&self, key: &str, record: ConsumptionRecord) -> Result<(), Error> {
        match self {
            Self::Memory(backend) => backend.restore(key, record).await,
            #[cfg(feature = "redis")]
            Self::Redis(backend) => backend.restore(key, record).await,
        }
    }

    async fn remove_key(&self, key: &str) -> Result<(), Error> {
        match self {
            Self::Memory(backend) => backend.remove_key(key).await,
            #[cfg(feature = "redis")]
            Self::Redis(backend) => backend.remove_key(key).await,
        }
    }
}
