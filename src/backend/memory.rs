use crate::backend::{Backend, ConsumptionRecord, Error, StateBackend, Verdict};
use crate::engine;
use crate::policy::QuotaPolicy;
use actix_web::rt::task::JoinHandle;
use actix_web::rt::time::Instant;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_GC_INTERVAL_SECONDS: u64 = 60 * 10;

/// A per process [Backend] that uses [DashMap](dashmap::DashMap) to store keys in memory.
///
/// Expired records are treated as absent when they are next accessed, the optional garbage
/// collector only bounds memory use.
#[derive(Clone)]
pub struct InMemoryBackend {
    map: Arc<DashMap<String, Value>>,
    _gc: Option<Arc<GarbageCollector>>,
}

struct Value {
    expiry: Instant,
    consumed: u64,
}

// Aborts the sweep once the last clone of the backend is dropped.
struct GarbageCollector(JoinHandle<()>);

impl Drop for GarbageCollector {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn deadline(now: Instant, after: Duration) -> Result<Instant, Error> {
    now.checked_add(after).ok_or(Error::ExpiryOutOfRange(after.as_millis() as u64))
}

fn millis_until(expiry: Instant, now: Instant) -> u64 {
    expiry.saturating_duration_since(now).as_millis() as u64
}

impl InMemoryBackend {
    pub fn builder() -> InMemoryBackendBuilder {
        InMemoryBackendBuilder {
            gc_interval: Some(Duration::from_secs(DEFAULT_GC_INTERVAL_SECONDS)),
        }
    }

    fn garbage_collector(map: Arc<DashMap<String, Value>>, interval: Duration) -> JoinHandle<()> {
        assert!(interval.as_secs_f64() > 0f64, "GC interval must be non-zero");
        actix_web::rt::spawn(async move {
            loop {
                let now = Instant::now();
                map.retain(|_k, v| v.expiry > now);
                actix_web::rt::time::sleep_until(now + interval).await;
            }
        })
    }
}

impl Backend for InMemoryBackend {
    async fn consume(&self, key: &str, policy: &QuotaPolicy) -> Result<Verdict, Error> {
        let now = Instant::now();
        // The entry guard holds the shard lock, so the whole update is atomic per key.
        let mut value = self
            .map
            .entry(key.to_owned())
            .or_insert_with(|| Value {
                expiry: now,
                consumed: 0,
            });
        if value.expiry <= now {
            // Absent or expired, start a fresh window.
            value.consumed = 0;
            value.expiry = deadline(now, policy.duration())?;
        }
        value.consumed = value.consumed.saturating_add(1);
        if engine::should_block(policy, value.consumed) {
            value.expiry = deadline(now, policy.block_duration())?;
        }
        Ok(engine::verdict(
            policy,
            value.consumed,
            millis_until(value.expiry, now),
        ))
    }
}

impl StateBackend for InMemoryBackend {
    async fn snapshot(&self, key: &str) -> Result<Option<ConsumptionRecord>, Error> {
        let now = Instant::now();
        Ok(self
            .map
            .get(key)
            .filter(|v| v.expiry > now)
            .map(|v| ConsumptionRecord {
                consumed: v.consumed,
                ms_before_expiry: millis_until(v.expiry, now),
            }))
    }

    async fn restore(&self, key: &str, record: ConsumptionRecord) -> Result<(), Error> {
        if record.ms_before_expiry == 0 {
            self.map.remove(key);
            return Ok(());
        }
        let expiry = deadline(Instant::now(), Duration::from_millis(record.ms_before_expiry))?;
        self.map.insert(
            key.to_owned(),
            Value {
                expiry,
                consumed: record.consumed,
            },
        );
        Ok(())
    }

    async fn remove_key(&self, key: &str) -> Result<(), Error> {
        self.map.remove(key);
        Ok(())
    }
}

pub struct InMemoryBackendBuilder {
    gc_interval: Option<Duration>,
}

impl InMemoryBackendBuilder {
    /// Override the default garbage collector interval.
    ///
    /// Set to None to disable garbage collection.
    ///
    /// The garbage collector periodically scans the internal map, removing expired buckets.
    pub fn with_gc_interval(mut self, interval: Option<Duration>) -> Self {
        self.gc_interval = interval;
        self
    }

    /// Must be called from within the actix (tokio) runtime when garbage collection is enabled.
    pub fn build(self) -> InMemoryBackend {
        let map = Arc::new(DashMap::<String, Value>::new());
        let _gc = self.gc_interval.map(|gc_interval| {
            Arc::new(GarbageCollector(InMemoryBackend::garbage_collector(
                map.clone(),
                gc_interval,
            )))
        });
        InMemoryBackend { map, _gc }
    }
}
