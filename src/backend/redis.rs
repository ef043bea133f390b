use crate::backend::{Backend, ConsumptionRecord, Error, StateBackend, Verdict};
use crate::engine;
use crate::policy::QuotaPolicy;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::borrow::Cow;

// Increments the count, starts a window on the first increment and applies the block once over
// quota. Returns the new count and the remaining time to live in milliseconds.
static CONSUME_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
local consumed = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if consumed == 1 or ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
if consumed > tonumber(ARGV[2]) and tonumber(ARGV[3]) > 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[3])
    ttl = tonumber(ARGV[3])
end
return {consumed, ttl}
",
    )
});

/// Open a connection to the shared store.
///
/// Failures are logged and reported as `None`, in which case the caller should fall back to a
/// per process store.
pub async fn connect_shared_store(url: &str) -> Option<ConnectionManager> {
    let client = match redis::Client::open(url) {
        Ok(client) => client,
        Err(e) => {
            log::error!("Invalid Redis URL: {e}");
            return None;
        }
    };
    match ConnectionManager::new(client).await {
        Ok(manager) => {
            log::info!("Redis connection established");
            Some(manager)
        }
        Err(e) => {
            log::error!("Failed to connect to Redis: {e}");
            None
        }
    }
}

/// A [Backend] that stores data in Redis, shared between every instance pointing at the same
/// server.
#[derive(Clone)]
pub struct RedisBackend {
    connection: ConnectionManager,
    key_prefix: Option<String>,
}

impl RedisBackend {
    /// Create a RedisBackendBuilder.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use storefront_admission::backend::redis::RedisBackend;
    /// # use redis::aio::ConnectionManager;
    /// # async fn example() {
    /// let client = redis::Client::open("redis://127.0.0.1/").unwrap();
    /// let manager = ConnectionManager::new(client).await.unwrap();
    /// let backend = RedisBackend::builder(manager).build();
    /// # };
    /// ```
    pub fn builder(connection: ConnectionManager) -> Builder {
        Builder {
            connection,
            key_prefix: None,
        }
    }

    fn make_key<'t>(&self, key: &'t str) -> Cow<'t, str> {
        match &self.key_prefix {
            None => Cow::Borrowed(key),
            Some(prefix) => Cow::Owned(format!("{prefix}{key}")),
        }
    }
}

pub struct Builder {
    connection: ConnectionManager,
    key_prefix: Option<String>,
}

impl Builder {
    /// Apply an optional prefix to all rate limit keys given to this backend.
    ///
    /// This may be useful when the Redis instance is being used for other purposes; the prefix is
    /// used as a 'namespace' to avoid collision with other caches or keys inside Redis.
    pub fn key_prefix(mut self, key_prefix: Option<&str>) -> Self {
        self.key_prefix = key_prefix.map(ToOwned::to_owned);
        self
    }

    pub fn build(self) -> RedisBackend {
        RedisBackend {
            connection: self.connection,
            key_prefix: self.key_prefix,
        }
    }
}

impl Backend for RedisBackend {
    async fn consume(&self, key: &str, policy: &QuotaPolicy) -> Result<Verdict, Error> {
        let key = self.make_key(key);
        let mut con = self.connection.clone();
        let (consumed, ttl): (u64, i64) = CONSUME_SCRIPT
            .key(key.as_ref())
            .arg(policy.duration().as_millis() as u64)
            .arg(policy.points())
            .arg(policy.block_duration().as_millis() as u64)
            .invoke_async(&mut con)
            .await?;
        if ttl < 0 {
            return Err(Error::NegativeTtl);
        }
        Ok(engine::verdict(policy, consumed, ttl as u64))
    }
}

impl StateBackend for RedisBackend {
    /// Note that the key prefix (if set) is automatically included, you do not need to prepend
    /// it yourself.
    async fn snapshot(&self, key: &str) -> Result<Option<ConsumptionRecord>, Error> {
        let key = self.make_key(key);
        let mut con = self.connection.clone();
        let (consumed, ttl): (Option<u64>, i64) = redis::pipe()
            .atomic()
            .get(key.as_ref())
            .pttl(key.as_ref())
            .query_async(&mut con)
            .await?;
        Ok(match consumed {
            Some(consumed) if ttl > 0 => Some(ConsumptionRecord {
                consumed,
                ms_before_expiry: ttl as u64,
            }),
            _ => None,
        })
    }

    async fn restore(&self, key: &str, record: ConsumptionRecord) -> Result<(), Error> {
        let key = self.make_key(key);
        let mut con = self.connection.clone();
        if record.ms_before_expiry == 0 {
            let () = con.del(key.as_ref()).await?;
            return Ok(());
        }
        let () = redis::cmd("SET")
            .arg(key.as_ref())
            .arg(record.consumed)
            .arg("PX")
            .arg(record.ms_before_expiry)
            .query_async(&mut con)
            .await?;
        Ok(())
    }

    async fn remove_key(&self, key: &str) -> Result<(), Error> {
        let key = self.make_key(key);
        let mut con = self.connection.clone();
        let () = con.del(key.as_ref()).await?;
        Ok(())
    }
}
