//! Redis counter store using fixed-window counters and TTL-bound block keys.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};

use bulwark_core::StoreError;
use bulwark_core::domain::decision::{add_millis, window_deadline};
use bulwark_core::domain::{
    BackendHealth, ConsumeRequest, CounterSnapshot, StoreDecision, blocked_result, evaluate,
};
use bulwark_core::ports::CounterStore;

/// Redis connection configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Whether to use the in-memory counter store if Redis is unreachable at startup
    pub fallback_to_memory: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
            fallback_to_memory: false,
        }
    }
}

impl RedisConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            connect_timeout: Duration::from_secs(
                std::env::var("REDIS_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            fallback_to_memory: std::env::var("REDIS_FALLBACK_TO_MEMORY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }
}

/// Redis counter store configuration.
#[derive(Debug, Clone)]
pub struct RedisCounterStoreConfig {
    pub redis: RedisConfig,
    /// Namespace for every key this store writes
    pub key_prefix: String,
}

impl Default for RedisCounterStoreConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            key_prefix: "ratelimit".to_string(),
        }
    }
}

impl RedisCounterStoreConfig {
    pub fn from_env() -> Self {
        Self {
            redis: RedisConfig::from_env(),
            key_prefix: std::env::var("RATE_LIMIT_KEY_PREFIX")
                .unwrap_or_else(|_| "ratelimit".to_string()),
        }
    }
}

// KEYS[1] = counter key, KEYS[2] = block key
// ARGV[1] = window ms, ARGV[2] = increment flag, ARGV[3] = now (epoch ms)
// Returns: {count, counter ttl ms, blocked until ms or 0}
const CONSUME_SCRIPT: &str = r#"
local blocked = tonumber(redis.call('GET', KEYS[2]) or '0')
if blocked > tonumber(ARGV[3]) then
    local count = tonumber(redis.call('GET', KEYS[1]) or '0')
    return {count, redis.call('PTTL', KEYS[1]), blocked}
end

local current
if ARGV[2] == '1' then
    current = redis.call('INCR', KEYS[1])
else
    current = tonumber(redis.call('GET', KEYS[1]) or '0')
end

local ttl = redis.call('PTTL', KEYS[1])
if current > 0 and ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {current, ttl, 0}
"#;

const SCAN_BATCH: usize = 500;

/// Redis-backed counter store, the primary backend.
///
/// Counters live under `{prefix}:count:{module}:{key}` with the window as TTL;
/// blocks under `{prefix}:block:{module}:{key}` holding the lift time.
pub struct RedisCounterStore {
    conn: ConnectionManager,
    config: RedisCounterStoreConfig,
    /// Atomic check-and-increment
    script: Script,
}

impl RedisCounterStore {
    pub async fn new(config: RedisCounterStoreConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.redis.url.as_str())
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        // Use timeout to prevent hanging if Redis is unreachable
        let conn_manager_fut = ConnectionManager::new(client);
        let conn = tokio::time::timeout(config.redis.connect_timeout, conn_manager_fut)
            .await
            .map_err(|_| StoreError::Timeout(config.redis.connect_timeout))?
            .map_err(store_err)?;

        tracing::info!(url = %config.redis.url, prefix = %config.key_prefix, "Connected to Redis counter store");

        Ok(Self {
            conn,
            config,
            script: Script::new(CONSUME_SCRIPT),
        })
    }

    /// Create from environment configuration.
    pub async fn from_env() -> Result<Self, StoreError> {
        Self::new(RedisCounterStoreConfig::from_env()).await
    }

    fn count_key(&self, module: &str, key: &str) -> String {
        storage_key(&self.config.key_prefix, COUNT_KIND, module, key)
    }

    fn block_key(&self, module: &str, key: &str) -> String {
        storage_key(&self.config.key_prefix, BLOCK_KIND, module, key)
    }

    async fn write_block(
        &self,
        block_key: &str,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let ttl_ms = (until - now).num_milliseconds();
        if ttl_ms <= 0 {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(block_key)
            .arg(until.timestamp_millis())
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// Deletes the keys SCAN returns for `pattern` that also pass `keep`.
    async fn delete_matching(
        &self,
        pattern: &str,
        keep: impl Fn(&str) -> bool,
    ) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut removed = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(store_err)?;

            let keys: Vec<String> = keys.into_iter().filter(|k| keep(k.as_str())).collect();
            if !keys.is_empty() {
                let deleted: u64 = redis::cmd("DEL")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await
                    .map_err(store_err)?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }
}

/// Socket timeouts count as outages; the coordinator's own deadline owns
/// [`StoreError::Timeout`].
fn store_err(e: RedisError) -> StoreError {
    if e.is_timeout()
        || e.is_io_error()
        || e.is_connection_refusal()
        || e.is_connection_dropped()
    {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Query(e.to_string())
    }
}

const COUNT_KIND: &str = "count";
const BLOCK_KIND: &str = "block";

/// `{prefix}:{kind}:{module}:{key}` with `:` and `%` encoded inside segments,
/// so every stored key splits back into exactly its four parts.
fn storage_key(prefix: &str, kind: &str, module: &str, key: &str) -> String {
    format!(
        "{}:{}:{}:{}",
        prefix,
        kind,
        encode_segment(module),
        encode_segment(key)
    )
}

fn encode_segment(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            _ => out.push(c),
        }
    }
    out
}

fn decode_segment(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(at) = rest.find('%') {
        out.push_str(&rest[..at]);
        let escape = rest.get(at..at + 3)?;
        match escape {
            "%25" => out.push('%'),
            "%3A" => out.push(':'),
            _ => return None,
        }
        rest = &rest[at + 3..];
    }
    out.push_str(rest);
    Some(out)
}

/// SCAN pattern for a wildcard reset. `None` matches any segment.
fn scan_pattern(prefix: &str, key: Option<&str>, module: Option<&str>) -> String {
    let segment =
        |s: Option<&str>| s.map_or_else(|| "*".to_string(), |s| escape_glob(&encode_segment(s)));
    format!(
        "{}:*:{}:{}",
        escape_glob(prefix),
        segment(module),
        segment(key)
    )
}

/// Splits a stored key into `(module, key)`; `None` for foreign keys.
fn parse_key(prefix: &str, raw: &str) -> Option<(String, String)> {
    let rest = raw.strip_prefix(prefix)?.strip_prefix(':')?;
    let mut parts = rest.split(':');
    let kind = parts.next()?;
    let module = parts.next()?;
    let key = parts.next()?;
    if parts.next().is_some() || !matches!(kind, COUNT_KIND | BLOCK_KIND) {
        return None;
    }
    Some((decode_segment(module)?, decode_segment(key)?))
}

fn reset_matches(prefix: &str, raw: &str, key: Option<&str>, module: Option<&str>) -> bool {
    parse_key(prefix, raw).is_some_and(|(m, k)| {
        module.is_none_or(|want| want == m) && key.is_none_or(|want| want == k)
    })
}

/// Escapes glob metacharacters so user keys match literally in SCAN.
fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn consume(&self, request: &ConsumeRequest<'_>) -> Result<StoreDecision, StoreError> {
        let now = request.now;
        let window_ms = request.config.window_ms.max(1);
        let count_key = self.count_key(request.module, request.key);
        let block_key = self.block_key(request.module, request.key);
        let mut conn = self.conn.clone();

        let reply: Vec<i64> = self
            .script
            .key(&count_key)
            .key(&block_key)
            .arg(window_ms)
            .arg(if request.increment { "1" } else { "0" })
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;

        let count = u32::try_from(reply.first().copied().unwrap_or(0).max(0)).unwrap_or(u32::MAX);
        let ttl_ms = reply.get(1).copied().unwrap_or(-1);
        let blocked_ms = reply.get(2).copied().unwrap_or(0);

        let reset_time = if ttl_ms > 0 {
            add_millis(now, ttl_ms.unsigned_abs())
        } else {
            window_deadline(request.config, now)
        };

        if blocked_ms > 0 {
            let until = millis_to_datetime(blocked_ms)
                .ok_or_else(|| StoreError::Query(format!("invalid block timestamp {blocked_ms}")))?;
            return Ok(StoreDecision {
                result: blocked_result(until, reset_time),
                count,
                event: None,
            });
        }

        let eval = evaluate(request.config, count, request.increment, now, reset_time);
        if let Some(until) = eval.block {
            self.write_block(&block_key, until, now).await?;
            tracing::debug!(module = %request.module, count, "Block written to Redis");
        }

        Ok(StoreDecision {
            result: eval.result,
            count,
            event: eval.event,
        })
    }

    async fn set_block(
        &self,
        key: &str,
        module: &str,
        blocked_until: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let block_key = self.block_key(module, key);
        let now = Utc::now();
        match blocked_until.filter(|until| *until > now) {
            Some(until) => self.write_block(&block_key, until, now).await,
            None => {
                let mut conn = self.conn.clone();
                let _: u64 = redis::cmd("DEL")
                    .arg(&block_key)
                    .query_async(&mut conn)
                    .await
                    .map_err(store_err)?;
                Ok(())
            }
        }
    }

    async fn reset(&self, key: Option<&str>, module: Option<&str>) -> Result<u64, StoreError> {
        if let (Some(key), Some(module)) = (key, module) {
            let mut conn = self.conn.clone();
            let removed: u64 = redis::cmd("DEL")
                .arg(self.count_key(module, key))
                .arg(self.block_key(module, key))
                .query_async(&mut conn)
                .await
                .map_err(store_err)?;
            return Ok(removed);
        }
        let prefix = &self.config.key_prefix;
        self.delete_matching(&scan_pattern(prefix, key, module), |raw| {
            reset_matches(prefix, raw, key, module)
        })
        .await
    }

    async fn clear_all(&self) -> Result<u64, StoreError> {
        self.delete_matching(&format!("{}:*", self.config.key_prefix), |_| true)
            .await
    }

    async fn health_check(&self) -> BackendHealth {
        let started = Instant::now();
        let mut conn = self.conn.clone();
        let reply: Result<String, RedisError> = redis::cmd("PING").query_async(&mut conn).await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match reply {
            Ok(_) => BackendHealth::up(latency_ms),
            Err(e) => BackendHealth::down(latency_ms, e.to_string()),
        }
    }

    async fn restore_state(&self, snapshot: &CounterSnapshot) -> Result<(), StoreError> {
        let now = Utc::now();
        if let Some(window_end) = snapshot.window_end {
            let ttl_ms = (window_end - now).num_milliseconds();
            if snapshot.count > 0 && ttl_ms > 0 {
                let mut conn = self.conn.clone();
                let _: () = redis::cmd("SET")
                    .arg(self.count_key(&snapshot.module, &snapshot.key))
                    .arg(snapshot.count)
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async(&mut conn)
                    .await
                    .map_err(store_err)?;
            }
        }
        if let Some(until) = snapshot.blocked_until {
            self.write_block(&self.block_key(&snapshot.module, &snapshot.key), until, now)
                .await?;
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), StoreError> {
        // ConnectionManager closes when the last clone drops.
        tracing::debug!("Redis counter store released");
        Ok(())
    }
}
