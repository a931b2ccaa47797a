//! Redis-backed store.

use super::StateStore;
use crate::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// Production [`StateStore`] over Redis.
///
/// Conditional writes use `SET NX PX`, scans use `SCAN MATCH COUNT`, and the
/// window batches run as `MULTI`/`EXEC` pipelines so prune, insert, count and
/// TTL refresh commit as one unit. The connection manager reconnects on its
/// own; callers only see errors while the backend is actually unreachable.
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let data: Option<Vec<u8>> = conn.get(key).await?;
        Ok(data)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn scan(&self, pattern: &str, cursor: u64, count: usize) -> Result<(u64, Vec<String>)> {
        let mut conn = self.conn.clone();
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok((next, keys))
    }

    async fn window_admit(
        &self,
        key: &str,
        cutoff_ms: u64,
        member: &str,
        now_ms: u64,
        ttl: Duration,
    ) -> Result<u64> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(format!("({cutoff_ms}"))
            .ignore();
        pipe.cmd("ZADD").arg(key).arg(now_ms).arg(member).ignore();
        pipe.cmd("ZCARD").arg(key);
        pipe.cmd("PEXPIRE").arg(key).arg(ttl.as_millis() as u64).ignore();
        let (count,): (u64,) = pipe.query_async(&mut conn).await?;
        Ok(count)
    }

    async fn window_prune(&self, key: &str, cutoff_ms: u64) -> Result<u64> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(format!("({cutoff_ms}"))
            .ignore();
        pipe.cmd("ZCARD").arg(key);
        let (count,): (u64,) = pipe.query_async(&mut conn).await?;
        Ok(count)
    }

    async fn time_to_live(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.conn.clone();
        let ms: i64 = conn.pttl(key).await?;
        // -2 means the key is absent, -1 means it has no expiry.
        if ms < 0 {
            return Ok(None);
        }
        Ok(Some(Duration::from_millis(ms as u64)))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
