//! Redis-backed directory
//!
//! Key layout:
//! - `vnode:owners` — hash, field = vnode id, value = instance id
//! - `vnode:load`   — hash, field = vnode id, value = session count
//! - `user:<userId>` — string, instance id
//!
//! Both hashes carry a whole-key TTL that every merge write refreshes, so
//! ownership decays when its writer stops heartbeating. Field writes via
//! HSET never erase unrelated entries.

use super::Directory;
use crate::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

const OWNERS_KEY: &str = "vnode:owners";
const LOADS_KEY: &str = "vnode:load";
const USER_KEY_PREFIX: &str = "user:";

/// Directory backed by a shared Redis instance.
pub struct RedisDirectory {
    conn: ConnectionManager,
}

impl RedisDirectory {
    /// Connect to Redis at the given URL.
    ///
    /// Fails fast on unreachable or unauthorized servers; reconnection
    /// after a transient outage is handled by the connection manager.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    fn user_key(user_id: &str) -> String {
        format!("{}{}", USER_KEY_PREFIX, user_id)
    }

    /// Parse a hash field map keyed by stringified vnode ids, skipping
    /// entries that fail to parse (a foreign writer's garbage must not take
    /// down routing).
    fn parse_vnode_map<V: std::str::FromStr>(raw: HashMap<String, String>) -> HashMap<u32, V> {
        let mut out = HashMap::with_capacity(raw.len());
        for (field, value) in raw {
            match (field.parse::<u32>(), value.parse::<V>()) {
                (Ok(vnode), Ok(v)) => {
                    out.insert(vnode, v);
                }
                _ => warn!(%field, %value, "skipping unparseable directory entry"),
            }
        }
        out
    }

    fn ttl_secs(ttl: Duration) -> i64 {
        ttl.as_secs().max(1) as i64
    }
}

#[async_trait]
impl Directory for RedisDirectory {
    async fn get_owners(&self) -> Result<HashMap<u32, String>> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn.hgetall(OWNERS_KEY).await?;
        Ok(Self::parse_vnode_map(raw))
    }

    async fn put_owners(&self, entries: &HashMap<u32, String>, ttl: Duration) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let items: Vec<(String, String)> = entries
            .iter()
            .map(|(vnode, instance)| (vnode.to_string(), instance.clone()))
            .collect();
        let _: () = conn.hset_multiple(OWNERS_KEY, &items).await?;
        let _: () = conn.expire(OWNERS_KEY, Self::ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn delete_owners(&self, vnodes: &[u32]) -> Result<()> {
        if vnodes.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let fields: Vec<String> = vnodes.iter().map(u32::to_string).collect();
        let _: () = conn.hdel(OWNERS_KEY, fields).await?;
        Ok(())
    }

    async fn get_loads(&self) -> Result<HashMap<u32, u64>> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn.hgetall(LOADS_KEY).await?;
        Ok(Self::parse_vnode_map(raw))
    }

    async fn put_loads(&self, entries: &HashMap<u32, u64>, ttl: Duration) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let items: Vec<(String, String)> = entries
            .iter()
            .map(|(vnode, load)| (vnode.to_string(), load.to_string()))
            .collect();
        let _: () = conn.hset_multiple(LOADS_KEY, &items).await?;
        let _: () = conn.expire(LOADS_KEY, Self::ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn get_user_instance(&self, user_id: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(Self::user_key(user_id)).await?)
    }

    async fn put_user_instance(
        &self,
        user_id: &str,
        instance_id: &str,
        ttl: Duration,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(
                Self::user_key(user_id),
                instance_id,
                ttl.as_secs().max(1),
            )
            .await?;
        Ok(())
    }
}
