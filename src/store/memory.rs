//! Embedded in-process store.

use super::StateStore;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

struct ValueEntry {
    data: Vec<u8>,
    expires_at: Instant,
}

struct WindowEntry {
    /// (score in epoch milliseconds, member) pairs, insertion-ordered.
    members: Vec<(u64, String)>,
    expires_at: Instant,
}

impl ValueEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

impl WindowEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-process [`StateStore`] with lazy expiry.
///
/// Plain values and window sets live in two mutex-guarded maps; each lock
/// covers the read-modify-write of one call, which is enough because every
/// contract method is a single critical section. State is per-process and
/// therefore not suitable for multi-replica deployments.
pub struct MemoryStore {
    values: RwLock<HashMap<String, ValueEntry>>,
    windows: RwLock<HashMap<String, WindowEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            windows: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut values = self.values.write().unwrap();
        if let Some(entry) = values.get(key) {
            if entry.is_expired() {
                values.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.data.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut values = self.values.write().unwrap();
        values.insert(
            key.to_string(),
            ValueEntry {
                data: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed_value = self.values.write().unwrap().remove(key).is_some();
        let removed_window = self.windows.write().unwrap().remove(key).is_some();
        Ok(removed_value || removed_window)
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let mut values = self.values.write().unwrap();
        if let Some(existing) = values.get(key) {
            if !existing.is_expired() {
                return Ok(false);
            }
        }
        values.insert(
            key.to_string(),
            ValueEntry {
                data: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn scan(&self, pattern: &str, cursor: u64, count: usize) -> Result<(u64, Vec<String>)> {
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);

        let mut matching: Vec<String> = Vec::new();
        {
            let values = self.values.read().unwrap();
            matching.extend(
                values
                    .iter()
                    .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired())
                    .map(|(k, _)| k.clone()),
            );
        }
        {
            let windows = self.windows.read().unwrap();
            matching.extend(
                windows
                    .iter()
                    .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired())
                    .map(|(k, _)| k.clone()),
            );
        }
        matching.sort();

        let start = cursor as usize;
        if start >= matching.len() {
            return Ok((0, Vec::new()));
        }
        let end = (start + count).min(matching.len());
        let page = matching[start..end].to_vec();
        let next = if end == matching.len() { 0 } else { end as u64 };
        Ok((next, page))
    }

    async fn window_admit(
        &self,
        key: &str,
        cutoff_ms: u64,
        member: &str,
        now_ms: u64,
        ttl: Duration,
    ) -> Result<u64> {
        let mut windows = self.windows.write().unwrap();
        let entry = windows.entry(key.to_string()).or_insert_with(|| WindowEntry {
            members: Vec::with_capacity(8),
            expires_at: Instant::now() + ttl,
        });
        if entry.is_expired() {
            entry.members.clear();
        }
        entry.members.retain(|(score, _)| *score >= cutoff_ms);
        entry.members.push((now_ms, member.to_string()));
        entry.expires_at = Instant::now() + ttl;
        Ok(entry.members.len() as u64)
    }

    async fn window_prune(&self, key: &str, cutoff_ms: u64) -> Result<u64> {
        let mut windows = self.windows.write().unwrap();
        match windows.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.members.retain(|(score, _)| *score >= cutoff_ms);
                Ok(entry.members.len() as u64)
            }
            Some(_) => {
                windows.remove(key);
                Ok(0)
            }
            None => Ok(0),
        }
    }

    async fn time_to_live(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        if let Some(entry) = self.values.read().unwrap().get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.expires_at - now));
            }
        }
        if let Some(entry) = self.windows.read().unwrap().get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.expires_at - now));
            }
        }
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
