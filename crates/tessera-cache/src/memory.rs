//! In-process [`StateStore`] for single-process deployments and tests.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{CacheError, CacheResult};
use crate::pipeline::{Pipeline, PipelineOp, PipelineReply};
use crate::store::{StateStore, StoreStats, glob_match};

#[derive(Debug, Clone)]
enum StoredValue {
    Str(String),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Expiring map guarded by one lock. Pipelines run under a single write
/// guard, so every batch is applied atomically regardless of the flag.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        let purged = before - entries.len();
        if purged > 0 {
            debug!(purged, "Purged expired cache entries");
        }
        purged
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn record_read(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn live<'a>(entries: &'a HashMap<String, Entry>, key: &str, now: Instant) -> Option<&'a Entry> {
        entries.get(key).filter(|e| !e.is_expired(now))
    }

    fn live_mut<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: Instant,
    ) -> Option<&'a mut Entry> {
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }

    fn apply_set(entries: &mut HashMap<String, Entry>, key: &str, value: &str, ttl: Option<Duration>) {
        entries.insert(
            key.to_string(),
            Entry {
                value: StoredValue::Str(value.to_string()),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    fn apply_get(
        entries: &HashMap<String, Entry>,
        key: &str,
        now: Instant,
    ) -> CacheResult<Option<String>> {
        match Self::live(entries, key, now).map(|e| &e.value) {
            Some(StoredValue::Str(s)) => Ok(Some(s.clone())),
            Some(StoredValue::Set(_)) => Err(CacheError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    fn apply_delete(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) -> u64 {
        match entries.remove(key) {
            Some(e) if !e.is_expired(now) => 1,
            _ => 0,
        }
    }

    fn apply_sadd(
        entries: &mut HashMap<String, Entry>,
        key: &str,
        members: &[String],
        now: Instant,
    ) -> CacheResult<u64> {
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        let entry = entries.entry(key.to_string()).or_insert(Entry {
            value: StoredValue::Set(BTreeSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            StoredValue::Set(set) => Ok(members
                .iter()
                .filter(|m| set.insert((*m).clone()))
                .count() as u64),
            StoredValue::Str(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    fn apply_expire(
        entries: &mut HashMap<String, Entry>,
        key: &str,
        ttl: Duration,
        now: Instant,
    ) -> bool {
        match Self::live_mut(entries, key, now) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        let value = Self::apply_get(&*self.entries.read().await, key, now)?;
        self.record_read(value.is_some());
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        Self::apply_set(&mut *self.entries.write().await, key, value, ttl);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<u64> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        Ok(keys
            .iter()
            .map(|k| Self::apply_delete(&mut entries, k, now))
            .sum())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let now = Instant::now();
        Ok(Self::live(&*self.entries.read().await, key, now).is_some())
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let now = Instant::now();
        Ok(Self::live(&*self.entries.read().await, key, now)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let now = Instant::now();
        Ok(Self::apply_expire(&mut *self.entries.write().await, key, ttl, now))
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| !e.is_expired(now) && glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn sadd(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        let now = Instant::now();
        Self::apply_sadd(&mut *self.entries.write().await, key, members, now)
    }

    async fn srem(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let Some(entry) = Self::live_mut(&mut entries, key, now) else {
            return Ok(0);
        };
        let (removed, now_empty) = match &mut entry.value {
            StoredValue::Set(set) => {
                let removed = members.iter().filter(|m| set.remove(*m)).count() as u64;
                (removed, set.is_empty())
            }
            StoredValue::Str(_) => return Err(CacheError::WrongType(key.to_string())),
        };
        // Redis deletes empty sets
        if now_empty {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let members = match Self::live(&entries, key, now).map(|e| &e.value) {
            Some(StoredValue::Set(set)) => set.iter().cloned().collect(),
            Some(StoredValue::Str(_)) => return Err(CacheError::WrongType(key.to_string())),
            None => Vec::new(),
        };
        self.record_read(!members.is_empty());
        Ok(members)
    }

    async fn execute(&self, pipeline: Pipeline) -> CacheResult<Vec<PipelineReply>> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        // Apply to copies of the touched keys so a failing op leaves the
        // store untouched
        let mut touched: Vec<String> = pipeline.ops.iter().map(|op| op.key().to_string()).collect();
        touched.sort();
        touched.dedup();
        let mut staged: HashMap<String, Entry> = touched
            .iter()
            .filter_map(|key| entries.get(key).map(|e| (key.clone(), e.clone())))
            .collect();
        let mut replies = Vec::with_capacity(pipeline.len());
        let mut hits = 0u64;
        let mut misses = 0u64;
        for op in pipeline.ops {
            let reply = match op {
                PipelineOp::Set { key, value, ttl } => {
                    Self::apply_set(&mut staged, &key, &value, ttl);
                    PipelineReply::Ok
                }
                PipelineOp::Get { key } => {
                    let value = Self::apply_get(&staged, &key, now)?;
                    if value.is_some() {
                        hits += 1;
                    } else {
                        misses += 1;
                    }
                    PipelineReply::Value(value)
                }
                PipelineOp::Delete { key } => {
                    PipelineReply::Count(Self::apply_delete(&mut staged, &key, now))
                }
                PipelineOp::SAdd { key, members } => {
                    PipelineReply::Count(Self::apply_sadd(&mut staged, &key, &members, now)?)
                }
                PipelineOp::Expire { key, ttl } => {
                    PipelineReply::Bool(Self::apply_expire(&mut staged, &key, ttl, now))
                }
            };
            replies.push(reply);
        }

        for key in touched {
            match staged.remove(&key) {
                Some(entry) => entries.insert(key, entry),
                None => entries.remove(&key),
            };
        }
        self.hits.fetch_add(hits, Ordering::Relaxed);
        self.misses.fetch_add(misses, Ordering::Relaxed);
        Ok(replies)
    }

    async fn stats(&self) -> CacheResult<StoreStats> {
        Ok(StoreStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        })
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }
}
