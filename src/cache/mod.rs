use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::logging::{LogEntry, normalize_filter};
use crate::store::RecordSink;
use crate::types::{CacheKey, ProjectId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub key: CacheKey,
    pub filter: String,
    pub project: ProjectId,
    pub stored_at: DateTime<Utc>,
    pub logs: Vec<LogEntry>,
}

impl CacheRecord {
    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.stored_at > ttl
    }
}

/// Previously fetched results keyed by project and normalized filter.
///
/// Records older than the TTL are treated as absent and removed lazily on
/// lookup. The table never holds more than `max_entries` records; the
/// oldest stored ones are dropped first.
pub struct ResultCache {
    records: HashMap<CacheKey, CacheRecord>,
    ttl: Duration,
    max_entries: usize,
    bypass_next: bool,
    sink: Box<dyn RecordSink<CacheRecord>>,
}

impl ResultCache {
    pub fn new(ttl: Duration, max_entries: usize, sink: Box<dyn RecordSink<CacheRecord>>) -> Self {
        Self {
            records: HashMap::new(),
            ttl,
            max_entries,
            bypass_next: false,
            sink,
        }
    }

    /// Rebuilds the cache from persisted records, dropping anything expired
    /// and anything beyond the size bound.
    pub fn with_records(
        records: Vec<CacheRecord>,
        ttl: Duration,
        max_entries: usize,
        sink: Box<dyn RecordSink<CacheRecord>>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut cache = Self::new(ttl, max_entries, sink);
        for record in records {
            if !record.is_expired(now, ttl) {
                cache.records.insert(record.key.clone(), record);
            }
        }
        cache.truncate();
        tracing::info!("Loaded {} cached results", cache.records.len());
        cache
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Makes the next lookup miss without touching the stored record.
    pub fn bypass_next(&mut self) {
        self.bypass_next = true;
    }

    pub fn lookup(
        &mut self,
        project: &ProjectId,
        filter: &str,
    ) -> Result<Option<Vec<LogEntry>>, PersistenceError> {
        self.lookup_at(project, filter, Utc::now())
    }

    /// Returns the stored entries for a live record. An `Err` means the
    /// record had expired and re-persisting the cache after evicting it
    /// failed; it is a miss either way.
    pub fn lookup_at(
        &mut self,
        project: &ProjectId,
        filter: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<LogEntry>>, PersistenceError> {
        if std::mem::take(&mut self.bypass_next) {
            tracing::debug!("Cache bypassed for this lookup");
            return Ok(None);
        }

        let key = CacheKey::new(project, filter);
        let Some(record) = self.records.get(&key) else {
            tracing::debug!("Cache miss for {key}");
            return Ok(None);
        };

        if record.is_expired(now, self.ttl) {
            tracing::debug!("Cache entry for {key} expired, evicting");
            self.records.remove(&key);
            self.persist()?;
            return Ok(None);
        }

        tracing::debug!("Cache hit for {key} ({} entries)", record.logs.len());
        Ok(Some(record.logs.clone()))
    }

    pub fn store(
        &mut self,
        project: &ProjectId,
        filter: &str,
        entries: &[LogEntry],
    ) -> Result<bool, PersistenceError> {
        self.store_at(project, filter, entries, Utc::now())
    }

    /// Stores a result, replacing any record with the same key. Blank
    /// filters are never cached (`Ok(false)`).
    pub fn store_at(
        &mut self,
        project: &ProjectId,
        filter: &str,
        entries: &[LogEntry],
        now: DateTime<Utc>,
    ) -> Result<bool, PersistenceError> {
        let normalized = normalize_filter(filter);
        if normalized.is_empty() {
            return Ok(false);
        }

        let key = CacheKey::new(project, filter);
        self.records.insert(
            key.clone(),
            CacheRecord {
                key,
                filter: normalized,
                project: project.clone(),
                stored_at: now,
                logs: entries.to_vec(),
            },
        );
        self.truncate();
        self.persist()?;
        Ok(true)
    }

    pub fn evict_expired(&mut self) -> Result<usize, PersistenceError> {
        self.evict_expired_at(Utc::now())
    }

    pub fn evict_expired_at(&mut self, now: DateTime<Utc>) -> Result<usize, PersistenceError> {
        let ttl = self.ttl;
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now, ttl));
        let evicted = before - self.records.len();
        if evicted > 0 {
            tracing::debug!("Evicted {evicted} expired cache entries");
            self.persist()?;
        }
        Ok(evicted)
    }

    fn truncate(&mut self) {
        if self.records.len() <= self.max_entries {
            return;
        }
        let mut by_age: Vec<(DateTime<Utc>, CacheKey)> = self
            .records
            .values()
            .map(|record| (record.stored_at, record.key.clone()))
            .collect();
        by_age.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, key) in by_age.into_iter().skip(self.max_entries) {
            self.records.remove(&key);
        }
    }

    /// Snapshot in storage order, newest first.
    pub fn records(&self) -> Vec<CacheRecord> {
        let mut records: Vec<CacheRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| b.stored_at.cmp(&a.stored_at));
        records
    }

    fn persist(&self) -> Result<(), PersistenceError> {
        self.sink.persist(&self.records())
    }
}
