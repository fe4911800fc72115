use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::store::RecordSink;
use crate::types::ProjectId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub filter: String,
    pub project: ProjectId,
    pub executed_at: DateTime<Utc>,
    pub execute_count: u32,
}

/// Recently executed filters, most recent first.
pub struct HistoryStore {
    records: Vec<HistoryRecord>,
    max_entries: usize,
    sink: Box<dyn RecordSink<HistoryRecord>>,
}

impl HistoryStore {
    pub fn new(max_entries: usize, sink: Box<dyn RecordSink<HistoryRecord>>) -> Self {
        Self::with_records(Vec::new(), max_entries, sink)
    }

    /// Builds the store from previously persisted records, re-deriving the
    /// recency order.
    pub fn with_records(
        mut records: Vec<HistoryRecord>,
        max_entries: usize,
        sink: Box<dyn RecordSink<HistoryRecord>>,
    ) -> Self {
        records.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        records.truncate(max_entries);
        Self {
            records,
            max_entries,
            sink,
        }
    }

    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn add(&mut self, filter: &str, project: &ProjectId) -> Result<bool, PersistenceError> {
        self.add_at(filter, project, Utc::now())
    }

    /// Records an execution of `filter`, moving an identical filter to the
    /// front and bumping its count. Returns `Ok(false)` for blank filters.
    pub fn add_at(
        &mut self,
        filter: &str,
        project: &ProjectId,
        now: DateTime<Utc>,
    ) -> Result<bool, PersistenceError> {
        let filter = filter.trim();
        if filter.is_empty() {
            return Ok(false);
        }

        let execute_count = match self.records.iter().position(|r| r.filter == filter) {
            Some(idx) => self.records.remove(idx).execute_count + 1,
            None => 1,
        };

        self.records.insert(
            0,
            HistoryRecord {
                filter: filter.to_string(),
                project: project.clone(),
                executed_at: now,
                execute_count,
            },
        );

        if self.records.len() > self.max_entries {
            let dropped = self.records.len() - self.max_entries;
            self.records.truncate(self.max_entries);
            tracing::debug!("Dropped {dropped} old history entries");
        }

        self.sink.persist(&self.records)?;
        Ok(true)
    }

    pub fn clear(&mut self) -> Result<(), PersistenceError> {
        self.records.clear();
        tracing::info!("Cleared query history");
        self.sink.persist(&self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySink;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_repeat_filter_moves_to_front_with_count() {
        let sink = MemorySink::<HistoryRecord>::new();
        let mut store = HistoryStore::new(10, Box::new(sink.clone()));
        let p1 = ProjectId::new("p1");

        store.add_at("sev=ERROR", &p1, t0()).unwrap();
        store.add_at("sev=INFO", &p1, t0() + Duration::seconds(1)).unwrap();
        store.add_at("sev=ERROR", &p1, t0() + Duration::seconds(2)).unwrap();

        assert_eq!(store.len(), 2);
        let first = &store.records()[0];
        assert_eq!(first.filter, "sev=ERROR");
        assert_eq!(first.execute_count, 2);
        assert_eq!(first.executed_at, t0() + Duration::seconds(2));
        assert_eq!(sink.writes(), 3);
        assert_eq!(sink.snapshot(), store.records());
    }

    #[test]
    fn test_blank_filter_is_ignored() {
        let sink = MemorySink::<HistoryRecord>::new();
        let mut store = HistoryStore::new(10, Box::new(sink.clone()));
        assert!(!store.add_at("   \n", &ProjectId::new("p1"), t0()).unwrap());
        assert!(store.is_empty());
        assert_eq!(sink.writes(), 0);
    }

    #[test]
    fn test_bounded_to_most_recent() {
        let mut store = HistoryStore::new(5, Box::new(MemorySink::<HistoryRecord>::new()));
        let p1 = ProjectId::new("p1");
        for i in 0..10 {
            store
                .add_at(&format!("filter {i}"), &p1, t0() + Duration::seconds(i))
                .unwrap();
        }
        assert_eq!(store.len(), 5);
        let kept: Vec<_> = store.records().iter().map(|r| r.filter.as_str()).collect();
        assert_eq!(kept, ["filter 9", "filter 8", "filter 7", "filter 6", "filter 5"]);
    }

    #[test]
    fn test_failed_persist_keeps_memory_state() {
        let mut store = HistoryStore::new(5, Box::new(MemorySink::<HistoryRecord>::failing()));
        let result = store.add_at("sev=ERROR", &ProjectId::new("p1"), t0());
        assert!(result.is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_loaded_records_are_reordered() {
        let p1 = ProjectId::new("p1");
        let records = vec![
            HistoryRecord {
                filter: "old".to_string(),
                project: p1.clone(),
                executed_at: t0(),
                execute_count: 1,
            },
            HistoryRecord {
                filter: "new".to_string(),
                project: p1,
                executed_at: t0() + Duration::minutes(5),
                execute_count: 4,
            },
        ];
        let store = HistoryStore::with_records(records, 1, Box::new(MemorySink::<HistoryRecord>::new()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.records()[0].filter, "new");
    }
}
