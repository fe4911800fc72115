use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::store::RecordSink;
use crate::types::ProjectId;

/// A user-named, reusable filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryRecord {
    pub name: String,
    pub filter: String,
    pub project: ProjectId,
    pub updated_at: DateTime<Utc>,
    pub use_count: u32,
}

impl LibraryRecord {
    pub fn new(name: impl Into<String>, filter: impl Into<String>, project: ProjectId) -> Self {
        Self {
            name: name.into(),
            filter: filter.into(),
            project,
            updated_at: Utc::now(),
            use_count: 1,
        }
    }
}

pub struct LibraryStore {
    records: Vec<LibraryRecord>,
    max_entries: usize,
    sink: Box<dyn RecordSink<LibraryRecord>>,
}

impl LibraryStore {
    pub fn new(max_entries: usize, sink: Box<dyn RecordSink<LibraryRecord>>) -> Self {
        Self::with_records(Vec::new(), max_entries, sink)
    }

    pub fn with_records(
        mut records: Vec<LibraryRecord>,
        max_entries: usize,
        sink: Box<dyn RecordSink<LibraryRecord>>,
    ) -> Self {
        sort_by_updated(&mut records);
        records.truncate(max_entries);
        Self {
            records,
            max_entries,
            sink,
        }
    }

    pub fn records(&self) -> &[LibraryRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<&LibraryRecord> {
        let name = name.trim();
        self.records.iter().find(|r| r.name == name)
    }

    pub fn upsert(&mut self, record: LibraryRecord) -> Result<bool, PersistenceError> {
        self.upsert_at(record, Utc::now())
    }

    /// Saves `record`, replacing the first entry with the same name or the
    /// same filter text. Blank names or filters are ignored (`Ok(false)`).
    pub fn upsert_at(
        &mut self,
        record: LibraryRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, PersistenceError> {
        let name = record.name.trim().to_string();
        let filter = record.filter.trim().to_string();
        if name.is_empty() || filter.is_empty() {
            return Ok(false);
        }

        let existing = self
            .records
            .iter()
            .position(|r| r.name == name || r.filter == filter);

        match existing {
            Some(idx) => {
                let use_count = self.records[idx].use_count + 1;
                self.records[idx] = LibraryRecord {
                    name,
                    filter,
                    project: record.project,
                    updated_at: now,
                    use_count,
                };
                sort_by_updated(&mut self.records);
            }
            None => {
                self.records.insert(
                    0,
                    LibraryRecord {
                        name,
                        filter,
                        project: record.project,
                        updated_at: now,
                        use_count: record.use_count.max(1),
                    },
                );
            }
        }

        self.records.truncate(self.max_entries);
        self.sink.persist(&self.records)?;
        Ok(true)
    }

    /// Bumps the use count of a saved filter and returns it.
    pub fn mark_used(&mut self, name: &str) -> Result<Option<LibraryRecord>, PersistenceError> {
        self.mark_used_at(name, Utc::now())
    }

    pub fn mark_used_at(
        &mut self,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<LibraryRecord>, PersistenceError> {
        let name = name.trim();
        let Some(record) = self.records.iter_mut().find(|r| r.name == name) else {
            return Ok(None);
        };
        record.use_count += 1;
        record.updated_at = now;
        let used = record.clone();

        sort_by_updated(&mut self.records);
        self.sink.persist(&self.records)?;
        Ok(Some(used))
    }

    pub fn delete(&mut self, name: &str) -> Result<bool, PersistenceError> {
        let name = name.trim();
        let before = self.records.len();
        self.records.retain(|r| r.name != name);
        if self.records.len() == before {
            return Ok(false);
        }
        tracing::info!("Deleted saved filter '{name}'");
        self.sink.persist(&self.records)?;
        Ok(true)
    }
}

fn sort_by_updated(records: &mut [LibraryRecord]) {
    records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySink;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    fn record(name: &str, filter: &str) -> LibraryRecord {
        LibraryRecord::new(name, filter, ProjectId::new("p1"))
    }

    #[test]
    fn test_insert_goes_to_front() {
        let mut store = LibraryStore::new(10, Box::new(MemorySink::<LibraryRecord>::new()));
        store.upsert_at(record("errors", "severity>=ERROR"), t0()).unwrap();
        store
            .upsert_at(record("gce", "resource.type=\"gce_instance\""), t0() + Duration::seconds(1))
            .unwrap();
        assert_eq!(store.records()[0].name, "gce");
        assert_eq!(store.records()[1].name, "errors");
    }

    #[test]
    fn test_match_by_name_replaces_and_resorts() {
        let mut store = LibraryStore::new(10, Box::new(MemorySink::<LibraryRecord>::new()));
        store.upsert_at(record("errors", "severity>=ERROR"), t0()).unwrap();
        store
            .upsert_at(record("gce", "resource.type=\"gce_instance\""), t0() + Duration::seconds(1))
            .unwrap();

        store
            .upsert_at(record("errors", "severity>=CRITICAL"), t0() + Duration::seconds(2))
            .unwrap();

        assert_eq!(store.len(), 2);
        let first = &store.records()[0];
        assert_eq!(first.name, "errors");
        assert_eq!(first.filter, "severity>=CRITICAL");
        assert_eq!(first.use_count, 2);
    }

    #[test]
    fn test_match_by_filter_renames() {
        let mut store = LibraryStore::new(10, Box::new(MemorySink::<LibraryRecord>::new()));
        store.upsert_at(record("errors", "severity>=ERROR"), t0()).unwrap();
        store
            .upsert_at(record("bad stuff", "  severity>=ERROR  "), t0() + Duration::seconds(1))
            .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.records()[0].name, "bad stuff");
        assert!(store.find("errors").is_none());
    }

    #[test]
    fn test_blank_records_are_ignored() {
        let sink = MemorySink::<LibraryRecord>::new();
        let mut store = LibraryStore::new(10, Box::new(sink.clone()));
        assert!(!store.upsert_at(record("  ", "severity>=ERROR"), t0()).unwrap());
        assert!(!store.upsert_at(record("name", "\n"), t0()).unwrap());
        assert!(store.is_empty());
        assert_eq!(sink.writes(), 0);
    }

    #[test]
    fn test_bounded_to_most_recent() {
        let mut store = LibraryStore::new(3, Box::new(MemorySink::<LibraryRecord>::new()));
        for i in 0..8 {
            store
                .upsert_at(record(&format!("q{i}"), &format!("f{i}")), t0() + Duration::seconds(i))
                .unwrap();
        }
        let names: Vec<_> = store.records().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["q7", "q6", "q5"]);
    }

    #[test]
    fn test_mark_used_and_delete() {
        let sink = MemorySink::<LibraryRecord>::new();
        let mut store = LibraryStore::new(10, Box::new(sink.clone()));
        store.upsert_at(record("a", "fa"), t0()).unwrap();
        store.upsert_at(record("b", "fb"), t0() + Duration::seconds(1)).unwrap();

        let used = store
            .mark_used_at("a", t0() + Duration::seconds(2))
            .unwrap()
            .unwrap();
        assert_eq!(used.use_count, 2);
        assert_eq!(store.records()[0].name, "a");
        assert!(store.mark_used_at("missing", t0()).unwrap().is_none());

        assert!(store.delete("b").unwrap());
        assert!(!store.delete("b").unwrap());
        assert_eq!(sink.snapshot().len(), 1);
    }
}
