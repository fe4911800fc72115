use core::fmt;
use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Backend severity levels, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    Default,
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl Severity {
    pub const ALL: [Severity; 9] = [
        Severity::Default,
        Severity::Debug,
        Severity::Info,
        Severity::Notice,
        Severity::Warning,
        Severity::Error,
        Severity::Critical,
        Severity::Alert,
        Severity::Emergency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Default => "DEFAULT",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Notice => "NOTICE",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
            Severity::Alert => "ALERT",
            Severity::Emergency => "EMERGENCY",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Severity::ALL
            .into_iter()
            .find(|level| level.as_str() == upper)
            .or(match upper.as_str() {
                "WARN" => Some(Severity::Warning),
                "ERR" => Some(Severity::Error),
                _ => None,
            })
            .ok_or_else(|| format!("unknown severity '{s}'"))
    }
}

/// Levels the backend reports that we don't know map to `Default`.
impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoredResource {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    #[serde(default)]
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
}

/// Borrowed view over whichever payload an entry carries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload<'a> {
    Text(&'a str),
    Structured(&'a Value),
    Empty,
}

/// A single record fetched from the log backend. Never mutated after fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub resource: MonitoredResource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_location: Option<SourceLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proto_payload: Option<Value>,
}

/// Identity used to discard duplicates when pages are merged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    Id(String),
    Composite {
        timestamp: DateTime<Utc>,
        severity: Severity,
        message: String,
    },
}

impl LogEntry {
    pub fn new_text(timestamp: DateTime<Utc>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            severity,
            insert_id: None,
            log_name: None,
            labels: BTreeMap::new(),
            resource: MonitoredResource::default(),
            source_location: None,
            trace: None,
            span_id: None,
            text_payload: Some(message.into()),
            json_payload: None,
            proto_payload: None,
        }
    }

    pub fn payload(&self) -> Payload<'_> {
        if let Some(ref text) = self.text_payload {
            Payload::Text(text)
        } else if let Some(value) = self.json_payload.as_ref().or(self.proto_payload.as_ref()) {
            Payload::Structured(value)
        } else {
            Payload::Empty
        }
    }

    /// The human-readable message line of the entry.
    ///
    /// Structured payloads are searched for the conventional message keys
    /// before falling back to their compact JSON rendering.
    pub fn message(&self) -> String {
        match self.payload() {
            Payload::Text(text) => text.to_string(),
            Payload::Structured(value) => ["message", "msg", "textPayload"]
                .iter()
                .find_map(|key| value.get(key).and_then(Value::as_str))
                .or_else(|| {
                    value
                        .get("status")
                        .and_then(|status| status.get("message"))
                        .and_then(Value::as_str)
                })
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string()),
            Payload::Empty => String::new(),
        }
    }

    /// Prefers the backend-assigned insert id; falls back to the weaker
    /// (timestamp, severity, message) composite when the backend gives none.
    pub fn dedup_key(&self) -> DedupKey {
        match self.insert_id.as_deref() {
            Some(id) if !id.is_empty() => DedupKey::Id(id.to_string()),
            _ => DedupKey::Composite {
                timestamp: self.timestamp,
                severity: self.severity,
                message: self.message(),
            },
        }
    }

    pub fn summary_line(&self) -> String {
        format!(
            "{} {:<9} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.severity,
            self.message().replace('\n', " ")
        )
    }

    fn search_haystack(&self) -> String {
        let mut haystack = self.message();
        for (key, value) in self.labels.iter().chain(self.resource.labels.iter()) {
            haystack.push('\n');
            haystack.push_str(key);
            haystack.push('=');
            haystack.push_str(value);
        }
        if let Payload::Structured(value) = self.payload() {
            haystack.push('\n');
            haystack.push_str(&value.to_string());
        }
        haystack
    }
}

/// Client-side search over loaded entries. Never sent to the backend.
#[derive(Debug, Clone, Default)]
pub struct SearchTerm {
    raw: String,
    pattern: Option<Regex>,
}

impl SearchTerm {
    /// Compiles the term as a case-insensitive regex, treating it as a
    /// literal substring if it does not compile.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let pattern = Regex::new(&format!("(?i){raw}")).ok();
        Self { raw, pattern }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        if self.raw.is_empty() {
            return true;
        }
        let haystack = entry.search_haystack();
        match self.pattern {
            Some(ref re) => re.is_match(&haystack),
            None => haystack
                .to_lowercase()
                .contains(&self.raw.to_lowercase()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, secs).unwrap()
    }

    #[test]
    fn test_deserialize_backend_entry() {
        let raw = serde_json::json!({
            "timestamp": "2024-01-15T12:00:00.123Z",
            "severity": "ERROR",
            "insertId": "abc123",
            "labels": {"env": "prod"},
            "resource": {"type": "k8s_container", "labels": {"pod_name": "api-1"}},
            "sourceLocation": {"file": "main.go", "line": "42"},
            "trace": "projects/p1/traces/t1",
            "spanId": "s1",
            "jsonPayload": {"message": "connection refused", "attempt": 3}
        });
        let entry: LogEntry = serde_json::from_value(raw).unwrap();
        assert_eq!(entry.severity, Severity::Error);
        assert_eq!(entry.resource.kind, "k8s_container");
        assert_eq!(entry.message(), "connection refused");
        assert_eq!(entry.dedup_key(), DedupKey::Id("abc123".to_string()));
        assert_eq!(entry.source_location.unwrap().line.as_deref(), Some("42"));
    }

    #[test]
    fn test_unknown_severity_maps_to_default() {
        let raw = serde_json::json!({"timestamp": "2024-01-15T12:00:00Z", "severity": "VERBOSE"});
        let entry: LogEntry = serde_json::from_value(raw).unwrap();
        assert_eq!(entry.severity, Severity::Default);
        assert_eq!(entry.payload(), Payload::Empty);
    }

    #[test]
    fn test_severity_serde_round_trip() {
        let encoded = serde_json::to_string(&Severity::Warning).unwrap();
        assert_eq!(encoded, "\"WARNING\"");
        let decoded: Severity = serde_json::from_str("\"warn\"").unwrap();
        assert_eq!(decoded, Severity::Warning);
        let unknown: Severity = serde_json::from_str("\"VERBOSE\"").unwrap();
        assert_eq!(unknown, Severity::Default);
    }

    #[test]
    fn test_severity_parse_and_order() {
        assert_eq!("warn".parse::<Severity>().unwrap(), Severity::Warning);
        assert_eq!("Error".parse::<Severity>().unwrap(), Severity::Error);
        assert!("loud".parse::<Severity>().is_err());
        assert!(Severity::Critical > Severity::Error);
    }

    #[test]
    fn test_composite_dedup_key_without_insert_id() {
        let a = LogEntry::new_text(at(1), Severity::Info, "same");
        let b = LogEntry::new_text(at(1), Severity::Info, "same");
        let c = LogEntry::new_text(at(1), Severity::Warning, "same");
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_ne!(a.dedup_key(), c.dedup_key());
    }

    #[test]
    fn test_search_regex_and_literal_fallback() {
        let mut entry = LogEntry::new_text(at(0), Severity::Error, "Connection timeout after 30 seconds");
        entry.labels.insert("service".to_string(), "billing".to_string());

        assert!(SearchTerm::new(r"timeout\s+after").matches(&entry));
        assert!(SearchTerm::new("TIMEOUT").matches(&entry));
        assert!(SearchTerm::new("service=billing").matches(&entry));
        // Invalid regex falls back to a literal substring search
        assert!(!SearchTerm::new("timeout[").matches(&entry));
        assert!(SearchTerm::new("").matches(&entry));
    }
}
