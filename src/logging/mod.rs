mod entry;
mod filter;
mod window;

pub use entry::{
    DedupKey, LogEntry, MonitoredResource, Payload, SearchTerm, Severity, SourceLocation,
};
pub use filter::{
    FilterState, SeverityFilter, TimePreset, TimeRange, build_filter, cache_identity,
    combine_clauses, format_timestamp, normalize_filter, sanitize_filter, validate_filter,
};
pub use window::{Edge, LogWindow, MergeOutcome};
