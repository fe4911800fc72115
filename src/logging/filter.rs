use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, SecondsFormat, Utc};

use crate::error::ValidationError;
use crate::logging::{SearchTerm, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimePreset {
    Last15Minutes,
    LastHour,
    Last6Hours,
    Last24Hours,
    Last7Days,
    Last30Days,
}

impl TimePreset {
    pub fn duration(&self) -> Duration {
        match self {
            TimePreset::Last15Minutes => Duration::minutes(15),
            TimePreset::LastHour => Duration::hours(1),
            TimePreset::Last6Hours => Duration::hours(6),
            TimePreset::Last24Hours => Duration::hours(24),
            TimePreset::Last7Days => Duration::days(7),
            TimePreset::Last30Days => Duration::days(30),
        }
    }
}

impl fmt::Display for TimePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TimePreset::Last15Minutes => "15m",
            TimePreset::LastHour => "1h",
            TimePreset::Last6Hours => "6h",
            TimePreset::Last24Hours => "24h",
            TimePreset::Last7Days => "7d",
            TimePreset::Last30Days => "30d",
        };
        f.write_str(label)
    }
}

impl FromStr for TimePreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "15m" => Ok(TimePreset::Last15Minutes),
            "1h" => Ok(TimePreset::LastHour),
            "6h" => Ok(TimePreset::Last6Hours),
            "24h" | "1d" => Ok(TimePreset::Last24Hours),
            "7d" => Ok(TimePreset::Last7Days),
            "30d" => Ok(TimePreset::Last30Days),
            other => Err(format!("unknown time range '{other}' (use 15m, 1h, 6h, 24h, 7d or 30d)")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeRange {
    #[default]
    Unbounded,
    Preset(TimePreset),
    Absolute {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Exactly one severity mode is active at any time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeverityFilter {
    /// Match entries at or above a level.
    Threshold(Severity),
    /// Match entries whose level is in the set. An empty set adds no clause.
    Levels(BTreeSet<Severity>),
}

impl Default for SeverityFilter {
    fn default() -> Self {
        SeverityFilter::Levels(BTreeSet::new())
    }
}

/// Mutable filter inputs of a session.
#[derive(Debug, Clone, Default)]
pub struct FilterState {
    pub custom: String,
    pub time_range: TimeRange,
    pub severity: SeverityFilter,
    pub search: SearchTerm,
}

impl FilterState {
    pub fn set_min_severity(&mut self, level: Severity) {
        self.severity = SeverityFilter::Threshold(level);
    }

    /// Toggles one level in the explicit set, leaving threshold mode if it
    /// was active.
    pub fn toggle_level(&mut self, level: Severity) {
        match self.severity {
            SeverityFilter::Levels(ref mut levels) => {
                if !levels.remove(&level) {
                    levels.insert(level);
                }
            }
            SeverityFilter::Threshold(_) => {
                self.severity = SeverityFilter::Levels(BTreeSet::from([level]));
            }
        }
    }

    pub fn clear_severity(&mut self) {
        self.severity = SeverityFilter::default();
    }

    pub fn set_search(&mut self, term: impl Into<String>) {
        self.search = SearchTerm::new(term);
    }

    pub fn effective_filter(&self, now: DateTime<Utc>) -> String {
        build_filter(&self.custom, &self.time_range, &self.severity, now)
    }

    /// Cache identity of the filter. Presets are kept symbolic so the same
    /// preset query maps to one key no matter when it runs.
    pub fn cache_filter(&self) -> String {
        cache_identity(&self.custom, &self.time_range, &self.severity)
    }
}

/// Removes comment lines (`--` or `#`) and blank lines, trimming the rest.
pub fn sanitize_filter(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("--") && !line.starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Normalized form used for cache identity.
pub fn normalize_filter(raw: &str) -> String {
    sanitize_filter(raw).trim().to_string()
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Assembles the effective filter from the base filter, the active time
/// range and the active severity selection.
pub fn build_filter(
    base: &str,
    time_range: &TimeRange,
    severity: &SeverityFilter,
    now: DateTime<Utc>,
) -> String {
    let time_clause = match time_range {
        TimeRange::Preset(preset) => Some(format!(
            "timestamp>=\"{}\"",
            format_timestamp(now - preset.duration())
        )),
        _ => absolute_clause(time_range),
    };
    assemble(base, time_clause, severity)
}

/// Like [`build_filter`], but a preset renders as its label instead of a
/// resolved instant. Never sent to the backend.
pub fn cache_identity(base: &str, time_range: &TimeRange, severity: &SeverityFilter) -> String {
    let time_clause = match time_range {
        TimeRange::Preset(preset) => Some(format!("timestamp>=now-{preset}")),
        _ => absolute_clause(time_range),
    };
    assemble(base, time_clause, severity)
}

fn absolute_clause(time_range: &TimeRange) -> Option<String> {
    match time_range {
        TimeRange::Absolute { start, end } => Some(format!(
            "timestamp>=\"{}\" AND timestamp<=\"{}\"",
            format_timestamp(*start),
            format_timestamp(*end)
        )),
        _ => None,
    }
}

fn assemble(base: &str, time_clause: Option<String>, severity: &SeverityFilter) -> String {
    let mut clauses: Vec<String> = time_clause.into_iter().collect();

    match severity {
        SeverityFilter::Threshold(level) => clauses.push(format!("severity>={level}")),
        SeverityFilter::Levels(levels) if levels.len() == 1 => {
            if let Some(level) = levels.iter().next() {
                clauses.push(format!("severity={level}"));
            }
        }
        SeverityFilter::Levels(levels) if !levels.is_empty() => {
            let group = levels
                .iter()
                .map(|level| format!("severity={level}"))
                .collect::<Vec<_>>()
                .join(" OR ");
            clauses.push(format!("({group})"));
        }
        SeverityFilter::Levels(_) => {}
    }

    combine_clauses(base, clauses)
}

/// ANDs `extra` clauses onto `base`. Every clause is parenthesized when the
/// base filter is non-empty.
pub fn combine_clauses(base: &str, extra: Vec<String>) -> String {
    let base = sanitize_filter(base);
    if base.is_empty() {
        return extra.join(" AND ");
    }
    if extra.is_empty() {
        return base;
    }
    std::iter::once(base)
        .chain(extra)
        .map(|clause| wrap_clause(&clause))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn wrap_clause(clause: &str) -> String {
    if is_wrapped(clause) {
        clause.to_string()
    } else {
        format!("({clause})")
    }
}

/// True when the whole clause is enclosed by one matching pair of parens.
fn is_wrapped(clause: &str) -> bool {
    if !(clause.starts_with('(') && clause.ends_with(')')) {
        return false;
    }
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let last = clause.chars().count() - 1;
    for (idx, ch) in clause.chars().enumerate() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(ch),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth = depth.saturating_sub(1);
                if depth == 0 && idx != last {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Rejects filters with unbalanced parentheses or unterminated quotes.
pub fn validate_filter(filter: &str) -> Result<(), ValidationError> {
    let mut open_parens = Vec::new();
    let mut quote: Option<(char, usize)> = None;
    let mut escaped = false;

    for (position, ch) in filter.chars().enumerate() {
        if let Some((q, _)) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some((ch, position)),
            '(' => open_parens.push(position),
            ')' => {
                if open_parens.pop().is_none() {
                    return Err(ValidationError::UnexpectedClose { position });
                }
            }
            _ => {}
        }
    }

    if let Some((_, position)) = quote {
        return Err(ValidationError::UnterminatedQuote { position });
    }
    if let Some(position) = open_parens.pop() {
        return Err(ValidationError::UnclosedParen { position });
    }
    Ok(())
}
