use thiserror::Error;

use crate::logging::{Severity, TimePreset};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
    #[error("Missing value for {0}")]
    MissingValue(String),

    #[error("Invalid value for {flag}: {value}")]
    InvalidValue { flag: String, value: String },

    #[error("Unknown option: {0}")]
    UnknownOption(String),
}

/// Options parsed from command line arguments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliOptions {
    pub project: Option<String>,
    pub auto_load: bool,
    pub refresh: bool,
    pub min_severity: Option<Severity>,
    pub levels: Vec<Severity>,
    pub since: Option<TimePreset>,
    pub save_as: Option<String>,
    pub use_saved: Option<String>,
    pub open_row: Option<usize>,
    pub show_history: bool,
    pub show_library: bool,
    pub list_projects: bool,
    pub filter: String,
}

pub const USAGE: &str = "Usage: logdeck [options] -- <filter...>
Options:
  --project P        Project to query
  --all              Keep paging backward until no more entries
  --refresh          Skip the result cache for this query
  --severity LEVEL   Only entries at or above LEVEL
  --levels A,B       Only entries with one of the listed levels
  --since PRESET     15m, 1h, 6h, 24h, 7d or 30d
  --save NAME        Save the filter to the library
  --use NAME         Run a saved filter
  --open ROW         Open the entry at ROW in $EDITOR
  --history          Print query history
  --library          Print saved filters
  --projects         List available projects";

impl CliOptions {
    /// Parse command line arguments
    pub fn from_args() -> Result<Self, CliError> {
        let args: Vec<String> = std::env::args().collect();
        Self::parse(&args)
    }

    /// Parse from a given argument list. Everything after `--` is joined
    /// into the filter expression.
    pub fn parse(args: &[String]) -> Result<Self, CliError> {
        let separator_pos = args.iter().position(|arg| arg == "--");
        let (opts, filter) = match separator_pos {
            Some(pos) => (args.get(1..pos).unwrap_or_default(), &args[pos + 1..]),
            None => (args.get(1..).unwrap_or_default(), &args[args.len()..]),
        };

        let mut options = CliOptions {
            filter: filter.join(" "),
            ..Default::default()
        };

        let mut iter = opts.iter();
        while let Some(flag) = iter.next() {
            match flag.as_str() {
                "--all" => options.auto_load = true,
                "--refresh" => options.refresh = true,
                "--history" => options.show_history = true,
                "--library" => options.show_library = true,
                "--projects" => options.list_projects = true,
                "--project" => options.project = Some(value(flag, iter.next())?.to_string()),
                "--save" => options.save_as = Some(value(flag, iter.next())?.to_string()),
                "--use" => options.use_saved = Some(value(flag, iter.next())?.to_string()),
                "--severity" => {
                    let raw = value(flag, iter.next())?;
                    options.min_severity = Some(parse_value(flag, raw)?);
                }
                "--levels" => {
                    let raw = value(flag, iter.next())?;
                    options.levels = raw
                        .split(',')
                        .map(str::trim)
                        .filter(|level| !level.is_empty())
                        .map(|level| parse_value::<Severity>(flag, level))
                        .collect::<Result<Vec<_>, _>>()?;
                }
                "--since" => {
                    let raw = value(flag, iter.next())?;
                    options.since = Some(parse_value(flag, raw)?);
                }
                "--open" => {
                    let raw = value(flag, iter.next())?;
                    options.open_row = Some(parse_value(flag, raw)?);
                }
                other => return Err(CliError::UnknownOption(other.to_string())),
            }
        }

        tracing::debug!("Parsed CLI options: {options:?}");
        Ok(options)
    }
}

fn value<'a>(flag: &str, next: Option<&'a String>) -> Result<&'a str, CliError> {
    next.map(String::as_str)
        .ok_or_else(|| CliError::MissingValue(flag.to_string()))
}

fn parse_value<T: std::str::FromStr>(flag: &str, raw: &str) -> Result<T, CliError> {
    raw.parse().map_err(|_| CliError::InvalidValue {
        flag: flag.to_string(),
        value: raw.to_string(),
    })
}
