use std::path::PathBuf;

use thiserror::Error;

/// A filter that must not be sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Unbalanced ')' at position {position}")]
    UnexpectedClose { position: usize },

    #[error("Unclosed '(' opened at position {position}")]
    UnclosedParen { position: usize },

    #[error("Unterminated quote starting at position {position}")]
    UnterminatedQuote { position: usize },
}

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Failed to launch backend command '{program}': {message}")]
    Launch { program: String, message: String },

    #[error("Backend command exited with status {code:?}: {stderr}")]
    Backend { code: Option<i32>, stderr: String },

    #[error("Malformed backend response: {0}")]
    Malformed(String),

    #[error("Backend call exceeded its deadline of {timeout_secs} seconds")]
    DeadlineExceeded { timeout_secs: u64 },

    #[error("No backend command configured for {0}")]
    NotConfigured(&'static str),

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode records for {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ExternalProcessError {
    #[error("Failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with status {code:?}")]
    ExitStatus { program: String, code: Option<i32> },

    #[error("Failed to stage content for '{program}': {source}")]
    Stage {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No external opener configured")]
    NotConfigured,

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}
