//! Collaborators the session talks to but does not own: the remote log
//! backend and the external viewer used to open an entry.

mod command;

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{ExternalProcessError, FetchError};
use crate::logging::LogEntry;
use crate::types::ProjectId;

pub use command::{CommandBackend, CommandOpener, parse_command_template};

/// One backend query. The deadline is fixed when the request is built and
/// enforcing it is the backend's job.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub project: ProjectId,
    pub filter: String,
    pub limit: usize,
    pub timeout: Duration,
    pub deadline: Instant,
}

impl FetchRequest {
    pub fn new(project: ProjectId, filter: String, limit: usize, timeout: Duration) -> Self {
        Self {
            project,
            filter,
            limit,
            timeout,
            deadline: Instant::now() + timeout,
        }
    }
}

/// The remote query primitive. Pages are expected newest first and bounded
/// by `limit`, but callers do not rely on either.
pub trait LogBackend: Send + Sync + 'static {
    fn fetch(
        &self,
        request: FetchRequest,
    ) -> impl Future<Output = Result<Vec<LogEntry>, FetchError>> + Send;

    fn list_projects(&self) -> impl Future<Output = Result<Vec<String>, FetchError>> + Send;
}

/// Hands a blob to an external viewer or editor and waits for it to exit.
pub trait ExternalOpener: Send + Sync + 'static {
    fn open(
        &self,
        content: Vec<u8>,
        extension: &str,
    ) -> impl Future<Output = Result<(), ExternalProcessError>> + Send;
}
