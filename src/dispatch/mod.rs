//! Background work for the session.
//!
//! Tasks run on the tokio runtime and never touch session state. Each one
//! resolves to a [`Completion`] that the session drains from a single inbox
//! and applies one at a time. A task that panics or is cancelled resolves to
//! the failure completion registered with it.

use std::collections::HashMap;
use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::{self, JoinSet};

use crate::error::{ExternalProcessError, FetchError};
use crate::logging::LogEntry;
use crate::types::ProjectId;

/// Result of a background task, tagged with what it was for.
#[derive(Debug)]
pub enum Completion {
    /// A primary query finished in normal mode.
    QueryLoaded {
        generation: u64,
        project: ProjectId,
        /// Cache identity of the query, see `FilterState::cache_filter`.
        cache_filter: String,
        result: Result<Vec<LogEntry>, FetchError>,
    },
    /// One more page was folded into an auto-load accumulator.
    AutoLoadProgress {
        generation: u64,
        pages: usize,
        entries: usize,
    },
    /// Auto-load stopped. `error` is set when a fetch failed; `entries`
    /// still holds everything accumulated before it.
    AutoLoadFinished {
        generation: u64,
        project: ProjectId,
        cache_filter: String,
        entries: Vec<LogEntry>,
        pages: usize,
        error: Option<FetchError>,
    },
    OlderLoaded {
        generation: u64,
        result: Result<Vec<LogEntry>, FetchError>,
    },
    NewerLoaded {
        generation: u64,
        result: Result<Vec<LogEntry>, FetchError>,
    },
    ProjectsListed(Result<Vec<String>, FetchError>),
    ExternalOpened(Result<(), ExternalProcessError>),
}

/// Sender handed to long-running tasks so they can report progress
/// through the same inbox before their final completion.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<Completion>,
}

impl ProgressSender {
    pub fn send(&self, completion: Completion) {
        if self.tx.send(completion).is_err() {
            tracing::debug!("Dispatcher dropped before progress was delivered");
        }
    }
}

/// Builds the completion delivered in place of a task that never finished.
type OnFailure = Box<dyn FnOnce(String) -> Completion + Send>;

pub struct Dispatcher {
    tasks: JoinSet<Completion>,
    on_failure: HashMap<task::Id, OnFailure>,
    progress_tx: mpsc::UnboundedSender<Completion>,
    progress_rx: mpsc::UnboundedReceiver<Completion>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        Self {
            tasks: JoinSet::new(),
            on_failure: HashMap::new(),
            progress_tx,
            progress_rx,
        }
    }

    /// Spawns `task`; its output is delivered later by [`Dispatcher::next`].
    /// If the task panics, `on_failure` is called with the reason and its
    /// result is delivered instead.
    pub fn dispatch<F, R>(&mut self, task: F, on_failure: R)
    where
        F: Future<Output = Completion> + Send + 'static,
        R: FnOnce(String) -> Completion + Send + 'static,
    {
        let id = self.tasks.spawn(task).id();
        self.on_failure.insert(id, Box::new(on_failure));
        tracing::debug!("Dispatched background task ({} pending)", self.tasks.len());
    }

    pub fn progress_sender(&self) -> ProgressSender {
        ProgressSender {
            tx: self.progress_tx.clone(),
        }
    }

    /// Number of tasks that have not been collected yet.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_idle(&self) -> bool {
        self.tasks.is_empty() && self.progress_rx.is_empty()
    }

    /// Waits for the next message. Progress messages a task sent before
    /// finishing are always delivered ahead of its completion. Returns
    /// `None` once nothing is pending.
    pub async fn next(&mut self) -> Option<Completion> {
        loop {
            if let Ok(progress) = self.progress_rx.try_recv() {
                return Some(progress);
            }
            if self.tasks.is_empty() {
                return None;
            }

            tokio::select! {
                biased;
                Some(progress) = self.progress_rx.recv() => return Some(progress),
                joined = self.tasks.join_next_with_id() => match joined {
                    Some(Ok((id, completion))) => {
                        self.on_failure.remove(&id);
                        return Some(completion);
                    }
                    Some(Err(e)) => {
                        tracing::error!("Background task failed: {e}");
                        if let Some(on_failure) = self.on_failure.remove(&e.id()) {
                            return Some(on_failure(e.to_string()));
                        }
                    }
                    None => return None,
                },
            }
        }
    }
}
