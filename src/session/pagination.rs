use std::sync::Arc;
use std::time::Duration;

use crate::backend::{FetchRequest, LogBackend};
use crate::dispatch::{Completion, ProgressSender};
use crate::error::FetchError;
use crate::logging::{LogEntry, LogWindow, combine_clauses, format_timestamp};
use crate::types::ProjectId;

/// Filter for the page strictly older than `oldest`.
pub fn older_filter(base: &str, oldest: &LogEntry) -> String {
    combine_clauses(
        base,
        vec![format!("timestamp<\"{}\"", format_timestamp(oldest.timestamp))],
    )
}

/// Filter for the page strictly newer than `newest`.
pub fn newer_filter(base: &str, newest: &LogEntry) -> String {
    combine_clauses(
        base,
        vec![format!("timestamp>\"{}\"", format_timestamp(newest.timestamp))],
    )
}

/// Parameters of one auto-load-all run.
#[derive(Debug, Clone)]
pub struct AutoLoadJob {
    pub generation: u64,
    pub project: ProjectId,
    pub filter: String,
    /// Cache identity reported back with the result.
    pub cache_filter: String,
    pub page_size: usize,
    pub timeout: Duration,
    pub max_pages: usize,
}

#[derive(Debug)]
pub struct AutoLoadOutcome {
    pub entries: Vec<LogEntry>,
    pub pages: usize,
    pub error: Option<FetchError>,
}

/// Pages backward from the newest matching entry until the backend runs
/// dry.
///
/// Stops on the first empty page, on a fetch error (keeping what was
/// accumulated), when a page adds nothing new, or after `max_pages` fetches.
pub async fn auto_load_all<B: LogBackend>(
    backend: &B,
    job: &AutoLoadJob,
    progress: Option<&ProgressSender>,
) -> AutoLoadOutcome {
    let mut accumulated = LogWindow::new(0);
    let mut pages = 0;
    let mut error = None;

    for _ in 0..job.max_pages {
        let filter = match accumulated.oldest() {
            Some(oldest) => older_filter(&job.filter, oldest),
            None => job.filter.clone(),
        };
        let request = FetchRequest::new(job.project.clone(), filter, job.page_size, job.timeout);

        let page = match backend.fetch(request).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(
                    "Auto-load stopped after {pages} pages ({} entries): {e}",
                    accumulated.len()
                );
                error = Some(e);
                break;
            }
        };
        if page.is_empty() {
            break;
        }

        let outcome = accumulated.merge_older(page);
        pages += 1;
        tracing::debug!(
            "Auto-load page {pages}: {} new, {} duplicates",
            outcome.inserted,
            outcome.duplicates
        );
        if let Some(progress) = progress {
            progress.send(Completion::AutoLoadProgress {
                generation: job.generation,
                pages,
                entries: accumulated.len(),
            });
        }
        if outcome.inserted == 0 {
            tracing::debug!("Auto-load page added nothing new, stopping");
            break;
        }
    }

    if pages == job.max_pages {
        tracing::warn!("Auto-load hit the {} page limit", job.max_pages);
    }

    AutoLoadOutcome {
        entries: accumulated.into_entries(),
        pages,
        error,
    }
}

/// Task body dispatched for an auto-load-all query.
pub(crate) async fn run_auto_load<B: LogBackend>(
    backend: Arc<B>,
    job: AutoLoadJob,
    progress: ProgressSender,
) -> Completion {
    let outcome = auto_load_all(backend.as_ref(), &job, Some(&progress)).await;
    Completion::AutoLoadFinished {
        generation: job.generation,
        project: job.project,
        cache_filter: job.cache_filter,
        entries: outcome.entries,
        pages: outcome.pages,
        error: outcome.error,
    }
}
