//! The session owns every piece of mutable state (window, cache, stores,
//! in-flight flags) and is the only place it is mutated. Background work is
//! handed to the [`Dispatcher`] and comes back as a [`Completion`] that
//! [`Session::handle`] applies synchronously.

pub mod pagination;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::backend::{ExternalOpener, FetchRequest, LogBackend};
use crate::cache::ResultCache;
use crate::config::QueryConfig;
use crate::dispatch::{Completion, Dispatcher};
use crate::error::{ExternalProcessError, FetchError, PersistenceError, ValidationError};
use crate::logging::{Edge, FilterState, LogEntry, LogWindow, validate_filter};
use crate::store::{HistoryStore, LibraryRecord, LibraryStore};
use crate::types::ProjectId;

pub use pagination::{AutoLoadJob, AutoLoadOutcome, auto_load_all, newer_filter, older_filter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Warning,
    Error,
}

/// Latest user-facing message of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub level: StatusLevel,
    pub text: String,
}

/// The persistent stores a session works against.
pub struct SessionStores {
    pub cache: ResultCache,
    pub history: HistoryStore,
    pub library: LibraryStore,
}

pub struct Session<B, O> {
    backend: Arc<B>,
    opener: Arc<O>,
    dispatcher: Dispatcher,
    settings: QueryConfig,

    project: ProjectId,
    filter: FilterState,
    auto_load: bool,
    projects: Vec<String>,

    window: LogWindow,
    /// Effective filter the window was loaded with; base for paging.
    active_filter: String,
    selected_match: Option<usize>,

    cache: ResultCache,
    history: HistoryStore,
    library: LibraryStore,

    loading_query: bool,
    loading_older: bool,
    loading_newer: bool,
    /// Bumped by every primary query.
    generation: u64,
    status: Option<StatusMessage>,
}

impl<B: LogBackend, O: ExternalOpener> Session<B, O> {
    pub fn new(settings: QueryConfig, backend: B, opener: O, stores: SessionStores) -> Self {
        Self {
            backend: Arc::new(backend),
            opener: Arc::new(opener),
            dispatcher: Dispatcher::new(),
            window: LogWindow::new(settings.viewport_rows),
            settings,
            project: ProjectId::default(),
            filter: FilterState::default(),
            auto_load: false,
            projects: Vec::new(),
            active_filter: String::new(),
            selected_match: None,
            cache: stores.cache,
            history: stores.history,
            library: stores.library,
            loading_query: false,
            loading_older: false,
            loading_newer: false,
            generation: 0,
            status: None,
        }
    }

    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    pub fn set_project(&mut self, project: impl Into<ProjectId>) {
        self.project = project.into();
    }

    pub fn projects(&self) -> &[String] {
        &self.projects
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn filter_mut(&mut self) -> &mut FilterState {
        &mut self.filter
    }

    pub fn set_custom_filter(&mut self, text: impl Into<String>) {
        self.filter.custom = text.into();
    }

    pub fn auto_load(&self) -> bool {
        self.auto_load
    }

    pub fn set_auto_load(&mut self, enabled: bool) {
        self.auto_load = enabled;
    }

    pub fn window(&self) -> &LogWindow {
        &self.window
    }

    pub fn active_filter(&self) -> &str {
        &self.active_filter
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn library(&self) -> &LibraryStore {
        &self.library
    }

    pub fn status(&self) -> Option<&StatusMessage> {
        self.status.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_loading_query(&self) -> bool {
        self.loading_query
    }

    pub fn is_loading_older(&self) -> bool {
        self.loading_older
    }

    pub fn is_loading_newer(&self) -> bool {
        self.loading_newer
    }

    /// True when no background task is outstanding.
    pub fn is_idle(&self) -> bool {
        self.dispatcher.is_idle()
    }

    pub fn set_viewport_rows(&mut self, rows: usize) {
        self.window.set_viewport_rows(rows);
    }

    /// Runs the current filter as a new primary query.
    ///
    /// Served from the cache when possible; otherwise a fetch (or an
    /// auto-load-all run) is dispatched and the window is replaced when it
    /// completes. `refresh` skips the cache lookup for this one query.
    /// Malformed filters are rejected here and never reach the backend.
    pub fn run_query(&mut self, refresh: bool) -> Result<(), ValidationError> {
        let effective = self.filter.effective_filter(Utc::now());
        validate_filter(&effective)?;
        let cache_filter = self.filter.cache_filter();

        let custom = self.filter.custom.clone();
        if let Err(e) = self.history.add(&custom, &self.project) {
            self.persistence_failed("history", e);
        }

        self.generation += 1;
        self.active_filter = effective.clone();
        self.selected_match = None;
        tracing::info!(
            "Running query #{} for project '{}' (auto-load: {})",
            self.generation,
            self.project,
            self.auto_load
        );

        if refresh {
            self.cache.bypass_next();
        }
        match self.cache.lookup(&self.project, &cache_filter) {
            Ok(Some(entries)) => {
                self.loading_query = false;
                let outcome = self.window.replace(entries);
                self.report(
                    StatusLevel::Info,
                    format!("Loaded {} entries from cache", outcome.inserted),
                );
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => self.persistence_failed("cache", e),
        }

        self.loading_query = true;
        let generation = self.generation;
        let project = self.project.clone();
        if self.auto_load {
            let job = AutoLoadJob {
                generation,
                project: project.clone(),
                filter: effective,
                cache_filter: cache_filter.clone(),
                page_size: self.settings.page_size,
                timeout: self.fetch_timeout(),
                max_pages: self.settings.auto_load_max_pages,
            };
            let backend = Arc::clone(&self.backend);
            let progress = self.dispatcher.progress_sender();
            self.dispatcher.dispatch(
                pagination::run_auto_load(backend, job, progress),
                move |reason| Completion::AutoLoadFinished {
                    generation,
                    project,
                    cache_filter,
                    entries: Vec::new(),
                    pages: 0,
                    error: Some(FetchError::TaskFailed(reason)),
                },
            );
        } else {
            let request = self.fetch_request(effective);
            let backend = Arc::clone(&self.backend);
            let (failed_project, failed_filter) = (project.clone(), cache_filter.clone());
            self.dispatcher.dispatch(
                async move {
                    let result = backend.fetch(request).await;
                    Completion::QueryLoaded {
                        generation,
                        project,
                        cache_filter,
                        result,
                    }
                },
                move |reason| Completion::QueryLoaded {
                    generation,
                    project: failed_project,
                    cache_filter: failed_filter,
                    result: Err(FetchError::TaskFailed(reason)),
                },
            );
        }
        Ok(())
    }

    /// Moves the viewport by `delta` rows and starts an incremental fetch
    /// when the move runs past either end of the loaded rows.
    pub fn scroll_by(&mut self, delta: isize) -> Option<Edge> {
        let edge = self.window.scroll_by(delta);
        match edge {
            Some(Edge::Bottom) => {
                self.load_older();
            }
            Some(Edge::Top) => {
                self.load_newer();
            }
            None => {}
        }
        edge
    }

    pub fn scroll_down(&mut self, rows: usize) -> Option<Edge> {
        self.scroll_by(isize::try_from(rows).unwrap_or(isize::MAX))
    }

    pub fn scroll_up(&mut self, rows: usize) -> Option<Edge> {
        self.scroll_by(-isize::try_from(rows).unwrap_or(isize::MAX))
    }

    /// Fetches the page just older than the oldest loaded entry. Returns
    /// false when the window is empty or such a fetch is already running.
    pub fn load_older(&mut self) -> bool {
        if self.loading_older {
            return false;
        }
        let Some(oldest) = self.window.oldest() else {
            return false;
        };
        let filter = older_filter(&self.active_filter, oldest);
        self.loading_older = true;
        tracing::debug!("Loading older entries: {filter}");

        let generation = self.generation;
        let request = self.fetch_request(filter);
        let backend = Arc::clone(&self.backend);
        self.dispatcher.dispatch(
            async move {
                let result = backend.fetch(request).await;
                Completion::OlderLoaded { generation, result }
            },
            move |reason| Completion::OlderLoaded {
                generation,
                result: Err(FetchError::TaskFailed(reason)),
            },
        );
        true
    }

    /// Fetches the page just newer than the newest loaded entry.
    pub fn load_newer(&mut self) -> bool {
        if self.loading_newer {
            return false;
        }
        let Some(newest) = self.window.newest() else {
            return false;
        };
        let filter = newer_filter(&self.active_filter, newest);
        self.loading_newer = true;
        tracing::debug!("Loading newer entries: {filter}");

        let generation = self.generation;
        let request = self.fetch_request(filter);
        let backend = Arc::clone(&self.backend);
        self.dispatcher.dispatch(
            async move {
                let result = backend.fetch(request).await;
                Completion::NewerLoaded { generation, result }
            },
            move |reason| Completion::NewerLoaded {
                generation,
                result: Err(FetchError::TaskFailed(reason)),
            },
        );
        true
    }

    /// Applies one completion. All state changes caused by background work
    /// happen here.
    pub fn handle(&mut self, completion: Completion) {
        match completion {
            Completion::QueryLoaded {
                generation,
                project,
                cache_filter,
                result,
            } => self.on_query_loaded(generation, project, cache_filter, result),
            Completion::AutoLoadProgress {
                generation,
                pages,
                entries,
            } => {
                if generation == self.generation {
                    self.report(
                        StatusLevel::Info,
                        format!("Loading... {entries} entries ({pages} pages)"),
                    );
                }
            }
            Completion::AutoLoadFinished {
                generation,
                project,
                cache_filter,
                entries,
                pages,
                error,
            } => self.on_auto_load_finished(generation, project, cache_filter, entries, pages, error),
            Completion::OlderLoaded { generation, result } => {
                self.loading_older = false;
                self.warn_if_stale("older", generation);
                match result {
                    Ok(page) => {
                        let outcome = self.window.merge_older(page);
                        tracing::debug!(
                            "Merged older page: {} new, {} duplicates (resorted: {})",
                            outcome.inserted,
                            outcome.duplicates,
                            outcome.resorted
                        );
                        if outcome.resorted {
                            self.selected_match = None;
                        }
                        if outcome.inserted == 0 {
                            self.report(StatusLevel::Info, "No older entries".to_string());
                        }
                    }
                    Err(e) => self.fetch_failed("Loading older entries", e),
                }
            }
            Completion::NewerLoaded { generation, result } => {
                self.loading_newer = false;
                self.warn_if_stale("newer", generation);
                match result {
                    Ok(page) => {
                        let outcome = self.window.merge_newer(page);
                        tracing::debug!(
                            "Merged newer page: {} new, {} duplicates (resorted: {})",
                            outcome.inserted,
                            outcome.duplicates,
                            outcome.resorted
                        );
                        // Rows moved down by the prepend
                        self.selected_match = match self.selected_match {
                            Some(row) if !outcome.resorted => Some(row + outcome.inserted),
                            _ => None,
                        };
                        if outcome.inserted == 0 {
                            self.report(StatusLevel::Info, "No newer entries".to_string());
                        }
                    }
                    Err(e) => self.fetch_failed("Loading newer entries", e),
                }
            }
            Completion::ProjectsListed(result) => match result {
                Ok(projects) => {
                    tracing::info!("Project list updated ({} projects)", projects.len());
                    self.projects = projects;
                }
                Err(e) => self.report(
                    StatusLevel::Warning,
                    format!("Could not list projects: {e}"),
                ),
            },
            Completion::ExternalOpened(result) => match result {
                Ok(()) => self.report(StatusLevel::Info, "Closed external viewer".to_string()),
                Err(e) => self.report(StatusLevel::Error, format!("External viewer failed: {e}")),
            },
        }
    }

    /// Waits for the next completion and applies it. Returns false when
    /// nothing was pending.
    pub async fn pump_one(&mut self) -> bool {
        match self.dispatcher.next().await {
            Some(completion) => {
                self.handle(completion);
                true
            }
            None => false,
        }
    }

    /// Applies completions until no background work is left.
    pub async fn pump(&mut self) {
        while self.pump_one().await {}
    }

    pub fn set_search(&mut self, term: impl Into<String>) {
        self.filter.set_search(term);
        self.selected_match = None;
    }

    /// Rows of the window matching the search term.
    pub fn matching_rows(&self) -> Vec<usize> {
        let term = &self.filter.search;
        if term.is_empty() {
            return Vec::new();
        }
        self.window
            .entries()
            .iter()
            .enumerate()
            .filter(|(_, entry)| term.matches(entry))
            .map(|(row, _)| row)
            .collect()
    }

    pub fn selected_match(&self) -> Option<usize> {
        self.selected_match
    }

    /// Selects the next matching row after the current one, wrapping
    /// around, and scrolls it into view.
    pub fn next_match(&mut self) -> Option<usize> {
        let rows = self.matching_rows();
        let row = match self.selected_match {
            Some(current) => rows.iter().copied().find(|&row| row > current),
            None => rows.iter().copied().find(|&row| row >= self.window.offset()),
        }
        .or_else(|| rows.first().copied());
        self.select_match(row)
    }

    pub fn prev_match(&mut self) -> Option<usize> {
        let rows = self.matching_rows();
        let row = match self.selected_match {
            Some(current) => rows.iter().rev().copied().find(|&row| row < current),
            None => rows.iter().rev().copied().find(|&row| row <= self.window.offset()),
        }
        .or_else(|| rows.last().copied());
        self.select_match(row)
    }

    fn select_match(&mut self, row: Option<usize>) -> Option<usize> {
        match row {
            Some(row) => {
                self.window.reveal(row);
                self.selected_match = Some(row);
            }
            None => {
                self.report(
                    StatusLevel::Info,
                    format!("No matches for '{}'", self.filter.search.as_str()),
                );
            }
        }
        row
    }

    /// Saves the current custom filter under `name`.
    pub fn save_to_library(&mut self, name: &str) -> bool {
        let record = LibraryRecord::new(name, self.filter.custom.clone(), self.project.clone());
        match self.library.upsert(record) {
            Ok(true) => {
                self.report(StatusLevel::Info, format!("Saved filter '{}'", name.trim()));
                true
            }
            Ok(false) => {
                self.report(
                    StatusLevel::Warning,
                    "A saved filter needs a name and filter text".to_string(),
                );
                false
            }
            Err(e) => {
                self.persistence_failed("library", e);
                true
            }
        }
    }

    /// Loads a saved filter (and its project) into the filter state.
    pub fn use_library(&mut self, name: &str) -> bool {
        let used = match self.library.mark_used(name) {
            Ok(used) => used,
            Err(e) => {
                self.persistence_failed("library", e);
                self.library.find(name).cloned()
            }
        };
        let Some(record) = used else {
            self.report(StatusLevel::Warning, format!("No saved filter named '{}'", name.trim()));
            return false;
        };
        self.filter.custom = record.filter;
        if !record.project.is_empty() {
            self.project = record.project;
        }
        true
    }

    pub fn delete_library(&mut self, name: &str) -> bool {
        match self.library.delete(name) {
            Ok(deleted) => deleted,
            Err(e) => {
                self.persistence_failed("library", e);
                true
            }
        }
    }

    pub fn clear_history(&mut self) {
        if let Err(e) = self.history.clear() {
            self.persistence_failed("history", e);
        }
    }

    /// Starts project discovery. Failure only produces a status message.
    pub fn request_projects(&mut self) {
        let backend = Arc::clone(&self.backend);
        self.dispatcher.dispatch(
            async move { Completion::ProjectsListed(backend.list_projects().await) },
            |reason| Completion::ProjectsListed(Err(FetchError::TaskFailed(reason))),
        );
    }

    /// Opens the pretty-printed JSON of the entry at `row` in the external
    /// viewer. Returns false when there is no such row.
    pub fn open_selected_externally(&mut self, row: usize) -> bool {
        let Some(entry) = self.window.entries().get(row) else {
            return false;
        };
        let content = match serde_json::to_vec_pretty(entry) {
            Ok(content) => content,
            Err(e) => {
                self.report(StatusLevel::Error, format!("Could not encode entry: {e}"));
                return false;
            }
        };
        let opener = Arc::clone(&self.opener);
        self.dispatcher.dispatch(
            async move { Completion::ExternalOpened(opener.open(content, "json").await) },
            |reason| Completion::ExternalOpened(Err(ExternalProcessError::TaskFailed(reason))),
        );
        true
    }

    fn on_query_loaded(
        &mut self,
        generation: u64,
        project: ProjectId,
        cache_filter: String,
        result: Result<Vec<LogEntry>, FetchError>,
    ) {
        if generation != self.generation {
            tracing::debug!(
                "Discarding superseded query #{generation} (current #{})",
                self.generation
            );
            if let Ok(entries) = result {
                self.store_in_cache(&project, &cache_filter, &entries);
            }
            return;
        }

        self.loading_query = false;
        match result {
            Ok(entries) => {
                let outcome = self.window.replace(entries);
                self.report(StatusLevel::Info, format!("Loaded {} entries", outcome.inserted));
                let entries = self.window.entries().to_vec();
                self.store_in_cache(&project, &cache_filter, &entries);
            }
            Err(e) => self.fetch_failed("Query", e),
        }
    }

    fn on_auto_load_finished(
        &mut self,
        generation: u64,
        project: ProjectId,
        cache_filter: String,
        entries: Vec<LogEntry>,
        pages: usize,
        error: Option<FetchError>,
    ) {
        let current = generation == self.generation;
        if !current {
            tracing::debug!(
                "Discarding superseded auto-load #{generation} (current #{})",
                self.generation
            );
        } else {
            self.loading_query = false;
            let outcome = self.window.replace(entries.clone());
            match &error {
                Some(e) => {
                    tracing::error!("Auto-load failed after {pages} pages: {e}");
                    self.report(
                        StatusLevel::Error,
                        format!(
                            "Loaded {} entries in {pages} pages before failing: {e}",
                            outcome.inserted
                        ),
                    );
                }
                None => self.report(
                    StatusLevel::Info,
                    format!("Loaded {} entries in {pages} pages", outcome.inserted),
                ),
            }
        }

        if error.is_none() {
            self.store_in_cache(&project, &cache_filter, &entries);
        }
    }

    fn store_in_cache(&mut self, project: &ProjectId, cache_filter: &str, entries: &[LogEntry]) {
        if let Err(e) = self.cache.store(project, cache_filter, entries) {
            self.persistence_failed("cache", e);
        }
    }

    fn fetch_request(&self, filter: String) -> FetchRequest {
        FetchRequest::new(
            self.project.clone(),
            filter,
            self.settings.page_size,
            self.fetch_timeout(),
        )
    }

    fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.fetch_timeout_secs)
    }

    fn warn_if_stale(&self, direction: &str, generation: u64) {
        if generation != self.generation {
            tracing::warn!(
                "Merging {direction} page from query #{generation} into the window of query #{}",
                self.generation
            );
        }
    }

    fn fetch_failed(&mut self, what: &str, error: FetchError) {
        tracing::error!("{what} failed: {error}");
        self.report(StatusLevel::Error, format!("{what} failed: {error}"));
    }

    fn persistence_failed(&mut self, store: &str, error: PersistenceError) {
        tracing::warn!("Failed to persist {store}: {error}");
        self.report(
            StatusLevel::Warning,
            format!("Could not save {store}: {error}"),
        );
    }

    fn report(&mut self, level: StatusLevel, text: String) {
        tracing::debug!("Status ({level:?}): {text}");
        self.status = Some(StatusMessage { level, text });
    }
}
