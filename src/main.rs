use anyhow::{Context, Result};
use chrono::Utc;
use logdeck::backend::{CommandBackend, CommandOpener, parse_command_template};
use logdeck::cache::ResultCache;
use logdeck::cli::USAGE;
use logdeck::config::LogConfig;
use logdeck::logging::TimeRange;
use logdeck::store::{HistoryStore, JsonFileSink, LibraryStore};
use logdeck::{CliOptions, Config, Session, SessionStores, StatusLevel};
use serde::de::DeserializeOwned;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log);

    let options = CliOptions::from_args().map_err(|e| anyhow::anyhow!("{e}\n\n{USAGE}"))?;
    tracing::info!("Using data directory {}", config.store.data_dir.display());

    let stores = open_stores(&config)?;
    let backend = CommandBackend::new(
        parse_command_template(&config.backend.fetch_command),
        parse_command_template(&config.backend.projects_command),
    );
    let opener = CommandOpener::new(parse_command_template(&config.backend.opener));
    let mut session = Session::new(config.query.clone(), backend, opener, stores);

    if let Some(ref project) = options.project {
        session.set_project(project.as_str());
    }

    if options.list_projects {
        session.request_projects();
        session.pump().await;
        for project in session.projects() {
            println!("{project}");
        }
    }
    if options.show_history {
        for record in session.history().records() {
            println!(
                "{}  x{:<3} {:<20} {}",
                record.executed_at.format("%Y-%m-%d %H:%M"),
                record.execute_count,
                record.project,
                record.filter.replace('\n', " ")
            );
        }
    }
    if options.show_library {
        for record in session.library().records() {
            println!(
                "{:<20} x{:<3} {:<20} {}",
                record.name,
                record.use_count,
                record.project,
                record.filter.replace('\n', " ")
            );
        }
    }

    let listing_only = options.list_projects || options.show_history || options.show_library;
    if listing_only && options.filter.is_empty() && options.use_saved.is_none() {
        return Ok(());
    }

    match options.use_saved {
        Some(ref name) => {
            if !session.use_library(name) {
                anyhow::bail!("No saved filter named '{name}'");
            }
        }
        None => session.set_custom_filter(options.filter.clone()),
    }
    if let Some(level) = options.min_severity {
        session.filter_mut().set_min_severity(level);
    }
    for level in &options.levels {
        session.filter_mut().toggle_level(*level);
    }
    if let Some(preset) = options.since {
        session.filter_mut().time_range = TimeRange::Preset(preset);
    }
    session.set_auto_load(options.auto_load);

    session
        .run_query(options.refresh)
        .context("Refusing to run malformed filter")?;
    session.pump().await;

    if let Some(ref name) = options.save_as {
        session.save_to_library(name);
    }

    for entry in session.window().entries() {
        println!("{}", entry.summary_line());
    }

    if let Some(row) = options.open_row {
        if session.open_selected_externally(row) {
            session.pump().await;
        } else {
            tracing::warn!("No entry at row {row}");
        }
    }

    if let Some(status) = session.status() {
        eprintln!("{}", status.text);
        if status.level == StatusLevel::Error {
            anyhow::bail!("{}", status.text);
        }
    }

    Ok(())
}

fn open_stores(config: &Config) -> Result<SessionStores> {
    let ttl = chrono::Duration::from_std(std::time::Duration::from_secs(config.cache.ttl_secs))
        .context("Cache TTL is out of range")?;

    let cache_sink = JsonFileSink::new(config.store.cache_file());
    let history_sink = JsonFileSink::new(config.store.history_file());
    let library_sink = JsonFileSink::new(config.store.library_file());

    Ok(SessionStores {
        cache: ResultCache::with_records(
            load_records(&cache_sink),
            ttl,
            config.cache.max_entries,
            Box::new(cache_sink),
            Utc::now(),
        ),
        history: HistoryStore::with_records(
            load_records(&history_sink),
            config.store.history_max,
            Box::new(history_sink),
        ),
        library: LibraryStore::with_records(
            load_records(&library_sink),
            config.store.library_max,
            Box::new(library_sink),
        ),
    })
}

/// Unreadable store files start the session empty instead of aborting it.
fn load_records<T: DeserializeOwned>(sink: &JsonFileSink) -> Vec<T> {
    match sink.load() {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!("Ignoring {}: {e}", sink.path().display());
            Vec::new()
        }
    }
}

fn init_tracing(log: &LogConfig) {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(log.env_filter())
        .with(fmt_layer)
        .init();
}
