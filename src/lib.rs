pub mod backend;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod session;
pub mod store;
pub mod types;

pub use cli::CliOptions;
pub use config::Config;
pub use session::{Session, SessionStores, StatusLevel, StatusMessage};
