mod history;
mod library;
mod persist;

pub use history::{HistoryRecord, HistoryStore};
pub use library::{LibraryRecord, LibraryStore};
pub use persist::{JsonFileSink, MemorySink, RecordSink};
