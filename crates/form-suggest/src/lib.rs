#![allow(missing_docs)]

pub mod category;
pub mod source;
pub mod sync;

pub use category::{CategorySpec, DEFAULT_DEBOUNCE_MS, SuggestionTarget, SyncConfig};
pub use source::{FnSource, SuggestionFetchError, SuggestionRequest, SuggestionSource};
pub use sync::{SharedStore, SuggestionSynchronizer, SyncError, SyncEvent, SyncStats};
pub use tokio_util::sync::CancellationToken;
