use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Failure reported by a suggestion source. Logged and swallowed by the synchronizer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SuggestionFetchError {
    #[error("suggestion service unavailable: {0}")]
    Unavailable(String),
    #[error("invalid suggestion payload: {0}")]
    InvalidPayload(String),
    #[error("suggestion request cancelled")]
    Cancelled,
}

/// One request to a category's source.
#[derive(Debug, Clone)]
pub struct SuggestionRequest {
    pub category: String,
    pub generation: u64,
    /// Current value of every driver field of the category.
    pub drivers: Map<String, Value>,
    /// Cancelled when a newer request for the same category is issued or the session ends.
    pub cancel: CancellationToken,
}

impl SuggestionRequest {
    pub fn driver(&self, name: &str) -> Option<&Value> {
        self.drivers.get(name).filter(|value| !value.is_null())
    }

    pub fn driver_str(&self, name: &str) -> Option<&str> {
        self.driver(name).and_then(Value::as_str)
    }
}

/// Opaque collaborator producing suggestions for a category.
///
/// Sources must be free of side effects from the engine's point of view; failed fetches are not
/// retried. Honouring `request.cancel` is optional.
#[async_trait]
pub trait SuggestionSource: Send + Sync {
    async fn fetch(&self, request: SuggestionRequest) -> Result<Value, SuggestionFetchError>;
}

type FetchFn =
    dyn Fn(SuggestionRequest) -> BoxFuture<'static, Result<Value, SuggestionFetchError>> + Send + Sync;

/// Adapts a closure returning a boxed future into a [`SuggestionSource`].
pub struct FnSource {
    fetch: Box<FetchFn>,
}

impl FnSource {
    pub fn new<F>(fetch: F) -> Self
    where
        F: Fn(SuggestionRequest) -> BoxFuture<'static, Result<Value, SuggestionFetchError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            fetch: Box::new(fetch),
        }
    }
}

impl fmt::Debug for FnSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSource").finish_non_exhaustive()
    }
}

#[async_trait]
impl SuggestionSource for FnSource {
    async fn fetch(&self, request: SuggestionRequest) -> Result<Value, SuggestionFetchError> {
        (self.fetch)(request).await
    }
}
