//! Remote task gateway: one CRUD contract over interchangeable backing collaborators.

pub mod document;
pub mod feed;
pub mod memory;
pub mod rest;

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::task::AbortHandle;

use crate::error::TaskError;
use crate::models::{Task, TaskDraft};

pub use document::DocumentTaskRepository;
pub use feed::{FeedEvent, FeedStream};
pub use memory::MemoryDocumentStore;
pub use rest::{ApiClient, RestTaskRepository, StaticToken, TokenSource};

/// One publication of a push feed: the full ordered list, or the error that interrupted it.
pub type FeedUpdate = Result<Vec<Task>, TaskError>;

/// Receives every feed publication.
pub type UpdateCallback = Arc<dyn Fn(FeedUpdate) + Send + Sync>;

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// All tasks of `owner`, ascending by due date (undated first).
    async fn fetch_all(&self, owner: &str) -> Result<Vec<Task>, TaskError>;

    /// Push feed of the full ordered list. Must be called inside a Tokio runtime.
    fn subscribe(&self, owner: &str, on_update: UpdateCallback) -> Subscription;

    /// Creates the task and returns it with its server-assigned id.
    async fn create(&self, draft: &TaskDraft, owner: &str) -> Result<Task, TaskError>;

    /// Replaces the writable fields of task `id`.
    async fn update(&self, id: &str, draft: &TaskDraft) -> Result<(), TaskError>;

    /// Deletes task `id`. Deleting a missing task succeeds.
    async fn remove(&self, id: &str) -> Result<(), TaskError>;
}

/// Handle over the background work behind a feed. Released on `unsubscribe` or on drop.
#[derive(Debug, Default)]
pub struct Subscription {
    handle: Mutex<Option<AbortHandle>>,
}

impl Subscription {
    pub fn new(handle: AbortHandle) -> Self {
        Subscription {
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Releases the feeds. Only the first call does anything; it returns `true`.
    pub fn unsubscribe(&self) -> bool {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
