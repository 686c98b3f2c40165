//! Task repository over a realtime document database.
//!
//! Tasks live in two places: the top-level `tasks` collection, where each document carries an
//! `owner` field, and the legacy per-owner collection `users/<uid>/tasks`. Reads merge both by id
//! (top-level wins). New tasks go to the top-level collection; updates and deletes also reach
//! the legacy document of any task that was read from there.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use serde_json::{Map, Value};

use crate::error::TaskError;
use crate::gateway::feed::{self, merge_by_id, FeedEvent, FeedStream};
use crate::gateway::{Subscription, TaskRepository, UpdateCallback};
use crate::models::task::to_iso_string;
use crate::models::{Task, TaskDraft};

pub const TASKS_COLLECTION: &str = "tasks";

/// A place tasks of one owner can be read from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    /// `users/<owner>/tasks`: every document belongs to the owner.
    OwnerCollection(String),
    /// `tasks` filtered by `owner == <owner>`.
    TaggedCollection(String),
}

impl Location {
    pub fn collection(&self) -> String {
        match self {
            Location::OwnerCollection(owner) => format!("users/{}/{}", owner, TASKS_COLLECTION),
            Location::TaggedCollection(_) => TASKS_COLLECTION.to_string(),
        }
    }

    pub fn owner(&self) -> &str {
        match self {
            Location::OwnerCollection(owner) | Location::TaggedCollection(owner) => owner,
        }
    }

    /// Whether a document of `collection()` belongs here.
    pub fn matches(&self, data: &Map<String, Value>) -> bool {
        match self {
            Location::OwnerCollection(_) => true,
            Location::TaggedCollection(owner) => {
                data.get("owner").and_then(Value::as_str) == Some(owner.as_str())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Map<String, Value>,
}

/// Live query results. A permission rejection arrives as `Err(TaskError::Authorization)` and
/// ends the stream.
pub type DocumentFeed = BoxStream<'static, Result<Vec<Document>, TaskError>>;

/// The realtime document database contract.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn query(&self, location: &Location) -> Result<Vec<Document>, TaskError>;

    fn listen(&self, location: &Location) -> DocumentFeed;

    /// Inserts a document with a generated id and returns the id.
    async fn add(&self, collection: &str, data: Map<String, Value>) -> Result<String, TaskError>;

    /// Merges `data` into an existing document; `NotFound` if there is none.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        data: Map<String, Value>,
    ) -> Result<(), TaskError>;

    /// Deletes a document. Missing documents are not an error.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), TaskError>;
}

/// Ids seen in legacy per-owner collections, mapped to their owner.
#[derive(Debug, Default)]
struct LegacyIndex {
    owners: Mutex<HashMap<String, String>>,
}

impl LegacyIndex {
    /// Replaces what is known about `owner`'s legacy collection.
    fn record(&self, owner: &str, tasks: &[Task]) {
        let mut owners = self.owners.lock().unwrap_or_else(PoisonError::into_inner);
        owners.retain(|_, known| known != owner);
        for task in tasks {
            owners.insert(task.id.clone(), owner.to_string());
        }
    }

    fn owner_of(&self, id: &str) -> Option<String> {
        self.owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn forget(&self, id: &str) {
        self.owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }
}

pub struct DocumentTaskRepository<S> {
    store: Arc<S>,
    read_legacy: bool,
    legacy: Arc<LegacyIndex>,
}

impl<S: DocumentStore + 'static> DocumentTaskRepository<S> {
    pub fn new(store: Arc<S>) -> Self {
        DocumentTaskRepository {
            store,
            read_legacy: true,
            legacy: Arc::new(LegacyIndex::default()),
        }
    }

    /// Stops reading `users/<uid>/tasks`.
    pub fn without_legacy(mut self) -> Self {
        self.read_legacy = false;
        self
    }

    /// Read locations, lowest precedence first.
    fn locations(&self, owner: &str) -> Vec<Location> {
        let mut locations = Vec::with_capacity(2);
        if self.read_legacy {
            locations.push(Location::OwnerCollection(owner.to_string()));
        }
        locations.push(Location::TaggedCollection(owner.to_string()));
        locations
    }
}

/// Converts documents read from `location`, indexing legacy ids.
fn read_tasks(legacy: &LegacyIndex, location: &Location, documents: Vec<Document>) -> Vec<Task> {
    let tasks = to_tasks(location, documents);
    if let Location::OwnerCollection(owner) = location {
        legacy.record(owner, &tasks);
    }
    tasks
}

fn to_tasks(location: &Location, documents: Vec<Document>) -> Vec<Task> {
    documents
        .into_iter()
        .filter_map(|Document { id, mut data }| {
            data.insert("id".to_string(), Value::String(id.clone()));
            match serde_json::from_value::<Task>(Value::Object(data)) {
                Ok(mut task) => {
                    if task.owner.is_none() {
                        task.owner = Some(location.owner().to_string());
                    }
                    Some(task)
                }
                Err(e) => {
                    log::warn!("Skipping malformed task document {}: {}", id, e);
                    None
                }
            }
        })
        .collect()
}

fn draft_fields(draft: &TaskDraft) -> Result<Map<String, Value>, TaskError> {
    match serde_json::to_value(draft) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(TaskError::Validation("task is not an object".to_string())),
        Err(e) => Err(TaskError::Validation(e.to_string())),
    }
}

#[async_trait]
impl<S: DocumentStore + 'static> TaskRepository for DocumentTaskRepository<S> {
    async fn fetch_all(&self, owner: &str) -> Result<Vec<Task>, TaskError> {
        let mut sources = Vec::new();
        let mut denied = None;

        for location in self.locations(owner) {
            match self.store.query(&location).await {
                Ok(documents) => sources.push(read_tasks(&self.legacy, &location, documents)),
                Err(TaskError::Authorization(reason)) => {
                    log::warn!("Skipping {}: {}", location.collection(), reason);
                    denied = Some(reason);
                }
                Err(err) => {
                    log::error!("Failed to read {}: {}", location.collection(), err);
                    return Err(err);
                }
            }
        }

        match (sources.is_empty(), denied) {
            (true, Some(reason)) => Err(TaskError::Authorization(reason)),
            _ => Ok(merge_by_id(&sources)),
        }
    }

    fn subscribe(&self, owner: &str, on_update: UpdateCallback) -> Subscription {
        let feeds: Vec<FeedStream> = self
            .locations(owner)
            .into_iter()
            .map(|location| {
                let legacy = Arc::clone(&self.legacy);
                self.store
                    .listen(&location)
                    .map(move |result| match result {
                        Ok(documents) => {
                            FeedEvent::Snapshot(read_tasks(&legacy, &location, documents))
                        }
                        Err(TaskError::Authorization(reason)) => FeedEvent::Denied(reason),
                        Err(err) => FeedEvent::Failed(err),
                    })
                    .boxed()
            })
            .collect();

        feed::spawn_merged(feeds, on_update)
    }

    async fn create(&self, draft: &TaskDraft, owner: &str) -> Result<Task, TaskError> {
        let draft = draft.validated()?;
        let mut data = draft_fields(&draft)?;
        data.insert("owner".to_string(), Value::String(owner.to_string()));
        data.insert(
            "createdAt".to_string(),
            Value::String(to_iso_string(Utc::now())),
        );

        let id = self.store.add(TASKS_COLLECTION, data).await?;
        log::info!("Created task document {}", id);
        Ok(Task {
            id,
            title: draft.title,
            description: draft.description,
            due: draft.due,
            status: draft.status,
            owner: Some(owner.to_string()),
        })
    }

    async fn update(&self, id: &str, draft: &TaskDraft) -> Result<(), TaskError> {
        let draft = draft.validated()?;
        let mut data = draft_fields(&draft)?;
        // Cleared optionals must be written as nulls so the merge removes them.
        for key in ["description", "due"] {
            data.entry(key).or_insert(Value::Null);
        }
        data.insert(
            "updatedAt".to_string(),
            Value::String(to_iso_string(Utc::now())),
        );
        let result = match self.store.update(TASKS_COLLECTION, id, data.clone()).await {
            Err(TaskError::NotFound(_)) => match self.legacy.owner_of(id) {
                Some(owner) => {
                    let collection = Location::OwnerCollection(owner).collection();
                    log::debug!("Task {} only exists in {}", id, collection);
                    self.store.update(&collection, id, data).await
                }
                None => Err(TaskError::NotFound(id.to_string())),
            },
            other => other,
        };
        result.map_err(|err| match err {
            TaskError::NotFound(_) => TaskError::NotFound(id.to_string()),
            other => other,
        })
    }

    async fn remove(&self, id: &str) -> Result<(), TaskError> {
        self.store.delete(TASKS_COLLECTION, id).await?;
        if let Some(owner) = self.legacy.owner_of(id) {
            let collection = Location::OwnerCollection(owner).collection();
            self.store.delete(&collection, id).await?;
            self.legacy.forget(id);
        }
        Ok(())
    }
}
