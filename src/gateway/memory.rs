use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::TaskError;
use crate::gateway::document::{Document, DocumentFeed, DocumentStore, Location};

type Collection = BTreeMap<String, Map<String, Value>>;

#[derive(Default)]
struct Collections {
    documents: HashMap<String, Collection>,
    denied: HashSet<String>,
}

struct Shared {
    collections: Mutex<Collections>,
    version: watch::Sender<u64>,
}

impl Shared {
    fn with<T>(&self, f: impl FnOnce(&mut Collections) -> T) -> T {
        let mut guard = self
            .collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    fn changed(&self) {
        self.version.send_modify(|version| *version += 1);
    }

    fn read(&self, location: &Location) -> Result<Vec<Document>, TaskError> {
        let collection = location.collection();
        self.with(|collections| {
            if collections.denied.contains(&collection) {
                return Err(permission_denied(&collection));
            }
            Ok(collections
                .documents
                .get(&collection)
                .map(|documents| {
                    documents
                        .iter()
                        .filter(|(_, data)| location.matches(data))
                        .map(|(id, data)| Document {
                            id: id.clone(),
                            data: data.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default())
        })
    }
}

fn permission_denied(collection: &str) -> TaskError {
    TaskError::Authorization(format!("permission-denied on {}", collection))
}

/// In-process realtime document database with per-collection permission rules.
///
/// Listeners receive a fresh snapshot of their query after every write to the store.
#[derive(Clone)]
pub struct MemoryDocumentStore {
    shared: Arc<Shared>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        MemoryDocumentStore {
            shared: Arc::new(Shared {
                collections: Mutex::new(Collections::default()),
                version,
            }),
        }
    }

    /// Rejects every read and write on `collection` from now on.
    pub fn deny(&self, collection: &str) {
        self.shared.with(|collections| {
            collections.denied.insert(collection.to_string());
        });
        self.shared.changed();
    }

    /// Stores a document under a caller-chosen id, replacing any previous one.
    pub fn insert(&self, collection: &str, id: &str, data: Map<String, Value>) {
        self.shared.with(|collections| {
            collections
                .documents
                .entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), data);
        });
        self.shared.changed();
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<Map<String, Value>> {
        self.shared.with(|collections| {
            collections
                .documents
                .get(collection)
                .and_then(|documents| documents.get(id).cloned())
        })
    }

    fn check_writable(&self, collection: &str) -> Result<(), TaskError> {
        let denied = self
            .shared
            .with(|collections| collections.denied.contains(collection));
        if denied {
            return Err(permission_denied(collection));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn query(&self, location: &Location) -> Result<Vec<Document>, TaskError> {
        self.shared.read(location)
    }

    fn listen(&self, location: &Location) -> DocumentFeed {
        let shared = Arc::clone(&self.shared);
        let changes = shared.version.subscribe();
        let start = (shared, location.clone(), changes, true);

        stream::unfold(Some(start), |state| async move {
            let (shared, location, mut changes, first) = match state {
                Some(state) => state,
                None => return None,
            };
            if !first && changes.changed().await.is_err() {
                return None;
            }
            match shared.read(&location) {
                Ok(documents) => Some((Ok(documents), Some((shared, location, changes, false)))),
                Err(err) => Some((Err(err), None)),
            }
        })
        .boxed()
    }

    async fn add(&self, collection: &str, data: Map<String, Value>) -> Result<String, TaskError> {
        self.check_writable(collection)?;
        let id = Uuid::new_v4().simple().to_string();
        self.insert(collection, &id, data);
        Ok(id)
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        data: Map<String, Value>,
    ) -> Result<(), TaskError> {
        self.check_writable(collection)?;
        let found = self.shared.with(|collections| {
            match collections
                .documents
                .get_mut(collection)
                .and_then(|documents| documents.get_mut(id))
            {
                Some(existing) => {
                    for (key, value) in data {
                        if value.is_null() {
                            existing.remove(&key);
                        } else {
                            existing.insert(key, value);
                        }
                    }
                    true
                }
                None => false,
            }
        });
        if !found {
            return Err(TaskError::NotFound(id.to_string()));
        }
        self.shared.changed();
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), TaskError> {
        self.check_writable(collection)?;
        let removed = self.shared.with(|collections| {
            collections
                .documents
                .get_mut(collection)
                .and_then(|documents| documents.remove(id))
                .is_some()
        });
        if removed {
            self.shared.changed();
        }
        Ok(())
    }
}
