use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::watch;

use crate::error::TaskError;
use crate::gateway::{FeedUpdate, Subscription, TaskRepository, UpdateCallback};
use crate::models::{Task, TaskDraft, TaskEdit, TaskStatus, User};
use crate::state::optimistic::{confirm_insert, Mutation};
use crate::storage::TaskCache;

const LOAD: &str = "load your tasks";
const ADD: &str = "add the task";
const UPDATE: &str = "update the task";
const DELETE: &str = "delete the task";
const UNSAVED: &str = "The task is still being saved. Try again in a moment.";

/// Everything the UI renders from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreState {
    pub user: Option<User>,
    pub tasks: Vec<Task>,
    pub is_loading: bool,
    pub error: Option<String>,
    /// Set once the first session event has been seen, whatever it said.
    pub auth_checked: bool,
}

impl StoreState {
    fn belongs_to(&self, uid: &str) -> bool {
        self.user.as_ref().map(|user| user.uid.as_str()) == Some(uid)
    }
}

/// The single source of truth for the session user and their tasks.
///
/// The task list is only ever replaced wholesale. Mutations are optimistic: the local list
/// changes first and is rolled back if the repository call fails. Gateway errors never escape;
/// they end up in [`StoreState::error`].
pub struct AppStore {
    state: Arc<watch::Sender<StoreState>>,
    repository: Arc<dyn TaskRepository>,
    fallback: Option<Arc<dyn TaskRepository>>,
    cache: Option<TaskCache>,
}

impl AppStore {
    pub fn new(repository: Arc<dyn TaskRepository>) -> Self {
        let (state, _) = watch::channel(StoreState::default());
        AppStore {
            state: Arc::new(state),
            repository,
            fallback: None,
            cache: None,
        }
    }

    /// Source to read from when the primary repository rejects a read as unauthorized.
    pub fn with_fallback(mut self, fallback: Arc<dyn TaskRepository>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Seeds the list from `cache` while no session exists, and keeps it up to date.
    pub fn with_cache(mut self, cache: TaskCache) -> Self {
        let cached = cache.load_or_empty();
        self.state.send_modify(|state| {
            if state.user.is_none() {
                log::info!("Seeding {} tasks from {}", cached.len(), cache.path().display());
                state.tasks = cached;
            }
        });
        self.cache = Some(cache);
        self
    }

    pub fn snapshot(&self) -> StoreState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<StoreState> {
        self.state.subscribe()
    }

    pub fn uid(&self) -> Option<String> {
        self.state.borrow().user.as_ref().map(|user| user.uid.clone())
    }

    /// Replaces the session user. Tasks of anyone else are dropped.
    pub fn set_user(&self, user: User) {
        self.state.send_modify(|state| {
            if !state.belongs_to(&user.uid) {
                state.tasks.retain(|task| match task.owner.as_deref() {
                    Some(owner) => owner == user.uid,
                    None => false,
                });
            }
            state.user = Some(user);
            state.error = None;
        });
    }

    /// Latches `auth_checked`. Returns `true` only for the call that set it.
    pub fn mark_auth_checked(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.auth_checked {
                return false;
            }
            state.auth_checked = true;
            true
        })
    }

    /// Purges the session: user, tasks, loading flag, error and the local cache.
    pub fn logout(&self) {
        self.state.send_modify(|state| {
            state.user = None;
            state.tasks.clear();
            state.is_loading = false;
            state.error = None;
        });
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.clear() {
                log::warn!("Failed to clear task cache: {}", e);
            }
        }
    }

    pub fn clear_error(&self) {
        self.state.send_if_modified(|state| state.error.take().is_some());
    }

    /// One-shot load of the user's tasks.
    pub async fn fetch_tasks(&self) {
        self.load(true).await;
    }

    async fn load(&self, clear_error: bool) {
        let uid = match self.uid() {
            Some(uid) => uid,
            None => {
                self.state.send_modify(|state| {
                    state.tasks.clear();
                    state.is_loading = false;
                });
                return;
            }
        };

        self.state.send_modify(|state| {
            state.is_loading = true;
            if clear_error {
                state.error = None;
            }
        });

        let result = match self.repository.fetch_all(&uid).await {
            Err(TaskError::Authorization(reason)) => match &self.fallback {
                Some(fallback) => {
                    log::warn!("Task read rejected ({}), using the fallback source", reason);
                    fallback.fetch_all(&uid).await
                }
                None => Err(TaskError::Authorization(reason)),
            },
            other => other,
        };

        let loaded = result.is_ok();
        let applied = self.state.send_if_modified(|state| {
            if !state.belongs_to(&uid) {
                return false;
            }
            state.is_loading = false;
            match result {
                Ok(tasks) => state.tasks = tasks,
                Err(err) => {
                    log::error!("Failed to {}: {}", LOAD, err);
                    if let TaskError::Authorization(_) = err {
                        state.tasks.clear();
                    }
                    state.error = Some(err.user_message(LOAD));
                }
            }
            true
        });
        if applied && loaded {
            self.persist();
        }
    }

    /// Starts a push feed that replaces the list on every change. `None` without a session.
    ///
    /// Feed failures land in `error`; the message is withdrawn once the feed delivers again.
    pub fn subscribe_tasks(&self) -> Option<Subscription> {
        let uid = self.uid()?;
        self.state.send_modify(|state| state.is_loading = true);

        let state = Arc::clone(&self.state);
        let cache = self.cache.clone();
        let owner = uid.clone();
        let feed_error: Mutex<Option<String>> = Mutex::new(None);
        let on_update: UpdateCallback = Arc::new(move |update: FeedUpdate| {
            let mut feed_error = feed_error.lock().unwrap_or_else(PoisonError::into_inner);
            let loaded = update.is_ok();
            let applied = state.send_if_modified(|state| {
                if !state.belongs_to(&owner) {
                    return false;
                }
                state.is_loading = false;
                match update {
                    Ok(tasks) => {
                        state.tasks = tasks;
                        if feed_error.is_some() && state.error == *feed_error {
                            state.error = None;
                        }
                        *feed_error = None;
                    }
                    Err(err) => {
                        log::error!("Failed to {}: {}", LOAD, err);
                        if let TaskError::Authorization(_) = err {
                            state.tasks.clear();
                        }
                        let message = err.user_message(LOAD);
                        state.error = Some(message.clone());
                        *feed_error = Some(message);
                    }
                }
                true
            });
            if let (true, true, Some(cache)) = (applied, loaded, &cache) {
                if let Err(e) = cache.save(&state.borrow().tasks) {
                    log::warn!("Failed to write task cache: {}", e);
                }
            }
        });

        Some(self.repository.subscribe(&uid, on_update))
    }

    /// Adds a task optimistically and returns the confirmed record.
    pub async fn add_task(&self, draft: TaskDraft) -> Option<Task> {
        let uid = self.uid()?;
        let draft = match draft.validated() {
            Ok(draft) => draft,
            Err(err) => {
                self.report(&uid, err.user_message(ADD));
                return None;
            }
        };

        let placeholder = Task::placeholder(&draft, &uid);
        let placeholder_id = placeholder.id.clone();
        let created = self
            .apply_optimistic(&uid, ADD, Mutation::Insert(placeholder), || {
                self.repository.create(&draft, &uid)
            })
            .await?;

        self.commit(&uid, |tasks| {
            confirm_insert(tasks, &placeholder_id, created.clone())
        });
        self.persist();
        Some(created)
    }

    pub async fn update_task_status(&self, id: &str, status: TaskStatus) -> bool {
        self.edit_task(id, TaskEdit::status(status)).await
    }

    /// Applies `edit` to task `id`. Returns whether the backend accepted it.
    pub async fn edit_task(&self, id: &str, edit: TaskEdit) -> bool {
        let uid = match self.uid() {
            Some(uid) => uid,
            None => return false,
        };
        let current = self.state.borrow().tasks.iter().find(|t| t.id == id).cloned();
        let current = match current {
            Some(task) if task.is_placeholder() => {
                self.report(&uid, UNSAVED.to_string());
                return false;
            }
            Some(task) => task,
            None => return false,
        };

        let edited = edit.apply(&current);
        let draft = match TaskDraft::from(&edited).validated() {
            Ok(draft) => draft,
            Err(err) => {
                self.report(&uid, err.user_message(UPDATE));
                return false;
            }
        };
        let updated = Task {
            title: draft.title.clone(),
            description: draft.description.clone(),
            due: draft.due.clone(),
            ..edited
        };

        let confirmed = self
            .apply_optimistic(&uid, UPDATE, Mutation::Replace(updated), || {
                self.repository.update(id, &draft)
            })
            .await
            .is_some();
        if confirmed {
            self.persist();
        }
        confirmed
    }

    /// Deletes task `id`. Tasks whose creation is not yet confirmed cannot be deleted.
    pub async fn delete_task(&self, id: &str) -> bool {
        let uid = match self.uid() {
            Some(uid) => uid,
            None => return false,
        };
        let unsaved = self
            .state
            .borrow()
            .tasks
            .iter()
            .any(|task| task.id == id && task.is_placeholder());
        if unsaved {
            self.report(&uid, UNSAVED.to_string());
            return false;
        }
        let confirmed = self
            .apply_optimistic(&uid, DELETE, Mutation::Remove(id.to_string()), || {
                self.repository.remove(id)
            })
            .await
            .is_some();
        if confirmed {
            self.persist();
        }
        confirmed
    }

    /// The shared mutation protocol: commit `mutation` locally, run `remote`, and on failure
    /// undo the mutation and record a message. `None` if the mutation did not apply or failed.
    async fn apply_optimistic<T, F, Fut>(
        &self,
        uid: &str,
        action: &str,
        mutation: Mutation,
        remote: F,
    ) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, TaskError>>,
    {
        let mut undo = None;
        self.state.send_modify(|state| {
            state.error = None;
            if let Some((tasks, inverse)) = mutation.apply(&state.tasks) {
                state.tasks = tasks;
                undo = Some(inverse);
            }
        });
        let undo = undo?;

        let err = match remote().await {
            Ok(value) => return Some(value),
            Err(err) => err,
        };

        log::error!("Failed to {}: {}", action, err);
        let message = err.user_message(action);
        self.state.send_if_modified(|state| {
            if !state.belongs_to(uid) {
                return false;
            }
            state.tasks = undo.apply(&state.tasks);
            state.error = Some(message);
            true
        });

        if let TaskError::NotFound(_) = err {
            self.load(false).await;
        }
        None
    }

    fn commit(&self, uid: &str, f: impl FnOnce(&[Task]) -> Vec<Task>) -> bool {
        self.state.send_if_modified(|state| {
            if !state.belongs_to(uid) {
                return false;
            }
            state.tasks = f(&state.tasks);
            true
        })
    }

    fn report(&self, uid: &str, message: String) {
        self.state.send_if_modified(|state| {
            if !state.belongs_to(uid) {
                return false;
            }
            state.error = Some(message);
            true
        });
    }

    fn persist(&self) {
        let cache = match &self.cache {
            Some(cache) => cache,
            None => return,
        };
        let state = self.snapshot();
        if state.user.is_none() {
            return;
        }
        if let Err(e) = cache.save(&state.tasks) {
            log::warn!("Failed to write task cache: {}", e);
        }
    }
}
