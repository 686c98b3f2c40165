#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use taskboard_lib::gateway::UpdateCallback;
use taskboard_lib::handlers::SessionHandler;
use taskboard_lib::models::ProviderIdentity;
use taskboard_lib::{
    AppStore, IdentityProvider, StoreState, Subscription, Task, TaskDraft, TaskError,
    TaskRepository, TaskStatus,
};

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub fn task(id: &str, title: &str, status: TaskStatus) -> Task {
    Task {
        id: id.to_string(),
        title: title.to_string(),
        description: None,
        due: None,
        status,
        owner: Some("u1".to_string()),
    }
}

pub fn identity(uid: &str, email: &str) -> ProviderIdentity {
    ProviderIdentity {
        uid: uid.to_string(),
        display_name: None,
        email: Some(email.to_string()),
    }
}

/// Waits until the store reaches a state matching `pred`.
pub async fn wait_for(store: &AppStore, pred: impl FnMut(&StoreState) -> bool) -> StoreState {
    let mut changes = store.watch();
    let state = tokio::time::timeout(Duration::from_secs(5), changes.wait_for(pred))
        .await
        .expect("timed out waiting for store state")
        .expect("store dropped")
        .clone();
    state
}

/// In-process repository whose answers are scripted by the test.
///
/// Each call takes its scripted answer on entry. Calls answer immediately unless
/// [`hold_next_call`](Self::hold_next_call) was used, in which case the next call blocks until
/// the returned sender fires (or is dropped).
#[derive(Default)]
pub struct ScriptedRepository {
    tasks: Mutex<Vec<Task>>,
    fetch_results: Mutex<VecDeque<Result<Vec<Task>, TaskError>>>,
    create_results: Mutex<VecDeque<Result<Task, TaskError>>>,
    write_results: Mutex<VecDeque<Result<(), TaskError>>>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    callback: Mutex<Option<UpdateCallback>>,
    feeds: Mutex<Vec<JoinHandle<()>>>,
    pub fetch_calls: AtomicUsize,
    pub subscribe_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub write_calls: AtomicUsize,
}

impl ScriptedRepository {
    pub fn with_tasks(tasks: Vec<Task>) -> Arc<Self> {
        let repo = ScriptedRepository::default();
        *repo.tasks.lock().unwrap() = tasks;
        Arc::new(repo)
    }

    pub fn set_tasks(&self, tasks: Vec<Task>) {
        *self.tasks.lock().unwrap() = tasks;
    }

    pub fn fail_next_fetch(&self, err: TaskError) {
        self.fetch_results.lock().unwrap().push_back(Err(err));
    }

    pub fn answer_next_create(&self, result: Result<Task, TaskError>) {
        self.create_results.lock().unwrap().push_back(result);
    }

    /// Scripts the next update or remove.
    pub fn answer_next_write(&self, result: Result<(), TaskError>) {
        self.write_results.lock().unwrap().push_back(result);
    }

    pub fn hold_next_call(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }

    /// Pushes `tasks` through the most recent subscription callback.
    pub fn push(&self, tasks: Vec<Task>) {
        self.publish(Ok(tasks));
    }

    /// Reports `err` through the most recent subscription callback.
    pub fn push_error(&self, err: TaskError) {
        self.publish(Err(err));
    }

    fn publish(&self, update: Result<Vec<Task>, TaskError>) {
        let callback = self.callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(update);
        }
    }

    pub fn take_feed(&self) -> Option<JoinHandle<()>> {
        self.feeds.lock().unwrap().pop()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    async fn pass_gate(&self) {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
    }
}

#[async_trait]
impl TaskRepository for ScriptedRepository {
    async fn fetch_all(&self, _owner: &str) -> Result<Vec<Task>, TaskError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.fetch_results.lock().unwrap().pop_front();
        self.pass_gate().await;
        match scripted {
            Some(result) => result,
            None => Ok(self.tasks.lock().unwrap().clone()),
        }
    }

    fn subscribe(&self, _owner: &str, on_update: UpdateCallback) -> Subscription {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        *self.callback.lock().unwrap() = Some(on_update);
        let feed = tokio::spawn(futures::future::pending::<()>());
        let subscription = Subscription::new(feed.abort_handle());
        self.feeds.lock().unwrap().push(feed);
        subscription
    }

    async fn create(&self, draft: &TaskDraft, owner: &str) -> Result<Task, TaskError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.create_results.lock().unwrap().pop_front();
        self.pass_gate().await;
        scripted.unwrap_or_else(|| {
            Ok(Task {
                id: format!("srv{}", Self::count(&self.create_calls)),
                title: draft.title.clone(),
                description: draft.description.clone(),
                due: draft.due.clone(),
                status: draft.status,
                owner: Some(owner.to_string()),
            })
        })
    }

    async fn update(&self, _id: &str, _draft: &TaskDraft) -> Result<(), TaskError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.write_results.lock().unwrap().pop_front();
        self.pass_gate().await;
        scripted.unwrap_or(Ok(()))
    }

    async fn remove(&self, _id: &str) -> Result<(), TaskError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.write_results.lock().unwrap().pop_front();
        self.pass_gate().await;
        scripted.unwrap_or(Ok(()))
    }
}

/// Identity provider driven by hand: `fire` delivers an event to every registered handler.
#[derive(Default)]
pub struct ManualProvider {
    current: Mutex<Option<ProviderIdentity>>,
    handlers: Mutex<Vec<SessionHandler>>,
    pub sign_outs: AtomicUsize,
}

impl ManualProvider {
    pub fn fire(&self, identity: Option<ProviderIdentity>) {
        *self.current.lock().unwrap() = identity.clone();
        for handler in self.handlers.lock().unwrap().iter() {
            handler(identity.clone());
        }
    }
}

impl IdentityProvider for ManualProvider {
    fn on_session_change(&self, handler: SessionHandler) -> Subscription {
        handler(self.current.lock().unwrap().clone());
        self.handlers.lock().unwrap().push(handler);
        Subscription::default()
    }

    fn sign_out(&self) {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        self.fire(None);
    }
}
