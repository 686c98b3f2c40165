use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};

use crate::config::DEFAULT_POLL_SECS;
use crate::error::TaskError;
use crate::gateway::feed::{self, FeedEvent};
use crate::gateway::{Subscription, TaskRepository, UpdateCallback};
use crate::models::task::sort_by_due;
use crate::models::{Task, TaskDraft, TaskStatus};

/// Supplies the bearer token for each request, refreshing it when needed.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn bearer_token(&self) -> Result<String, TaskError>;
}

/// A fixed token, for service accounts and tests.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn bearer_token(&self) -> Result<String, TaskError> {
        Ok(self.0.clone())
    }
}

/// Authorized JSON client for the backend API.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Self {
        ApiClient {
            client: Client::new(),
            base_url: base_url.into(),
            tokens,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// `<base>/<segment>/...`, each segment percent-encoded. An empty last segment leaves a
    /// trailing slash.
    pub fn url(&self, segments: &[&str]) -> Result<Url, TaskError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            log::error!("Invalid API URL {:?}: {}", self.base_url, e);
            TaskError::Network(format!("invalid API URL: {}", e))
        })?;
        url.path_segments_mut()
            .map_err(|_| TaskError::Network(format!("invalid API URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn send(&self, request: RequestBuilder, action: &str) -> Result<Response, TaskError> {
        let token = self.tokens.bearer_token().await?;
        request
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .map_err(|e| {
                log::error!("Failed to {}: {}", action, e);
                TaskError::from(e)
            })
    }
}

/// Task repository backed by the REST task API.
///
/// The API scopes every call to the token's owner; there is no push channel, so
/// [`TaskRepository::subscribe`] polls.
#[derive(Clone)]
pub struct RestTaskRepository {
    api: ApiClient,
    poll_interval: Duration,
}

impl RestTaskRepository {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Self {
        RestTaskRepository {
            api: ApiClient::new(base_url, tokens),
            poll_interval: Duration::from_secs(DEFAULT_POLL_SECS),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// `GET /tasks/`, optionally narrowed with `status_filter`. Server order is kept.
    pub async fn fetch_with_status(
        &self,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, TaskError> {
        log::info!("Fetching tasks (status filter: {:?})", status);

        let mut request = self.api.client().get(self.tasks_url(None)?);
        if let Some(status) = status {
            request = request.query(&[("status_filter", status.as_str())]);
        }
        let response = self.api.send(request, "fetch tasks").await?;
        let response = check_status(response, None).await?;

        response.json::<Vec<Task>>().await.map_err(|e| {
            log::error!("Failed to parse tasks response as JSON: {}", e);
            TaskError::Network(format!("unreadable task list: {}", e))
        })
    }

    fn tasks_url(&self, id: Option<&str>) -> Result<Url, TaskError> {
        self.api.url(&["tasks", id.unwrap_or("")])
    }
}

/// Maps a non-success status to the matching error kind. 403 is the only authorization failure.
pub(crate) async fn check_status(
    response: Response,
    id: Option<&str>,
) -> Result<Response, TaskError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    log::error!("API returned {}: {}", status, body);

    Err(match status {
        StatusCode::FORBIDDEN => TaskError::Authorization(body),
        StatusCode::NOT_FOUND => TaskError::NotFound(id.unwrap_or_default().to_string()),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            TaskError::Validation(format!("The server rejected the request: {}", body))
        }
        _ => TaskError::Network(format!("server error {}: {}", status, body)),
    })
}

#[async_trait]
impl TaskRepository for RestTaskRepository {
    async fn fetch_all(&self, owner: &str) -> Result<Vec<Task>, TaskError> {
        let mut tasks = self.fetch_with_status(None).await?;
        tasks.retain(|task| match task.owner.as_deref() {
            Some(task_owner) if task_owner != owner => {
                log::warn!("Ignoring task {} owned by another user", task.id);
                false
            }
            _ => true,
        });
        sort_by_due(&mut tasks);
        Ok(tasks)
    }

    fn subscribe(&self, owner: &str, on_update: UpdateCallback) -> Subscription {
        let interval = self.poll_interval;
        let state = (self.clone(), owner.to_string(), true);

        let polling = stream::unfold(Some(state), move |state| async move {
            let (repo, owner, first) = match state {
                Some(state) => state,
                None => return None,
            };
            if !first {
                tokio::time::sleep(interval).await;
            }
            let event = match repo.fetch_all(&owner).await {
                Ok(tasks) => FeedEvent::Snapshot(tasks),
                Err(TaskError::Authorization(reason)) => FeedEvent::Denied(reason),
                Err(err) => FeedEvent::Failed(err),
            };
            let next = match event {
                FeedEvent::Denied(_) => None,
                _ => Some((repo, owner, false)),
            };
            Some((event, next))
        });

        feed::spawn_merged(vec![polling.boxed()], on_update)
    }

    async fn create(&self, draft: &TaskDraft, owner: &str) -> Result<Task, TaskError> {
        let draft = draft.validated()?;
        log::info!("Creating task: {}", draft.title);

        let request = self.api.client().post(self.tasks_url(None)?).json(&draft);
        let response = self.api.send(request, "create task").await?;
        let response = check_status(response, None).await?;

        let mut created = response.json::<Task>().await.map_err(|e| {
            log::error!("Failed to parse created task as JSON: {}", e);
            TaskError::Network(format!("unreadable created task: {}", e))
        })?;
        if created.owner.is_none() {
            created.owner = Some(owner.to_string());
        }
        Ok(created)
    }

    async fn update(&self, id: &str, draft: &TaskDraft) -> Result<(), TaskError> {
        let draft = draft.validated()?;
        log::info!("Updating task: {}", id);

        let request = self.api.client().put(self.tasks_url(Some(id))?).json(&draft);
        let response = self.api.send(request, "update task").await?;
        check_status(response, Some(id)).await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), TaskError> {
        log::info!("Deleting task: {}", id);

        let request = self.api.client().delete(self.tasks_url(Some(id))?);
        let response = self.api.send(request, "delete task").await?;
        match check_status(response, Some(id)).await {
            Ok(_) => Ok(()),
            Err(TaskError::NotFound(_)) => {
                log::warn!("Task {} was already deleted", id);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
