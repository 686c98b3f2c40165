use std::sync::Arc;

use chrono::Utc;
use reqwest::Response;
use serde::de::DeserializeOwned;

use crate::error::TaskError;
use crate::gateway::rest::check_status;
use crate::gateway::{ApiClient, TokenSource};
use crate::models::task::to_iso_string;
use crate::models::{ProfilePatch, User, UserProfile};

/// Client for the `/profiles` resource of the backend API.
#[derive(Clone)]
pub struct ProfileClient {
    api: ApiClient,
}

impl ProfileClient {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Self {
        ProfileClient {
            api: ApiClient::new(base_url, tokens),
        }
    }

    /// The profile of `uid`, or `None` if it was never created.
    pub async fn get_profile(&self, uid: &str) -> Result<Option<UserProfile>, TaskError> {
        log::info!("Fetching profile: {}", uid);

        let request = self.api.client().get(self.api.url(&["profiles", uid])?);
        let response = self.api.send(request, "fetch profile").await?;
        match check_status(response, Some(uid)).await {
            Ok(response) => parse(response).await.map(Some),
            Err(TaskError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// The caller's own profile, resolved from the bearer token. `None` if it was never created.
    pub async fn my_profile(&self) -> Result<Option<UserProfile>, TaskError> {
        let request = self.api.client().get(self.api.url(&["profiles", "me"])?);
        let response = self.api.send(request, "fetch own profile").await?;
        match check_status(response, None).await {
            Ok(response) => parse(response).await.map(Some),
            Err(TaskError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn create_profile(&self, profile: &UserProfile) -> Result<UserProfile, TaskError> {
        log::info!("Creating profile: {}", profile.uid);

        let request = self
            .api
            .client()
            .post(self.api.url(&["profiles", ""])?)
            .json(profile);
        let response = self.api.send(request, "create profile").await?;
        parse(check_status(response, None).await?).await
    }

    /// Applies the editable fields of `patch`. An empty patch is rejected.
    pub async fn update_profile(
        &self,
        uid: &str,
        patch: &ProfilePatch,
    ) -> Result<UserProfile, TaskError> {
        if patch.is_empty() {
            return Err(TaskError::Validation("Nothing to update".to_string()));
        }
        log::info!("Updating profile: {}", uid);

        let request = self
            .api
            .client()
            .put(self.api.url(&["profiles", uid])?)
            .json(patch);
        let response = self.api.send(request, "update profile").await?;
        parse(check_status(response, Some(uid)).await?).await
    }

    /// Returns the profile of `user`, creating the default one for accounts that predate profiles.
    pub async fn ensure_profile(&self, user: &User) -> Result<UserProfile, TaskError> {
        if let Some(profile) = self.get_profile(&user.uid).await? {
            return Ok(profile);
        }
        log::info!("No profile for {}, creating the default", user.uid);
        let initial = UserProfile::initial(user, to_iso_string(Utc::now()));
        self.create_profile(&initial).await
    }
}

async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, TaskError> {
    response.json::<T>().await.map_err(|e| {
        log::error!("Failed to parse profile response as JSON: {}", e);
        TaskError::Network(format!("unreadable profile: {}", e))
    })
}
