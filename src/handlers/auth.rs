use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::watch;

use crate::config::Config;
use crate::error::{AuthError, ConfigError, TaskError};
use crate::gateway::{Subscription, TokenSource};
use crate::models::{ProviderIdentity, User};

pub const MIN_PASSWORD_LEN: usize = 6;

/// ID tokens are refreshed once they are this close to expiry.
const REFRESH_MARGIN_SECS: i64 = 60;

/// Called with the current identity (`None` when signed out) on every session change.
pub type SessionHandler = Box<dyn Fn(Option<ProviderIdentity>) + Send + Sync>;

/// A vendor-neutral source of session events.
pub trait IdentityProvider: Send + Sync {
    /// Registers `handler`. It first fires with the current session, then on every change,
    /// until the returned subscription is released.
    fn on_session_change(&self, handler: SessionHandler) -> Subscription;

    fn sign_out(&self);
}

#[derive(Debug, Clone)]
struct AuthSession {
    identity: ProviderIdentity,
    id_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Email/password sign-in against the identity provider's REST API.
///
/// Holds the session tokens in memory and hands out fresh ID tokens to the task and profile
/// clients through [`TokenSource`].
pub struct PasswordAuth {
    client: Client,
    auth_url: String,
    token_url: String,
    api_key: String,
    session: Mutex<Option<AuthSession>>,
    identity: Arc<watch::Sender<Option<ProviderIdentity>>>,
}

impl PasswordAuth {
    pub fn new(
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let (identity, _) = watch::channel(None);
        PasswordAuth {
            client: Client::new(),
            auth_url: auth_url.into(),
            token_url: token_url.into(),
            api_key: api_key.into(),
            session: Mutex::new(None),
            identity: Arc::new(identity),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let api_key = config.require_api_key()?;
        Ok(PasswordAuth::new(
            config.auth_url.as_str(),
            config.token_url.as_str(),
            api_key,
        ))
    }

    pub fn current_identity(&self) -> Option<ProviderIdentity> {
        self.identity.borrow().clone()
    }

    pub fn current_user(&self) -> Option<User> {
        self.identity.borrow().as_ref().map(User::from_identity)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User, AuthError> {
        log::info!("Signing in {}", email);

        let account: AccountResponse = self
            .call(
                "accounts:signInWithPassword",
                json!({
                    "email": email,
                    "password": password,
                    "returnSecureToken": true
                }),
            )
            .await?;

        self.start_session(account)
    }

    /// Creates an account and signs it in. The password rules are checked before any request.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        confirm_password: &str,
        display_name: Option<&str>,
    ) -> Result<User, AuthError> {
        if password != confirm_password {
            return Err(AuthError::PasswordMismatch);
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::PasswordTooShort(MIN_PASSWORD_LEN));
        }
        log::info!("Registering {}", email);

        let mut account: AccountResponse = self
            .call(
                "accounts:signUp",
                json!({
                    "email": email,
                    "password": password,
                    "returnSecureToken": true
                }),
            )
            .await?;

        let display_name = display_name.map(str::trim).filter(|name| !name.is_empty());
        if let Some(name) = display_name {
            let _: Value = self
                .call(
                    "accounts:update",
                    json!({
                        "idToken": account.id_token,
                        "displayName": name,
                        "returnSecureToken": false
                    }),
                )
                .await?;
            account.display_name = Some(name.to_string());
        }

        self.start_session(account)
    }

    /// A valid ID token for the signed-in user, refreshed when close to expiry.
    pub async fn id_token(&self) -> Result<String, AuthError> {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(AuthError::NotSignedIn)?;

        if session.expires_at - Utc::now() > Duration::seconds(REFRESH_MARGIN_SECS) {
            return Ok(session.id_token);
        }

        log::info!("Refreshing ID token for {}", session.identity.uid);
        let response = self
            .client
            .post(&self.token_url)
            .query(&[("key", self.api_key.as_str())])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", session.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                log::error!("Failed to refresh ID token: {}", e);
                AuthError::from(e)
            })?;
        let refreshed: RefreshResponse = read_response(response).await?;
        let expires_at = expiry(&refreshed.expires_in)?;

        let mut guard = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(current) if current.identity.uid == session.identity.uid => {
                current.id_token = refreshed.id_token.clone();
                current.refresh_token = refreshed.refresh_token;
                current.expires_at = expires_at;
                Ok(refreshed.id_token)
            }
            _ => Err(AuthError::NotSignedIn),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T, AuthError> {
        let url = format!("{}/{}", self.auth_url, method);
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                log::error!("Failed to call {}: {}", method, e);
                AuthError::from(e)
            })?;
        read_response(response).await
    }

    fn start_session(&self, account: AccountResponse) -> Result<User, AuthError> {
        let identity = ProviderIdentity {
            uid: account.local_id,
            display_name: account.display_name,
            email: account.email,
        };
        let session = AuthSession {
            identity: identity.clone(),
            id_token: account.id_token,
            refresh_token: account.refresh_token,
            expires_at: expiry(&account.expires_in)?,
        };

        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(session);
        let user = User::from_identity(&identity);
        log::info!("Signed in as {}", user.uid);
        self.identity.send_replace(Some(identity));
        Ok(user)
    }
}

impl IdentityProvider for PasswordAuth {
    /// Must be called inside a Tokio runtime.
    fn on_session_change(&self, handler: SessionHandler) -> Subscription {
        let mut identity = self.identity.subscribe();
        let watcher = tokio::spawn(async move {
            loop {
                let current = identity.borrow_and_update().clone();
                handler(current);
                if identity.changed().await.is_err() {
                    break;
                }
            }
        });
        Subscription::new(watcher.abort_handle())
    }

    fn sign_out(&self) {
        let previous = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = previous {
            log::info!("Signed out {}", session.identity.uid);
        }
        self.identity.send_replace(None);
    }
}

#[async_trait]
impl TokenSource for PasswordAuth {
    async fn bearer_token(&self) -> Result<String, TaskError> {
        Ok(self.id_token().await?)
    }
}

async fn read_response<T: DeserializeOwned>(response: Response) -> Result<T, AuthError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        log::error!("Identity provider returned {}: {}", status, body);
        return Err(provider_error(&body));
    }
    response.json::<T>().await.map_err(|e| {
        log::error!("Failed to parse identity provider response: {}", e);
        AuthError::Provider(format!("unreadable response: {}", e))
    })
}

/// Maps an error body such as `{"error": {"message": "WEAK_PASSWORD : ..."}}`.
fn provider_error(body: &str) -> AuthError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.to_string());
    let code = message
        .split(|c: char| c == ' ' || c == ':')
        .next()
        .unwrap_or_default();

    match code {
        "EMAIL_EXISTS" => AuthError::EmailInUse,
        "INVALID_EMAIL" => AuthError::InvalidEmail,
        "WEAK_PASSWORD" => AuthError::WeakPassword,
        "INVALID_PASSWORD" | "EMAIL_NOT_FOUND" | "INVALID_LOGIN_CREDENTIALS" | "USER_DISABLED" => {
            AuthError::InvalidCredentials
        }
        _ => AuthError::Provider(message),
    }
}

fn expiry(expires_in: &str) -> Result<DateTime<Utc>, AuthError> {
    let secs = expires_in
        .trim()
        .parse::<i64>()
        .map_err(|_| AuthError::Provider(format!("bad token lifetime {:?}", expires_in)))?;
    Duration::try_seconds(secs)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .ok_or_else(|| {
            AuthError::Provider(format!("token lifetime out of range {:?}", expires_in))
        })
}
