use thiserror::Error;

/// Failures reported by a task repository.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Bad input, e.g. an empty title.
    #[error("{0}")]
    Validation(String),
    /// The backing store rejected the caller (HTTP 403 or permission-denied).
    #[error("not authorized: {0}")]
    Authorization(String),
    /// The record no longer exists.
    #[error("task {0} no longer exists")]
    NotFound(String),
    /// Transport failure or an unexpected response. Retryable by the user.
    #[error("network error: {0}")]
    Network(String),
}

impl TaskError {
    /// Message the store keeps in `error` after a failed `action` ("add the task", ...).
    pub fn user_message(&self, action: &str) -> String {
        match self {
            TaskError::Validation(msg) => msg.clone(),
            TaskError::Authorization(_) => format!("You are not allowed to {}.", action),
            TaskError::NotFound(_) => {
                format!("Could not {}: the task no longer exists.", action)
            }
            TaskError::Network(msg) => format!("Could not {}: {}. Please try again.", action, msg),
        }
    }
}

impl From<reqwest::Error> for TaskError {
    fn from(err: reqwest::Error) -> Self {
        TaskError::Network(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("this email is already registered")]
    EmailInUse,
    #[error("the email address is malformed")]
    InvalidEmail,
    #[error("the password is too weak")]
    WeakPassword,
    #[error("passwords do not match")]
    PasswordMismatch,
    #[error("the password must be at least {0} characters long")]
    PasswordTooShort(usize),
    #[error("no user is signed in")]
    NotSignedIn,
    #[error("network error: {0}")]
    Network(String),
    #[error("identity provider error: {0}")]
    Provider(String),
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Network(err.to_string())
    }
}

impl From<AuthError> for TaskError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Network(msg) => TaskError::Network(msg),
            other => TaskError::Authorization(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has an invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} is not set")]
    Missing(&'static str),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache contents are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
