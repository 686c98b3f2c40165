//! Client-side state sync for a personal task board: session bridge, optimistic task store and
//! interchangeable REST / realtime-document task gateways.

pub mod board;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod models;
pub mod state;
pub mod storage;

pub use board::{group_by_status, BoardSummary};
pub use config::{Config, LoadMode};
pub use error::{AuthError, CacheError, ConfigError, TaskError};
pub use gateway::{Subscription, TaskRepository};
pub use handlers::{IdentityProvider, PasswordAuth, ProfileClient, SessionBridge, SessionState};
pub use models::{Task, TaskDraft, TaskEdit, TaskStatus, User};
pub use state::{AppStore, StoreState};
pub use storage::TaskCache;

/// Installs `env_logger`, reading the level from `RUST_LOG` (default `info`).
pub fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("info");
    if let Err(e) = env_logger::Builder::from_env(env).try_init() {
        log::warn!("Logger already initialized: {}", e);
    }
}
