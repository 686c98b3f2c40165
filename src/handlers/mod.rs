pub mod auth;
pub mod profile;
pub mod session;

pub use auth::{IdentityProvider, PasswordAuth, SessionHandler};
pub use profile::ProfileClient;
pub use session::{SessionBridge, SessionState};
