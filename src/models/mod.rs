pub mod task;
pub mod user;

pub use task::{Task, TaskDraft, TaskEdit, TaskStatus};
pub use user::{ProfilePatch, ProviderIdentity, User, UserProfile};
