pub mod app_state;
pub mod optimistic;

pub use app_state::{AppStore, StoreState};
pub use optimistic::{confirm_insert, Mutation, Undo};
