// tasklist - Local task list with a persisted, observable task store

pub mod config;
pub mod models;
pub mod storage;
pub mod store;
pub mod view;

// Re-export main types for convenience
pub use config::{Backend, Config};
pub use models::{StoreState, Task, TaskFilter, TaskStats};
pub use storage::{FileStorage, MemoryStorage, SqliteStorage, Storage};
pub use store::{STORAGE_KEY, SubscriptionId, TaskStore};
