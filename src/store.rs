// Task store: owns the task list, persists it and notifies subscribers

use crate::models::{StoreState, Task, TaskFilter, TaskStats};
use crate::storage::Storage;
use crate::view;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, warn};

/// Key the task list is saved under
pub const STORAGE_KEY: &str = "todo-storage";

/// Version written into the persisted envelope
const CURRENT_VERSION: u32 = 1;

/// Listener called with the new state after every change
pub type Listener = Box<dyn FnMut(&StoreState)>;

/// Handle returned by [`TaskStore::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Serialize, Deserialize)]
struct PersistedTasks {
    tasks: Vec<Task>,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    state: PersistedTasks,
    version: u32,
}

/// Task list with session filter/search state, backed by a key-value storage
pub struct TaskStore<S: Storage> {
    state: StoreState,
    storage: S,
    storage_key: String,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
}

impl<S: Storage> TaskStore<S> {
    /// Open a store, restoring tasks saved under [`STORAGE_KEY`]
    pub fn open(storage: S) -> Result<Self> {
        Self::open_with_key(storage, STORAGE_KEY)
    }

    /// Open a store that saves under a custom key
    ///
    /// Missing, malformed or unsupported data starts an empty list; only a failing
    /// storage read is an error.
    pub fn open_with_key(storage: S, key: &str) -> Result<Self> {
        let raw = storage
            .get(key)
            .with_context(|| format!("Failed to read stored tasks under {}", key))?;

        let tasks = match raw {
            Some(raw) => decode_tasks(key, &raw),
            None => {
                debug!(key, "No stored tasks, starting empty");
                Vec::new()
            }
        };

        info!(key, count = tasks.len(), "Loaded tasks");

        Ok(Self {
            state: StoreState {
                tasks,
                ..StoreState::default()
            },
            storage,
            storage_key: key.to_string(),
            listeners: Vec::new(),
            next_subscription: 0,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> &StoreState {
        &self.state
    }

    /// Tasks in list order, newest first
    pub fn tasks(&self) -> &[Task] {
        &self.state.tasks
    }

    pub fn filter(&self) -> TaskFilter {
        self.state.filter
    }

    pub fn search_query(&self) -> &str {
        &self.state.search_query
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.state.tasks.iter().find(|t| t.id == id)
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Tasks passing the current search query and filter
    pub fn visible_tasks(&self) -> Vec<&Task> {
        view::filtered_tasks(&self.state.tasks, self.state.filter, &self.state.search_query)
    }

    pub fn stats(&self) -> TaskStats {
        view::stats(&self.state.tasks)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Prepend a task with the trimmed text
    ///
    /// Blank text is ignored and returns `Ok(None)`.
    pub fn add_task(&mut self, text: &str) -> Result<Option<String>> {
        let text = text.trim();
        if text.is_empty() {
            debug!("add_task: ignoring blank text");
            return Ok(None);
        }

        let task = Task::new(text);
        let id = task.id.clone();
        debug!(id = %id, "add_task: adding");
        self.state.tasks.insert(0, task);

        self.commit()?;
        Ok(Some(id))
    }

    /// Remove a task; returns whether it existed
    pub fn remove_task(&mut self, id: &str) -> Result<bool> {
        let before = self.state.tasks.len();
        self.state.tasks.retain(|t| t.id != id);
        if self.state.tasks.len() == before {
            debug!(id, "remove_task: no such task");
            return Ok(false);
        }

        debug!(id, "remove_task: removed");
        self.commit()?;
        Ok(true)
    }

    /// Flip a task's completion; returns the new value, or `None` if absent
    pub fn toggle_task(&mut self, id: &str) -> Result<Option<bool>> {
        let Some(task) = self.state.tasks.iter_mut().find(|t| t.id == id) else {
            debug!(id, "toggle_task: no such task");
            return Ok(None);
        };

        task.completed = !task.completed;
        let completed = task.completed;
        debug!(id, completed, "toggle_task: toggled");

        self.commit()?;
        Ok(Some(completed))
    }

    /// Remove all completed tasks; returns how many were removed
    pub fn clear_completed(&mut self) -> Result<usize> {
        let before = self.state.tasks.len();
        self.state.tasks.retain(|t| !t.completed);
        let removed = before - self.state.tasks.len();
        if removed == 0 {
            return Ok(0);
        }

        debug!(removed, "clear_completed: removed tasks");
        self.commit()?;
        Ok(removed)
    }

    /// Change the status filter (not persisted)
    pub fn set_filter(&mut self, filter: TaskFilter) {
        if self.state.filter == filter {
            return;
        }
        self.state.filter = filter;
        self.notify();
    }

    /// Change the search query, stored verbatim (not persisted)
    pub fn set_search_query(&mut self, query: impl Into<String>) {
        let query = query.into();
        if self.state.search_query == query {
            return;
        }
        self.state.search_query = query;
        self.notify();
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Register a listener run synchronously after each state change
    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&StoreState) + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Drop a listener; returns whether it was registered
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sid, _)| *sid != id);
        self.listeners.len() != before
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Notify listeners, then persist the task list
    ///
    /// A failed write leaves the in-memory state as is.
    fn commit(&mut self) -> Result<()> {
        self.notify();
        self.persist()
    }

    fn notify(&mut self) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(&self.state);
        }
    }

    fn persist(&mut self) -> Result<()> {
        let envelope = Envelope {
            state: PersistedTasks {
                tasks: self.state.tasks.clone(),
            },
            version: CURRENT_VERSION,
        };
        let json = serde_json::to_string(&envelope).context("Failed to serialize tasks")?;

        self.storage
            .set(&self.storage_key, &json)
            .with_context(|| format!("Failed to persist tasks under {}", self.storage_key))?;

        debug!(key = %self.storage_key, count = self.state.tasks.len(), "Persisted tasks");
        Ok(())
    }
}

impl<S: Storage> fmt::Debug for TaskStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskStore")
            .field("state", &self.state)
            .field("storage_key", &self.storage_key)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Decode a stored envelope, recovering to an empty list on bad data
fn decode_tasks(key: &str, raw: &str) -> Vec<Task> {
    let envelope: Envelope = match serde_json::from_str(raw) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = ?e, "Failed to parse stored tasks, starting empty");
            return Vec::new();
        }
    };

    if envelope.version > CURRENT_VERSION {
        warn!(
            key,
            version = envelope.version,
            supported = CURRENT_VERSION,
            "Stored tasks use a newer format, starting empty"
        );
        return Vec::new();
    }

    let mut seen = HashSet::new();
    let mut tasks = Vec::with_capacity(envelope.state.tasks.len());
    for task in envelope.state.tasks {
        if task.text.trim().is_empty() {
            warn!(key, id = %task.id, "Dropping stored task with blank text");
            continue;
        }
        if !seen.insert(task.id.clone()) {
            warn!(key, id = %task.id, "Dropping stored task with duplicate id");
            continue;
        }
        tasks.push(task);
    }

    tasks
}
