//! Per-task status store shared by the poll and subscribe paths.
//!
//! Each tracked task owns a `watch` channel holding the last observed
//! status. Pulling reads the channel's current value, listeners hold a
//! receiver, and every observation goes through `record`, which refuses to
//! move a task out of a terminal state.

use crate::{ClientError, TaskStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::debug;

/// `None` until the first status has been observed.
pub type TaskState = Option<TaskStatus>;

#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    tasks: Arc<Mutex<HashMap<String, watch::Sender<TaskState>>>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<String, watch::Sender<TaskState>>> {
        // no invariant spans the lock, so a poisoned map is still usable
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts tracking `task_id`. Returns false if it was already tracked, in
    /// which case its state is left alone.
    pub fn insert(&self, task_id: &str) -> bool {
        let mut tasks = self.tasks();
        if tasks.contains_key(task_id) {
            return false;
        }
        let (tx, _rx) = watch::channel(None);
        tasks.insert(task_id.to_string(), tx);
        true
    }

    pub fn remove(&self, task_id: &str) -> bool {
        self.tasks().remove(task_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks().is_empty()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks().contains_key(task_id)
    }

    pub fn get(&self, task_id: &str) -> Result<TaskState, ClientError> {
        let tasks = self.tasks();
        let tx = tasks
            .get(task_id)
            .ok_or_else(|| ClientError::UnknownTask(task_id.to_string()))?;
        let state = tx.borrow().clone();
        Ok(state)
    }

    /// Terminal status already stored for `task_id`, if any.
    pub fn terminal(&self, task_id: &str) -> Result<Option<TaskStatus>, ClientError> {
        Ok(self.get(task_id)?.filter(TaskStatus::is_terminal))
    }

    pub fn watch(&self, task_id: &str) -> Result<watch::Receiver<TaskState>, ClientError> {
        let tasks = self.tasks();
        let tx = tasks
            .get(task_id)
            .ok_or_else(|| ClientError::UnknownTask(task_id.to_string()))?;
        Ok(tx.subscribe())
    }

    /// Records an observation and returns the store's view afterwards: the
    /// new status, or the stored one if the task had already terminated.
    pub fn record(&self, task_id: &str, status: TaskStatus) -> Result<TaskStatus, ClientError> {
        let tasks = self.tasks();
        let tx = tasks
            .get(task_id)
            .ok_or_else(|| ClientError::UnknownTask(task_id.to_string()))?;

        let mut view = status;
        let changed = tx.send_if_modified(|state| match state {
            Some(current) if current.is_terminal() => {
                view = current.clone();
                false
            }
            _ => {
                if state.as_ref() == Some(&view) {
                    return false;
                }
                *state = Some(view.clone());
                true
            }
        });
        if changed {
            debug!(task_id, terminal = view.is_terminal(), "task status changed");
        }
        Ok(view)
    }
}
