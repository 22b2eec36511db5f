//! In-memory registry of tasks for one session.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::ResourceRef;
use crate::tasks::events::{EventEmitter, Subscription};
use crate::tasks::{Task, TaskState, TaskStateChange};

struct RegisteredTask {
    task: Arc<dyn Task>,
    _forward: Subscription,
}

/// Tracks every task of a session by id. Nothing is persisted; terminal tasks stay
/// queryable until deleted or cleared.
#[derive(Default)]
pub struct TaskService {
    tasks: DashMap<Uuid, RegisteredTask>,
    events: EventEmitter<TaskStateChange>,
}

impl TaskService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_task(&self, task: Arc<dyn Task>) -> Uuid {
        let id = task.id();
        let events = self.events.clone();
        let forward = task.on_did_change_state(Box::new(move |change| events.emit(change)));
        log::debug!("Registered task {id} ({})", task.name());
        self.tasks.insert(id, RegisteredTask { task, _forward: forward });
        id
    }

    pub fn get_task(&self, id: Uuid) -> Option<Arc<dyn Task>> {
        self.tasks.get(&id).map(|entry| Arc::clone(&entry.task))
    }

    pub fn list_tasks(&self) -> Vec<Arc<dyn Task>> {
        self.tasks.iter().map(|entry| Arc::clone(&entry.task)).collect()
    }

    /// Start a registered task on the current tokio runtime.
    pub fn spawn_task(&self, id: Uuid) -> Result<JoinHandle<Result<TaskState>>> {
        let task = self.get_task(id).ok_or(Error::TaskNotFound(id))?;
        Ok(tokio::spawn(async move { task.start().await }))
    }

    pub fn cancel_task(&self, id: Uuid) -> Result<()> {
        let task = self.get_task(id).ok_or(Error::TaskNotFound(id))?;
        task.cancel();
        Ok(())
    }

    /// Remove a task, cancelling it first if it is still running.
    pub fn delete_task(&self, id: Uuid) -> Result<Arc<dyn Task>> {
        let (_, entry) = self.tasks.remove(&id).ok_or(Error::TaskNotFound(id))?;
        if !entry.task.state().is_terminal() {
            entry.task.cancel();
        }
        log::debug!("Removed task {id}");
        Ok(entry.task)
    }

    /// Drop every task that reached a terminal state. Returns how many were removed.
    pub fn clear_terminal_tasks(&self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, entry| !entry.task.state().is_terminal());
        before - self.tasks.len()
    }

    fn active_tasks(&self) -> Vec<Arc<dyn Task>> {
        self.list_tasks().into_iter().filter(|task| !task.state().is_terminal()).collect()
    }

    /// Resources held by every non-terminal task.
    pub fn get_all_used_resources(&self) -> Vec<(Uuid, Vec<ResourceRef>)> {
        self.active_tasks().into_iter().map(|task| (task.id(), task.used_resources())).collect()
    }

    /// Non-terminal tasks that reference any of `connection_ids`.
    pub fn find_conflicting_tasks_for_connections<S: AsRef<str>>(
        &self,
        connection_ids: &[S],
    ) -> Vec<Arc<dyn Task>> {
        self.active_tasks()
            .into_iter()
            .filter(|task| {
                task.used_resources().iter().any(|resource| {
                    connection_ids.iter().any(|id| id.as_ref() == resource.connection_id)
                })
            })
            .collect()
    }

    /// Non-terminal tasks whose resources overlap `resource` (same connection, and same
    /// database/collection where both sides name one).
    pub fn find_conflicting_tasks(&self, resource: &ResourceRef) -> Vec<Arc<dyn Task>> {
        self.active_tasks()
            .into_iter()
            .filter(|task| task.used_resources().iter().any(|used| used.overlaps(resource)))
            .collect()
    }

    /// State changes of every registered task.
    pub fn on_did_change_task_state(
        &self,
        listener: impl Fn(&TaskStateChange) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.subscribe(listener)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::tasks::TaskStatus;

    struct FakeTask {
        id: Uuid,
        state: Mutex<TaskState>,
        resources: Vec<ResourceRef>,
        events: EventEmitter<TaskStateChange>,
    }

    impl FakeTask {
        fn new(connection_id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: Uuid::new_v4(),
                state: Mutex::new(TaskState::Running),
                resources: vec![ResourceRef::database(connection_id, "db")],
                events: EventEmitter::new(),
            })
        }

        fn finish(&self) {
            let previous = std::mem::replace(&mut *self.state.lock(), TaskState::Completed);
            self.events.emit(&TaskStateChange {
                task_id: self.id,
                previous_state: previous,
                new_state: TaskState::Completed,
            });
        }
    }

    #[async_trait]
    impl Task for FakeTask {
        fn id(&self) -> Uuid {
            self.id
        }

        fn name(&self) -> &str {
            "fake"
        }

        fn task_type(&self) -> &'static str {
            "fake"
        }

        fn status(&self) -> TaskStatus {
            TaskStatus { state: *self.state.lock(), ..TaskStatus::default() }
        }

        fn used_resources(&self) -> Vec<ResourceRef> {
            self.resources.clone()
        }

        fn cancel(&self) {
            *self.state.lock() = TaskState::Cancelled;
        }

        fn on_did_change_state(
            &self,
            listener: Box<dyn Fn(&TaskStateChange) + Send + Sync>,
        ) -> Subscription {
            self.events.subscribe(listener)
        }

        async fn start(&self) -> Result<TaskState> {
            Ok(*self.state.lock())
        }
    }

    #[test]
    fn conflicts_only_while_running() {
        let service = TaskService::new();
        let task = FakeTask::new("conn-A");
        service.register_task(task.clone());

        let found = service.find_conflicting_tasks_for_connections(&["conn-A"]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), task.id);
        assert!(service.find_conflicting_tasks_for_connections(&["conn-B"]).is_empty());
        assert_eq!(service.get_all_used_resources().len(), 1);

        task.finish();
        assert!(service.find_conflicting_tasks_for_connections(&["conn-A"]).is_empty());
        assert!(service.get_all_used_resources().is_empty());
        assert!(service.get_task(task.id).is_some());
    }

    #[test]
    fn forwards_task_state_changes() {
        let service = TaskService::new();
        let task = FakeTask::new("conn-A");
        service.register_task(task.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _subscription = service.on_did_change_task_state(move |change| {
            sink.lock().push(change.new_state);
        });

        task.finish();
        assert_eq!(*seen.lock(), vec![TaskState::Completed]);
    }

    #[test]
    fn delete_cancels_and_clear_removes_terminal() {
        let service = TaskService::new();
        let running = FakeTask::new("conn-A");
        let done = FakeTask::new("conn-B");
        service.register_task(running.clone());
        service.register_task(done.clone());
        done.finish();

        assert_eq!(service.clear_terminal_tasks(), 1);
        assert_eq!(service.len(), 1);

        service.delete_task(running.id).expect("registered");
        assert_eq!(running.state(), TaskState::Cancelled);
        assert!(service.is_empty());
        assert!(matches!(service.delete_task(running.id), Err(Error::TaskNotFound(_))));
    }
}
