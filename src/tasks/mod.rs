//! Long-running task model and the in-memory task registry.

pub mod events;
pub mod service;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::models::ResourceRef;

pub use events::{EventEmitter, Subscription};
pub use service::TaskService;

/// Lifecycle of a task. `Completed`, `Failed` and `Cancelled` are final.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Constructed, `start` not called yet.
    #[default]
    Pending,
    Initializing,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Cancelled)
    }

    pub fn label(self) -> &'static str {
        match self {
            TaskState::Pending => "Pending",
            TaskState::Initializing => "Initializing",
            TaskState::Running => "Running",
            TaskState::Completed => "Completed",
            TaskState::Failed => "Failed",
            TaskState::Cancelled => "Cancelled",
        }
    }
}

/// Payload of a state-change event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskStateChange {
    pub task_id: Uuid,
    pub previous_state: TaskState,
    pub new_state: TaskState,
}

/// Point-in-time view of a task for display.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    pub message: String,
    /// 0–100, `None` while the total is unknown.
    pub progress: Option<f64>,
    pub processed_count: u64,
    pub inserted_count: u64,
    pub error_count: u64,
    /// Source total used for progress; possibly an estimate.
    pub total_count: Option<u64>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self {
            state: TaskState::Pending,
            message: String::new(),
            progress: None,
            processed_count: 0,
            inserted_count: 0,
            error_count: 0,
            total_count: None,
            error: None,
            updated_at: Utc::now(),
        }
    }
}

/// Anything the registry can track.
#[async_trait]
pub trait Task: Send + Sync {
    fn id(&self) -> Uuid;

    fn name(&self) -> &str;

    fn task_type(&self) -> &'static str;

    fn status(&self) -> TaskStatus;

    fn state(&self) -> TaskState {
        self.status().state
    }

    /// Connections, databases and collections held for the task's lifetime.
    fn used_resources(&self) -> Vec<ResourceRef>;

    /// Request cooperative cancellation.
    fn cancel(&self);

    fn on_did_change_state(
        &self,
        listener: Box<dyn Fn(&TaskStateChange) + Send + Sync>,
    ) -> Subscription;

    /// Run to a terminal state. Tasks are single-use: a second call fails.
    async fn start(&self) -> Result<TaskState>;
}
