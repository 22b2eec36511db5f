//! Wiring of connections, settings and the task registry for one process.

use std::sync::Arc;

use uuid::Uuid;

use crate::connection::ConnectionManager;
use crate::error::{Error, Result};
use crate::models::CopyPasteConfig;
use crate::state::CopySettings;
use crate::tasks::{TaskService, TaskState};
use crate::transfer::{
    ClusterDocumentReader, ClusterDocumentWriter, CopyPasteCollectionTask, CopyTaskOptions,
};

/// Shared services a host hands to copy commands.
#[derive(Clone)]
pub struct CopySession {
    connections: Arc<ConnectionManager>,
    tasks: Arc<TaskService>,
    settings: CopySettings,
}

impl CopySession {
    pub fn new(settings: CopySettings) -> Self {
        Self::with_services(Arc::new(ConnectionManager::new()), Arc::new(TaskService::new()), settings)
    }

    pub fn with_services(
        connections: Arc<ConnectionManager>,
        tasks: Arc<TaskService>,
        settings: CopySettings,
    ) -> Self {
        Self { connections, tasks, settings }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn tasks(&self) -> &Arc<TaskService> {
        &self.tasks
    }

    pub fn settings(&self) -> &CopySettings {
        &self.settings
    }

    /// Build a copy task from the session settings and register it. The task is
    /// returned in `Pending`; call `start` or `TaskService::spawn_task` to run it.
    pub fn create_copy_task(&self, config: CopyPasteConfig) -> Arc<CopyPasteCollectionTask> {
        self.create_copy_task_with(config, CopyTaskOptions::from(&self.settings))
    }

    pub fn create_copy_task_with(
        &self,
        config: CopyPasteConfig,
        options: CopyTaskOptions,
    ) -> Arc<CopyPasteCollectionTask> {
        let reader = ClusterDocumentReader::new(Arc::clone(&self.connections))
            .with_count_mode(self.settings.count_mode);
        let writer = ClusterDocumentWriter::new(Arc::clone(&self.connections));
        let task = Arc::new(CopyPasteCollectionTask::new(
            config,
            Arc::new(reader),
            Arc::new(writer),
            options,
        ));
        self.tasks.register_task(task.clone());
        task
    }

    /// Run a registered task to completion on the current runtime.
    pub async fn run_task(&self, id: Uuid) -> Result<TaskState> {
        let handle = self.tasks.spawn_task(id)?;
        handle.await?
    }

    /// Whether a non-terminal task still uses `connection_id`, e.g. before disconnecting.
    pub fn connection_in_use(&self, connection_id: &str) -> bool {
        !self.tasks.find_conflicting_tasks_for_connections(&[connection_id]).is_empty()
    }

    /// Disconnect unless a running task depends on the connection.
    pub fn try_disconnect(&self, connection_id: &str) -> Result<bool> {
        let busy = self.tasks.find_conflicting_tasks_for_connections(&[connection_id]);
        if let Some(task) = busy.first() {
            return Err(Error::ResourceInUse(format!(
                "connection {connection_id} is in use by task {} ({})",
                task.id(),
                task.name()
            )));
        }
        Ok(self.connections.disconnect(connection_id))
    }
}
