use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use shared::{CreateTaskRequest, Task, TaskId};
use tokio::sync::RwLock;

use super::{GatewayError, TaskGateway};

/// Process-local storage, in insertion order.
#[derive(Default)]
pub struct InMemoryTaskGateway {
    tasks: RwLock<Vec<Task>>,
}

impl InMemoryTaskGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskGateway for InMemoryTaskGateway {
    async fn list(&self) -> Result<Vec<Task>, GatewayError> {
        let mut tasks: Vec<Task> = self.tasks.read().await.iter().rev().cloned().collect();
        // stable sort keeps later inserts ahead on equal timestamps
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn insert(&self, request: CreateTaskRequest) -> Result<Task, GatewayError> {
        let task = Task::new(TaskId::generate(), request, Utc::now());
        self.tasks.write().await.push(task.clone());
        Ok(task)
    }

    async fn find(&self, id: TaskId) -> Result<Option<Task>, GatewayError> {
        Ok(self.tasks.read().await.iter().find(|task| task.id == id).cloned())
    }

    async fn update(&self, task: &Task) -> Result<bool, GatewayError> {
        let mut tasks = self.tasks.write().await;
        let Some(stored) = tasks.iter_mut().find(|stored| stored.id == task.id) else {
            return Ok(false);
        };
        stored.title.clone_from(&task.title);
        stored.description.clone_from(&task.description);
        stored.completed = task.completed;
        stored.updated_at = Utc::now().max(stored.updated_at + TimeDelta::microseconds(1));
        Ok(true)
    }

    async fn delete(&self, id: TaskId) -> Result<bool, GatewayError> {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|task| task.id != id);
        Ok(tasks.len() < before)
    }
}
