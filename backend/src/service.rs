//! Task lifecycle rules and storage error translation.
//!
//! Every storage failure surfaces as [`ServiceError::Storage`] carrying the
//! failed operation and its cause; an absent row is always
//! [`ServiceError::NotFound`], checked before anything is written.

use std::sync::Arc;

use shared::{merge, CreateTaskRequest, Task, TaskId, UpdateTaskRequest};
use thiserror::Error;

use crate::gateway::{GatewayError, TaskGateway};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("task {0} not found")]
    NotFound(String),

    #[error("{0}")]
    Storage(String),
}

#[derive(Clone)]
pub struct TaskService {
    gateway: Arc<dyn TaskGateway>,
}

impl TaskService {
    pub fn new(gateway: Arc<dyn TaskGateway>) -> Self {
        Self { gateway }
    }

    pub async fn list_tasks(&self) -> Result<Vec<Task>, ServiceError> {
        self.gateway
            .list()
            .await
            .map_err(|error| storage("failed to list tasks", error))
    }

    /// Stores a new task. It always starts out not completed.
    pub async fn create_task(&self, request: CreateTaskRequest) -> Result<Task, ServiceError> {
        let task = self
            .gateway
            .insert(request)
            .await
            .map_err(|error| storage("failed to save task", error))?;
        tracing::info!(task_id = %task.id, "task created");
        Ok(task)
    }

    pub async fn get_task(&self, id: &str) -> Result<Task, ServiceError> {
        self.find(parse_id(id)?).await
    }

    /// Applies only the fields present in `changes` and returns the task as
    /// stored afterwards. Changes that alter nothing are not written.
    pub async fn update_task(
        &self,
        id: &str,
        changes: UpdateTaskRequest,
    ) -> Result<Task, ServiceError> {
        let stored = self.get_task(id).await?;
        if !changes.is_dirty(&stored) {
            return Ok(stored);
        }

        let written = self
            .gateway
            .update(&merge(&stored, &changes))
            .await
            .map_err(|error| storage("failed to update task", error))?;
        if !written {
            return Err(ServiceError::NotFound(stored.id.to_string()));
        }

        tracing::info!(task_id = %stored.id, "task updated");
        self.find(stored.id).await
    }

    pub async fn delete_task(&self, id: &str) -> Result<(), ServiceError> {
        let stored = self.get_task(id).await?;
        let deleted = self
            .gateway
            .delete(stored.id)
            .await
            .map_err(|error| storage("failed to delete task", error))?;
        if !deleted {
            return Err(ServiceError::NotFound(stored.id.to_string()));
        }

        tracing::info!(task_id = %stored.id, "task deleted");
        Ok(())
    }

    async fn find(&self, id: TaskId) -> Result<Task, ServiceError> {
        self.gateway
            .find(id)
            .await
            .map_err(|error| storage("failed to fetch task", error))?
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }
}

// Ids that cannot name a stored task are simply not found.
fn parse_id(id: &str) -> Result<TaskId, ServiceError> {
    id.parse().map_err(|_| ServiceError::NotFound(id.to_owned()))
}

fn storage(operation: &str, error: GatewayError) -> ServiceError {
    tracing::error!(%error, "{operation}");
    ServiceError::Storage(format!("{operation}: {error}"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rstest::rstest;

    use super::*;
    use crate::gateway::InMemoryTaskGateway;

    /// Counts writes reaching the wrapped gateway.
    #[derive(Default)]
    struct RecordingGateway {
        inner: InMemoryTaskGateway,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl TaskGateway for RecordingGateway {
        async fn list(&self) -> Result<Vec<Task>, GatewayError> {
            self.inner.list().await
        }

        async fn insert(&self, request: CreateTaskRequest) -> Result<Task, GatewayError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.insert(request).await
        }

        async fn find(&self, id: TaskId) -> Result<Option<Task>, GatewayError> {
            self.inner.find(id).await
        }

        async fn update(&self, task: &Task) -> Result<bool, GatewayError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.update(task).await
        }

        async fn delete(&self, id: TaskId) -> Result<bool, GatewayError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.delete(id).await
        }
    }

    struct BrokenGateway;

    #[async_trait]
    impl TaskGateway for BrokenGateway {
        async fn list(&self) -> Result<Vec<Task>, GatewayError> {
            Err(GatewayError::Unavailable("disk on fire".into()))
        }

        async fn insert(&self, _: CreateTaskRequest) -> Result<Task, GatewayError> {
            Err(GatewayError::Unavailable("disk on fire".into()))
        }

        async fn find(&self, _: TaskId) -> Result<Option<Task>, GatewayError> {
            Err(GatewayError::Unavailable("disk on fire".into()))
        }

        async fn update(&self, _: &Task) -> Result<bool, GatewayError> {
            Err(GatewayError::Unavailable("disk on fire".into()))
        }

        async fn delete(&self, _: TaskId) -> Result<bool, GatewayError> {
            Err(GatewayError::Unavailable("disk on fire".into()))
        }
    }

    fn service() -> (TaskService, Arc<RecordingGateway>) {
        let gateway = Arc::new(RecordingGateway::default());
        (TaskService::new(gateway.clone()), gateway)
    }

    fn create(title: &str) -> CreateTaskRequest {
        CreateTaskRequest { title: title.into(), description: None }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (service, _) = service();
        let created = service
            .create_task(CreateTaskRequest {
                title: "Buy milk".into(),
                description: Some("2%".into()),
            })
            .await
            .unwrap();

        let fetched = service.get_task(&created.id.to_string()).await.unwrap();
        assert_eq!(fetched.title, "Buy milk");
        assert_eq!(fetched.description.as_deref(), Some("2%"));
        assert!(!fetched.completed);
    }

    #[tokio::test]
    async fn list_returns_newest_first() {
        let (service, _) = service();
        let a = service.create_task(create("A")).await.unwrap();
        let b = service.create_task(create("B")).await.unwrap();

        let titles: Vec<_> = service
            .list_tasks()
            .await
            .unwrap()
            .into_iter()
            .map(|task| task.title)
            .collect();
        assert_eq!(titles, ["B", "A"]);
        assert_ne!(a.id, b.id);
    }

    #[rstest]
    #[case::numeric("999")]
    #[case("not-a-uuid")]
    #[case("7d6f2b0a-6a61-4b7c-9a3a-0f1d6a1b2c3d")]
    #[tokio::test]
    async fn missing_ids_are_not_found_without_writes(#[case] id: &str) {
        let (service, gateway) = service();
        service.create_task(create("A")).await.unwrap();
        let writes = gateway.writes.load(Ordering::SeqCst);

        let not_found = ServiceError::NotFound(id.to_owned());
        assert_eq!(service.get_task(id).await.unwrap_err(), not_found);
        assert_eq!(
            service
                .update_task(id, UpdateTaskRequest { completed: Some(true), ..Default::default() })
                .await
                .unwrap_err(),
            not_found
        );
        assert_eq!(service.delete_task(id).await.unwrap_err(), not_found);

        assert_eq!(gateway.writes.load(Ordering::SeqCst), writes);
        assert_eq!(gateway.inner.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn completing_a_task_changes_only_completed() {
        let (service, _) = service();
        let created = service
            .create_task(CreateTaskRequest {
                title: "Buy milk".into(),
                description: Some("2%".into()),
            })
            .await
            .unwrap();

        let updated = service
            .update_task(
                &created.id.to_string(),
                UpdateTaskRequest { completed: Some(true), ..Default::default() },
            )
            .await
            .unwrap();

        assert!(updated.completed);
        assert_eq!(updated.title, created.title);
        assert_eq!(updated.description, created.description);
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at > created.updated_at);
    }

    #[tokio::test]
    async fn clean_update_skips_the_write() {
        let (service, gateway) = service();
        let created = service.create_task(create("A")).await.unwrap();
        let writes = gateway.writes.load(Ordering::SeqCst);

        let unchanged = service
            .update_task(
                &created.id.to_string(),
                UpdateTaskRequest { title: Some("A".into()), ..Default::default() },
            )
            .await
            .unwrap();

        assert_eq!(unchanged, created);
        assert_eq!(gateway.writes.load(Ordering::SeqCst), writes);
    }

    #[tokio::test]
    async fn deleted_tasks_are_gone() {
        let (service, _) = service();
        let created = service.create_task(create("A")).await.unwrap();
        let id = created.id.to_string();

        service.delete_task(&id).await.unwrap();
        assert_eq!(
            service.get_task(&id).await.unwrap_err(),
            ServiceError::NotFound(id.clone())
        );
        assert!(service.list_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn storage_failures_name_operation_and_cause() {
        let service = TaskService::new(Arc::new(BrokenGateway));
        let id = TaskId::generate().to_string();

        let cases = [
            (service.list_tasks().await.map(drop), "failed to list tasks"),
            (service.create_task(create("A")).await.map(drop), "failed to save task"),
            (service.get_task(&id).await.map(drop), "failed to fetch task"),
            (
                service.update_task(&id, UpdateTaskRequest::default()).await.map(drop),
                "failed to fetch task",
            ),
            (service.delete_task(&id).await, "failed to fetch task"),
        ];

        for (result, operation) in cases {
            assert_eq!(
                result.unwrap_err(),
                ServiceError::Storage(format!("{operation}: storage unavailable: disk on fire"))
            );
        }
    }
}
