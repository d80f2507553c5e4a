//! Persistence gateway for tasks.
//!
//! The gateway owns identity and timestamps: it assigns ids on insert and
//! maintains `created_at` / `updated_at`. Everything else is the caller's.

mod in_memory;
mod sqlite;

use async_trait::async_trait;
use shared::{CreateTaskRequest, Task, TaskId};
use thiserror::Error;

pub use in_memory::InMemoryTaskGateway;
pub use sqlite::SqliteTaskGateway;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt row: {0}")]
    CorruptRow(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for GatewayError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::Unavailable(error.to_string())
            }
            error => Self::Database(error),
        }
    }
}

#[async_trait]
pub trait TaskGateway: Send + Sync {
    /// All tasks, most recently created first.
    async fn list(&self) -> Result<Vec<Task>, GatewayError>;

    /// Stores a new, not yet completed task.
    async fn insert(&self, request: CreateTaskRequest) -> Result<Task, GatewayError>;

    async fn find(&self, id: TaskId) -> Result<Option<Task>, GatewayError>;

    /// Writes title, description and completion of `task` and bumps
    /// `updated_at` strictly past its stored value. Returns false when the
    /// row no longer exists.
    async fn update(&self, task: &Task) -> Result<bool, GatewayError>;

    async fn delete(&self, id: TaskId) -> Result<bool, GatewayError>;
}
