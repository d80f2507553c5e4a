use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{CreateTaskRequest, Task, TaskId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use super::{GatewayError, TaskGateway};

const COLUMNS: &str = "id, title, description, completed, created_at, updated_at";

/// Tasks in a SQLite table. Timestamps are stored as integer microseconds
/// since the epoch so that ordering by them is exact.
#[derive(Clone)]
pub struct SqliteTaskGateway {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    completed: bool,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<TaskRow> for Task {
    type Error = GatewayError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            id: TaskId::from_uuid(row.id),
            created_at: from_micros(row.id, "created_at", row.created_at)?,
            updated_at: from_micros(row.id, "updated_at", row.updated_at)?,
            title: row.title,
            description: row.description,
            completed: row.completed,
        })
    }
}

fn from_micros(id: Uuid, column: &str, micros: i64) -> Result<DateTime<Utc>, GatewayError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| GatewayError::CorruptRow(format!("task {id}: {column} out of range")))
}

impl SqliteTaskGateway {
    /// Opens (creating if needed) the database at `url` and applies migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, GatewayError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        let gateway = Self { pool };
        gateway.migrate().await?;
        Ok(gateway)
    }

    /// A private in-memory database. Held on a single connection that is
    /// never recycled, since the data lives and dies with it.
    pub async fn in_memory() -> Result<Self, GatewayError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let gateway = Self { pool };
        gateway.migrate().await?;
        Ok(gateway)
    }

    pub async fn migrate(&self) -> Result<(), GatewayError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64, GatewayError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl TaskGateway for SqliteTaskGateway {
    async fn list(&self) -> Result<Vec<Task>, GatewayError> {
        let sql = format!("SELECT {COLUMNS} FROM tasks ORDER BY created_at DESC, rowid DESC");
        sqlx::query_as::<_, TaskRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Task::try_from)
            .collect()
    }

    async fn insert(&self, request: CreateTaskRequest) -> Result<Task, GatewayError> {
        let now = Utc::now().timestamp_micros();
        let sql = format!(
            "INSERT INTO tasks ({COLUMNS}) VALUES (?, ?, ?, 0, ?, ?) RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(TaskId::generate().as_uuid())
            .bind(request.title)
            .bind(request.description)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        Task::try_from(row)
    }

    async fn find(&self, id: TaskId) -> Result<Option<Task>, GatewayError> {
        let sql = format!("SELECT {COLUMNS} FROM tasks WHERE id = ?");
        sqlx::query_as::<_, TaskRow>(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(Task::try_from)
            .transpose()
    }

    async fn update(&self, task: &Task) -> Result<bool, GatewayError> {
        let result = sqlx::query(
            "UPDATE tasks \
             SET title = ?, description = ?, completed = ?, updated_at = MAX(?, updated_at + 1) \
             WHERE id = ?",
        )
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.completed)
        .bind(Utc::now().timestamp_micros())
        .bind(task.id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: TaskId) -> Result<bool, GatewayError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(title: &str) -> CreateTaskRequest {
        CreateTaskRequest { title: title.into(), description: None }
    }

    #[tokio::test]
    async fn insert_assigns_identity_and_defaults() {
        let gateway = SqliteTaskGateway::in_memory().await.unwrap();
        let task = gateway
            .insert(CreateTaskRequest { title: "Buy milk".into(), description: Some("2%".into()) })
            .await
            .unwrap();

        assert!(!task.completed);
        assert_eq!(task.created_at, task.updated_at);
        assert_eq!(gateway.find(task.id).await.unwrap(), Some(task));
        assert_eq!(gateway.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn list_is_newest_first_even_within_one_instant() {
        let gateway = SqliteTaskGateway::in_memory().await.unwrap();
        let mut inserted = Vec::new();
        for title in ["A", "B", "C"] {
            inserted.push(gateway.insert(request(title)).await.unwrap().id);
        }

        let listed: Vec<_> = gateway.list().await.unwrap().into_iter().map(|t| t.id).collect();
        inserted.reverse();
        assert_eq!(listed, inserted);
    }

    #[tokio::test]
    async fn update_writes_fields_and_bumps_updated_at() {
        let gateway = SqliteTaskGateway::in_memory().await.unwrap();
        let task = gateway.insert(request("A")).await.unwrap();

        let changed = Task { completed: true, description: Some("note".into()), ..task.clone() };
        assert!(gateway.update(&changed).await.unwrap());

        let stored = gateway.find(task.id).await.unwrap().unwrap();
        assert!(stored.completed);
        assert_eq!(stored.description.as_deref(), Some("note"));
        assert_eq!(stored.created_at, task.created_at);
        assert!(stored.updated_at > task.updated_at);
    }

    #[tokio::test]
    async fn update_and_delete_report_missing_rows() {
        let gateway = SqliteTaskGateway::in_memory().await.unwrap();
        let task = gateway.insert(request("A")).await.unwrap();

        assert!(gateway.delete(task.id).await.unwrap());
        assert!(!gateway.delete(task.id).await.unwrap());
        assert!(!gateway.update(&task).await.unwrap());
        assert_eq!(gateway.find(task.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn schema_rejects_overlong_titles() {
        let gateway = SqliteTaskGateway::in_memory().await.unwrap();
        let error = gateway.insert(request(&"x".repeat(256))).await.unwrap_err();
        assert!(matches!(error, GatewayError::Database(_)));
        assert_eq!(gateway.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn closed_pool_is_reported_as_unavailable() {
        let gateway = SqliteTaskGateway::in_memory().await.unwrap();
        gateway.pool.close().await;

        let error = gateway.list().await.unwrap_err();
        assert!(matches!(error, GatewayError::Unavailable(_)), "{error}");
    }
}
