pub mod app;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod rate_limit;
pub mod service;

pub use app::router;
pub use config::{AppConfig, ConfigError, StorageMode};
pub use error::ApiError;
pub use gateway::{GatewayError, InMemoryTaskGateway, SqliteTaskGateway, TaskGateway};
pub use rate_limit::RateLimiter;
pub use service::{ServiceError, TaskService};
