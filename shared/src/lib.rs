mod task;
pub mod validation;

pub use task::{merge, CreateTaskRequest, Task, TaskId, UpdateTaskRequest, TIMESTAMP_FORMAT};
pub use validation::{parse_payload, FromPayload, ValidationErrors};
