use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Wire format of `created_at` / `updated_at`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value).map(Self)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: Option<String>,
    pub completed: bool,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A freshly stored task: never completed, both timestamps equal.
    pub fn new(id: TaskId, request: CreateTaskRequest, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: request.title,
            description: request.description,
            completed: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Partial update. `description: Some(None)` clears the field, `None` leaves it alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateTaskRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl UpdateTaskRequest {
    /// Whether applying these changes to `stored` would alter anything.
    pub fn is_dirty(&self, stored: &Task) -> bool {
        merge(stored, self) != *stored
    }
}

/// Overwrites only the fields present in `changes`; identity and timestamps are kept.
pub fn merge(stored: &Task, changes: &UpdateTaskRequest) -> Task {
    Task {
        title: changes.title.clone().unwrap_or_else(|| stored.title.clone()),
        description: changes
            .description
            .clone()
            .unwrap_or_else(|| stored.description.clone()),
        completed: changes.completed.unwrap_or(stored.completed),
        ..stored.clone()
    }
}

fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use serde_json::json;

    fn stored() -> Task {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        Task {
            id: TaskId::generate(),
            title: "Buy milk".into(),
            description: Some("2%".into()),
            completed: false,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn new_task_is_never_completed() {
        let now = Utc::now();
        let task = Task::new(
            TaskId::generate(),
            CreateTaskRequest { title: "A".into(), description: None },
            now,
        );
        assert!(!task.completed);
        assert_eq!(task.created_at, task.updated_at);
    }

    #[test]
    fn serializes_timestamps_in_wire_format() {
        let task = stored();
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["created_at"], "2024-03-09 14:05:07");
        assert_eq!(value["updated_at"], "2024-03-09 14:05:07");
        assert_eq!(value["id"], task.id.to_string());
        assert_eq!(value["description"], "2%");

        let back: Task = serde_json::from_value(value).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn task_id_round_trips_through_string() {
        let id = TaskId::generate();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("999".parse::<TaskId>().is_err());
    }

    #[rstest]
    #[case(UpdateTaskRequest { completed: Some(true), ..Default::default() })]
    #[case(UpdateTaskRequest { title: Some("Buy bread".into()), ..Default::default() })]
    #[case(UpdateTaskRequest { description: Some(None), ..Default::default() })]
    fn merge_changes_only_present_fields(#[case] changes: UpdateTaskRequest) {
        let before = stored();
        let after = merge(&before, &changes);

        assert_eq!(after.id, before.id);
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.updated_at, before.updated_at);
        assert_eq!(after.title, changes.title.clone().unwrap_or(before.title.clone()));
        assert_eq!(
            after.description,
            changes.description.clone().unwrap_or(before.description.clone())
        );
        assert_eq!(after.completed, changes.completed.unwrap_or(before.completed));
    }

    #[test]
    fn empty_changes_are_not_dirty() {
        let task = stored();
        assert!(!UpdateTaskRequest::default().is_dirty(&task));

        let same_title = UpdateTaskRequest { title: Some(task.title.clone()), ..Default::default() };
        assert!(!same_title.is_dirty(&task));

        let toggle = UpdateTaskRequest { completed: Some(true), ..Default::default() };
        assert!(toggle.is_dirty(&task));
    }

    #[test]
    fn update_request_distinguishes_null_from_absent() {
        let cleared: UpdateTaskRequest = serde_json::from_value(json!({"description": null})).unwrap();
        assert_eq!(cleared.description, Some(None));

        let untouched: UpdateTaskRequest = serde_json::from_value(json!({"completed": true})).unwrap();
        assert_eq!(untouched.description, None);
        assert_eq!(untouched.completed, Some(true));
    }
}
