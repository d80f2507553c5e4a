//! Request payload validation.
//!
//! Payloads are checked field by field and every failure is collected, so a
//! client sees all problems with a request at once.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::task::{CreateTaskRequest, UpdateTaskRequest};

pub const TITLE_MAX_CHARS: usize = 255;

/// Field name to the list of messages for that field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for messages in self.0.values() {
            for message in messages {
                if !first {
                    f.write_str(" ")?;
                }
                f.write_str(message)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Builds a request type out of an already-decoded JSON object.
pub trait FromPayload: Sized {
    fn from_payload(payload: &Map<String, Value>) -> Result<Self, ValidationErrors>;
}

/// Decodes a raw request body and validates it. An empty body is an empty object.
pub fn parse_payload<T: FromPayload>(body: &[u8]) -> Result<T, ValidationErrors> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return T::from_payload(&Map::new());
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(payload)) => T::from_payload(&payload),
        Ok(_) => Err(ValidationErrors::single(
            "body",
            "The request body must be a JSON object.",
        )),
        Err(_) => Err(ValidationErrors::single(
            "body",
            "The request body must be valid JSON.",
        )),
    }
}

impl FromPayload for CreateTaskRequest {
    fn from_payload(payload: &Map<String, Value>) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let title = match field(payload, "title") {
            Field::Absent | Field::Null => {
                errors.add("title", "The title field is required.");
                None
            }
            Field::Present(value) => title(value, &mut errors),
        };

        let description = match field(payload, "description") {
            Field::Absent | Field::Null => None,
            Field::Present(value) => string(value, "description", &mut errors),
        };

        match title {
            Some(title) if errors.is_empty() => Ok(Self { title, description }),
            _ => Err(errors),
        }
    }
}

impl FromPayload for UpdateTaskRequest {
    fn from_payload(payload: &Map<String, Value>) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let mut request = Self::default();

        match field(payload, "title") {
            Field::Absent => {}
            Field::Null => errors.add("title", must_be_string("title")),
            Field::Present(value) => request.title = title(value, &mut errors),
        }

        match field(payload, "description") {
            Field::Absent => {}
            Field::Null => request.description = Some(None),
            Field::Present(value) => {
                if let Some(description) = string(value, "description", &mut errors) {
                    request.description = Some(Some(description));
                }
            }
        }

        match payload.get("completed") {
            None => {}
            Some(value) => match boolean(value) {
                Some(completed) => request.completed = Some(completed),
                None => errors.add("completed", "The completed field must be true or false."),
            },
        }

        if errors.is_empty() {
            Ok(request)
        } else {
            Err(errors)
        }
    }
}

enum Field<'a> {
    Absent,
    Null,
    Present(&'a Value),
}

// Blank strings count as null.
fn field<'a>(payload: &'a Map<String, Value>, name: &str) -> Field<'a> {
    match payload.get(name) {
        None => Field::Absent,
        Some(Value::Null) => Field::Null,
        Some(Value::String(text)) if text.trim().is_empty() => Field::Null,
        Some(value) => Field::Present(value),
    }
}

fn must_be_string(name: &str) -> String {
    format!("The {name} field must be a string.")
}

fn string(value: &Value, name: &str, errors: &mut ValidationErrors) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_owned()),
        _ => {
            errors.add(name, must_be_string(name));
            None
        }
    }
}

fn title(value: &Value, errors: &mut ValidationErrors) -> Option<String> {
    let title = string(value, "title", errors)?;
    if title.chars().count() > TITLE_MAX_CHARS {
        errors.add(
            "title",
            format!("The title field must not be greater than {TITLE_MAX_CHARS} characters."),
        );
        return None;
    }
    Some(title)
}

fn boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => match number.as_u64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(text) => match text.trim() {
            "0" => Some(false),
            "1" => Some(true),
            _ => None,
        },
        _ => None,
    }
}
