//! Payload Schema Registry
//!
//! Maps event-type tags to the payload fields the validator enforces and
//! builds the typed [`EventPayload`] once a payload passes.

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::ingest::validator::RejectReason;
use crate::models::event::{EventPayload, EventType};

/// Payload field type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Non-empty string
    Text,
    /// Finite number >= 0
    NonNegativeNumber,
    /// Integer >= 0
    Count,
    /// Boolean
    Flag,
    /// Array of strings
    TextList,
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldKind::Text => "a non-empty string",
            FieldKind::NonNegativeNumber => "a non-negative number",
            FieldKind::Count => "a non-negative integer",
            FieldKind::Flag => "a boolean",
            FieldKind::TextList => "an array of strings",
        };
        f.write_str(name)
    }
}

/// Field declaration inside a schema
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

/// Minimum payload contract for one event type
#[derive(Debug, Clone)]
pub struct PayloadSchema {
    pub event_type: EventType,
    pub fields: Vec<FieldSpec>,
}

impl PayloadSchema {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            fields: Vec::new(),
        }
    }

    /// Declare a required field
    pub fn required(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            required: true,
        });
        self
    }

    /// Declare an optional field, type-checked when present
    pub fn optional(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            required: false,
        });
        self
    }

    /// Check presence, type and range of every declared field
    pub fn check(&self, payload: &Map<String, Value>) -> Result<(), RejectReason> {
        for spec in &self.fields {
            match payload.get(&spec.name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        return Err(RejectReason::MissingField {
                            field: spec.name.clone(),
                        });
                    }
                }
                Some(value) => check_kind(&spec.name, spec.kind, value)?,
            }
        }
        Ok(())
    }
}

fn check_kind(field: &str, kind: FieldKind, value: &Value) -> Result<(), RejectReason> {
    let mismatch = || RejectReason::FieldTypeMismatch {
        field: field.to_string(),
        expected: kind,
    };

    match kind {
        FieldKind::Text => match value.as_str() {
            Some(s) if !s.trim().is_empty() => Ok(()),
            _ => Err(mismatch()),
        },
        FieldKind::NonNegativeNumber => {
            let number = value.as_f64().ok_or_else(mismatch)?;
            if !number.is_finite() || number < 0.0 {
                return Err(RejectReason::FieldOutOfRange {
                    field: field.to_string(),
                    value: number,
                });
            }
            Ok(())
        }
        FieldKind::Count => {
            if value.as_u64().is_some() {
                Ok(())
            } else if let Some(number) = value.as_i64() {
                Err(RejectReason::FieldOutOfRange {
                    field: field.to_string(),
                    value: number as f64,
                })
            } else {
                Err(mismatch())
            }
        }
        FieldKind::Flag => value.as_bool().map(|_| ()).ok_or_else(mismatch),
        FieldKind::TextList => match value.as_array() {
            Some(items) if items.iter().all(Value::is_string) => Ok(()),
            _ => Err(mismatch()),
        },
    }
}

/// Extensible registry of event-type tags
#[derive(Debug, Clone, Default)]
pub struct PayloadRegistry {
    schemas: HashMap<String, PayloadSchema>,
}

impl PayloadRegistry {
    /// Registry with no event types
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in gameplay event contract
    pub fn standard() -> Self {
        use FieldKind::*;

        let mut registry = Self::empty();
        registry.register(
            PayloadSchema::new(EventType::MissionStarted).required("mission_id", Text),
        );
        registry.register(
            PayloadSchema::new(EventType::MissionCompleted)
                .required("mission_id", Text)
                .required("completion_time_sec", NonNegativeNumber)
                .required("choices_made", Count),
        );
        registry.register(
            PayloadSchema::new(EventType::ChoiceMade)
                .required("mission_id", Text)
                .required("choice_id", Text)
                .required("time_taken_sec", NonNegativeNumber)
                .optional("approach", Text)
                .optional("tags", TextList),
        );
        registry.register(
            PayloadSchema::new(EventType::TaskStarted)
                .required("task_id", Text)
                .optional("role", Text),
        );
        registry.register(
            PayloadSchema::new(EventType::TaskCompleted)
                .required("task_id", Text)
                .required("completion_time_sec", NonNegativeNumber),
        );
        registry.register(
            PayloadSchema::new(EventType::TaskFailed)
                .required("task_id", Text)
                .required("reason", Text),
        );
        registry.register(
            PayloadSchema::new(EventType::RetryAttempted)
                .required("task_id", Text)
                .required("retry_number", Count),
        );
        registry.register(PayloadSchema::new(EventType::HelpRequested).required("context", Text));
        registry.register(
            PayloadSchema::new(EventType::DialogueReread).required("dialogue_id", Text),
        );
        registry.register(
            PayloadSchema::new(EventType::StrategyChanged)
                .required("from_tag", Text)
                .required("to_tag", Text),
        );
        registry
    }

    /// Register or replace a schema, returning the previous one
    pub fn register(&mut self, schema: PayloadSchema) -> Option<PayloadSchema> {
        self.schemas
            .insert(schema.event_type.as_str().to_string(), schema)
    }

    pub fn schema(&self, tag: &str) -> Option<&PayloadSchema> {
        self.schemas.get(tag)
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.schemas.contains_key(tag)
    }

    /// Validate a raw payload against its schema and build the typed payload
    pub fn parse(&self, tag: &str, payload: &Value) -> Result<(EventType, EventPayload), RejectReason> {
        let schema = self
            .schema(tag)
            .ok_or_else(|| RejectReason::UnknownEventType {
                event_type: tag.to_string(),
            })?;

        let fields = payload.as_object().ok_or(RejectReason::PayloadNotObject)?;
        schema.check(fields)?;

        let typed = build_payload(&schema.event_type, fields)?;
        Ok((schema.event_type.clone(), typed))
    }
}

fn build_payload(
    event_type: &EventType,
    fields: &Map<String, Value>,
) -> Result<EventPayload, RejectReason> {
    let payload = match event_type {
        EventType::MissionStarted => EventPayload::MissionStarted {
            mission_id: text(fields, "mission_id")?,
        },
        EventType::MissionCompleted => EventPayload::MissionCompleted {
            mission_id: text(fields, "mission_id")?,
            completion_time_sec: number(fields, "completion_time_sec")?,
            choices_made: count(fields, "choices_made")?,
        },
        EventType::ChoiceMade => EventPayload::ChoiceMade {
            mission_id: text(fields, "mission_id")?,
            choice_id: text(fields, "choice_id")?,
            time_taken_sec: number(fields, "time_taken_sec")?,
            approach: optional_text(fields, "approach"),
            tags: text_list(fields, "tags"),
        },
        EventType::TaskStarted => EventPayload::TaskStarted {
            task_id: text(fields, "task_id")?,
            role: optional_text(fields, "role"),
        },
        EventType::TaskCompleted => EventPayload::TaskCompleted {
            task_id: text(fields, "task_id")?,
            completion_time_sec: number(fields, "completion_time_sec")?,
        },
        EventType::TaskFailed => EventPayload::TaskFailed {
            task_id: text(fields, "task_id")?,
            reason: text(fields, "reason")?,
        },
        EventType::RetryAttempted => EventPayload::RetryAttempted {
            task_id: text(fields, "task_id")?,
            retry_number: count(fields, "retry_number")?,
        },
        EventType::HelpRequested => EventPayload::HelpRequested {
            context: text(fields, "context")?,
        },
        EventType::DialogueReread => EventPayload::DialogueReread {
            dialogue_id: text(fields, "dialogue_id")?,
        },
        EventType::StrategyChanged => EventPayload::StrategyChanged {
            from_tag: text(fields, "from_tag")?,
            to_tag: text(fields, "to_tag")?,
        },
        EventType::Custom(_) => EventPayload::Custom(fields.clone()),
    };
    Ok(payload)
}

fn missing(field: &str) -> RejectReason {
    RejectReason::MissingField {
        field: field.to_string(),
    }
}

fn text(fields: &Map<String, Value>, name: &str) -> Result<String, RejectReason> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| missing(name))
}

fn optional_text(fields: &Map<String, Value>, name: &str) -> Option<String> {
    fields.get(name).and_then(Value::as_str).map(str::to_string)
}

fn number(fields: &Map<String, Value>, name: &str) -> Result<f64, RejectReason> {
    fields
        .get(name)
        .and_then(Value::as_f64)
        .ok_or_else(|| missing(name))
}

fn count(fields: &Map<String, Value>, name: &str) -> Result<u64, RejectReason> {
    fields
        .get(name)
        .and_then(Value::as_u64)
        .ok_or_else(|| missing(name))
}

fn text_list(fields: &Map<String, Value>, name: &str) -> Vec<String> {
    fields
        .get(name)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
