//! Schema validation for the two request forms.
//!
//! Validation walks the parsed JSON value by hand so that every violation in
//! a payload is collected, in the order encountered, with a precise path.
//! The typed request is only built once the walk finds nothing wrong; the
//! parse step that produced the value runs earlier in the pipeline, so a
//! malformed body never reaches this module.

use serde::Serialize;
use serde_json::Value;

use crate::models::{ChatRequest, SimpleMessageRequest};

/// Bounds shared by both request forms.
pub const TEXT_PART_MAX_CHARS: usize = 2000;
pub const SIMPLE_MESSAGE_MAX_CHARS: usize = 2000;

/// Fixed messages surfaced by the single-turn form, one per failure reason.
pub const MESSAGE_REQUIRED: &str = "Message is required";
pub const MESSAGE_EMPTY: &str = "Message cannot be empty";
pub const MESSAGE_TOO_LONG: &str = "Message too long";

const ROLES: [&str; 4] = ["user", "assistant", "system", "tool"];
const PART_TYPES: [&str; 3] = ["text", "step-start", "step-end"];

/// One step into the payload: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

fn key(name: &str) -> PathSegment {
    PathSegment::Key(name.to_string())
}

fn index(value: usize) -> PathSegment {
    PathSegment::Index(value)
}

/// The kind of violation, mirroring the codes callers already match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    InvalidType,
    TooSmall,
    TooBig,
    InvalidValue,
}

/// A single structured description of why input failed schema checks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub code: IssueCode,
    pub path: Vec<PathSegment>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inclusive: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<&'static str>,
}

impl ValidationIssue {
    pub(crate) fn invalid_type(
        path: Vec<PathSegment>,
        expected: &'static str,
        received: &'static str,
    ) -> Self {
        Self {
            code: IssueCode::InvalidType,
            path,
            message: format!("Invalid input: expected {expected}, received {received}"),
            minimum: None,
            maximum: None,
            inclusive: None,
            expected: Some(expected),
        }
    }

    pub(crate) fn too_small(
        path: Vec<PathSegment>,
        minimum: u64,
        origin: &'static str,
        unit: &'static str,
    ) -> Self {
        Self {
            code: IssueCode::TooSmall,
            path,
            message: format!("Too small: expected {origin} to have >={minimum} {unit}"),
            minimum: Some(minimum),
            maximum: None,
            inclusive: Some(true),
            expected: None,
        }
    }

    pub(crate) fn too_big(
        path: Vec<PathSegment>,
        maximum: u64,
        origin: &'static str,
        unit: &'static str,
    ) -> Self {
        Self {
            code: IssueCode::TooBig,
            path,
            message: format!("Too big: expected {origin} to have <={maximum} {unit}"),
            minimum: None,
            maximum: Some(maximum),
            inclusive: Some(true),
            expected: None,
        }
    }

    pub(crate) fn invalid_value(path: Vec<PathSegment>, options: &[&str]) -> Self {
        let expected = options
            .iter()
            .map(|option| format!("\"{option}\""))
            .collect::<Vec<_>>()
            .join("|");
        Self {
            code: IssueCode::InvalidValue,
            path,
            message: format!("Invalid option: expected one of {expected}"),
            minimum: None,
            maximum: None,
            inclusive: None,
            expected: None,
        }
    }

    pub(crate) fn with_message(mut self, message: &str) -> Self {
        self.message = message.to_string();
        self
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validate a parsed body against the chat-form shape.
///
/// All violations are collected; on success the value is returned typed and
/// unchanged in content (message text is never trimmed here).
pub fn validate_chat_request(value: &Value) -> Result<ChatRequest, Vec<ValidationIssue>> {
    let mut issues = Vec::new();

    let Some(object) = value.as_object() else {
        return Err(vec![ValidationIssue::invalid_type(
            Vec::new(),
            "object",
            json_type_name(value),
        )]);
    };

    for optional in ["id", "trigger"] {
        if let Some(field) = object.get(optional)
            && !field.is_string()
        {
            issues.push(ValidationIssue::invalid_type(
                vec![key(optional)],
                "string",
                json_type_name(field),
            ));
        }
    }

    match object.get("messages") {
        None => issues.push(ValidationIssue::invalid_type(
            vec![key("messages")],
            "array",
            "undefined",
        )),
        Some(messages) => match messages.as_array() {
            None => issues.push(ValidationIssue::invalid_type(
                vec![key("messages")],
                "array",
                json_type_name(messages),
            )),
            Some(list) => {
                if list.is_empty() {
                    issues.push(ValidationIssue::too_small(
                        vec![key("messages")],
                        1,
                        "array",
                        "items",
                    ));
                }
                for (message_index, message) in list.iter().enumerate() {
                    validate_message(message, message_index, &mut issues);
                }
            }
        },
    }

    if !issues.is_empty() {
        return Err(issues);
    }

    serde_json::from_value(value.clone()).map_err(|_| {
        vec![ValidationIssue::invalid_type(
            Vec::new(),
            "object",
            json_type_name(value),
        )]
    })
}

fn validate_message(value: &Value, message_index: usize, issues: &mut Vec<ValidationIssue>) {
    let base = vec![key("messages"), index(message_index)];

    let Some(object) = value.as_object() else {
        issues.push(ValidationIssue::invalid_type(
            base,
            "object",
            json_type_name(value),
        ));
        return;
    };

    let field_path = |name: &str| {
        let mut path = base.clone();
        path.push(key(name));
        path
    };

    match object.get("id") {
        None => issues.push(ValidationIssue::invalid_type(
            field_path("id"),
            "string",
            "undefined",
        )),
        Some(id) if !id.is_string() => issues.push(ValidationIssue::invalid_type(
            field_path("id"),
            "string",
            json_type_name(id),
        )),
        Some(_) => {}
    }

    match object.get("role") {
        None => issues.push(ValidationIssue::invalid_type(
            field_path("role"),
            "string",
            "undefined",
        )),
        Some(role) => match role.as_str() {
            None => issues.push(ValidationIssue::invalid_type(
                field_path("role"),
                "string",
                json_type_name(role),
            )),
            Some(name) if !ROLES.contains(&name) => {
                issues.push(ValidationIssue::invalid_value(field_path("role"), &ROLES));
            }
            Some(_) => {}
        },
    }

    match object.get("parts") {
        None => issues.push(ValidationIssue::invalid_type(
            field_path("parts"),
            "array",
            "undefined",
        )),
        Some(parts) => match parts.as_array() {
            None => issues.push(ValidationIssue::invalid_type(
                field_path("parts"),
                "array",
                json_type_name(parts),
            )),
            Some(list) => {
                for (part_index, part) in list.iter().enumerate() {
                    validate_part(part, message_index, part_index, issues);
                }
            }
        },
    }
}

fn validate_part(
    value: &Value,
    message_index: usize,
    part_index: usize,
    issues: &mut Vec<ValidationIssue>,
) {
    let base = vec![
        key("messages"),
        index(message_index),
        key("parts"),
        index(part_index),
    ];

    let Some(object) = value.as_object() else {
        issues.push(ValidationIssue::invalid_type(
            base,
            "object",
            json_type_name(value),
        ));
        return;
    };

    let field_path = |name: &str| {
        let mut path = base.clone();
        path.push(key(name));
        path
    };

    match object.get("type").and_then(Value::as_str) {
        Some("text") => match object.get("text") {
            None => issues.push(ValidationIssue::invalid_type(
                field_path("text"),
                "string",
                "undefined",
            )),
            Some(text) => match text.as_str() {
                None => issues.push(ValidationIssue::invalid_type(
                    field_path("text"),
                    "string",
                    json_type_name(text),
                )),
                Some(text) => {
                    let chars = text.chars().count();
                    if chars < 1 {
                        issues.push(ValidationIssue::too_small(
                            field_path("text"),
                            1,
                            "string",
                            "characters",
                        ));
                    } else if chars > TEXT_PART_MAX_CHARS {
                        issues.push(ValidationIssue::too_big(
                            field_path("text"),
                            TEXT_PART_MAX_CHARS as u64,
                            "string",
                            "characters",
                        ));
                    }
                }
            },
        },
        Some("step-start") | Some("step-end") => {}
        _ => issues.push(ValidationIssue::invalid_value(
            field_path("type"),
            &PART_TYPES,
        )),
    }
}

/// Validate a parsed body against the single-turn form.
///
/// First-error-wins: the three failure reasons are distinguishable through
/// the fixed messages, and only one issue is ever produced. The trimmed
/// value is used for the emptiness check only; the original string, with its
/// surrounding whitespace, is what flows downstream.
pub fn validate_simple_request(value: &Value) -> Result<SimpleMessageRequest, Vec<ValidationIssue>> {
    let Some(object) = value.as_object() else {
        return Err(vec![ValidationIssue::invalid_type(
            Vec::new(),
            "object",
            json_type_name(value),
        )]);
    };

    let issue = match object.get("message") {
        None => ValidationIssue::invalid_type(vec![key("message")], "string", "undefined")
            .with_message(MESSAGE_REQUIRED),
        Some(field) => match field.as_str() {
            None => ValidationIssue::invalid_type(
                vec![key("message")],
                "string",
                json_type_name(field),
            )
            .with_message(MESSAGE_REQUIRED),
            Some(message) => {
                if message.trim().is_empty() {
                    ValidationIssue::too_small(vec![key("message")], 1, "string", "characters")
                        .with_message(MESSAGE_EMPTY)
                } else if message.chars().count() > SIMPLE_MESSAGE_MAX_CHARS {
                    ValidationIssue::too_big(
                        vec![key("message")],
                        SIMPLE_MESSAGE_MAX_CHARS as u64,
                        "string",
                        "characters",
                    )
                    .with_message(MESSAGE_TOO_LONG)
                } else {
                    return Ok(SimpleMessageRequest {
                        message: message.to_string(),
                    });
                }
            }
        },
    };

    Err(vec![issue])
}
