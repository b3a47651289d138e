use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// Longest question text kept on a form (characters).
pub const MAX_QUESTION_CHARS: usize = 200;
/// Longest message text kept on a form (characters).
pub const MAX_MESSAGE_CHARS: usize = 500;
/// Most options/fields kept on a single form.
pub const MAX_OPTIONS: usize = 10;
/// Joins the `key: value` pairs of an Input submission.
pub const INPUT_SEPARATOR: &str = "; ";
/// Joins the rendered texts of a batch submission.
pub const BATCH_SEPARATOR: &str = "\n\n";

/// Submission keys that never become part of an Input rendering.
const RESERVED_KEYS: &[&str] = &["type", "selected_text"];

/// Form classification. Serialized as the wire codes the workflow system sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum FormKind {
    /// Informational update: handed out once, resolved by the read that returns it
    #[serde(rename = "0")]
    Update,
    /// Single choice among options; blocks new chat messages until resolved
    #[serde(rename = "1")]
    Choice,
    /// Free-text fields
    #[serde(rename = "2")]
    Input,
}

impl FormKind {
    pub fn code(self) -> &'static str {
        match self {
            FormKind::Update => "0",
            FormKind::Choice => "1",
            FormKind::Input => "2",
        }
    }

    /// Parse a wire code. Unknown or empty codes are treated as Choice,
    /// matching what the workflow system assumes when `type` is omitted.
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "0" => FormKind::Update,
            "2" => FormKind::Input,
            _ => FormKind::Choice,
        }
    }
}

/// One selectable option (Choice) or one input field (Input).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FormOption {
    pub value: String,
    pub text: String,
}

impl FormOption {
    /// Lenient conversion from the workflow system's JSON.
    ///
    /// Accepts `{value, text}` objects (`label` is an alias of `text`), bare
    /// strings and numbers. A missing side is filled from the other one.
    pub fn from_json(raw: &Value) -> Option<Self> {
        match raw {
            Value::Object(obj) => {
                let value = obj.get("value").and_then(scalar_text);
                let text = obj
                    .get("text")
                    .or_else(|| obj.get("label"))
                    .and_then(scalar_text);
                match (value, text) {
                    (Some(value), Some(text)) => Some(Self { value, text }),
                    (Some(value), None) => Some(Self {
                        text: value.clone(),
                        value,
                    }),
                    (None, Some(text)) => Some(Self {
                        value: text.clone(),
                        text,
                    }),
                    (None, None) => None,
                }
            }
            other => scalar_text(other).map(|text| Self {
                value: text.clone(),
                text,
            }),
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Kind-specific body of a form. The `type` tag carries the wire code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type")]
pub enum FormContent {
    #[serde(rename = "0")]
    Update {
        /// Passed through to the client untouched
        #[schema(value_type = Object)]
        update_data: Map<String, Value>,
    },
    #[serde(rename = "1")]
    Choice { options: Vec<FormOption> },
    #[serde(rename = "2")]
    Input {
        /// Field definitions: `value` is the field key, `text` its label
        options: Vec<FormOption>,
    },
}

impl FormContent {
    /// Build the body for `kind` from the raw `options` and `update_data`
    /// JSON. Non-array options and non-object update data become empty.
    pub fn from_parts(kind: FormKind, options: &Value, update_data: &Value) -> Self {
        match kind {
            FormKind::Update => FormContent::Update {
                update_data: update_data.as_object().cloned().unwrap_or_default(),
            },
            FormKind::Choice => FormContent::Choice {
                options: parse_options(options),
            },
            FormKind::Input => FormContent::Input {
                options: parse_options(options),
            },
        }
    }

    pub fn kind(&self) -> FormKind {
        match self {
            FormContent::Update { .. } => FormKind::Update,
            FormContent::Choice { .. } => FormKind::Choice,
            FormContent::Input { .. } => FormKind::Input,
        }
    }

    /// Compose the text a submission stands for.
    ///
    /// - Choice: `selected_text` verbatim, else the label of the option whose
    ///   value equals `selected_value`.
    /// - Input: `key: value` pairs joined with `"; "`. Reserved keys are
    ///   skipped; a nested `form_data` object takes precedence over top-level
    ///   keys.
    /// - Update: always empty, the payload is passed through instead.
    pub fn render(&self, values: &Map<String, Value>) -> String {
        match self {
            FormContent::Update { .. } => String::new(),
            FormContent::Choice { options } => {
                if let Some(text) = values.get("selected_text").and_then(Value::as_str)
                    && !text.is_empty()
                {
                    return text.to_string();
                }
                values
                    .get("selected_value")
                    .and_then(scalar_text)
                    .and_then(|selected| {
                        options
                            .iter()
                            .find(|opt| opt.value == selected)
                            .map(|opt| opt.text.clone())
                    })
                    .unwrap_or_default()
            }
            FormContent::Input { .. } => {
                let pairs: Vec<String> = match values.get("form_data") {
                    Some(Value::Object(nested)) => nested
                        .iter()
                        .map(|(key, value)| format!("{key}: {}", display_value(value)))
                        .collect(),
                    _ => values
                        .iter()
                        .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
                        .map(|(key, value)| format!("{key}: {}", display_value(value)))
                        .collect(),
                };
                pairs.join(INPUT_SEPARATOR)
            }
        }
    }
}

fn parse_options(raw: &Value) -> Vec<FormOption> {
    raw.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(FormOption::from_json)
                .take(MAX_OPTIONS)
                .collect()
        })
        .unwrap_or_default()
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// A pending form awaiting operator action. Never updated in place.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Form {
    /// Registry-assigned id, unique for the process lifetime
    pub form_id: String,
    pub question: String,
    pub message: String,
    #[serde(flatten)]
    pub content: FormContent,
    pub created_at: DateTime<Utc>,
    /// Session key of the caller that staged the form
    pub origin: String,
}

impl Form {
    pub fn kind(&self) -> FormKind {
        self.content.kind()
    }
}

/// Validated input for staging a form. Lengths and option counts are capped.
#[derive(Debug, Clone, PartialEq)]
pub struct NewForm {
    pub question: String,
    pub message: String,
    pub content: FormContent,
}

impl NewForm {
    pub fn new(question: &str, message: &str, content: FormContent) -> Self {
        let content = match content {
            FormContent::Choice { mut options } => {
                options.truncate(MAX_OPTIONS);
                FormContent::Choice { options }
            }
            FormContent::Input { mut options } => {
                options.truncate(MAX_OPTIONS);
                FormContent::Input { options }
            }
            update @ FormContent::Update { .. } => update,
        };
        Self {
            question: truncate_chars(question, MAX_QUESTION_CHARS),
            message: truncate_chars(message, MAX_MESSAGE_CHARS),
            content,
        }
    }

    pub fn kind(&self) -> FormKind {
        self.content.kind()
    }
}

/// Response for GET /api/forms
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FormsResponse {
    pub status: String,
    pub forms: Vec<Form>,
    pub count: usize,
}

/// Response for the notification endpoints
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct NotifyResponse {
    pub status: String,
    pub message: String,
    /// Wire code of the staged form
    #[serde(rename = "type")]
    pub form_type: String,
    pub form_id: String,
    /// True when an equivalent pending form was reused instead of inserting
    pub existing: bool,
    /// Pending forms visible to the caller after staging
    pub form_count: usize,
}

/// Request for POST /api/submit_form
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmitFormRequest {
    #[serde(default)]
    pub form_id: Option<String>,
    /// Submitted values (`selected_text` for Choice, field pairs for Input)
    #[serde(default)]
    #[schema(value_type = Object)]
    pub form_data: Map<String, Value>,
    /// Client's idea of the form kind; the stored form is authoritative
    #[serde(default, rename = "type")]
    pub form_type: Option<String>,
    /// Client-composed text that replaces the server rendering when non-empty
    #[serde(default)]
    pub full_message: Option<String>,
}

/// Response for POST /api/submit_form
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmitFormResponse {
    pub status: String,
    pub message: String,
    pub form_id: String,
    pub message_text: String,
    pub form_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub update_data: Option<Map<String, Value>>,
}

/// Request for POST /api/submit_all. Entries are resolved in body order.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmitAllRequest {
    #[serde(default)]
    #[schema(value_type = Object)]
    pub form_data: IndexMap<String, Value>,
    /// Client-composed text that replaces the server rendering when non-empty
    #[serde(default)]
    pub combined_message: Option<String>,
}

/// Response for POST /api/submit_all
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmitAllResponse {
    pub status: String,
    pub message: String,
    pub combined_message: String,
    pub submitted_forms: Vec<String>,
    pub failed_forms: Vec<String>,
    pub count: usize,
}

/// Response for POST /api/clear_forms
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ClearFormsResponse {
    pub status: String,
    pub message: String,
    pub count: usize,
}
