use serde::{Deserialize, Deserializer};
use serde_json::Value;

const EVENT_PATHS: &[&[&str]] = &[&["event"], &["data", "event"], &["data", "error"]];
const ISSUE_PATHS: &[&[&str]] = &[&["issue"], &["data", "issue"]];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceHint {
    Event,
    Issue,
}

impl ResourceHint {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "event" | "error" | "event_alert" => Some(Self::Event),
            "issue" => Some(Self::Issue),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopLevelFields {
    #[serde(default, deserialize_with = "lenient_text")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub project: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub culprit: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub level: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub action: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventBody {
    #[serde(default, deserialize_with = "lenient_text")]
    pub event_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub level: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub project: Option<String>,
    #[serde(default)]
    pub logentry: Option<LogEntry>,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub exception: Option<ExceptionList>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogEntry {
    #[serde(default, deserialize_with = "lenient_text")]
    pub formatted: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExceptionList {
    #[serde(default)]
    pub values: Vec<ExceptionEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExceptionEntry {
    #[serde(default, rename = "type", deserialize_with = "lenient_text")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub value: Option<String>,
    #[serde(default)]
    pub stacktrace: Option<Stacktrace>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Stacktrace {
    #[serde(default)]
    pub frames: Vec<RawFrame>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFrame {
    #[serde(default, deserialize_with = "lenient_text")]
    pub filename: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub abs_path: Option<String>,
    #[serde(default)]
    pub lineno: Option<u32>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub function: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueBody {
    #[serde(default, deserialize_with = "lenient_text")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub culprit: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub level: Option<String>,
    #[serde(default, rename = "lastSeen", alias = "last_seen")]
    pub last_seen: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct ErrorEnvelope {
    pub top: TopLevelFields,
    pub event: EventBody,
}

#[derive(Debug, Clone)]
pub struct IssueEnvelope {
    pub top: TopLevelFields,
    pub issue: IssueBody,
}

/// The three upstream payload shapes the mapper understands.
#[derive(Debug, Clone)]
pub enum WebhookPayload {
    ErrorEvent(ErrorEnvelope),
    IssueEvent(IssueEnvelope),
    Unknown {
        top: TopLevelFields,
        resource: Option<String>,
    },
}

impl WebhookPayload {
    /// Picks a shape for `payload`. An `Err` means a recognized shape failed to
    /// decode and carries the reason.
    pub fn detect(hint: Option<&str>, payload: &Value) -> Result<Self, String> {
        let resource = hint
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        match resource.as_deref().and_then(ResourceHint::parse) {
            Some(ResourceHint::Event) => return decode_error(payload).map(Self::ErrorEvent),
            Some(ResourceHint::Issue) => return decode_issue(payload).map(Self::IssueEvent),
            None => {}
        }

        if let Some(event) = event_object(payload) {
            if has_value(event, "event_id") && has_value(event, "level") {
                return decode_error(payload).map(Self::ErrorEvent);
            }
        }

        if let Some(issue) = issue_object(payload) {
            if has_value(issue, "id") {
                return decode_issue(payload).map(Self::IssueEvent);
            }
        }

        let top = decode_top(payload).unwrap_or_default();
        if event_object(payload).is_some() {
            if let Ok(envelope) = decode_error(payload) {
                return Ok(Self::ErrorEvent(envelope));
            }
        }

        Ok(Self::Unknown { top, resource })
    }
}

pub fn event_object(payload: &Value) -> Option<&Value> {
    find_object(payload, EVENT_PATHS)
}

pub fn issue_object(payload: &Value) -> Option<&Value> {
    find_object(payload, ISSUE_PATHS)
}

fn find_object<'a>(payload: &'a Value, paths: &[&[&str]]) -> Option<&'a Value> {
    paths.iter().find_map(|path| {
        let mut cursor = payload;
        for key in path.iter() {
            cursor = cursor.get(key)?;
        }
        cursor.is_object().then_some(cursor)
    })
}

fn has_value(object: &Value, key: &str) -> bool {
    match object.get(key) {
        Some(Value::Null) | None => false,
        Some(Value::String(text)) => !text.trim().is_empty(),
        Some(_) => true,
    }
}

fn decode_top(payload: &Value) -> Result<TopLevelFields, String> {
    if !payload.is_object() {
        return Ok(TopLevelFields::default());
    }
    TopLevelFields::deserialize(payload).map_err(|err| format!("invalid payload fields: {err}"))
}

fn decode_error(payload: &Value) -> Result<ErrorEnvelope, String> {
    let top = decode_top(payload)?;
    let event = match event_object(payload) {
        Some(value) => {
            EventBody::deserialize(value).map_err(|err| format!("invalid event object: {err}"))?
        }
        None => EventBody::default(),
    };
    Ok(ErrorEnvelope { top, event })
}

fn decode_issue(payload: &Value) -> Result<IssueEnvelope, String> {
    let top = decode_top(payload)?;
    let issue = match issue_object(payload) {
        Some(value) => {
            IssueBody::deserialize(value).map_err(|err| format!("invalid issue object: {err}"))?
        }
        None => IssueBody::default(),
    };
    Ok(IssueEnvelope { top, issue })
}

/// Accepts strings, numbers, and booleans as text; null becomes `None`.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Value = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        _ => Err(serde::de::Error::custom(
            "expected string, number, or bool",
        )),
    }
}
