use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const UNKNOWN_FILE: &str = "<unknown file>";
pub const UNKNOWN_FUNCTION: &str = "<unknown function>";
pub const NOT_EXTRACTED: &str = "(not extracted)";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    ErrorEvent,
    IssueEvent,
    UnrecognizedEvent,
    ParseFailure,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ErrorEvent => "error_event",
            Self::IssueEvent => "issue_event",
            Self::UnrecognizedEvent => "unrecognized_event",
            Self::ParseFailure => "parse_failure",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackFrame {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub function: String,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{} - {}", self.file, line, self.function),
            None => write!(f, "{}:? - {}", self.file, self.function),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEventDetail {
    pub project: String,
    pub event_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_value: Option<String>,
    /// Outermost call first, as delivered by the provider.
    #[serde(default)]
    pub frames: Vec<StackFrame>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssueEventDetail {
    pub issue_id: String,
    pub action: String,
    pub title: String,
    pub culprit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordDetail {
    ErrorEvent(ErrorEventDetail),
    IssueEvent(IssueEventDetail),
    UnrecognizedEvent {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource: Option<String>,
        payload: Value,
    },
    ParseFailure {
        reason: String,
        payload: Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRecord {
    pub id: String,
    pub occurred_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub severity: String,
    #[serde(flatten)]
    pub detail: RecordDetail,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<Diagnostic>,
}

impl NormalizedRecord {
    pub fn kind(&self) -> RecordKind {
        match self.detail {
            RecordDetail::ErrorEvent(_) => RecordKind::ErrorEvent,
            RecordDetail::IssueEvent(_) => RecordKind::IssueEvent,
            RecordDetail::UnrecognizedEvent { .. } => RecordKind::UnrecognizedEvent,
            RecordDetail::ParseFailure { .. } => RecordKind::ParseFailure,
        }
    }

    pub fn is_error_event(&self) -> bool {
        self.kind() == RecordKind::ErrorEvent
    }

    pub fn severity_lower(&self) -> String {
        self.severity.trim().to_lowercase()
    }

    pub fn error_detail(&self) -> Option<&ErrorEventDetail> {
        match &self.detail {
            RecordDetail::ErrorEvent(detail) => Some(detail),
            _ => None,
        }
    }

    pub fn issue_detail(&self) -> Option<&IssueEventDetail> {
        match &self.detail {
            RecordDetail::IssueEvent(detail) => Some(detail),
            _ => None,
        }
    }

    pub fn headline(&self) -> &str {
        match &self.detail {
            RecordDetail::ErrorEvent(detail) => &detail.message,
            RecordDetail::IssueEvent(detail) => &detail.title,
            RecordDetail::UnrecognizedEvent { resource, .. } => {
                resource.as_deref().unwrap_or("unrecognized notification")
            }
            RecordDetail::ParseFailure { reason, .. } => reason,
        }
    }
}

/// A diagnostic field as recovered from a model completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", content = "text", rename_all = "snake_case")]
pub enum Section {
    Extracted(String),
    NotExtracted,
}

impl Section {
    pub fn from_text(text: impl AsRef<str>) -> Self {
        let trimmed = text.as_ref().trim();
        if trimmed.is_empty() {
            Self::NotExtracted
        } else {
            Self::Extracted(trimmed.to_string())
        }
    }

    pub fn as_text(&self) -> &str {
        match self {
            Self::Extracted(text) => text,
            Self::NotExtracted => NOT_EXTRACTED,
        }
    }

    pub fn is_extracted(&self) -> bool {
        matches!(self, Self::Extracted(_))
    }

    pub fn as_option(&self) -> Option<&str> {
        match self {
            Self::Extracted(text) => Some(text),
            Self::NotExtracted => None,
        }
    }
}

impl Default for Section {
    fn default() -> Self {
        Self::NotExtracted
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticOrigin {
    Model,
    LocalFallback,
    Failure,
}

impl DiagnosticOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::LocalFallback => "local_fallback",
            Self::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDiagnostic {
    pub cause: Section,
    pub remedy: Section,
    pub prevention: Section,
    pub root_cause: Section,
    pub code_fix: Section,
}

impl ErrorDiagnostic {
    pub fn extracted_count(&self) -> usize {
        [
            &self.cause,
            &self.remedy,
            &self.prevention,
            &self.root_cause,
            &self.code_fix,
        ]
        .iter()
        .filter(|section| section.is_extracted())
        .count()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NoteDiagnostic {
    pub explanation: String,
    #[serde(default)]
    pub is_routine: Section,
    #[serde(default)]
    pub needs_attention: Section,
    #[serde(default)]
    pub recommended_action: Section,
    #[serde(default)]
    pub next_steps: Section,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum DiagnosticBody {
    Error(ErrorDiagnostic),
    Note(NoteDiagnostic),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    #[serde(flatten)]
    pub body: DiagnosticBody,
    pub origin: DiagnosticOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(default)]
    pub extractor_fault: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_completion: Option<String>,
}

impl Diagnostic {
    pub fn new(body: DiagnosticBody, origin: DiagnosticOrigin, generated_at: DateTime<Utc>) -> Self {
        Self {
            body,
            origin,
            model: None,
            generated_at,
            failure: None,
            extractor_fault: false,
            raw_completion: None,
        }
    }

    pub fn error(&self) -> Option<&ErrorDiagnostic> {
        match &self.body {
            DiagnosticBody::Error(body) => Some(body),
            DiagnosticBody::Note(_) => None,
        }
    }

    pub fn note(&self) -> Option<&NoteDiagnostic> {
        match &self.body {
            DiagnosticBody::Note(body) => Some(body),
            DiagnosticBody::Error(_) => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.origin == DiagnosticOrigin::Failure
    }

    /// First sentence of the lead field, capped at 50 characters.
    pub fn summary(&self) -> String {
        let lead = match &self.body {
            DiagnosticBody::Error(body) => body.cause.as_text(),
            DiagnosticBody::Note(body) => body.explanation.as_str(),
        };
        let first_line = lead.lines().next().unwrap_or_default();
        let sentence = first_line
            .split(|c: char| c == '。' || c == '.')
            .next()
            .unwrap_or(first_line)
            .trim();
        if sentence.chars().count() > 50 {
            let cut: String = sentence.chars().take(50).collect();
            format!("{cut}...")
        } else {
            sentence.to_string()
        }
    }
}
