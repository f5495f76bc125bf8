use crate::payload::{ErrorEnvelope, IssueEnvelope, RawFrame, WebhookPayload};
use crate::record::{
    ErrorEventDetail, IssueEventDetail, NormalizedRecord, RecordDetail, StackFrame, UNKNOWN_FILE,
    UNKNOWN_FUNCTION,
};
use crate::timestamp;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

pub const DEFAULT_ERROR_MESSAGE: &str = "unknown error";
pub const DEFAULT_ERROR_SEVERITY: &str = "error";
const UNKNOWN_PROJECT: &str = "unknown project";
const UNKNOWN_EVENT_ID: &str = "unknown event id";
const UNKNOWN_ISSUE_ID: &str = "unknown issue id";
const UNKNOWN_ACTION: &str = "unknown action";
const UNKNOWN_TITLE: &str = "untitled issue";
const UNKNOWN_CULPRIT: &str = "unknown source";
const UNKNOWN_SEVERITY: &str = "unknown";

pub fn classify(hint: Option<&str>, payload: &Value) -> NormalizedRecord {
    classify_at(hint, payload, Utc::now())
}

pub fn classify_at(hint: Option<&str>, payload: &Value, now: DateTime<Utc>) -> NormalizedRecord {
    match WebhookPayload::detect(hint, payload) {
        Ok(WebhookPayload::ErrorEvent(envelope)) => map_error_event(envelope, now),
        Ok(WebhookPayload::IssueEvent(envelope)) => map_issue_event(envelope, now),
        Ok(WebhookPayload::Unknown { top, resource }) => NormalizedRecord {
            id: top.id.clone().unwrap_or_else(|| generate_record_id(now)),
            occurred_at: timestamp::normalize_at(top.timestamp.as_ref(), now),
            received_at: now,
            severity: top
                .level
                .clone()
                .unwrap_or_else(|| UNKNOWN_SEVERITY.to_string()),
            detail: RecordDetail::UnrecognizedEvent {
                resource,
                payload: payload.clone(),
            },
            diagnostic: None,
        },
        Err(reason) => parse_failure(reason, payload, now),
    }
}

pub fn parse_failure(reason: impl Into<String>, payload: &Value, now: DateTime<Utc>) -> NormalizedRecord {
    NormalizedRecord {
        id: generate_record_id(now),
        occurred_at: now,
        received_at: now,
        severity: DEFAULT_ERROR_SEVERITY.to_string(),
        detail: RecordDetail::ParseFailure {
            reason: reason.into(),
            payload: payload.clone(),
        },
        diagnostic: None,
    }
}

/// `<epoch-millis>-<9 random chars>`; unique in practice, not guaranteed.
pub fn generate_record_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.timestamp_millis(), &suffix[..9])
}

fn map_error_event(envelope: ErrorEnvelope, now: DateTime<Utc>) -> NormalizedRecord {
    let ErrorEnvelope { top, event } = envelope;

    let message = event
        .logentry
        .as_ref()
        .and_then(|entry| non_empty(entry.formatted.as_deref()))
        .or_else(|| non_empty(top.message.as_deref()))
        .or_else(|| non_empty(event.message.as_deref()))
        .unwrap_or(DEFAULT_ERROR_MESSAGE)
        .to_string();

    let severity = non_empty(event.level.as_deref())
        .unwrap_or(DEFAULT_ERROR_SEVERITY)
        .to_string();

    let project = non_empty(top.project.as_deref())
        .or_else(|| non_empty(event.project.as_deref()))
        .unwrap_or(UNKNOWN_PROJECT)
        .to_string();

    let exception = event
        .exception
        .as_ref()
        .and_then(|list| list.values.first());
    let frames = exception
        .and_then(|entry| entry.stacktrace.as_ref())
        .map(|trace| trace.frames.iter().map(map_frame).collect())
        .unwrap_or_default();

    let event_id = non_empty(event.event_id.as_deref()).map(str::to_string);
    let id = non_empty(top.id.as_deref())
        .map(str::to_string)
        .or_else(|| event_id.clone())
        .unwrap_or_else(|| generate_record_id(now));

    NormalizedRecord {
        id,
        occurred_at: timestamp::normalize_at(event.timestamp.as_ref(), now),
        received_at: now,
        severity,
        detail: RecordDetail::ErrorEvent(ErrorEventDetail {
            project,
            event_id: event_id.unwrap_or_else(|| UNKNOWN_EVENT_ID.to_string()),
            message,
            exception_type: exception.and_then(|entry| entry.kind.clone()),
            exception_value: exception.and_then(|entry| entry.value.clone()),
            frames,
        }),
        diagnostic: None,
    }
}

fn map_issue_event(envelope: IssueEnvelope, now: DateTime<Utc>) -> NormalizedRecord {
    let IssueEnvelope { top, issue } = envelope;

    let title = non_empty(issue.title.as_deref())
        .or_else(|| non_empty(top.title.as_deref()))
        .or_else(|| non_empty(top.message.as_deref()))
        .unwrap_or(UNKNOWN_TITLE)
        .to_string();
    let culprit = non_empty(issue.culprit.as_deref())
        .or_else(|| non_empty(top.culprit.as_deref()))
        .unwrap_or(UNKNOWN_CULPRIT)
        .to_string();
    let severity = non_empty(issue.level.as_deref())
        .or_else(|| non_empty(top.level.as_deref()))
        .unwrap_or(UNKNOWN_SEVERITY)
        .to_string();

    let issue_id = non_empty(issue.id.as_deref()).map(str::to_string);
    let id = non_empty(top.id.as_deref())
        .map(str::to_string)
        .or_else(|| issue_id.as_ref().map(|value| format!("issue-{value}")))
        .unwrap_or_else(|| generate_record_id(now));

    let seen = issue.last_seen.as_ref().filter(|value| !value.is_null());
    let occurred_at = timestamp::normalize_at(seen.or(top.timestamp.as_ref()), now);

    NormalizedRecord {
        id,
        occurred_at,
        received_at: now,
        severity,
        detail: RecordDetail::IssueEvent(IssueEventDetail {
            issue_id: issue_id.unwrap_or_else(|| UNKNOWN_ISSUE_ID.to_string()),
            action: non_empty(top.action.as_deref())
                .unwrap_or(UNKNOWN_ACTION)
                .to_string(),
            title,
            culprit,
        }),
        diagnostic: None,
    }
}

fn map_frame(frame: &RawFrame) -> StackFrame {
    StackFrame {
        file: non_empty(frame.filename.as_deref())
            .or_else(|| non_empty(frame.abs_path.as_deref()))
            .unwrap_or(UNKNOWN_FILE)
            .to_string(),
        line: frame.lineno,
        function: non_empty(frame.function.as_deref())
            .unwrap_or(UNKNOWN_FUNCTION)
            .to_string(),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
