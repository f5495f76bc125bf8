use crate::extract::PromptShape;
use hookwatch_core::{NormalizedRecord, RecordDetail};
use std::fmt::Write as _;

const MAX_PROMPT_FRAMES: usize = 10;
const MAX_PAYLOAD_CHARS: usize = 4000;

pub const SYSTEM_PROMPT: &str = "You are an experienced software engineer who diagnoses \
production errors and monitoring alerts. Answer with the exact section headings requested.";

pub fn shape_for(record: &NormalizedRecord) -> PromptShape {
    if record.is_error_event() {
        PromptShape::Error
    } else if record.severity_lower() == "info" {
        PromptShape::Informational
    } else {
        PromptShape::General
    }
}

/// Renders the context block and the section request for `record`.
/// `override_context` replaces the rendered context when the caller already
/// has a display text for the record.
pub fn build_prompt(record: &NormalizedRecord, override_context: Option<&str>) -> String {
    let context = match override_context.map(str::trim).filter(|text| !text.is_empty()) {
        Some(text) => text.to_string(),
        None => render_context(record),
    };

    let mut prompt = String::new();
    match shape_for(record) {
        PromptShape::Error => {
            prompt.push_str("Analyze the following application error.\n\n");
            prompt.push_str(&context);
            prompt.push_str(
                "\n\nAnswer in exactly these five sections, each introduced by its heading:\n\
### Cause\nWhat most likely triggered the error.\n\
### Remedy\nConcrete steps to fix it now.\n\
### Prevention\nHow to keep it from happening again.\n\
### Root Cause\nThe underlying defect, referencing the stack frames when useful.\n\
### Code Fix\nA short code snippet showing the fix.\n",
            );
        }
        PromptShape::Informational => {
            prompt.push_str("Explain the following informational notification.\n\n");
            prompt.push_str(&context);
            prompt.push_str(
                "\n\nAnswer in three numbered sections:\n\
1. Explanation: what this notification means.\n\
2. Routine: whether this is routine or unusual.\n\
3. Recommended Action: what, if anything, to do about it.\n",
            );
        }
        PromptShape::General => {
            prompt.push_str("Review the following monitoring notification.\n\n");
            prompt.push_str(&context);
            prompt.push_str(
                "\n\nAnswer in three numbered sections:\n\
1. Explanation: what happened.\n\
2. Needs Attention: whether it needs attention and how urgently.\n\
3. Next Steps: suggested follow-up.\n",
            );
        }
    }
    prompt
}

pub fn render_context(record: &NormalizedRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Severity: {}", record.severity);
    let _ = writeln!(out, "Occurred at: {}", record.occurred_at.to_rfc3339());
    match &record.detail {
        RecordDetail::ErrorEvent(detail) => {
            let _ = writeln!(out, "Project: {}", detail.project);
            let _ = writeln!(out, "Event id: {}", detail.event_id);
            let _ = writeln!(out, "Message: {}", detail.message);
            if let Some(kind) = &detail.exception_type {
                let _ = writeln!(out, "Exception type: {kind}");
            }
            if let Some(value) = &detail.exception_value {
                let _ = writeln!(out, "Exception value: {value}");
            }
            if !detail.frames.is_empty() {
                out.push_str("Stack trace:\n");
                for (index, frame) in detail.frames.iter().take(MAX_PROMPT_FRAMES).enumerate() {
                    let _ = writeln!(out, "  [{index}] {frame}");
                }
            }
        }
        RecordDetail::IssueEvent(detail) => {
            let _ = writeln!(out, "Issue id: {}", detail.issue_id);
            let _ = writeln!(out, "Action: {}", detail.action);
            let _ = writeln!(out, "Title: {}", detail.title);
            let _ = writeln!(out, "Culprit: {}", detail.culprit);
        }
        RecordDetail::UnrecognizedEvent { resource, payload } => {
            let _ = writeln!(
                out,
                "Resource: {}",
                resource.as_deref().unwrap_or("unspecified")
            );
            let _ = writeln!(out, "Payload: {}", truncate_chars(&payload.to_string()));
        }
        RecordDetail::ParseFailure { reason, payload } => {
            let _ = writeln!(out, "Parse failure: {reason}");
            let _ = writeln!(out, "Payload: {}", truncate_chars(&payload.to_string()));
        }
    }
    out.trim_end().to_string()
}

fn truncate_chars(text: &str) -> String {
    if text.chars().count() <= MAX_PAYLOAD_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(MAX_PAYLOAD_CHARS).collect();
    cut.push_str("...");
    cut
}
