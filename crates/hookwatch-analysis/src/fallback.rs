//! Deterministic diagnostics for when no model is configured.

use chrono::{DateTime, Utc};
use hookwatch_core::{
    Diagnostic, DiagnosticBody, DiagnosticOrigin, ErrorDiagnostic, ErrorEventDetail,
    NormalizedRecord, NoteDiagnostic, Section,
};
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NullReference,
    TypeMismatch,
    AsyncFlow,
    Network,
    Permission,
    Memory,
    Generic,
}

struct CategoryText {
    cause: &'static str,
    remedy: &'static str,
    prevention: &'static str,
    code_fix: &'static str,
}

impl ErrorCategory {
    /// First matching category over the message and exception type.
    pub fn detect(message: &str, exception_type: Option<&str>) -> Self {
        let haystack = match exception_type {
            Some(kind) => format!("{kind} {message}"),
            None => message.to_string(),
        };
        category_patterns()
            .iter()
            .find(|(_, pattern)| pattern.is_match(&haystack))
            .map(|(category, _)| *category)
            .unwrap_or(Self::Generic)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NullReference => "null_reference",
            Self::TypeMismatch => "type_error",
            Self::AsyncFlow => "async",
            Self::Network => "network",
            Self::Permission => "permission",
            Self::Memory => "memory",
            Self::Generic => "generic",
        }
    }

    fn text(self) -> CategoryText {
        match self {
            Self::NullReference => CategoryText {
                cause: "A value was null or undefined when the code tried to read a property or call a method on it.",
                remedy: "Check the value before use and return early or supply a default when it is missing.",
                prevention: "Validate inputs at module boundaries and enable strict null checks where the language supports them.",
                code_fix: "if (value == null) {\n  return defaultValue;\n}\nconst result = value.property;",
            },
            Self::TypeMismatch => CategoryText {
                cause: "A value had a different type than the operation expected.",
                remedy: "Confirm the runtime type of the value and convert or reject it before the failing call.",
                prevention: "Add type annotations or schema validation for data coming from external sources.",
                code_fix: "if (typeof value !== 'function') {\n  throw new TypeError(`expected function, got ${typeof value}`);\n}\nvalue();",
            },
            Self::AsyncFlow => CategoryText {
                cause: "An asynchronous operation rejected and the rejection was not handled.",
                remedy: "Await the promise inside a try/catch block or attach a rejection handler.",
                prevention: "Enable lint rules for floating promises and centralize async error handling.",
                code_fix: "try {\n  const data = await fetchData();\n  process(data);\n} catch (err) {\n  logger.error('fetch failed', err);\n}",
            },
            Self::Network => CategoryText {
                cause: "A network request failed, timed out, or the remote service was unreachable.",
                remedy: "Verify the endpoint address and service health, then retry the request.",
                prevention: "Add timeouts, bounded retries and circuit breaking around outbound calls.",
                code_fix: "const controller = new AbortController();\nsetTimeout(() => controller.abort(), 5000);\nconst res = await fetch(url, { signal: controller.signal });\nif (!res.ok) throw new Error(`HTTP ${res.status}`);",
            },
            Self::Permission => CategoryText {
                cause: "The operation was denied because the caller lacks the required permission.",
                remedy: "Check the credentials, roles and file modes involved in the failing call.",
                prevention: "Document required permissions and check them at startup instead of at first use.",
                code_fix: "if (!user.can('write', resource)) {\n  return res.status(403).json({ error: 'forbidden' });\n}",
            },
            Self::Memory => CategoryText {
                cause: "The process ran out of memory or exceeded its stack.",
                remedy: "Look for unbounded recursion or collections that grow without limit, then raise limits only if usage is legitimate.",
                prevention: "Stream large data sets and set memory alerts before the hard limit.",
                code_fix: "for await (const chunk of stream) {\n  handle(chunk);\n}",
            },
            Self::Generic => CategoryText {
                cause: "The application raised an error that does not match a known category.",
                remedy: "Reproduce the failure using the stack trace and inspect the inputs of the top frame.",
                prevention: "Add tests for the failing path and improve error messages around it.",
                code_fix: "try {\n  riskyOperation();\n} catch (err) {\n  logger.error('operation failed', err);\n  throw err;\n}",
            },
        }
    }
}

fn category_patterns() -> &'static [(ErrorCategory, Regex)] {
    static PATTERNS: OnceLock<Vec<(ErrorCategory, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            (
                ErrorCategory::NullReference,
                Regex::new(r"(?i)\b(null|undefined|nil|none)\b|NullPointer|cannot read propert")
                    .expect("valid regex"),
            ),
            (
                ErrorCategory::TypeMismatch,
                Regex::new(r"(?i)TypeError|is not a function|type mismatch|invalid type")
                    .expect("valid regex"),
            ),
            (
                ErrorCategory::AsyncFlow,
                Regex::new(r"(?i)promise|unhandled ?rejection|\basync\b|\bawait\b")
                    .expect("valid regex"),
            ),
            (
                ErrorCategory::Network,
                Regex::new(r"(?i)network|fetch|timeout|timed out|ECONNREFUSED|ECONNRESET|ENOTFOUND|socket")
                    .expect("valid regex"),
            ),
            (
                ErrorCategory::Permission,
                Regex::new(r"(?i)permission|denied|forbidden|unauthori[sz]ed|EACCES|\b40[13]\b")
                    .expect("valid regex"),
            ),
            (
                ErrorCategory::Memory,
                Regex::new(r"(?i)out of memory|heap|stack overflow|maximum call stack|allocation failed")
                    .expect("valid regex"),
            ),
        ]
    })
}

pub fn local_diagnostic(record: &NormalizedRecord, now: DateTime<Utc>) -> Diagnostic {
    let body = match record.error_detail() {
        Some(detail) => DiagnosticBody::Error(error_fields(detail)),
        None => DiagnosticBody::Note(note_fields(record)),
    };
    Diagnostic::new(body, DiagnosticOrigin::LocalFallback, now)
}

fn error_fields(detail: &ErrorEventDetail) -> ErrorDiagnostic {
    let category = ErrorCategory::detect(&detail.message, detail.exception_type.as_deref());
    let text = category.text();
    ErrorDiagnostic {
        cause: Section::from_text(text.cause),
        remedy: Section::from_text(text.remedy),
        prevention: Section::from_text(text.prevention),
        root_cause: Section::from_text(root_cause_narrative(detail, category)),
        code_fix: Section::from_text(text.code_fix),
    }
}

fn root_cause_narrative(detail: &ErrorEventDetail, category: ErrorCategory) -> String {
    let subject = match &detail.exception_type {
        Some(kind) => format!("{kind}: {}", detail.message),
        None => detail.message.clone(),
    };
    let mut narrative = format!(
        "In project {}, \"{subject}\" matches the {} error pattern.",
        detail.project,
        category.as_str()
    );
    let frames = detail.frames.iter().take(2).collect::<Vec<_>>();
    match frames.as_slice() {
        [] => narrative.push_str(" No stack frames were captured, so the failing location is unknown."),
        [only] => narrative.push_str(&format!(" The failure was raised at {only}.")),
        [first, second, ..] => narrative.push_str(&format!(
            " The failure was raised at {first}, called from {second}."
        )),
    }
    narrative
}

fn note_fields(record: &NormalizedRecord) -> NoteDiagnostic {
    let headline = record.headline();
    match record.severity_lower().as_str() {
        "info" | "debug" => NoteDiagnostic {
            explanation: format!("\"{headline}\" is an informational notification."),
            is_routine: Section::from_text("Likely routine; no failure was reported."),
            recommended_action: Section::from_text("No action required unless it repeats unexpectedly."),
            ..NoteDiagnostic::default()
        },
        "warning" => NoteDiagnostic {
            explanation: format!("\"{headline}\" is a warning that may precede a failure."),
            needs_attention: Section::from_text("Yes, review it soon."),
            next_steps: Section::from_text("Check recent changes and watch whether the warning repeats."),
            ..NoteDiagnostic::default()
        },
        "error" | "fatal" => NoteDiagnostic {
            explanation: format!("\"{headline}\" reports an error condition."),
            needs_attention: Section::from_text("Yes, investigate promptly."),
            next_steps: Section::from_text("Open the issue in the monitoring provider and inspect the latest events."),
            ..NoteDiagnostic::default()
        },
        _ => NoteDiagnostic {
            explanation: format!("\"{headline}\" was received with severity {}.", record.severity),
            needs_attention: Section::from_text("Unclear; review the raw notification."),
            next_steps: Section::from_text("Inspect the payload to decide whether it matters."),
            ..NoteDiagnostic::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hookwatch_core::classify_at;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 2, 0, 0, 0).single().expect("ts")
    }

    #[test]
    fn categories_match_message_and_type() {
        let cases = [
            ("Cannot read properties of undefined", None, ErrorCategory::NullReference),
            ("x is not a function", Some("TypeError"), ErrorCategory::TypeMismatch),
            ("Unhandled promise rejection", None, ErrorCategory::AsyncFlow),
            ("connect ECONNREFUSED 10.0.0.1:443", None, ErrorCategory::Network),
            ("EACCES: permission denied", None, ErrorCategory::Permission),
            ("JavaScript heap out of memory", None, ErrorCategory::Memory),
            ("Something odd", Some("CustomError"), ErrorCategory::Generic),
        ];
        for (message, kind, expected) in cases {
            assert_eq!(ErrorCategory::detect(message, kind), expected, "{message}");
        }
    }

    #[test]
    fn error_records_get_all_five_fields_and_frame_narrative() {
        let record = classify_at(
            None,
            &json!({"project": "shop", "event": {
                "event_id": "e1", "level": "error",
                "logentry": {"formatted": "fetch failed"},
                "exception": {"values": [{"type": "Error", "stacktrace": {"frames": [
                    {"filename": "api.js", "lineno": 10, "function": "load"},
                    {"filename": "page.js", "lineno": 20, "function": "render"},
                    {"filename": "main.js", "lineno": 30, "function": "boot"}
                ]}}]}
            }}),
            now(),
        );
        let diagnostic = local_diagnostic(&record, now());
        assert_eq!(diagnostic.origin, DiagnosticOrigin::LocalFallback);
        let fields = diagnostic.error().expect("error diagnostic");
        assert_eq!(fields.extracted_count(), 5);
        let root = fields.root_cause.as_text();
        assert!(root.contains("api.js:10 - load"));
        assert!(root.contains("page.js:20 - render"));
        assert!(!root.contains("main.js"));
        assert!(root.contains("network"));
        assert!(fields.code_fix.as_text().contains("AbortController"));
    }

    #[test]
    fn missing_frames_are_called_out() {
        let record = classify_at(
            None,
            &json!({"event": {"event_id": "e2", "level": "error", "message": "boom"}}),
            now(),
        );
        let diagnostic = local_diagnostic(&record, now());
        let fields = diagnostic.error().expect("error diagnostic");
        assert!(fields.root_cause.as_text().contains("No stack frames"));
    }

    #[test]
    fn info_records_get_routine_note() {
        let record = classify_at(
            None,
            &json!({"issue": {"id": "9", "title": "Deploy done", "level": "info"}}),
            now(),
        );
        let diagnostic = local_diagnostic(&record, now());
        let note = diagnostic.note().expect("note diagnostic");
        assert!(note.explanation.contains("Deploy done"));
        assert!(note.is_routine.is_extracted());
        assert!(note.recommended_action.is_extracted());
        assert!(!note.needs_attention.is_extracted());
    }
}
