use chrono::{DateTime, Utc};
use serde_json::{json, Value};

/// A built-in notification used to exercise the pipeline end to end.
#[derive(Debug, Clone)]
pub struct SamplePayload {
    pub resource: &'static str,
    pub payload: Value,
}

pub fn sample_payloads(now: DateTime<Utc>) -> Vec<SamplePayload> {
    let stamp = now.timestamp_millis();
    let iso = now.to_rfc3339();
    vec![
        SamplePayload {
            resource: "event",
            payload: json!({
                "project": "sample-project",
                "event": {
                    "event_id": format!("sample-event-{stamp}"),
                    "level": "error",
                    "timestamp": iso,
                    "logentry": {"formatted": "Sample error: simulated failure"},
                    "exception": {"values": [{
                        "type": "RuntimeError",
                        "value": "Sample exception: simulated fault",
                        "stacktrace": {"frames": [
                            {"filename": "test.js", "lineno": 42, "function": "testFunction"},
                            {"filename": "app.js", "lineno": 123, "function": "processData"}
                        ]}
                    }]}
                }
            }),
        },
        SamplePayload {
            resource: "issue",
            payload: json!({
                "action": "created",
                "issue": {
                    "id": format!("sample-issue-{stamp}"),
                    "title": "Sample issue: simulated problem",
                    "culprit": "test.js in testFunction",
                    "level": "warning",
                    "lastSeen": iso
                }
            }),
        },
        SamplePayload {
            resource: "event",
            payload: json!({
                "project": "sample-project-info",
                "event": {
                    "event_id": format!("sample-info-{stamp}"),
                    "level": "info",
                    "timestamp": iso,
                    "logentry": {"formatted": "Sample info: simulated notice"}
                }
            }),
        },
    ]
}
