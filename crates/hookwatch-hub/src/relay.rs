use chrono::{DateTime, Utc};
use hookwatch_core::{NormalizedRecord, RecordDetail, SeverityBucket};
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{info, warn};

const RELAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts record summaries to a WeCom group bot. Delivery is best effort.
#[derive(Clone, Debug)]
pub struct ChatRelay {
    url: String,
    client: reqwest::Client,
}

impl ChatRelay {
    pub fn new(url: impl Into<String>) -> Option<Self> {
        let client = match reqwest::Client::builder().timeout(RELAY_TIMEOUT).build() {
            Ok(client) => client,
            Err(err) => {
                warn!(event = "relay_client_error", error = %err);
                return None;
            }
        };
        Some(Self {
            url: url.into(),
            client,
        })
    }

    /// Spawns the post; the caller never waits on delivery.
    pub fn spawn_notify(&self, record: &NormalizedRecord) {
        let Some(content) = render_markdown(record, Utc::now()) else {
            return;
        };
        let relay = self.clone();
        let id = record.id.clone();
        tokio::spawn(async move {
            relay.post(&id, relay_body(&content)).await;
        });
    }

    async fn post(&self, id: &str, body: Value) {
        let response = match self.client.post(&self.url).json(&body).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(event = "relay_failed", id = %id, error = %err);
                return;
            }
        };
        let status = response.status();
        let reply = response.text().await.unwrap_or_default();
        if status.is_success() {
            info!(event = "relay_sent", id = %id, reply = %reply.trim());
        } else {
            warn!(event = "relay_rejected", id = %id, status = %status, reply = %reply.trim());
        }
    }
}

pub fn relay_body(content: &str) -> Value {
    json!({
        "msgtype": "markdown",
        "markdown": {"content": content}
    })
}

/// Markdown for error and issue records; other kinds are not relayed.
pub fn render_markdown(record: &NormalizedRecord, sent_at: DateTime<Utc>) -> Option<String> {
    let color = SeverityBucket::for_record(record).relay_color();
    let mut out = String::new();
    match &record.detail {
        RecordDetail::ErrorEvent(detail) => {
            out.push_str("### Sentry error event\n");
            let _ = writeln!(out, "> **Project**: {}", detail.project);
            let _ = writeln!(out, "> **Event ID**: {}", detail.event_id);
            let _ = writeln!(out, "> **Message**: {}", detail.message);
            let _ = writeln!(
                out,
                "> **Level**: <font color=\"{color}\">{}</font>",
                record.severity
            );
            let _ = writeln!(out, "> **Occurred**: {}", record.occurred_at.to_rfc3339());
            let _ = writeln!(
                out,
                "> **Exception type**: {}",
                detail.exception_type.as_deref().unwrap_or("unknown")
            );
            let _ = writeln!(
                out,
                "> **Exception value**: {}",
                detail.exception_value.as_deref().unwrap_or("unknown")
            );
        }
        RecordDetail::IssueEvent(detail) => {
            out.push_str("### Sentry issue event\n");
            let _ = writeln!(out, "> **Issue ID**: {}", detail.issue_id);
            let _ = writeln!(out, "> **Action**: {}", detail.action);
            let _ = writeln!(out, "> **Title**: {}", detail.title);
            let _ = writeln!(out, "> **Culprit**: {}", detail.culprit);
            let _ = writeln!(
                out,
                "> **Level**: <font color=\"{color}\">{}</font>",
                record.severity
            );
        }
        RecordDetail::UnrecognizedEvent { .. } | RecordDetail::ParseFailure { .. } => return None,
    }
    let _ = write!(out, "\n> Sent at: {}\n", sent_at.format("%Y-%m-%d %H:%M:%S UTC"));
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hookwatch_core::classify_at;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 9, 30, 0).single().expect("ts")
    }

    #[test]
    fn error_markdown_carries_fields_and_warning_color() {
        let record = classify_at(
            None,
            &json!({"project": "api", "event": {
                "event_id": "e-1", "level": "fatal", "message": "crash",
                "exception": {"values": [{"type": "Panic", "value": "oops"}]}
            }}),
            now(),
        );
        let markdown = render_markdown(&record, now()).expect("markdown");
        assert!(markdown.starts_with("### Sentry error event\n"));
        assert!(markdown.contains("> **Project**: api\n"));
        assert!(markdown.contains("<font color=\"warning\">fatal</font>"));
        assert!(markdown.contains("> **Exception value**: oops\n"));
        assert!(markdown.ends_with("> Sent at: 2026-08-01 09:30:00 UTC\n"));
    }

    #[test]
    fn info_issue_uses_info_color() {
        let record = classify_at(
            None,
            &json!({"action": "resolved", "issue": {"id": "5", "title": "t", "level": "info"}}),
            now(),
        );
        let markdown = render_markdown(&record, now()).expect("markdown");
        assert!(markdown.contains("> **Action**: resolved\n"));
        assert!(markdown.contains("<font color=\"info\">info</font>"));
    }

    #[test]
    fn unrecognized_records_are_not_relayed() {
        let record = classify_at(Some("installation"), &json!({"hello": "world"}), now());
        assert!(render_markdown(&record, now()).is_none());
    }

    #[test]
    fn body_is_wecom_markdown() {
        let body = relay_body("hi");
        assert_eq!(body["msgtype"], "markdown");
        assert_eq!(body["markdown"]["content"], "hi");
    }
}
