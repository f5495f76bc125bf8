use crate::record::{NormalizedRecord, RecordKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SeverityBucket {
    Error,
    Warning,
    Info,
    Debug,
    Other,
}

impl SeverityBucket {
    pub fn for_record(record: &NormalizedRecord) -> Self {
        let level = record.severity_lower();
        let kind = record.kind();
        match level.as_str() {
            "error" | "fatal" => Self::Error,
            _ if kind == RecordKind::ErrorEvent && level != "info" => Self::Error,
            "warning" => Self::Warning,
            _ if kind == RecordKind::IssueEvent && level != "info" => Self::Warning,
            "info" => Self::Info,
            "debug" => Self::Debug,
            _ => Self::Other,
        }
    }

    /// Color keyword understood by the chat relay's markdown.
    pub fn relay_color(self) -> &'static str {
        match self {
            Self::Error | Self::Warning => "warning",
            Self::Info | Self::Debug | Self::Other => "info",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeverityCounts {
    pub error: usize,
    pub warning: usize,
    pub info: usize,
    pub debug: usize,
    pub other: usize,
}

impl SeverityCounts {
    pub fn tally<'a>(records: impl IntoIterator<Item = &'a NormalizedRecord>) -> Self {
        let mut counts = Self::default();
        for record in records {
            match SeverityBucket::for_record(record) {
                SeverityBucket::Error => counts.error += 1,
                SeverityBucket::Warning => counts.warning += 1,
                SeverityBucket::Info => counts.info += 1,
                SeverityBucket::Debug => counts.debug += 1,
                SeverityBucket::Other => counts.other += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify_at;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn record(payload: serde_json::Value) -> NormalizedRecord {
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).single().expect("ts");
        classify_at(None, &payload, now)
    }

    #[test]
    fn error_events_below_info_count_as_errors() {
        let warn_event = record(json!({"event": {"event_id": "a", "level": "warning"}}));
        assert_eq!(SeverityBucket::for_record(&warn_event), SeverityBucket::Error);
        let info_event = record(json!({"event": {"event_id": "b", "level": "INFO"}}));
        assert_eq!(SeverityBucket::for_record(&info_event), SeverityBucket::Info);
    }

    #[test]
    fn issues_default_to_warning() {
        let issue = record(json!({"issue": {"id": "i", "level": "debug"}}));
        assert_eq!(SeverityBucket::for_record(&issue), SeverityBucket::Warning);
        let fatal_issue = record(json!({"issue": {"id": "j", "level": "fatal"}}));
        assert_eq!(SeverityBucket::for_record(&fatal_issue), SeverityBucket::Error);
    }

    #[test]
    fn tally_counts_each_bucket() {
        let records = vec![
            record(json!({"event": {"event_id": "a", "level": "error"}})),
            record(json!({"issue": {"id": "i"}})),
            record(json!({"level": "debug"})),
            record(json!({"hello": 1})),
        ];
        let counts = SeverityCounts::tally(&records);
        assert_eq!(
            counts,
            SeverityCounts {
                error: 1,
                warning: 1,
                info: 0,
                debug: 1,
                other: 1,
            }
        );
    }
}
