pub mod classify;
pub mod payload;
pub mod record;
pub mod samples;
pub mod severity;
pub mod timestamp;

pub use classify::{classify, classify_at};
pub use record::{
    Diagnostic, DiagnosticBody, DiagnosticOrigin, ErrorDiagnostic, ErrorEventDetail,
    IssueEventDetail, NormalizedRecord, NoteDiagnostic, RecordDetail, RecordKind, Section,
    StackFrame,
};
pub use severity::{SeverityBucket, SeverityCounts};
