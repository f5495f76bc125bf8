//! Marker-bounded section scanning over free-form model completions.
//!
//! Completions are organized by the model as labeled sections. A field is
//! recovered by locating its start label at the beginning of a line, then
//! taking everything up to its end label, the next label the shape knows
//! about, or the end of the text. Closing fields run to the end of the text.
//! Once a completion uses titled headings, numbered lines are list items, not
//! sections. The scan is best-effort: fields that cannot be located come back
//! as [`Section::NotExtracted`].

use chrono::{DateTime, Utc};
use hookwatch_core::{
    Diagnostic, DiagnosticBody, DiagnosticOrigin, ErrorDiagnostic, NoteDiagnostic, Section,
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

/// Heading decorations retried, most specific first, when a plain label is absent.
pub const HEADING_DECORATIONS: &[&str] = &["####", "###", "##", "#", "**"];

const TITLE_LINE_MAX_CHARS: usize = 60;

/// Which prompt the completion answers; selects the section vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptShape {
    Error,
    Informational,
    General,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    start: &'static str,
    end: Option<&'static str>,
}

const fn span(start: &'static str, end: &'static str) -> Candidate {
    Candidate {
        start,
        end: Some(end),
    }
}

const fn tail(start: &'static str) -> Candidate {
    Candidate { start, end: None }
}

const CAUSE: &[Candidate] = &[
    span("Cause", "Remedy"),
    span("错误原因", "解决方案"),
    span("1.", "2."),
];
const REMEDY: &[Candidate] = &[
    span("Remedy", "Prevention"),
    span("解决方案", "预防措施"),
    span("2.", "3."),
];
const PREVENTION: &[Candidate] = &[
    span("Prevention", "Root Cause"),
    span("预防措施", "根本原因"),
    span("3.", "4."),
];
const ROOT_CAUSE: &[Candidate] = &[
    span("Root Cause", "Code Fix"),
    span("根本原因", "代码修复"),
    span("4.", "5."),
];
const CODE_FIX: &[Candidate] = &[tail("Code Fix"), tail("代码修复"), tail("5.")];

const INFO_EXPLANATION: &[Candidate] = &[span("1.", "2."), span("Explanation", "Routine")];
const INFO_ROUTINE: &[Candidate] = &[span("2.", "3."), span("Routine", "Recommended Action")];
const INFO_ACTION: &[Candidate] = &[tail("3."), tail("Recommended Action")];

const GENERAL_EXPLANATION: &[Candidate] =
    &[span("1.", "2."), span("Explanation", "Needs Attention")];
const GENERAL_ATTENTION: &[Candidate] =
    &[span("2.", "3."), span("Needs Attention", "Next Steps")];
const GENERAL_NEXT: &[Candidate] = &[tail("3."), tail("Next Steps")];

impl PromptShape {
    /// Error events use the five-part vocabulary; everything else the general one.
    pub fn for_kind(is_error_kind: bool) -> Self {
        if is_error_kind {
            Self::Error
        } else {
            Self::General
        }
    }

    fn field_sets(self) -> &'static [&'static [Candidate]] {
        match self {
            Self::Error => &[CAUSE, REMEDY, PREVENTION, ROOT_CAUSE, CODE_FIX],
            Self::Informational => &[INFO_EXPLANATION, INFO_ROUTINE, INFO_ACTION],
            Self::General => &[GENERAL_EXPLANATION, GENERAL_ATTENTION, GENERAL_NEXT],
        }
    }

    fn known_labels(self) -> impl Iterator<Item = &'static str> {
        self.field_sets()
            .iter()
            .flat_map(|candidates| candidates.iter().map(|candidate| candidate.start))
    }

    fn titled_labels(self) -> impl Iterator<Item = &'static str> {
        self.known_labels().filter(|label| !is_positional(label))
    }
}

pub fn extract(completion: &str, is_error_kind: bool) -> Diagnostic {
    extract_at(PromptShape::for_kind(is_error_kind), completion, Utc::now())
}

pub fn extract_for(shape: PromptShape, completion: &str) -> Diagnostic {
    extract_at(shape, completion, Utc::now())
}

/// Never panics outward. A fault inside the scanner degrades to a diagnostic
/// carrying the raw completion with `extractor_fault` set.
pub fn extract_at(shape: PromptShape, completion: &str, now: DateTime<Utc>) -> Diagnostic {
    guarded_extract(shape, completion, now, scan)
}

fn guarded_extract(
    shape: PromptShape,
    completion: &str,
    now: DateTime<Utc>,
    scanner: impl FnOnce(PromptShape, &str) -> DiagnosticBody,
) -> Diagnostic {
    let scanned = catch_unwind(AssertUnwindSafe(|| scanner(shape, completion)));
    let (body, extractor_fault) = match scanned {
        Ok(body) => (body, false),
        Err(_) => {
            warn!(event = "extractor_fault", shape = ?shape, chars = completion.chars().count());
            (raw_body(shape, completion), true)
        }
    };
    let mut diagnostic = Diagnostic::new(body, DiagnosticOrigin::Model, now);
    diagnostic.extractor_fault = extractor_fault;
    diagnostic.raw_completion = Some(completion.to_string());
    diagnostic
}

fn scan(shape: PromptShape, text: &str) -> DiagnosticBody {
    let titled = shape
        .titled_labels()
        .any(|label| find_marker(text, label, 0).is_some());
    let section = |candidates: &[Candidate]| extract_section(text, shape, candidates, titled);
    match shape {
        PromptShape::Error => DiagnosticBody::Error(ErrorDiagnostic {
            cause: section(CAUSE),
            remedy: section(REMEDY),
            prevention: section(PREVENTION),
            root_cause: section(ROOT_CAUSE),
            code_fix: section(CODE_FIX),
        }),
        PromptShape::Informational => DiagnosticBody::Note(NoteDiagnostic {
            explanation: explanation_or_whole(section(INFO_EXPLANATION), text),
            is_routine: section(INFO_ROUTINE),
            recommended_action: section(INFO_ACTION),
            ..NoteDiagnostic::default()
        }),
        PromptShape::General => DiagnosticBody::Note(NoteDiagnostic {
            explanation: explanation_or_whole(section(GENERAL_EXPLANATION), text),
            needs_attention: section(GENERAL_ATTENTION),
            next_steps: section(GENERAL_NEXT),
            ..NoteDiagnostic::default()
        }),
    }
}

fn raw_body(shape: PromptShape, text: &str) -> DiagnosticBody {
    match shape {
        PromptShape::Error => DiagnosticBody::Error(ErrorDiagnostic {
            cause: Section::from_text(text),
            ..ErrorDiagnostic::default()
        }),
        PromptShape::Informational | PromptShape::General => DiagnosticBody::Note(NoteDiagnostic {
            explanation: text.trim().to_string(),
            ..NoteDiagnostic::default()
        }),
    }
}

fn explanation_or_whole(section: Section, text: &str) -> String {
    match section {
        Section::Extracted(found) => found,
        Section::NotExtracted => text.trim().to_string(),
    }
}

/// `titled` drops the numbered candidates: numbered lines then belong to lists.
fn extract_section(
    text: &str,
    shape: PromptShape,
    candidates: &[Candidate],
    titled: bool,
) -> Section {
    candidates
        .iter()
        .filter(|candidate| !(titled && is_positional(candidate.start)))
        .find_map(|candidate| {
            let region = region_for(text, shape, candidate)?;
            let cleaned = clean_region(region, is_positional(candidate.start));
            (!cleaned.is_empty()).then_some(cleaned)
        })
        .map(Section::Extracted)
        .unwrap_or(Section::NotExtracted)
}

fn region_for<'a>(text: &'a str, shape: PromptShape, candidate: &Candidate) -> Option<&'a str> {
    let start = find_marker(text, candidate.start, 0)?;
    let end = match candidate.end {
        None => text.len(),
        Some(label) => find_marker(text, label, start.content_start)
            .map(|marker| marker.line_start)
            .or_else(|| {
                next_known_marker(text, shape, start.content_start, is_positional(candidate.start))
            })
            .unwrap_or(text.len()),
    };
    text.get(start.content_start..end)
}

/// Titled sections only end at titled labels.
fn next_known_marker(
    text: &str,
    shape: PromptShape,
    from: usize,
    include_positional: bool,
) -> Option<usize> {
    shape
        .known_labels()
        .filter(|label| include_positional || !is_positional(label))
        .filter_map(|label| find_marker(text, label, from))
        .map(|marker| marker.line_start)
        .min()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Marker {
    line_start: usize,
    content_start: usize,
}

/// Plain label first; decorated variants only when no plain match exists.
fn find_marker(text: &str, label: &str, from: usize) -> Option<Marker> {
    find_with_prefix(text, label, "", from).or_else(|| {
        HEADING_DECORATIONS
            .iter()
            .find_map(|decoration| find_with_prefix(text, label, decoration, from))
    })
}

fn find_with_prefix(text: &str, label: &str, decoration: &str, from: usize) -> Option<Marker> {
    lines_with_offsets(text)
        .filter(|(line_start, _)| *line_start >= from)
        .find_map(|(line_start, line)| {
            let indent = line.len() - line.trim_start().len();
            let mut cursor = indent;
            if !decoration.is_empty() {
                if !line.get(cursor..)?.starts_with(decoration) {
                    return None;
                }
                cursor += decoration.len();
                let rest = line.get(cursor..)?;
                cursor += rest.len() - rest.trim_start_matches([' ', '\t']).len();
            }
            let head = line.as_bytes().get(cursor..cursor + label.len())?;
            head.eq_ignore_ascii_case(label.as_bytes())
                .then_some(Marker {
                    line_start,
                    content_start: line_start + cursor + label.len(),
                })
        })
}

fn lines_with_offsets(text: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut offset = 0;
    text.split_inclusive('\n').map(move |line| {
        let start = offset;
        offset += line.len();
        (start, line.trim_end_matches(['\n', '\r']))
    })
}

fn is_positional(label: &str) -> bool {
    label.ends_with('.') && label.trim_end_matches('.').chars().all(|c| c.is_ascii_digit())
}

/// Strips heading residue after the label. For numbered labels a leading
/// `Title:` on the marker line is dropped, and so is a short title line when a
/// body follows it.
fn clean_region(region: &str, positional: bool) -> String {
    let trimmed = region.trim_start_matches(|c: char| {
        matches!(c, ':' | '：' | '*' | '#' | ' ' | '\t')
    });
    let mut lines = trimmed.lines();
    let first = lines.next().unwrap_or_default();
    let body = lines.collect::<Vec<_>>().join("\n");

    let text = if !positional {
        trimmed.to_string()
    } else if let Some(rest) = inline_title_rest(first) {
        [rest.trim(), body.trim()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    } else if !body.trim().is_empty()
        && first.trim().chars().count() <= TITLE_LINE_MAX_CHARS
        && !first.trim_end().ends_with('.')
    {
        body
    } else {
        trimmed.to_string()
    };
    text.trim()
        .trim_end_matches(|c: char| c == '#' || c.is_whitespace())
        .trim()
        .to_string()
}

/// Text after `Explanation:` style titles, as in `1. Explanation: ...`.
fn inline_title_rest(line: &str) -> Option<&str> {
    let (title, rest) = line.split_once(|c: char| c == ':' || c == '：')?;
    let title = title.trim().trim_matches('*').trim();
    let is_title = !title.is_empty()
        && title.chars().count() <= TITLE_LINE_MAX_CHARS
        && title
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '?'))
        && !rest.starts_with("//");
    is_title.then_some(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn error_fields(text: &str) -> ErrorDiagnostic {
        extract_at(PromptShape::Error, text, now())
            .error()
            .cloned()
            .expect("error diagnostic")
    }

    #[test]
    fn heading_sections_fill_all_error_fields() {
        let text = "### Cause\nThe user object is null.\n\n### Remedy\nGuard the access.\n\
### Prevention\nAdd null checks.\n### Root Cause\nLogin race.\n### Code Fix\n```js\nif (user) {}\n```\n";
        let fields = error_fields(text);
        assert_eq!(fields.cause.as_option(), Some("The user object is null."));
        assert_eq!(fields.remedy.as_option(), Some("Guard the access."));
        assert_eq!(fields.prevention.as_option(), Some("Add null checks."));
        assert_eq!(fields.root_cause.as_option(), Some("Login race."));
        assert_eq!(fields.code_fix.as_option(), Some("```js\nif (user) {}\n```"));
        assert_eq!(fields.extracted_count(), 5);
    }

    #[test]
    fn missing_sections_are_explicit_placeholders() {
        let fields = error_fields("Cause: disk full\nRemedy: free space\n");
        assert_eq!(fields.cause.as_option(), Some("disk full"));
        assert_eq!(fields.remedy.as_option(), Some("free space"));
        assert_eq!(fields.prevention, Section::NotExtracted);
        assert_eq!(fields.root_cause, Section::NotExtracted);
        assert_eq!(fields.code_fix, Section::NotExtracted);
    }

    #[test]
    fn labels_match_case_insensitively_at_line_start_only() {
        let fields = error_fields("the cause is unclear\nCAUSE: a typo\nremedy: fix it");
        assert_eq!(fields.cause.as_option(), Some("a typo"));
        assert_eq!(fields.remedy.as_option(), Some("fix it"));
    }

    #[test]
    fn numbered_sections_drop_their_title_line() {
        let text = "1. Error cause\nBad input.\n2. Remedy steps\nValidate input.\n3. Prevention\nTests.\n\
4. Root cause\nMissing schema.\n5. Code fix\nvalidate(x)";
        let fields = error_fields(text);
        assert_eq!(fields.cause.as_option(), Some("Bad input."));
        assert_eq!(fields.remedy.as_option(), Some("Validate input."));
        assert_eq!(fields.prevention.as_option(), Some("Tests."));
        assert_eq!(fields.root_cause.as_option(), Some("Missing schema."));
        assert_eq!(fields.code_fix.as_option(), Some("validate(x)"));
    }

    #[test]
    fn bold_decoration_is_a_fallback() {
        let fields = error_fields("**Cause**: timeout\n**Remedy**: retry later");
        assert_eq!(fields.cause.as_option(), Some("timeout"));
        assert_eq!(fields.remedy.as_option(), Some("retry later"));
    }

    #[test]
    fn missing_end_label_stops_at_next_known_marker() {
        let fields = error_fields("## Cause\nnetwork down\n## Root Cause\nDNS outage");
        assert_eq!(fields.cause.as_option(), Some("network down"));
        assert_eq!(fields.root_cause.as_option(), Some("DNS outage"));
        assert_eq!(fields.remedy, Section::NotExtracted);
    }

    #[test]
    fn chinese_headings_are_recognized() {
        let fields = error_fields("### 错误原因\n空指针。\n### 解决方案\n检查对象。");
        assert_eq!(fields.cause.as_option(), Some("空指针。"));
        assert_eq!(fields.remedy.as_option(), Some("检查对象。"));
    }

    #[test]
    fn unstructured_general_text_becomes_the_explanation() {
        let text = "Everything looks healthy, no action needed.";
        let diagnostic = extract_at(PromptShape::General, text, now());
        let note = diagnostic.note().expect("note diagnostic");
        assert_eq!(note.explanation, text);
        assert_eq!(note.needs_attention, Section::NotExtracted);
        assert_eq!(note.next_steps, Section::NotExtracted);
        assert!(!diagnostic.extractor_fault);
        assert_eq!(diagnostic.raw_completion.as_deref(), Some(text));
    }

    #[test]
    fn informational_shape_reads_numbered_sections() {
        let text = "1. Meaning\nA deploy finished.\n2. Routine?\nYes, this is routine.\n3. Action\nNone.";
        let diagnostic = extract_at(PromptShape::Informational, text, now());
        let note = diagnostic.note().expect("note diagnostic");
        assert_eq!(note.explanation, "A deploy finished.");
        assert_eq!(note.is_routine.as_option(), Some("Yes, this is routine."));
        assert_eq!(note.recommended_action.as_option(), Some("None."));
    }

    #[test]
    fn general_shape_by_title() {
        let text = "Explanation: odd spike\nNeeds Attention: yes\nNext Steps: check dashboards";
        let diagnostic = extract(text, false);
        let note = diagnostic.note().expect("note diagnostic");
        assert_eq!(note.explanation, "odd spike");
        assert_eq!(note.needs_attention.as_option(), Some("yes"));
        assert_eq!(note.next_steps.as_option(), Some("check dashboards"));
    }

    #[test]
    fn empty_completion_never_panics() {
        let fields = error_fields("");
        assert_eq!(fields.extracted_count(), 0);
        let diagnostic = extract_at(PromptShape::General, "", now());
        assert_eq!(diagnostic.note().map(|note| note.explanation.as_str()), Some(""));
    }

    #[test]
    fn multibyte_text_around_labels_is_safe() {
        let fields = error_fields("é\nCauseé: ünïcode\n🦀 Remedy\nRemedy 🦀");
        assert_eq!(fields.cause.as_option(), Some("é: ünïcode\n🦀 Remedy"));
        assert_eq!(fields.remedy.as_option(), Some("🦀"));
    }

    #[test]
    fn closing_code_fix_keeps_its_numbered_steps() {
        let text = "### Cause\nnull user\n### Code Fix\nApply these changes:\n1. Add a guard\n\
2. Return early\n```js\nif (!user) return;\n```\n";
        let fields = error_fields(text);
        assert_eq!(fields.cause.as_option(), Some("null user"));
        assert_eq!(
            fields.code_fix.as_option(),
            Some("Apply these changes:\n1. Add a guard\n2. Return early\n```js\nif (!user) return;\n```")
        );
    }

    #[test]
    fn numbered_list_inside_titled_section_stays_in_that_section() {
        let text = "### Cause\nnull user\n### Remedy\n1. Check the input\n2. Add validation\n\
### Root Cause\nrace";
        let fields = error_fields(text);
        assert_eq!(fields.cause.as_option(), Some("null user"));
        assert_eq!(
            fields.remedy.as_option(),
            Some("1. Check the input\n2. Add validation")
        );
        assert_eq!(fields.prevention, Section::NotExtracted);
        assert_eq!(fields.root_cause.as_option(), Some("race"));
        assert_eq!(fields.code_fix, Section::NotExtracted);
    }

    #[test]
    fn numbered_answers_with_inline_titles_drop_the_title() {
        let text = "1. Explanation: A deploy finished successfully.\n\
2. Routine: Yes, this is routine.\n3. Recommended Action: None.";
        let diagnostic = extract_at(PromptShape::Informational, text, now());
        let note = diagnostic.note().expect("note diagnostic");
        assert_eq!(note.explanation, "A deploy finished successfully.");
        assert_eq!(note.is_routine.as_option(), Some("Yes, this is routine."));
        assert_eq!(note.recommended_action.as_option(), Some("None."));

        let text = "1. **Explanation**: Queue depth spiked.\n2. Needs Attention: Not urgent.\n\
3. Next Steps:\nWatch the queue.\nScale workers if it persists.";
        let diagnostic = extract_at(PromptShape::General, text, now());
        let note = diagnostic.note().expect("note diagnostic");
        assert_eq!(note.explanation, "Queue depth spiked.");
        assert_eq!(note.needs_attention.as_option(), Some("Not urgent."));
        assert_eq!(
            note.next_steps.as_option(),
            Some("Watch the queue.\nScale workers if it persists.")
        );
    }

    #[test]
    fn scanner_fault_degrades_to_raw_text() {
        let text = "  garbled answer  ";
        let diagnostic = guarded_extract(PromptShape::Error, text, now(), |_, _| {
            panic!("scanner fault")
        });
        assert!(diagnostic.extractor_fault);
        assert_eq!(diagnostic.origin, DiagnosticOrigin::Model);
        assert_eq!(diagnostic.raw_completion.as_deref(), Some(text));
        let fields = diagnostic.error().expect("error diagnostic");
        assert_eq!(fields.cause.as_option(), Some("garbled answer"));
        assert_eq!(fields.extracted_count(), 1);

        let diagnostic = guarded_extract(PromptShape::General, text, now(), |_, _| {
            panic!("scanner fault")
        });
        assert!(diagnostic.extractor_fault);
        let note = diagnostic.note().expect("note diagnostic");
        assert_eq!(note.explanation, "garbled answer");
        assert_eq!(note.next_steps, Section::NotExtracted);
    }
}
