use crate::adapter::{
    AdapterError, ChatCompletionsAdapter, CompletionAdapter, CompletionRequest, ModelSettings,
};
use crate::extract::{extract_at, PromptShape};
use crate::fallback::local_diagnostic;
use crate::prompt::{build_prompt, shape_for, SYSTEM_PROMPT};
use chrono::{DateTime, Utc};
use hookwatch_core::{
    Diagnostic, DiagnosticBody, DiagnosticOrigin, ErrorDiagnostic, NormalizedRecord,
    NoteDiagnostic, Section,
};
use std::sync::Arc;
use tracing::{info, warn};

const FAILURE_REMEDY: &str = "Check the model API key, base URL and network connectivity, then re-run the analysis.";
const FAILURE_PREVENTION: &str = "Monitor the model provider's availability and keep the key current.";

/// Chooses between the remote model and the local fallback for one record.
/// Never touches the store; callers attach the returned diagnostic.
#[derive(Clone)]
pub struct Analyzer {
    adapter: Option<Arc<dyn CompletionAdapter>>,
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("remote", &self.is_remote())
            .finish()
    }
}

impl Analyzer {
    pub fn from_settings(settings: &ModelSettings) -> Self {
        let adapter = settings
            .is_configured()
            .then(|| Arc::new(ChatCompletionsAdapter::new(settings.clone())) as Arc<dyn CompletionAdapter>);
        Self { adapter }
    }

    pub fn with_adapter(adapter: Arc<dyn CompletionAdapter>) -> Self {
        Self {
            adapter: Some(adapter),
        }
    }

    pub fn local_only() -> Self {
        Self { adapter: None }
    }

    pub fn is_remote(&self) -> bool {
        self.adapter.is_some()
    }

    pub fn analyze(&self, record: &NormalizedRecord) -> Diagnostic {
        self.analyze_at(record, None, Utc::now())
    }

    pub fn analyze_at(
        &self,
        record: &NormalizedRecord,
        override_context: Option<&str>,
        now: DateTime<Utc>,
    ) -> Diagnostic {
        let Some(adapter) = &self.adapter else {
            info!(event = "analysis_local_fallback", id = %record.id, kind = %record.kind());
            return local_diagnostic(record, now);
        };

        let shape = shape_for(record);
        let request = CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: build_prompt(record, override_context),
        };
        let model = adapter.model_id();
        match adapter.complete(&request) {
            Ok(completion) => {
                let mut diagnostic = extract_at(shape, &completion, now);
                diagnostic.model = model;
                info!(
                    event = "analysis_completed",
                    id = %record.id,
                    shape = ?shape,
                    extractor_fault = diagnostic.extractor_fault
                );
                diagnostic
            }
            Err(err) => {
                warn!(event = "analysis_failed", id = %record.id, kind = %err.kind, error = %err.message);
                let mut diagnostic = failure_diagnostic(shape, &err, now);
                diagnostic.model = model;
                diagnostic
            }
        }
    }
}

pub fn failure_diagnostic(shape: PromptShape, err: &AdapterError, now: DateTime<Utc>) -> Diagnostic {
    let reason = format!("Analysis failed ({}): {}", err.kind, err.message);
    let body = match shape {
        PromptShape::Error => DiagnosticBody::Error(ErrorDiagnostic {
            cause: Section::from_text(&reason),
            remedy: Section::from_text(FAILURE_REMEDY),
            prevention: Section::from_text(FAILURE_PREVENTION),
            ..ErrorDiagnostic::default()
        }),
        PromptShape::Informational | PromptShape::General => DiagnosticBody::Note(NoteDiagnostic {
            explanation: reason.clone(),
            next_steps: Section::from_text(FAILURE_REMEDY),
            ..NoteDiagnostic::default()
        }),
    };
    let mut diagnostic = Diagnostic::new(body, DiagnosticOrigin::Failure, now);
    diagnostic.failure = Some(err.to_string());
    diagnostic
}
