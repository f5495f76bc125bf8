pub mod adapter;
pub mod analyzer;
pub mod extract;
pub mod fallback;
pub mod prompt;

pub use adapter::{
    AdapterError, AdapterFailureKind, ChatCompletionsAdapter, CompletionAdapter,
    CompletionRequest, ModelSettings, API_KEY_PLACEHOLDER,
};
pub use analyzer::Analyzer;
pub use extract::{extract, extract_for, PromptShape};
pub use fallback::{local_diagnostic, ErrorCategory};
