//! Error types for the document generation pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, GenerationError>;

/// A single field-level validation failure on financial inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum GenerationError {

    // =============================
    // Abort class
    // =============================

    #[error("Quota exceeded: {message} (resets at {reset_at})")]
    QuotaExceeded {
        message: String,
        reset_at: DateTime<Utc>,
    },

    // =============================
    // Degraded-capability class
    // =============================

    #[error("Invalid financial inputs: {}", format_field_errors(.0))]
    InvalidFinancialInputs(Vec<FieldError>),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Web search error: {0}")]
    WebSearch(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    // =============================
    // Model call / parsing
    // =============================

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl GenerationError {
    /// Quota failures are the only errors allowed to abort a request.
    pub fn is_quota(&self) -> bool {
        matches!(self, GenerationError::QuotaExceeded { .. })
    }
}

fn format_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}
