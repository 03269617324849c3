use serde::Serialize;

/// One failed check from schema validation, addressed by a dotted path (`items.0.calories`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
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

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    let parts: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    format!("[{}]", parts.join("; "))
}

/// Everything that can go wrong while turning a meal description into an estimate.
#[derive(Debug, thiserror::Error)]
pub enum EstimateError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Model error: {0:#}")]
    ModelCall(anyhow::Error),

    #[error("Model error: Model did not return JSON. Raw response: {raw}")]
    NoJsonFound { raw: String },

    #[error("Model error: {source} | raw: {raw}")]
    MalformedModelOutput {
        source: serde_json::Error,
        raw: String,
    },

    #[error("Invalid structured output: {} | raw: {raw}", join_field_errors(.errors))]
    SchemaValidation {
        errors: Vec<FieldError>,
        raw: serde_json::Value,
    },
}

impl EstimateError {
    /// Caller mistakes map to 4xx, everything else is on us (or the model).
    pub fn is_client_error(&self) -> bool {
        matches!(self, EstimateError::InvalidRequest(_))
    }

    /// Short stage name for log lines.
    pub fn stage(&self) -> &'static str {
        match self {
            EstimateError::InvalidRequest(_) => "request",
            EstimateError::ModelCall(_) => "model_call",
            EstimateError::NoJsonFound { .. } => "json_extraction",
            EstimateError::MalformedModelOutput { .. } => "json_parse",
            EstimateError::SchemaValidation { .. } => "schema_validation",
        }
    }
}
