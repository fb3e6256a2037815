use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("Template error: {0}")]
    Template(String),

    #[error("Unsupported aggregation: {0}")]
    UnsupportedAggregation(String),

    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("Intent parse error: {0}")]
    IntentParse(String),

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    /// Upstream failure from the metrics backend. `body` is the raw upstream
    /// payload and is only ever logged.
    #[error("Gateway error{}: {message}", status_suffix(.status))]
    Gateway {
        status: Option<u16>,
        message: String,
        body: Option<String>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

impl AssistantError {
    pub fn gateway(message: impl Into<String>) -> Self {
        AssistantError::Gateway {
            status: None,
            message: message.into(),
            body: None,
        }
    }

    /// Only configuration problems stop the process; everything else ends
    /// the current turn.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AssistantError::Config(_))
    }

    /// Stable label for structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            AssistantError::Template(_) => "template_error",
            AssistantError::UnsupportedAggregation(_) => "unsupported_aggregation",
            AssistantError::InvalidTimeRange(_) => "invalid_time_range",
            AssistantError::IntentParse(_) => "intent_parse_error",
            AssistantError::UnknownMetric(_) => "unknown_metric",
            AssistantError::Gateway { .. } => "gateway_error",
            AssistantError::Config(_) => "config_error",
            AssistantError::Llm(_) => "llm_error",
            AssistantError::Io(_) => "io_error",
            AssistantError::Json(_) => "json_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, AssistantError>;
