use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("Invalid intent: {0}")]
    IntentInvalid(String),

    #[error("Language backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Unsupported intent: {0}")]
    UnsupportedIntent(String),

    #[error("Query rejected: {0}")]
    QueryRejected(String),

    #[error("Query timed out after {0} ms")]
    ExecutionTimeout(u64),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Analysis error: {0}")]
    AnalysisDegenerate(String),

    #[error("Turn superseded by a newer question")]
    TurnSuperseded,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AssistantError>;
