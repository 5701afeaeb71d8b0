use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Empty table: {0}")]
    EmptyTable(String),

    #[error("File not found")]
    NoSuchFile,

    #[error("Answer generation unavailable: {0}")]
    AnswerGenerationUnavailable(String),

    #[error("No dashboard was synthesized for this file")]
    DashboardUnavailable,

    #[error("External call timed out: {0}")]
    Timeout(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Workbook error: {0}")]
    Workbook(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
