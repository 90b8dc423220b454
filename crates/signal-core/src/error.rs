use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("Missing input data: {0}")]
    MissingInputData(String),

    #[error("Insufficient history: {0}")]
    InsufficientHistory(String),

    #[error("External source unavailable: {0}")]
    ExternalSourceUnavailable(String),

    #[error("Invalid signal shape: {0}")]
    InvalidSignalShape(String),
}
