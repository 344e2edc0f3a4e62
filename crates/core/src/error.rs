use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Notify watcher error: {0}")]
    Notify(String),

    #[error("Watcher state error: {0}")]
    WatcherState(String),
}

pub type Result<T> = std::result::Result<T, ProbeError>;
