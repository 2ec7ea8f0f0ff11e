use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("invalid executor configuration: {0}")]
    InvalidConfig(String),
}
