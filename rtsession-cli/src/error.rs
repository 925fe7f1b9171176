use realtime_session::{SessionError, StoreError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),

    #[error("Reauthorization required: {0}. Run `rtsession login` again")]
    Reauthorization(String),
}

impl CliError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
