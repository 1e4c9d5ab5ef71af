use thiserror::Error;

#[derive(Debug, Error)]
pub enum GridError {
    #[error("Cell index {index} out of range (grid size {size})")]
    IndexOutOfRange { index: i64, size: usize },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Malformed frame: {0}")]
    ProtocolMalformed(String),

    #[error("Origin is banned: {0}")]
    Banned(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GridError {
    /// True for errors caused by the client rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            GridError::IndexOutOfRange { .. } | GridError::ProtocolMalformed(_) | GridError::Banned(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GridError>;
