use thiserror::Error;
use transport::TransportError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("unknown task: {0}")]
    UnknownTask(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unexpected response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },
}

impl ClientError {
    /// HTTP status of a rejected call, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Transport(e) => e.status(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}
