use thiserror::Error;

/// Failures scoped to a single peer connection. None of them touch the chain.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("malformed block: {0}")]
    Deserialization(#[from] serde_json::Error),
    #[error("message is not valid UTF-8")]
    NotUtf8,
    #[error("message longer than {0} bytes")]
    LineTooLong(usize),
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),
}
