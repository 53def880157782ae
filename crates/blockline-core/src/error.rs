use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain has no genesis block")]
    EmptyChain,
    #[error("block rejected: {0}")]
    Rejected(#[from] Rejection),
    #[error("invalid genesis block: {0}")]
    InvalidGenesis(&'static str),
}

/// The rule a candidate block broke when it was checked against the tip.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("expected index {expected}, found {found}")]
    IndexMismatch { expected: u64, found: u64 },
    #[error("previous hash {found:?} does not match tip hash {expected:?}")]
    PrevHashMismatch { expected: String, found: String },
    #[error("stored hash {stored:?} does not match computed hash {computed:?}")]
    HashMismatch { stored: String, computed: String },
}

impl ChainError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, ChainError::Rejected(_))
    }
}
