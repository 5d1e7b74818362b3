//! Error types for the ledger and the election state machine.

use thiserror::Error;

/// Failures raised while building or sealing the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A transaction was missing a required field.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(&'static str),

    /// `seal` was called with an empty pending pool.
    #[error("no pending transactions to seal")]
    NothingToSeal,

    /// Difficulty cannot exceed the number of hex characters in a digest.
    #[error("difficulty {difficulty} out of range (max {max})")]
    DifficultyOutOfRange { difficulty: usize, max: usize },

    /// Bounded mining gave up before finding a qualifying nonce.
    #[error("nonce limit {limit} reached while mining block {index}")]
    NonceLimitReached { index: u64, limit: u64 },

    /// The chain tip or pending pool moved between snapshot and commit.
    #[error("sealed block {index} no longer extends the chain")]
    StaleSeal { index: u64 },

    /// The block's stored hash does not match its contents or the
    /// required difficulty.
    #[error("block {index} does not carry a valid proof of work")]
    InvalidSeal { index: u64 },

    /// Canonical serialization of block fields failed.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Reasons an election operation was rejected.
#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("voter {0} already registered")]
    DuplicateVoter(String),

    #[error("candidate {0} already registered")]
    DuplicateCandidate(String),

    #[error("election is already active")]
    AlreadyActive,

    /// Ended is terminal; the election cannot be restarted.
    #[error("election has already ended")]
    AlreadyEnded,

    #[error("cannot start election: no candidates registered")]
    NoCandidates,

    #[error("election is not active")]
    NotActive,

    #[error("voter {0} not registered")]
    UnknownVoter(String),

    #[error("invalid credential")]
    InvalidCredential,

    #[error("voter {0} has already voted")]
    AlreadyVoted(String),

    #[error("candidate {0} not found")]
    UnknownCandidate(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
