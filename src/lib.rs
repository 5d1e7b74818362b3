//! votechain: an append-only, proof-of-work sealed vote ledger and the
//! election state machine that feeds it.
//!
//! Votes enter a pending pool through [`Election::cast_vote`], are sealed
//! into hash-linked blocks by [`Election::seal`] (or at [`Election::end`]),
//! and are only counted by [`Election::tally`] once sealed.

pub mod blockchain;
pub mod config;
pub mod election;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod registry;
pub mod results;
pub mod tx;

pub use blockchain::{meets_difficulty, Block, MAX_DIFFICULTY};
pub use election::{Election, ElectionState};
pub use error::{ElectionError, LedgerError};
pub use ledger::{ChainExport, ChainFault, FaultKind, Ledger, SealJob};
pub use registry::{Candidate, Credential, Voter, VoterRegistration};
pub use results::{ElectionExport, ElectionResults, Standing};
pub use tx::Transaction;
