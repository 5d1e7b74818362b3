use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Represents a single vote recorded in the ledger.
///
/// Transactions are immutable once built; they carry no identity beyond
/// their field values.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Transaction {
    /// The voter casting the ballot.
    voter_id: String,
    /// The candidate receiving the vote.
    candidate_id: String,
    /// Seconds since the Unix epoch, with microsecond precision.
    timestamp: f64,
}

impl Transaction {
    /// Builds a transaction stamped with the current wall-clock time.
    pub fn new(voter_id: impl Into<String>, candidate_id: impl Into<String>) -> Self {
        Self::with_timestamp(voter_id, candidate_id, unix_timestamp())
    }

    pub fn with_timestamp(
        voter_id: impl Into<String>,
        candidate_id: impl Into<String>,
        timestamp: f64,
    ) -> Self {
        Self {
            voter_id: voter_id.into(),
            candidate_id: candidate_id.into(),
            timestamp,
        }
    }

    pub fn voter_id(&self) -> &str {
        &self.voter_id
    }

    pub fn candidate_id(&self) -> &str {
        &self.candidate_id
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    #[cfg(test)]
    pub(crate) fn set_candidate_id(&mut self, candidate_id: &str) {
        self.candidate_id = candidate_id.to_string();
    }
}

/// Current time as fractional seconds since the Unix epoch.
pub fn unix_timestamp() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}
