//! Voters, candidates and the opaque voting credential.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Opaque per-voter secret, checked for equality when a vote is cast.
///
/// This is a shared secret, not a signature: anyone holding it can vote
/// as the voter. It is handed out once at registration and never appears
/// in listings, exports or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Derives a fresh credential from the voter's identity plus 16 bytes
    /// of OS randomness, rendered as a 64-char hex digest.
    pub(crate) fn generate(voter_id: &str, name: &str) -> Self {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let mut hasher = Sha256::new();
        hasher.update(voter_id.as_bytes());
        hasher.update(name.as_bytes());
        hasher.update(hex::encode(salt).as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Compares against a supplied secret without short-circuiting on the
    /// first differing byte.
    pub fn verify(&self, supplied: &str) -> bool {
        let expected = self.0.as_bytes();
        let supplied = supplied.as_bytes();
        if expected.len() != supplied.len() {
            return false;
        }
        expected
            .iter()
            .zip(supplied)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }

    /// The secret itself, for delivery to the registering party.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// A registered voter. Serializes to the public view only.
#[derive(Serialize, Debug, Clone)]
pub struct Voter {
    pub voter_id: String,
    pub name: String,
    pub email: String,
    has_voted: bool,
    #[serde(skip)]
    credential: Credential,
}

impl Voter {
    pub(crate) fn new(voter_id: String, name: String, email: String) -> (Self, Credential) {
        let credential = Credential::generate(&voter_id, &name);
        let voter = Self {
            voter_id,
            name,
            email,
            has_voted: false,
            credential: credential.clone(),
        };
        (voter, credential)
    }

    pub fn has_voted(&self) -> bool {
        self.has_voted
    }

    pub(crate) fn credential(&self) -> &Credential {
        &self.credential
    }

    /// One-way transition; nothing resets it.
    pub(crate) fn mark_voted(&mut self) {
        self.has_voted = true;
    }
}

/// Returned exactly once, to whoever registered the voter.
#[derive(Debug, Clone)]
pub struct VoterRegistration {
    pub voter: Voter,
    pub credential: Credential,
}

/// Represents a candidate standing in the election.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub candidate_id: String,
    pub name: String,
    pub party: String,
    #[serde(default)]
    pub description: String,
}
