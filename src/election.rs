//! The election state machine.
//!
//! An [`Election`] owns a [`Ledger`] together with its voter and candidate
//! registries and moves through `Created -> Active -> Ended`. All methods
//! take `&self` so one election can be shared between threads:
//!
//! - registry state and the ledger sit behind one `RwLock`, so a vote's
//!   eligibility check, the `has_voted` flip and the pending append form
//!   a single critical section;
//! - sealers are serialised by a separate mutex and mine with no state
//!   lock held. The pending pool is snapshotted under a read lock and the
//!   sealed prefix is drained under the write lock on commit.
//!
//! Locks are always taken in the order sealing, then state.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::blockchain::Block;
use crate::error::{ElectionError, LedgerError};
use crate::ledger::{ChainExport, ChainFault, Ledger};
use crate::registry::{Candidate, Voter, VoterRegistration};
use crate::results::{ElectionExport, ElectionResults};
use crate::tx::Transaction;

pub type Result<T> = std::result::Result<T, ElectionError>;

/// Lifecycle phase of an election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionState {
    /// Registered but not yet open; votes are refused.
    Created,
    /// Accepting votes.
    Active,
    /// Closed for good.
    Ended,
}

#[derive(Debug)]
struct Inner {
    ledger: Ledger,
    voters: BTreeMap<String, Voter>,
    candidates: BTreeMap<String, Candidate>,
    state: ElectionState,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct Election {
    name: String,
    inner: RwLock<Inner>,
    sealing: Mutex<()>,
}

impl Election {
    /// Creates an election backed by a fresh ledger at `difficulty`.
    pub fn new(name: impl Into<String>, difficulty: usize) -> Result<Self> {
        Ok(Self::with_ledger(name, Ledger::new(difficulty)?))
    }

    pub fn with_ledger(name: impl Into<String>, ledger: Ledger) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(Inner {
                ledger,
                voters: BTreeMap::new(),
                candidates: BTreeMap::new(),
                state: ElectionState::Created,
                start_time: None,
                end_time: None,
            }),
            sealing: Mutex::new(()),
        }
    }

    // Every mutation is completed before any point that can panic, so a
    // poisoned lock still guards consistent state.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_sealing(&self) -> MutexGuard<'_, ()> {
        self.sealing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a voter and returns the only copy of their credential
    /// the caller will ever see. Allowed in any state.
    pub fn register_voter(
        &self,
        voter_id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
    ) -> Result<VoterRegistration> {
        let voter_id = voter_id.into();
        if voter_id.is_empty() {
            return Err(ElectionError::InvalidInput("empty voter id"));
        }
        let mut inner = self.write();
        if inner.voters.contains_key(&voter_id) {
            return Err(ElectionError::DuplicateVoter(voter_id));
        }
        let (voter, credential) = Voter::new(voter_id.clone(), name.into(), email.into());
        inner.voters.insert(voter_id, voter.clone());
        info!(election = %self.name, voter_id = %voter.voter_id, "voter registered");
        Ok(VoterRegistration { voter, credential })
    }

    /// Registers a candidate. Allowed in any state.
    pub fn register_candidate(
        &self,
        candidate_id: impl Into<String>,
        name: impl Into<String>,
        party: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Candidate> {
        let candidate = Candidate {
            candidate_id: candidate_id.into(),
            name: name.into(),
            party: party.into(),
            description: description.into(),
        };
        if candidate.candidate_id.is_empty() {
            return Err(ElectionError::InvalidInput("empty candidate id"));
        }
        let mut inner = self.write();
        if inner.candidates.contains_key(&candidate.candidate_id) {
            return Err(ElectionError::DuplicateCandidate(candidate.candidate_id));
        }
        inner
            .candidates
            .insert(candidate.candidate_id.clone(), candidate.clone());
        info!(
            election = %self.name,
            candidate_id = %candidate.candidate_id,
            party = %candidate.party,
            "candidate registered"
        );
        Ok(candidate)
    }

    /// Opens the election for voting.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.write();
        match inner.state {
            ElectionState::Active => return Err(ElectionError::AlreadyActive),
            ElectionState::Ended => return Err(ElectionError::AlreadyEnded),
            ElectionState::Created => {}
        }
        if inner.candidates.is_empty() {
            return Err(ElectionError::NoCandidates);
        }
        let now = Utc::now();
        inner.state = ElectionState::Active;
        inner.start_time = Some(now);
        info!(election = %self.name, start_time = %now, "election started");
        Ok(())
    }

    /// Closes the election and seals any votes still pending, returning
    /// the flushing block if one was produced.
    ///
    /// The sealing lock is held throughout, so at most one block is added.
    /// If the final seal fails the election is put back to `Active` with
    /// no end time, and the votes stay pending.
    pub fn end(&self) -> Result<Option<Block>> {
        let sealing = self.lock_sealing();
        let flush = {
            let mut inner = self.write();
            if inner.state != ElectionState::Active {
                return Err(ElectionError::NotActive);
            }
            let now = Utc::now();
            inner.state = ElectionState::Ended;
            inner.end_time = Some(now);
            info!(
                election = %self.name,
                end_time = %now,
                pending = inner.ledger.pending().len(),
                "election ended"
            );
            !inner.ledger.pending().is_empty()
        };
        if !flush {
            return Ok(None);
        }
        info!(election = %self.name, "mining final votes");
        match self.seal_locked(&sealing) {
            Ok(block) => Ok(Some(block)),
            Err(err) => {
                let mut inner = self.write();
                inner.state = ElectionState::Active;
                inner.end_time = None;
                warn!(election = %self.name, error = %err, "final seal failed, election reopened");
                Err(err)
            }
        }
    }

    /// Casts a vote. Checks run in a fixed order and the first failure is
    /// returned; a rejected vote changes nothing.
    pub fn cast_vote(&self, voter_id: &str, candidate_id: &str, credential: &str) -> Result<Transaction> {
        let result = self.try_cast_vote(voter_id, candidate_id, credential);
        match &result {
            Ok(_) => debug!(election = %self.name, voter_id, candidate_id, "vote accepted"),
            Err(err) => warn!(election = %self.name, voter_id, error = %err, "vote rejected"),
        }
        result
    }

    fn try_cast_vote(&self, voter_id: &str, candidate_id: &str, credential: &str) -> Result<Transaction> {
        let mut guard = self.write();
        let inner = &mut *guard;
        if inner.state != ElectionState::Active {
            return Err(ElectionError::NotActive);
        }
        let voter = inner
            .voters
            .get_mut(voter_id)
            .ok_or_else(|| ElectionError::UnknownVoter(voter_id.to_string()))?;
        if !voter.credential().verify(credential) {
            return Err(ElectionError::InvalidCredential);
        }
        if voter.has_voted() {
            return Err(ElectionError::AlreadyVoted(voter_id.to_string()));
        }
        if !inner.candidates.contains_key(candidate_id) {
            return Err(ElectionError::UnknownCandidate(candidate_id.to_string()));
        }

        let tx = Transaction::new(voter_id, candidate_id);
        inner.ledger.add_pending(tx.clone())?;
        voter.mark_voted();
        Ok(tx)
    }

    /// Seals pending votes into a new block. Not gated by election state.
    pub fn seal(&self) -> Result<Block> {
        let sealing = self.lock_sealing();
        self.seal_locked(&sealing)
    }

    fn seal_locked(&self, _sealing: &MutexGuard<'_, ()>) -> Result<Block> {
        let job = self.read().ledger.prepare_seal()?;
        debug!(election = %self.name, index = job.index(), txs = job.len(), "mining pending votes");
        let block = job.mine()?;
        let block = self.write().ledger.commit_seal(block)?;
        Ok(block)
    }

    /// Like [`Election::seal`], but an empty pool is not an error.
    pub fn seal_if_pending(&self) -> Result<Option<Block>> {
        match self.seal() {
            Ok(block) => Ok(Some(block)),
            Err(ElectionError::Ledger(LedgerError::NothingToSeal)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Counts sealed votes per registered candidate. Pending votes are
    /// not reflected until they are sealed.
    pub fn tally(&self) -> BTreeMap<String, u64> {
        Self::tally_of(&self.read())
    }

    fn tally_of(inner: &Inner) -> BTreeMap<String, u64> {
        let mut counts: BTreeMap<String, u64> =
            inner.candidates.keys().map(|id| (id.clone(), 0)).collect();
        for tx in inner.ledger.all_sealed_transactions() {
            if let Some(count) = counts.get_mut(tx.candidate_id()) {
                *count += 1;
            }
        }
        counts
    }

    /// Ranked results over the sealed votes.
    pub fn results(&self) -> ElectionResults {
        let inner = self.read();
        ElectionResults::compute(
            &self.name,
            &Self::tally_of(&inner),
            &inner.candidates,
            inner.voters.len(),
        )
    }

    pub fn validate(&self) -> bool {
        self.read().ledger.validate()
    }

    pub fn chain_fault(&self) -> Option<ChainFault> {
        self.read().ledger.first_fault()
    }

    pub fn export_chain(&self) -> ChainExport {
        self.read().ledger.export()
    }

    /// Consistent snapshot of the whole election.
    pub fn export(&self) -> ElectionExport {
        let inner = self.read();
        ElectionExport {
            election_name: self.name.clone(),
            state: inner.state,
            is_active: inner.state == ElectionState::Active,
            start_time: inner.start_time,
            end_time: inner.end_time,
            voters: inner.voters.values().cloned().collect(),
            candidates: inner.candidates.values().cloned().collect(),
            results: Self::tally_of(&inner),
            blockchain: inner.ledger.export(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ElectionState {
        self.read().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == ElectionState::Active
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.read().start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.read().end_time
    }

    pub fn voter_count(&self) -> usize {
        self.read().voters.len()
    }

    pub fn candidate_count(&self) -> usize {
        self.read().candidates.len()
    }

    /// Votes accepted so far, sealed and pending alike.
    pub fn votes_cast(&self) -> usize {
        let inner = self.read();
        inner.ledger.sealed_count() + inner.ledger.pending().len()
    }

    pub fn pending_count(&self) -> usize {
        self.read().ledger.pending().len()
    }

    pub fn block_count(&self) -> usize {
        self.read().ledger.len()
    }

    pub fn difficulty(&self) -> usize {
        self.read().ledger.difficulty()
    }

    pub fn voter(&self, voter_id: &str) -> Option<Voter> {
        self.read().voters.get(voter_id).cloned()
    }

    pub fn voters(&self) -> Vec<Voter> {
        self.read().voters.values().cloned().collect()
    }

    pub fn candidate(&self, candidate_id: &str) -> Option<Candidate> {
        self.read().candidates.get(candidate_id).cloned()
    }

    pub fn candidates(&self) -> Vec<Candidate> {
        self.read().candidates.values().cloned().collect()
    }

    pub fn latest_block(&self) -> Block {
        self.read().ledger.latest_block().clone()
    }

    #[cfg(test)]
    fn tamper_sealed_vote(&self, block: usize, tx: usize, candidate_id: &str) {
        self.write().ledger.block_mut(block).transactions_mut()[tx].set_candidate_id(candidate_id);
    }
}
