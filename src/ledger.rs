//! The append-only vote ledger: a hash-linked chain of sealed blocks plus
//! a pool of pending transactions waiting for the next seal.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::blockchain::{meets_difficulty, Block, MAX_DIFFICULTY};
use crate::error::LedgerError;
use crate::tx::{unix_timestamp, Transaction};

/// Which integrity check a block failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The stored hash differs from the recomputed one.
    HashMismatch,
    /// `previous_hash` does not match the parent's hash.
    BrokenLink,
    /// The hash lacks the required leading zeros.
    InsufficientWork,
}

/// The first integrity failure found while walking the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainFault {
    pub index: u64,
    pub kind: FaultKind,
}

impl fmt::Display for ChainFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let check = match self.kind {
            FaultKind::HashMismatch => "invalid hash",
            FaultKind::BrokenLink => "invalid previous hash",
            FaultKind::InsufficientWork => "insufficient proof of work",
        };
        write!(f, "{check} at block {}", self.index)
    }
}

/// Full chain dump handed to external consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainExport {
    pub chain: Vec<Block>,
    pub is_chain_valid: bool,
    pub difficulty: usize,
}

/// A snapshot of the pending pool, ready to be mined without holding
/// any reference to the ledger.
#[derive(Debug, Clone)]
pub struct SealJob {
    block: Block,
    difficulty: usize,
    max_nonce: Option<u64>,
}

impl SealJob {
    /// Index the sealed block will occupy.
    pub fn index(&self) -> u64 {
        self.block.index()
    }

    pub fn len(&self) -> usize {
        self.block.transactions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.block.transactions().is_empty()
    }

    /// Runs the proof-of-work search. CPU bound.
    pub fn mine(self) -> Result<Block, LedgerError> {
        self.block.mine(self.difficulty, self.max_nonce)
    }
}

/// Ordered, append-only chain of blocks with an unsealed pending pool.
#[derive(Debug, Clone)]
pub struct Ledger {
    chain: Vec<Block>,
    difficulty: usize,
    max_nonce: Option<u64>,
    pending: Vec<Transaction>,
}

impl Ledger {
    /// Creates a ledger with a sealed genesis block and unbounded mining.
    pub fn new(difficulty: usize) -> Result<Self, LedgerError> {
        Self::with_nonce_limit(difficulty, None)
    }

    /// Creates a ledger whose mining gives up once the nonce reaches
    /// `max_nonce`. The genesis block is subject to the same bound.
    pub fn with_nonce_limit(difficulty: usize, max_nonce: Option<u64>) -> Result<Self, LedgerError> {
        if difficulty > MAX_DIFFICULTY {
            return Err(LedgerError::DifficultyOutOfRange {
                difficulty,
                max: MAX_DIFFICULTY,
            });
        }
        let mut ledger = Self {
            chain: Vec::new(),
            difficulty,
            max_nonce,
            pending: Vec::new(),
        };
        ledger.append_genesis()?;
        Ok(ledger)
    }

    fn append_genesis(&mut self) -> Result<(), LedgerError> {
        let genesis = Block::genesis(unix_timestamp())?.mine(self.difficulty, self.max_nonce)?;
        info!(hash = %genesis.hash(), difficulty = self.difficulty, "genesis block sealed");
        self.chain.push(genesis);
        Ok(())
    }

    /// Queues a transaction for the next seal.
    pub fn add_pending(&mut self, tx: Transaction) -> Result<(), LedgerError> {
        if tx.voter_id().is_empty() {
            return Err(LedgerError::InvalidTransaction("empty voter id"));
        }
        if tx.candidate_id().is_empty() {
            return Err(LedgerError::InvalidTransaction("empty candidate id"));
        }
        self.pending.push(tx);
        Ok(())
    }

    /// Seals every pending transaction into a new block and appends it.
    pub fn seal(&mut self) -> Result<Block, LedgerError> {
        let job = self.prepare_seal()?;
        let block = job.mine()?;
        self.commit_seal(block)
    }

    /// Snapshots the pending pool into a block template extending the
    /// current tip. The pool itself is left untouched until commit.
    pub fn prepare_seal(&self) -> Result<SealJob, LedgerError> {
        if self.pending.is_empty() {
            return Err(LedgerError::NothingToSeal);
        }
        let block = Block::unsealed(
            self.chain.len() as u64,
            self.pending.clone(),
            self.latest_block().hash().to_string(),
            unix_timestamp(),
        )?;
        Ok(SealJob {
            block,
            difficulty: self.difficulty,
            max_nonce: self.max_nonce,
        })
    }

    /// Appends a block mined from [`Ledger::prepare_seal`] and drains the
    /// transactions it committed from the front of the pending pool.
    ///
    /// The block's hash is recomputed before it is accepted. Transactions
    /// queued after the snapshot stay pending.
    pub fn commit_seal(&mut self, block: Block) -> Result<Block, LedgerError> {
        let sealed = block.transactions().len();
        let extends_tip = block.index() == self.chain.len() as u64
            && block.previous_hash() == self.latest_block().hash();
        let matches_pool = sealed > 0
            && self.pending.len() >= sealed
            && self.pending[..sealed] == *block.transactions();
        if !extends_tip || !matches_pool {
            return Err(LedgerError::StaleSeal {
                index: block.index(),
            });
        }
        if block.calculate_hash()? != block.hash() || !meets_difficulty(block.hash(), self.difficulty) {
            return Err(LedgerError::InvalidSeal {
                index: block.index(),
            });
        }

        self.pending.drain(..sealed);
        info!(
            index = block.index(),
            txs = sealed,
            nonce = block.nonce(),
            hash = %block.hash(),
            still_pending = self.pending.len(),
            "block sealed"
        );
        self.chain.push(block.clone());
        Ok(block)
    }

    /// Walks the chain and reports the first block failing a check.
    pub fn first_fault(&self) -> Option<ChainFault> {
        for (previous, current) in self.chain.iter().zip(self.chain.iter().skip(1)) {
            let index = current.index();
            let recomputed = current.calculate_hash().ok();
            if recomputed.as_deref() != Some(current.hash()) {
                return Some(ChainFault {
                    index,
                    kind: FaultKind::HashMismatch,
                });
            }
            if current.previous_hash() != previous.hash() {
                return Some(ChainFault {
                    index,
                    kind: FaultKind::BrokenLink,
                });
            }
            if !meets_difficulty(current.hash(), self.difficulty) {
                return Some(ChainFault {
                    index,
                    kind: FaultKind::InsufficientWork,
                });
            }
        }
        None
    }

    /// Returns true when every block's hash and link check out.
    pub fn validate(&self) -> bool {
        match self.first_fault() {
            Some(fault) => {
                warn!(index = fault.index, check = ?fault.kind, "chain integrity check failed: {fault}");
                false
            }
            None => true,
        }
    }

    /// Every sealed vote, in block order then in-block order. The genesis
    /// block carries none.
    pub fn all_sealed_transactions(&self) -> impl Iterator<Item = &Transaction> + '_ {
        self.chain.iter().skip(1).flat_map(|block| block.transactions())
    }

    pub fn sealed_count(&self) -> usize {
        self.all_sealed_transactions().count()
    }

    pub fn latest_block(&self) -> &Block {
        // The chain always holds at least the genesis block.
        &self.chain[self.chain.len() - 1]
    }

    pub fn genesis(&self) -> &Block {
        &self.chain[0]
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn pending(&self) -> &[Transaction] {
        &self.pending
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn max_nonce(&self) -> Option<u64> {
        self.max_nonce
    }

    pub fn export(&self) -> ChainExport {
        ChainExport {
            chain: self.chain.clone(),
            is_chain_valid: self.validate(),
            difficulty: self.difficulty,
        }
    }

    #[cfg(test)]
    pub(crate) fn block_mut(&mut self, index: usize) -> &mut Block {
        &mut self.chain[index]
    }

    #[cfg(test)]
    pub(crate) fn set_mining_bounds(&mut self, difficulty: usize, max_nonce: Option<u64>) {
        self.difficulty = difficulty;
        self.max_nonce = max_nonce;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::GENESIS_PREVIOUS_HASH;
    use proptest::prelude::*;

    fn vote(voter: &str, candidate: &str) -> Transaction {
        Transaction::new(voter, candidate)
    }

    #[test]
    fn genesis_only_chain_is_valid() {
        let ledger = Ledger::new(2).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.genesis().previous_hash(), GENESIS_PREVIOUS_HASH);
        assert!(ledger.genesis().transactions().is_empty());
        assert!(ledger.genesis().hash().starts_with("00"));
        assert!(ledger.validate());
    }

    #[test]
    fn rejects_difficulty_beyond_digest_length() {
        let err = Ledger::new(MAX_DIFFICULTY + 1).unwrap_err();
        assert!(matches!(err, LedgerError::DifficultyOutOfRange { .. }));
    }

    #[test]
    fn rejects_transactions_with_empty_fields() {
        let mut ledger = Ledger::new(0).unwrap();
        assert!(matches!(
            ledger.add_pending(vote("", "C1")),
            Err(LedgerError::InvalidTransaction(_))
        ));
        assert!(matches!(
            ledger.add_pending(vote("V1", "")),
            Err(LedgerError::InvalidTransaction(_))
        ));
        assert!(ledger.pending().is_empty());
    }

    #[test]
    fn sealing_empty_pool_fails() {
        let mut ledger = Ledger::new(1).unwrap();
        assert!(matches!(ledger.seal(), Err(LedgerError::NothingToSeal)));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn seal_links_block_and_clears_pool() {
        let mut ledger = Ledger::new(1).unwrap();
        ledger.add_pending(vote("V1", "C1")).unwrap();
        ledger.add_pending(vote("V2", "C2")).unwrap();
        let block = ledger.seal().unwrap();

        assert_eq!(block.index(), 1);
        assert_eq!(block.previous_hash(), ledger.genesis().hash());
        assert_eq!(block.transactions()[0].voter_id(), "V1");
        assert_eq!(block.transactions()[1].voter_id(), "V2");
        assert!(ledger.pending().is_empty());
        assert_eq!(ledger.latest_block(), &block);
        assert!(ledger.validate());
    }

    #[test]
    fn sealed_transactions_skip_genesis_and_keep_order() {
        let mut ledger = Ledger::new(0).unwrap();
        ledger.add_pending(vote("V1", "C1")).unwrap();
        ledger.seal().unwrap();
        ledger.add_pending(vote("V2", "C2")).unwrap();
        ledger.add_pending(vote("V3", "C1")).unwrap();
        ledger.seal().unwrap();

        let voters: Vec<_> = ledger.all_sealed_transactions().map(|tx| tx.voter_id()).collect();
        assert_eq!(voters, ["V1", "V2", "V3"]);
        assert_eq!(ledger.sealed_count(), 3);
    }

    #[test]
    fn transactions_queued_during_mining_wait_for_next_seal() {
        let mut ledger = Ledger::new(1).unwrap();
        ledger.add_pending(vote("V1", "C1")).unwrap();
        let job = ledger.prepare_seal().unwrap();
        ledger.add_pending(vote("V2", "C2")).unwrap();

        let block = job.mine().unwrap();
        ledger.commit_seal(block).unwrap();

        assert_eq!(ledger.pending().len(), 1);
        assert_eq!(ledger.pending()[0].voter_id(), "V2");
        assert_eq!(ledger.sealed_count(), 1);
        assert!(ledger.validate());
    }

    #[test]
    fn commit_refuses_block_for_a_moved_tip() {
        let mut ledger = Ledger::new(0).unwrap();
        ledger.add_pending(vote("V1", "C1")).unwrap();
        let stale = ledger.prepare_seal().unwrap().mine().unwrap();
        ledger.seal().unwrap();

        ledger.add_pending(vote("V2", "C1")).unwrap();
        assert!(matches!(
            ledger.commit_seal(stale),
            Err(LedgerError::StaleSeal { index: 1 })
        ));
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.pending().len(), 1);
    }

    #[test]
    fn commit_rejects_block_with_rewritten_hash() {
        let mut ledger = Ledger::new(1).unwrap();
        ledger.add_pending(vote("V1", "C1")).unwrap();
        let mined = ledger.prepare_seal().unwrap().mine().unwrap();

        let mut json = serde_json::to_value(&mined).unwrap();
        json["hash"] = serde_json::Value::String("0".repeat(64));
        let forged: Block = serde_json::from_value(json).unwrap();

        assert!(matches!(
            ledger.commit_seal(forged),
            Err(LedgerError::InvalidSeal { index: 1 })
        ));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.pending().len(), 1);
        assert!(ledger.validate());

        ledger.commit_seal(mined).unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.pending().is_empty());
    }

    #[test]
    fn commit_rejects_block_below_difficulty() {
        let mut ledger = Ledger::new(0).unwrap();
        ledger.add_pending(vote("V1", "C1")).unwrap();
        let unworked = ledger.prepare_seal().unwrap().mine().unwrap();
        ledger.set_mining_bounds(MAX_DIFFICULTY, None);

        assert!(matches!(
            ledger.commit_seal(unworked),
            Err(LedgerError::InvalidSeal { index: 1 })
        ));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn tampered_transaction_is_detected_at_its_block() {
        let mut ledger = Ledger::new(1).unwrap();
        for round in 0..3 {
            ledger.add_pending(vote(&format!("V{round}"), "C1")).unwrap();
            ledger.seal().unwrap();
        }
        assert!(ledger.validate());

        ledger.block_mut(2).transactions_mut()[0].set_candidate_id("C2");
        assert!(!ledger.validate());
        assert_eq!(
            ledger.first_fault(),
            Some(ChainFault {
                index: 2,
                kind: FaultKind::HashMismatch
            })
        );
    }

    #[test]
    fn rehashed_block_breaks_the_next_link() {
        let mut ledger = Ledger::new(0).unwrap();
        for round in 0..2 {
            ledger.add_pending(vote(&format!("V{round}"), "C1")).unwrap();
            ledger.seal().unwrap();
        }
        let block = ledger.block_mut(1);
        block.transactions_mut()[0].set_candidate_id("C9");
        let forged = block.calculate_hash().unwrap();
        block.set_hash(&forged);

        assert_eq!(
            ledger.first_fault(),
            Some(ChainFault {
                index: 2,
                kind: FaultKind::BrokenLink
            })
        );
    }

    #[test]
    fn export_carries_integrity_flag_and_difficulty() {
        let mut ledger = Ledger::new(1).unwrap();
        ledger.add_pending(vote("V1", "C1")).unwrap();
        ledger.seal().unwrap();

        let export = ledger.export();
        assert!(export.is_chain_valid);
        assert_eq!(export.difficulty, 1);
        assert_eq!(export.chain.len(), 2);

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["chain"][1]["transactions"][0]["voter_id"], "V1");
        assert_eq!(json["chain"][0]["previous_hash"], "0");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn sealed_hash_meets_difficulty(
            difficulty in 0usize..=2,
            votes in prop::collection::vec(("[a-z]{1,8}", "[A-Z]{1,4}"), 1..6),
        ) {
            let mut ledger = Ledger::new(difficulty).unwrap();
            for (voter, candidate) in &votes {
                ledger.add_pending(Transaction::new(voter.as_str(), candidate.as_str())).unwrap();
            }
            let block = ledger.seal().unwrap();
            prop_assert!(meets_difficulty(block.hash(), difficulty));
            prop_assert_eq!(block.transactions().len(), votes.len());
            prop_assert!(ledger.pending().is_empty());
            prop_assert!(ledger.validate());
        }
    }
}
