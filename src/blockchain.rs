use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::LedgerError;
use crate::tx::Transaction;

/// Hex characters in a SHA-256 digest, and so the highest usable difficulty.
pub const MAX_DIFFICULTY: usize = 64;

/// Previous-hash marker carried by the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Represents a sealed batch of votes in the chain.
///
/// Fields are read-only outside the crate: once a block is sealed its
/// hash commits to every other field, transaction order included.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Block {
    /// Position in the chain; the genesis block is 0.
    index: u64,
    /// Votes committed by this block, in arrival order.
    transactions: Vec<Transaction>,
    /// The hash of the parent block.
    previous_hash: String,
    /// Seconds since the Unix epoch when the block was assembled.
    timestamp: f64,
    /// The proof-of-work counter.
    nonce: u64,
    /// The cached hash of the block.
    hash: String,
}

// Pre-image layout. Fields are declared in key order so the serialized
// object always has sorted keys, independent of serde_json features.
#[derive(Serialize)]
struct HashInput<'a> {
    index: u64,
    nonce: u64,
    previous_hash: &'a str,
    timestamp: f64,
    transactions: Vec<HashTransaction<'a>>,
}

#[derive(Serialize)]
struct HashTransaction<'a> {
    candidate_id: &'a str,
    timestamp: f64,
    voter_id: &'a str,
}

impl Block {
    /// Assembles an unsealed block (nonce 0) with its initial hash.
    pub(crate) fn unsealed(
        index: u64,
        transactions: Vec<Transaction>,
        previous_hash: String,
        timestamp: f64,
    ) -> Result<Self, LedgerError> {
        let mut block = Self {
            index,
            transactions,
            previous_hash,
            timestamp,
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.calculate_hash()?;
        Ok(block)
    }

    /// The empty, unsealed block every chain starts from.
    pub(crate) fn genesis(timestamp: f64) -> Result<Self, LedgerError> {
        Self::unsealed(0, Vec::new(), GENESIS_PREVIOUS_HASH.to_string(), timestamp)
    }

    /// Recomputes the hash from the block's own fields.
    pub fn calculate_hash(&self) -> Result<String, LedgerError> {
        let input = HashInput {
            index: self.index,
            nonce: self.nonce,
            previous_hash: &self.previous_hash,
            timestamp: self.timestamp,
            transactions: self
                .transactions
                .iter()
                .map(|tx| HashTransaction {
                    candidate_id: tx.candidate_id(),
                    timestamp: tx.timestamp(),
                    voter_id: tx.voter_id(),
                })
                .collect(),
        };
        let serialized = serde_json::to_string(&input)?;
        let mut hasher = Sha256::new();
        hasher.update(serialized.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    /// Runs the proof-of-work search and returns the sealed block.
    ///
    /// Starting from the current nonce, the nonce is incremented until the
    /// hash carries `difficulty` leading `'0'` characters. The search is a
    /// pure function of the block fields and difficulty. With `max_nonce`
    /// set, the search gives up once the nonce reaches that bound.
    pub fn mine(mut self, difficulty: usize, max_nonce: Option<u64>) -> Result<Self, LedgerError> {
        let mut hash = self.calculate_hash()?;
        while !meets_difficulty(&hash, difficulty) {
            if let Some(limit) = max_nonce {
                if self.nonce >= limit {
                    return Err(LedgerError::NonceLimitReached {
                        index: self.index,
                        limit,
                    });
                }
            }
            self.nonce += 1;
            hash = self.calculate_hash()?;
        }
        self.hash = hash;
        debug!(
            index = self.index,
            nonce = self.nonce,
            txs = self.transactions.len(),
            hash = %self.hash,
            "block mined"
        );
        Ok(self)
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    #[cfg(test)]
    pub(crate) fn transactions_mut(&mut self) -> &mut Vec<Transaction> {
        &mut self.transactions
    }

    #[cfg(test)]
    pub(crate) fn set_hash(&mut self, hash: &str) {
        self.hash = hash.to_string();
    }
}

/// True when the hex hash starts with `difficulty` zero characters.
pub fn meets_difficulty(hex_hash: &str, difficulty: usize) -> bool {
    hex_hash.len() >= difficulty && hex_hash.bytes().take(difficulty).all(|b| b == b'0')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> Block {
        let txs = vec![
            Transaction::with_timestamp("V1", "C1", 1.0),
            Transaction::with_timestamp("V2", "C2", 2.0),
        ];
        Block::unsealed(1, txs, "abc".to_string(), 1.5).unwrap()
    }

    #[test]
    fn pre_image_has_sorted_keys() {
        let block = Block::unsealed(
            1,
            vec![Transaction::with_timestamp("V1", "C1", 1.0)],
            "abc".to_string(),
            1.5,
        )
        .unwrap();
        let expected = r#"{"index":1,"nonce":0,"previous_hash":"abc","timestamp":1.5,"transactions":[{"candidate_id":"C1","timestamp":1.0,"voter_id":"V1"}]}"#;
        let digest = hex::encode(Sha256::digest(expected.as_bytes()));
        assert_eq!(block.hash(), digest);
        assert_eq!(block.hash().len(), 64);
    }

    #[test]
    fn zero_difficulty_succeeds_on_first_attempt() {
        let block = sample_block();
        let initial = block.hash().to_string();
        let mined = block.mine(0, None).unwrap();
        assert_eq!(mined.nonce(), 0);
        assert_eq!(mined.hash(), initial);
    }

    #[test]
    fn mining_is_deterministic() {
        let a = sample_block().mine(2, None).unwrap();
        let b = sample_block().mine(2, None).unwrap();
        assert_eq!(a.nonce(), b.nonce());
        assert_eq!(a.hash(), b.hash());
        assert!(a.hash().starts_with("00"));
        assert_eq!(a.calculate_hash().unwrap(), a.hash());
    }

    #[test]
    fn transaction_order_is_committed() {
        let forward = sample_block();
        let mut txs = forward.transactions().to_vec();
        txs.reverse();
        let reversed = Block::unsealed(1, txs, "abc".to_string(), 1.5).unwrap();
        assert_ne!(forward.hash(), reversed.hash());
    }

    #[test]
    fn bounded_mining_gives_up() {
        let err = sample_block().mine(MAX_DIFFICULTY, Some(10)).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::NonceLimitReached { index: 1, limit: 10 }
        ));
    }

    #[test]
    fn difficulty_check_counts_hex_zeros() {
        assert!(meets_difficulty("00ab", 2));
        assert!(!meets_difficulty("0a0b", 2));
        assert!(meets_difficulty("abcd", 0));
        assert!(!meets_difficulty("00", 3));
    }

    #[test]
    fn genesis_links_to_zero() {
        let genesis = Block::genesis(0.0).unwrap();
        assert_eq!(genesis.index(), 0);
        assert_eq!(genesis.previous_hash(), GENESIS_PREVIOUS_HASH);
        assert!(genesis.transactions().is_empty());
    }
}
