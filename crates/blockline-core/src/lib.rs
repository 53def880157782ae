use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

pub mod chain;
pub mod constants;
pub mod error;
pub mod factory;

pub use chain::ChainStore;
pub use error::{ChainError, Rejection};
pub use factory::BlockFactory;

use constants::AMOUNT_DECIMALS;

// Field aliases follow the lowercase and camelCase spellings other peers emit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Transaction {
    #[serde(alias = "sender")]
    pub sender: String,
    #[serde(alias = "receiver")]
    pub receiver: String,
    #[serde(alias = "amount")]
    pub amount: f64,
}

impl Transaction {
    pub fn new(sender: impl Into<String>, receiver: impl Into<String>, amount: f64) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
            amount,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Block {
    #[serde(alias = "index")]
    pub index: u64,
    #[serde(alias = "timestamp")]
    pub timestamp: String,
    #[serde(alias = "transactions", default, deserialize_with = "null_as_empty")]
    pub transactions: Vec<Transaction>,
    #[serde(alias = "nonce", default)]
    pub nonce: i64,
    #[serde(alias = "prevHash", alias = "prevhash", alias = "prev_hash")]
    pub prev_hash: String,
    #[serde(alias = "hash")]
    pub hash: String,
}

// Peers that encode an empty list as `null` still produce a valid block.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Transaction>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Transaction>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Block {
    /// Genesis block stamped with the current time.
    pub fn genesis() -> Self {
        Self::genesis_at(now_timestamp())
    }

    pub fn genesis_at(timestamp: impl Into<String>) -> Self {
        Block {
            index: 0,
            timestamp: timestamp.into(),
            transactions: vec![],
            nonce: 0,
            prev_hash: String::new(),
            hash: String::new(),
        }
        .seal()
    }

    /// Recompute and store the digest of this block.
    pub fn seal(mut self) -> Self {
        self.hash = digest(&self);
        self
    }

    pub fn has_valid_hash(&self) -> bool {
        digest(self) == self.hash
    }
}

/// Timestamp format used for locally produced blocks. Never parsed back.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}

/// Hex encoded SHA-256 over the block's canonical record.
///
/// The record is `index`, `timestamp`, `nonce` and `prev_hash` followed by
/// `sender`, `receiver` and `amount` of every transaction in list order. The
/// stored `hash` is never part of it. Amounts are always written with a fixed
/// number of fractional digits so that a block relayed between nodes hashes to
/// the same value everywhere.
pub fn digest(block: &Block) -> String {
    let mut record = String::with_capacity(128 + block.transactions.len() * 32);
    // Writing into a String cannot fail.
    let _ = write!(
        record,
        "{}{}{}{}",
        block.index, block.timestamp, block.nonce, block.prev_hash
    );
    for tx in &block.transactions {
        let _ = write!(
            record,
            "{}{}{:.*}",
            tx.sender, tx.receiver, AMOUNT_DECIMALS, tx.amount
        );
    }
    let mut hasher = Sha256::new();
    hasher.update(record.as_bytes());
    hex::encode(hasher.finalize())
}

pub mod pow {
    use super::{digest, Block};
    use crate::constants::MAX_DIFFICULTY;

    /// Increment the nonce until the block digest has at least `target_zeros`
    /// leading zero bits. The returned block is sealed.
    pub fn mine_block(mut block: Block, target_zeros: u32) -> Block {
        let target_zeros = target_zeros.min(MAX_DIFFICULTY);
        loop {
            let hash = digest(&block);
            if leading_zero_bits_hex(&hash) >= target_zeros {
                block.hash = hash;
                return block;
            }
            block.nonce = block.nonce.wrapping_add(1);
        }
    }

    pub fn count_leading_zero_bits(hash: &[u8]) -> u32 {
        let mut total = 0u32;
        for b in hash {
            if *b == 0 {
                total += 8;
            } else {
                total += b.leading_zeros();
                break;
            }
        }
        total
    }

    /// Leading zero bits of a hex digest. Malformed hex counts as zero.
    pub fn leading_zero_bits_hex(hash: &str) -> u32 {
        hex::decode(hash)
            .map(|bytes| count_leading_zero_bits(&bytes))
            .unwrap_or(0)
    }
}
