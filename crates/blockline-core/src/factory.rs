use crate::{now_timestamp, pow, Block, ChainError, ChainStore, Transaction};
use tracing::{info, warn};

/// Build the block that would extend `tip` with `transactions`.
///
/// The result is sealed with nonce 0 and is not appended anywhere.
pub fn next_block(tip: &Block, transactions: Vec<Transaction>, timestamp: String) -> Block {
    Block {
        index: tip.index.saturating_add(1),
        timestamp,
        transactions,
        nonce: 0,
        prev_hash: tip.hash.clone(),
        hash: String::new(),
    }
    .seal()
}

/// Produces candidate blocks on top of the current tip of a [`ChainStore`].
#[derive(Clone)]
pub struct BlockFactory {
    store: ChainStore,
    difficulty: u32,
}

impl BlockFactory {
    pub fn new(store: ChainStore) -> Self {
        Self::with_difficulty(store, 0)
    }

    /// Factory that searches for a nonce giving at least `difficulty` leading
    /// zero bits. Validation does not enforce this; it only shapes local blocks.
    pub fn with_difficulty(store: ChainStore, difficulty: u32) -> Self {
        Self { store, difficulty }
    }

    pub fn store(&self) -> &ChainStore {
        &self.store
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Candidate for the next index. The tip may move before the caller
    /// appends it, in which case [`ChainStore::try_append`] rejects it.
    pub fn create_next(&self, transactions: Vec<Transaction>) -> Result<Block, ChainError> {
        let tip = self.store.tip()?;
        let block = next_block(&tip, transactions, now_timestamp());
        if self.difficulty == 0 {
            return Ok(block);
        }
        let mined = pow::mine_block(block, self.difficulty);
        info!(index = mined.index, nonce = mined.nonce, "mined block");
        Ok(mined)
    }

    /// Build a block from `batch` and try to append it. Returns the block and
    /// whether it became the new tip. A stale candidate is not retried.
    pub fn submit_transactions(
        &self,
        batch: Vec<Transaction>,
    ) -> Result<(Block, bool), ChainError> {
        let block = self.create_next(batch)?;
        match self.store.try_append(block.clone()) {
            Ok(()) => Ok((block, true)),
            Err(ChainError::Rejected(rejection)) => {
                warn!(index = block.index, %rejection, "local block went stale");
                Ok((block, false))
            }
            Err(err) => Err(err),
        }
    }
}
