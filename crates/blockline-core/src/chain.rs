use crate::{digest, Block, ChainError, Rejection};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

/// Check `candidate` against the current `tip`.
///
/// A candidate extends the tip iff its index is exactly one higher, its
/// `prev_hash` is the tip's hash and its stored hash matches a fresh digest.
pub fn validate(candidate: &Block, tip: &Block) -> Result<(), Rejection> {
    if candidate.index.checked_sub(1) != Some(tip.index) {
        return Err(Rejection::IndexMismatch {
            expected: tip.index.saturating_add(1),
            found: candidate.index,
        });
    }
    if candidate.prev_hash != tip.hash {
        return Err(Rejection::PrevHashMismatch {
            expected: tip.hash.clone(),
            found: candidate.prev_hash.clone(),
        });
    }
    let computed = digest(candidate);
    if computed != candidate.hash {
        return Err(Rejection::HashMismatch {
            stored: candidate.hash.clone(),
            computed,
        });
    }
    Ok(())
}

/// Genesis invariant: index 0, empty `prev_hash`, self-consistent hash.
pub fn check_genesis(block: &Block) -> Result<(), ChainError> {
    if block.index != 0 {
        return Err(ChainError::InvalidGenesis("index must be 0"));
    }
    if !block.prev_hash.is_empty() {
        return Err(ChainError::InvalidGenesis("previous hash must be empty"));
    }
    if !block.has_valid_hash() {
        return Err(ChainError::InvalidGenesis("hash does not match contents"));
    }
    Ok(())
}

/// Shared, append-only chain of validated blocks.
///
/// Cloning yields another handle to the same chain. Every append goes through
/// [`ChainStore::try_append`], which holds the write lock across reading the
/// tip, validating and pushing, so two candidates built on the same tip can
/// never both land.
#[derive(Clone, Default)]
pub struct ChainStore {
    blocks: Arc<RwLock<Vec<Block>>>,
}

impl ChainStore {
    /// A store with no genesis yet. Only useful before initialization.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_genesis(genesis: Block) -> Result<Self, ChainError> {
        let store = Self::empty();
        store.install_genesis(genesis)?;
        Ok(store)
    }

    /// Install the genesis block. Fails if the block breaks the genesis
    /// invariant or the chain already has one.
    pub fn install_genesis(&self, genesis: Block) -> Result<(), ChainError> {
        check_genesis(&genesis)?;
        let mut blocks = self.blocks.write();
        if !blocks.is_empty() {
            return Err(ChainError::InvalidGenesis("chain already initialized"));
        }
        info!(hash = %genesis.hash, "genesis block installed");
        blocks.push(genesis);
        Ok(())
    }

    pub fn tip(&self) -> Result<Block, ChainError> {
        self.blocks.read().last().cloned().ok_or(ChainError::EmptyChain)
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }

    pub fn get(&self, index: u64) -> Option<Block> {
        let idx = usize::try_from(index).ok()?;
        self.blocks.read().get(idx).cloned()
    }

    /// Snapshot of the whole chain.
    pub fn blocks(&self) -> Vec<Block> {
        self.blocks.read().clone()
    }

    /// Append `candidate` if it validly extends the current tip.
    ///
    /// `Ok(())` means the block is now the tip. On any error the chain is
    /// left untouched.
    pub fn try_append(&self, candidate: Block) -> Result<(), ChainError> {
        let mut blocks = self.blocks.write();
        let tip = blocks.last().ok_or(ChainError::EmptyChain)?;
        if let Err(rejection) = validate(&candidate, tip) {
            debug!(index = candidate.index, %rejection, "candidate rejected");
            return Err(rejection.into());
        }
        info!(index = candidate.index, hash = %candidate.hash, "block appended");
        blocks.push(candidate);
        Ok(())
    }

    /// Re-check the genesis block and every adjacent pair.
    pub fn verify(&self) -> Result<(), ChainError> {
        let blocks = self.blocks.read();
        let genesis = blocks.first().ok_or(ChainError::EmptyChain)?;
        check_genesis(genesis)?;
        for pair in blocks.windows(2) {
            validate(&pair[1], &pair[0])?;
        }
        Ok(())
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&*self.blocks.read())
    }
}
