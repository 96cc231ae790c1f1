//! The minimal chain lookup interface the state consumes.

use std::collections::HashMap;

use alloy_primitives::{B256, U256};
use tracing::debug;

use rust_eth_ledger_types::BlockInfo;

use crate::StateError;

/// Chain lookups the state needs: the canonical head, raw blocks by hash,
/// and child links for uncle gathering. Validation and replay stay on the
/// state side; a chain store only answers these queries.
pub trait BlockChain {
    /// Hash of the canonical head.
    fn current_hash(&self) -> B256;
    /// Raw block bytes by header hash.
    fn block(&self, hash: &B256) -> Option<Vec<u8>>;
    /// Hashes of the known children of a block.
    fn children_of(&self, hash: &B256) -> Vec<B256>;
    /// The genesis header of this chain.
    fn genesis(&self) -> &BlockInfo;
}

/// In-memory chain store.
///
/// Tracks total difficulty per block and keeps the heaviest known block as
/// the canonical head. Blocks are assumed validated by the importer (a
/// `State` replay); this store only indexes them.
#[derive(Debug, Clone)]
pub struct MemoryChain {
    blocks: HashMap<B256, Vec<u8>>,
    children: HashMap<B256, Vec<B256>>,
    total_difficulty: HashMap<B256, U256>,
    genesis: BlockInfo,
    current: B256,
}

impl MemoryChain {
    /// A chain holding only the genesis block.
    pub fn new(genesis: BlockInfo, genesis_block: Vec<u8>) -> Self {
        let mut blocks = HashMap::new();
        blocks.insert(genesis.hash, genesis_block);
        let mut total_difficulty = HashMap::new();
        total_difficulty.insert(genesis.hash, genesis.difficulty);
        let current = genesis.hash;
        Self { blocks, children: HashMap::new(), total_difficulty, genesis, current }
    }

    /// Indexes a block whose parent is already known. `difficulty_increment`
    /// is the block's contribution to total difficulty (its own difficulty
    /// plus its uncles', as reported by the replay); the head moves when the
    /// new total difficulty beats the current one.
    pub fn import(
        &mut self,
        block: Vec<u8>,
        difficulty_increment: U256,
    ) -> Result<B256, StateError> {
        let info = BlockInfo::from_block(&block)?;
        let parent_td = *self
            .total_difficulty
            .get(&info.parent_hash)
            .ok_or(StateError::UnknownBlock(info.parent_hash))?;
        let td = parent_td.saturating_add(difficulty_increment);

        self.blocks.insert(info.hash, block);
        self.children.entry(info.parent_hash).or_default().push(info.hash);
        self.total_difficulty.insert(info.hash, td);

        let current_td = self.total_difficulty.get(&self.current).copied().unwrap_or_default();
        if td > current_td {
            debug!(target: "chain", hash = %info.hash, %td, "new canonical head");
            self.current = info.hash;
        }
        Ok(info.hash)
    }

    /// Number of blocks known, genesis included.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether only the genesis block is known.
    pub fn is_empty(&self) -> bool {
        self.blocks.len() <= 1
    }
}

impl BlockChain for MemoryChain {
    fn current_hash(&self) -> B256 {
        self.current
    }

    fn block(&self, hash: &B256) -> Option<Vec<u8>> {
        self.blocks.get(hash).cloned()
    }

    fn children_of(&self, hash: &B256) -> Vec<B256> {
        self.children.get(hash).cloned().unwrap_or_default()
    }

    fn genesis(&self) -> &BlockInfo {
        &self.genesis
    }
}
