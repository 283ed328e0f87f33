//! The narrow seam between the sync core and "everything that knows what a
//! block actually is" — transaction execution, signature verification,
//! producer scheduling. None of that lives here; `ChainController` is the
//! interface `glint-netp2p`'s callers use to answer the handful of
//! questions the sync state machine needs answered, and
//! `InMemoryChainController` is a test double that answers them honestly
//! for whatever bytes it's handed, with no validation behind it.

use glint_core::{BlockId, BlockNum};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("block {block_num} does not link to our head (expected previous {expected}, got {actual})")]
    Unlinked { block_num: BlockNum, expected: BlockId, actual: BlockId },
}

#[derive(Debug, Clone)]
pub struct Block {
    pub block_num: BlockNum,
    pub id: BlockId,
    pub previous: BlockId,
    pub payload: Vec<u8>,
}

/// What the sync core needs to know about the chain, and the one operation
/// it needs to perform on it. Everything else — how a block is validated,
/// how its id is computed, what's inside its payload — is out of scope.
pub trait ChainController: Send + Sync {
    fn head(&self) -> BlockNum;
    fn head_id(&self) -> BlockId;
    fn lib(&self) -> BlockNum;
    fn block_id_for(&self, num: BlockNum) -> Option<BlockId>;

    /// Applies `block` if it links to our current head. Returns `Ok(true)`
    /// when it became the new head, `Ok(false)` when it was already known
    /// (idempotent replay), or an error when it doesn't link.
    fn apply_block(&mut self, block: Block) -> Result<bool, ApplyError>;
}

pub struct InMemoryChainController {
    blocks: HashMap<BlockNum, Block>,
    head: BlockNum,
    head_id: BlockId,
    lib: BlockNum,
}

impl InMemoryChainController {
    pub fn new(genesis_id: BlockId) -> Self {
        InMemoryChainController { blocks: HashMap::new(), head: 0, head_id: genesis_id, lib: 0 }
    }

    pub fn set_lib(&mut self, lib: BlockNum) {
        self.lib = lib.min(self.head);
    }

    pub fn block(&self, num: BlockNum) -> Option<&Block> {
        self.blocks.get(&num)
    }
}

impl ChainController for InMemoryChainController {
    fn head(&self) -> BlockNum {
        self.head
    }

    fn head_id(&self) -> BlockId {
        self.head_id
    }

    fn lib(&self) -> BlockNum {
        self.lib
    }

    fn block_id_for(&self, num: BlockNum) -> Option<BlockId> {
        self.blocks.get(&num).map(|b| b.id)
    }

    fn apply_block(&mut self, block: Block) -> Result<bool, ApplyError> {
        if let Some(existing) = self.blocks.get(&block.block_num) {
            if existing.id == block.id {
                return Ok(false);
            }
        }
        if block.block_num != self.head + 1 {
            return Err(ApplyError::Unlinked { block_num: block.block_num, expected: self.head_id, actual: block.previous });
        }
        if block.previous != self.head_id {
            return Err(ApplyError::Unlinked { block_num: block.block_num, expected: self.head_id, actual: block.previous });
        }
        self.head = block.block_num;
        self.head_id = block.id;
        let num = block.block_num;
        self.blocks.insert(num, block);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(num: BlockNum, previous: BlockId) -> Block {
        Block { block_num: num, id: BlockId::with_num_and_tail(num, &[num as u8; 28]), previous, payload: vec![] }
    }

    #[test]
    fn linking_block_advances_head() {
        let mut ctl = InMemoryChainController::new(BlockId::ZERO);
        let b1 = block(1, BlockId::ZERO);
        let id1 = b1.id;
        assert!(ctl.apply_block(b1).unwrap());
        assert_eq!(ctl.head(), 1);
        assert_eq!(ctl.head_id(), id1);
    }

    #[test]
    fn replaying_the_same_block_is_a_no_op() {
        let mut ctl = InMemoryChainController::new(BlockId::ZERO);
        let b1 = block(1, BlockId::ZERO);
        ctl.apply_block(b1.clone()).unwrap();
        assert!(!ctl.apply_block(b1).unwrap());
    }

    #[test]
    fn unlinked_block_is_rejected() {
        let mut ctl = InMemoryChainController::new(BlockId::ZERO);
        let bogus = block(1, BlockId::with_num_and_tail(99, &[9; 28]));
        assert!(matches!(ctl.apply_block(bogus), Err(ApplyError::Unlinked { .. })));
    }

    #[test]
    fn block_id_for_known_height_resolves() {
        let mut ctl = InMemoryChainController::new(BlockId::ZERO);
        let b1 = block(1, BlockId::ZERO);
        let id1 = b1.id;
        ctl.apply_block(b1).unwrap();
        assert_eq!(ctl.block_id_for(1), Some(id1));
        assert_eq!(ctl.block_id_for(2), None);
    }
}
